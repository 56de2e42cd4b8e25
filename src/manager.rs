use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::context::History;
use crate::error::ChatError;
use crate::events::ChatEvent;
use crate::inference::InferenceProvider;
use crate::tools::{ResponseMode, ToolHandler, ToolRegistry};
use crate::turn::{BoxFuture, TurnEngine, TurnOptions};
use crate::types::{Message, Participant, Usage};
use crate::ManagerConfig;

const EVENT_CAPACITY: usize = 64;

pub(crate) type AnswerSink = Arc<dyn Fn(String) + Send + Sync>;
pub(crate) type SummaryFormatter = Arc<dyn Fn(&str) -> String + Send + Sync>;
type Callback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Everything a turn reads or writes. Locked only for short synchronous
/// sections, never across an await.
pub(crate) struct ConversationState {
    pub pending: VecDeque<Message>,
    pub history: History,
    pub tools: ToolRegistry,
    pub forced_tool: Option<String>,
    pub prefix_with_user_names: bool,
    pub answer_sink: Option<AnswerSink>,
    pub formatter: Option<SummaryFormatter>,
    pub usage: Usage,
}

pub(crate) struct Shared {
    state: Mutex<ConversationState>,
    stop: CancellationToken,
    events: broadcast::Sender<ChatEvent>,
    pub config: ManagerConfig,
}

impl Shared {
    pub fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn report_error(&self, error: ChatError) {
        error!(%error, "conversation error");
        self.emit(ChatEvent::Error { error });
    }
}

/// Work for the conversation worker, consumed strictly in order.
enum Job {
    Turn(TurnOptions),
    WhenReady(Callback),
    WhenDone(Callback),
    Summarize {
        word_count: usize,
        reply: oneshot::Sender<Result<String, ChatError>>,
    },
}

/// Handle to a conversation with the model.
///
/// Every enqueue lands in the pending queue at once and schedules a turn on
/// a single worker task, so turns run one at a time in the order they were
/// scheduled. Messages that arrive while a turn is waiting on the model are
/// buffered and picked up by the next turn. Cloning the handle is cheap and
/// every clone drives the same conversation; the worker exits once the last
/// handle is dropped.
#[derive(Clone)]
pub struct ConversationManager {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl ConversationManager {
    /// Create the conversation and spawn its worker. Must be called from
    /// within a Tokio runtime.
    pub fn new(provider: impl InferenceProvider + 'static, config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(ConversationState {
                pending: VecDeque::new(),
                history: History::new(),
                tools: ToolRegistry::new(config.enable_tools),
                forced_tool: None,
                prefix_with_user_names: config.prefix_with_user_names,
                answer_sink: None,
                formatter: None,
                usage: Usage::default(),
            }),
            stop: CancellationToken::new(),
            events,
            config,
        });

        let (jobs, rx) = mpsc::unbounded_channel();
        let engine = TurnEngine::new(Arc::clone(&shared), Arc::new(provider));
        tokio::spawn(work(engine, Arc::clone(&shared), rx, jobs.downgrade()));

        info!(model = %shared.config.model, backend = ?shared.config.backend, "conversation started");
        Self { shared, jobs }
    }

    /// Receive start/stop talking and error notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.shared.events.subscribe()
    }

    /// Called with the final text of every turn that asked for its answer
    /// to be dispatched.
    pub fn set_answer_sink(&self, sink: impl Fn(String) + Send + Sync + 'static) {
        self.shared.state().answer_sink = Some(Arc::new(sink));
    }

    /// Turns the model's summary into the system message that replaces a
    /// compacted history. Compaction fails without one.
    pub fn set_summary_formatter(&self, formatter: impl Fn(&str) -> String + Send + Sync + 'static) {
        self.shared.state().formatter = Some(Arc::new(formatter));
    }

    pub fn add_system_message(&self, content: impl Into<String>) {
        self.enqueue(Message::system(content), TurnOptions::VISIBLE);
    }

    /// Add a system message whose answer goes to `on_answer` instead of the
    /// answer sink. No typing indicator is shown for it.
    pub fn add_system_message_with_callback(
        &self,
        content: impl Into<String>,
        on_answer: impl FnOnce(String) + Send + 'static,
    ) {
        let message = Message::System {
            content: content.into(),
            on_answer: Some(Box::new(on_answer)),
        };
        self.enqueue(message, TurnOptions::SILENT);
    }

    pub fn add_user_message(&self, content: impl Into<String>, participant: Participant) {
        self.enqueue(Message::user(content, participant), TurnOptions::VISIBLE);
    }

    /// Queue a user message without scheduling a turn. It goes out with the
    /// next turn someone else schedules.
    pub fn queue_user_message(&self, content: impl Into<String>, participant: Participant) {
        self.shared
            .state()
            .pending
            .push_back(Message::user(content, participant));
    }

    fn enqueue(&self, message: Message, options: TurnOptions) {
        self.shared.state().pending.push_back(message);
        self.schedule(Job::Turn(options));
    }

    fn schedule(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            self.shared.report_error(ChatError::Closed);
        }
    }

    /// Register a tool whose arguments decode into `A`.
    pub fn register_tool<A, F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        callback: F,
        mode: ResponseMode,
    ) where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        self.shared
            .state()
            .tools
            .register(name, description, schema, callback, mode);
    }

    pub fn register_tool_handler(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: impl ToolHandler + 'static,
        mode: ResponseMode,
    ) {
        self.shared
            .state()
            .tools
            .register_handler(name, description, schema, handler, mode);
    }

    /// Force the model to call this tool on every turn. `None` lets it choose.
    pub fn force_tool(&self, name: Option<String>) {
        self.shared.state().forced_tool = name;
    }

    pub fn set_prefix_with_user_names(&self, prefix: bool) {
        self.shared.state().prefix_with_user_names = prefix;
    }

    pub fn prefix_with_user_names(&self) -> bool {
        self.shared.state().prefix_with_user_names
    }

    /// Replace the first system message of the history, or prepend one.
    pub fn replace_first_system_message(&self, content: impl Into<String>) {
        self.shared
            .state()
            .history
            .replace_first_system(content.into());
    }

    /// Ids of everyone who spoke in the committed history.
    pub fn participants(&self) -> Vec<String> {
        self.shared.state().history.participants()
    }

    /// A snapshot of the committed history.
    pub fn history(&self) -> Vec<Message> {
        self.shared
            .state()
            .history
            .messages()
            .iter()
            .map(Message::detached)
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Token usage reported by the backend over the life of the conversation.
    pub fn usage(&self) -> Usage {
        self.shared.state().usage.clone()
    }

    /// Stop the conversation. A response that arrives afterwards is dropped
    /// without touching the history, and no further turn runs.
    pub fn stop(&self) {
        if !self.shared.is_stopped() {
            info!("conversation stopped");
        }
        self.shared.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Run `callback` once every job scheduled so far has finished.
    pub fn execute_when_ready<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(Job::WhenReady(Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(callback())
        })));
    }

    /// Like [`execute_when_ready`](Self::execute_when_ready), but waits until
    /// the pending queue is empty. While it is not, the callback stays parked
    /// and is checked again after the next scheduled job, so messages left by
    /// [`queue_user_message`](Self::queue_user_message) hold it until a turn
    /// picks them up.
    pub fn execute_when_done<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(Job::WhenDone(Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(callback())
        })));
    }

    /// Wait until every job scheduled so far has finished.
    pub async fn idle(&self) {
        let (tx, rx) = oneshot::channel();
        self.execute_when_ready(move || async move {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// Summarize the conversation in about `word_count` words and replace
    /// the whole history with the formatted summary. Runs after every job
    /// scheduled so far. Returns the raw summary.
    pub async fn summarize(&self, word_count: usize) -> Result<String, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job::Summarize { word_count, reply })
            .map_err(|_| ChatError::Closed)?;
        rx.await.map_err(|_| ChatError::Closed)?
    }
}

async fn work(
    mut engine: TurnEngine,
    shared: Arc<Shared>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    requeue: mpsc::WeakUnboundedSender<Job>,
) {
    // Deferred callbacks waiting for the pending queue to drain. They only
    // go back in line once some other job has run.
    let mut parked: Vec<Callback> = Vec::new();

    while let Some(job) = jobs.recv().await {
        let woke = !matches!(job, Job::WhenDone(_));
        match job {
            Job::Turn(options) => engine.scheduled_turn(options).await,
            Job::WhenReady(callback) => callback().await,
            Job::WhenDone(callback) => {
                if shared.is_stopped() {
                    debug!("conversation stopped, dropping deferred callback");
                    continue;
                }
                let idle = shared.state().pending.is_empty();
                if idle {
                    callback().await;
                } else {
                    parked.push(callback);
                }
            }
            Job::Summarize { word_count, reply } => {
                let result = if shared.is_stopped() {
                    Err(ChatError::Stopped)
                } else {
                    engine.compact(word_count).await
                };
                let _ = reply.send(result);
            }
        }

        if woke && !parked.is_empty() {
            if shared.is_stopped() {
                debug!(count = parked.len(), "conversation stopped, dropping deferred callbacks");
                parked.clear();
            } else if let Some(jobs) = requeue.upgrade() {
                for callback in parked.drain(..) {
                    let _ = jobs.send(Job::WhenDone(callback));
                }
            }
        }
    }
    debug!("conversation worker finished");
}

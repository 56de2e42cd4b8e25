use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::context::summary_prompt;
use crate::error::ChatError;
use crate::events::ChatEvent;
use crate::inference::InferenceProvider;
use crate::manager::Shared;
use crate::tools::ResponseMode;
use crate::types::{InferenceRequest, InferenceResponse, Message, OnAnswer, OutgoingMessage};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the scheduler wants done around a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TurnOptions {
    pub typing_indicator: bool,
    pub dispatch_answer: bool,
}

impl TurnOptions {
    pub const VISIBLE: TurnOptions = TurnOptions {
        typing_indicator: true,
        dispatch_answer: true,
    };

    pub const SILENT: TurnOptions = TurnOptions {
        typing_indicator: false,
        dispatch_answer: false,
    };
}

/// Runs turns against the model. Owned by the conversation worker, so only
/// one turn is ever in flight.
pub(crate) struct TurnEngine {
    shared: Arc<Shared>,
    provider: Arc<dyn InferenceProvider>,
    talking: bool,
    compacting: bool,
}

impl TurnEngine {
    pub fn new(shared: Arc<Shared>, provider: Arc<dyn InferenceProvider>) -> Self {
        Self {
            shared,
            provider,
            talking: false,
            compacting: false,
        }
    }

    /// A turn as scheduled by the public API. Errors never escape: they go
    /// to the error stream so the next scheduled job still runs.
    pub async fn scheduled_turn(&mut self, options: TurnOptions) {
        if self.shared.is_stopped() {
            debug!("conversation stopped, skipping turn");
            return;
        }

        let result = self.run(options).await;

        if std::mem::take(&mut self.talking) {
            self.shared.emit(ChatEvent::StopTalking);
        }

        match result {
            Ok(Some(text)) if options.dispatch_answer && !text.is_empty() => {
                self.dispatch_answer(text)
            }
            Ok(_) => {}
            Err(error) => self.shared.report_error(error),
        }
    }

    fn dispatch_answer(&self, text: String) {
        if self.shared.is_stopped() {
            return;
        }
        let sink = self.shared.state().answer_sink.clone();
        match sink {
            Some(sink) => sink(text),
            None => self.shared.report_error(ChatError::Configuration(
                "no answer sink registered".into(),
            )),
        }
    }

    /// One request/response exchange. Returns the final text, or `None` when
    /// nothing was sent or the conversation was stopped mid-flight.
    pub fn run(&mut self, options: TurnOptions) -> BoxFuture<'_, Result<Option<String>, ChatError>> {
        Box::pin(self.run_inner(options))
    }

    async fn run_inner(&mut self, options: TurnOptions) -> Result<Option<String>, ChatError> {
        let Some((request, on_answer)) = self.prepare_request()? else {
            return Ok(None);
        };

        if options.typing_indicator {
            self.talking = true;
            self.shared.emit(ChatEvent::StartTalking);
        }

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            forced_tool = ?request.forced_tool,
            "sending turn"
        );
        let response = self.provider.infer(request).await?;

        if self.shared.is_stopped() {
            debug!("conversation stopped while waiting for the model, discarding response");
            return Ok(None);
        }

        let InferenceResponse {
            content,
            tool_calls,
            usage,
        } = response;
        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            tool_calls = tool_calls.len(),
            "model answered"
        );

        {
            let mut state = self.shared.state();
            state.usage.accumulate(&usage);
            let has_content = content.as_deref().is_some_and(|c| !c.is_empty());
            if has_content || !tool_calls.is_empty() {
                state.history.push(Message::Assistant {
                    content: content.clone(),
                    tool_invocations: tool_calls.clone(),
                });
            }
        }

        let mut recurse = false;
        for call in &tool_calls {
            let tool = self
                .shared
                .state()
                .tools
                .get(&call.name)
                .ok_or_else(|| ChatError::Protocol(format!("unknown tool: {}", call.name)))?;

            // A bad argument payload ends tool handling for the whole response.
            let input: Value = match serde_json::from_str(&call.arguments) {
                Ok(input) => input,
                Err(e) => {
                    warn!(
                        tool = %call.name,
                        arguments = %call.arguments,
                        error = %e,
                        "could not parse tool arguments, skipping remaining tool calls"
                    );
                    break;
                }
            };

            let output = match tool.invoke(input).await {
                Ok(output) => output,
                Err(ChatError::ToolArgument { tool: name, message }) => {
                    warn!(
                        tool = %name,
                        %message,
                        "invalid tool arguments, skipping remaining tool calls"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            if self.shared.is_stopped() {
                debug!(tool = %call.name, "conversation stopped during tool call");
                return Ok(None);
            }

            self.shared.state().pending.push_front(Message::ToolResult {
                tool_call_id: call.id.clone(),
                content: output,
            });
            if tool.mode == ResponseMode::Synchronous {
                recurse = true;
            }
        }

        let mut content = content;
        if recurse {
            content = self.run(options).await?;
            if self.shared.is_stopped() {
                return Ok(None);
            }
        }

        if let Some(on_answer) = on_answer {
            match content.as_deref().filter(|c| !c.is_empty()) {
                Some(text) => on_answer(text.to_string()),
                None => {
                    return Err(ChatError::Configuration(
                        "no message received for the callback of a system message".into(),
                    ))
                }
            }
        }

        if !self.compacting {
            let tokens = self.shared.state().history.estimate_tokens();
            let trigger = self.shared.config.summary_token_trigger;
            if tokens > trigger {
                info!(tokens, trigger, "history too long, compacting");
                self.compact(self.shared.config.summary_word_count).await?;
            }
        }

        Ok(content)
    }

    /// Commit the pending queue into history and build the request. `None`
    /// when there is nothing to send.
    fn prepare_request(&self) -> Result<Option<(InferenceRequest, Option<OnAnswer>)>, ChatError> {
        let mut state = self.shared.state();
        if state.pending.is_empty() {
            return Ok(None);
        }

        // Tool results first: each goes right after the call that asked for it.
        let (results, rest): (Vec<Message>, Vec<Message>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(Message::is_tool_result);
        let mut rest = VecDeque::from(rest);
        if let Err(e) = state.history.splice_tool_results(results) {
            state.pending = rest;
            return Err(e);
        }

        // User messages batch together; a system message starts a turn alone.
        let mut batched = false;
        let mut on_answer = None;
        while let Some(next) = rest.pop_front() {
            match next {
                Message::System {
                    content,
                    on_answer: callback,
                } => {
                    if batched {
                        rest.push_front(Message::System {
                            content,
                            on_answer: callback,
                        });
                        break;
                    }
                    on_answer = callback;
                    state.history.push(Message::system(content));
                    break;
                }
                other => {
                    batched = true;
                    state.history.push(other);
                }
            }
        }
        state.pending = rest;

        let mut messages = state.history.to_outgoing(state.prefix_with_user_names);
        if self.shared.config.backend.requires_user_message()
            && !messages
                .iter()
                .any(|m| matches!(m, OutgoingMessage::User { .. }))
        {
            messages.push(OutgoingMessage::User {
                content: " ".into(),
            });
        }

        let request = InferenceRequest {
            model: self.shared.config.model.clone(),
            messages,
            tools: state.tools.descriptors(),
            forced_tool: state.forced_tool.clone(),
        };
        Ok(Some((request, on_answer)))
    }

    /// Ask the model to summarize the conversation, then replace the whole
    /// history with the formatted summary. Returns the raw summary.
    pub async fn compact(&mut self, word_count: usize) -> Result<String, ChatError> {
        let formatter = self.shared.state().formatter.clone().ok_or_else(|| {
            ChatError::Configuration(
                "the chat history is too big and no summary formatter is registered".into(),
            )
        })?;

        let (tx, mut rx) = oneshot::channel();
        self.shared.state().pending.push_front(Message::System {
            content: summary_prompt(word_count),
            on_answer: Some(Box::new(move |summary: String| {
                let _ = tx.send(summary);
            })),
        });

        self.compacting = true;
        let result = self.run(TurnOptions::SILENT).await;
        self.compacting = false;
        result?;

        if self.shared.is_stopped() {
            return Err(ChatError::Stopped);
        }
        let summary = rx.try_recv().map_err(|_| {
            ChatError::Protocol("summary turn finished without an answer".into())
        })?;

        // The formatter may read the conversation back, so run it unlocked.
        let system = formatter(&summary);
        let mut state = self.shared.state();
        let pre_messages = state.history.len();
        state.history.compact(system);
        drop(state);
        info!(pre_messages, word_count, "conversation summarized");
        Ok(summary)
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invoked once with the text the model produced in answer to a system message.
pub type OnAnswer = Box<dyn FnOnce(String) + Send>;

/// Someone in the space who can talk to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A function call requested by the model. `arguments` is the raw text the
/// backend sent, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One entry of the pending queue or the committed history.
pub enum Message {
    System {
        content: String,
        on_answer: Option<OnAnswer>,
    },
    Assistant {
        content: Option<String>,
        tool_invocations: Vec<ToolInvocation>,
    },
    User {
        content: String,
        participant: Participant,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
            on_answer: None,
        }
    }

    pub fn user(content: impl Into<String>, participant: Participant) -> Self {
        Message::User {
            content: content.into(),
            participant,
        }
    }

    /// Text content, empty for an assistant turn that only called tools.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content, .. }
            | Message::User { content, .. }
            | Message::ToolResult { content, .. } => content,
            Message::Assistant { content, .. } => content.as_deref().unwrap_or(""),
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }

    /// True for an assistant message that requested the given tool call.
    pub fn invokes(&self, call_id: &str) -> bool {
        match self {
            Message::Assistant {
                tool_invocations, ..
            } => tool_invocations.iter().any(|t| t.id == call_id),
            _ => false,
        }
    }

    /// A copy without the answer callback, used for history snapshots.
    pub fn detached(&self) -> Message {
        match self {
            Message::System { content, .. } => Message::system(content.clone()),
            Message::Assistant {
                content,
                tool_invocations,
            } => Message::Assistant {
                content: content.clone(),
                tool_invocations: tool_invocations.clone(),
            },
            Message::User {
                content,
                participant,
            } => Message::user(content.clone(), participant.clone()),
            Message::ToolResult {
                tool_call_id,
                content,
            } => Message::ToolResult {
                tool_call_id: tool_call_id.clone(),
                content: content.clone(),
            },
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::System { content, on_answer } => f
                .debug_struct("System")
                .field("content", content)
                .field("on_answer", &on_answer.is_some())
                .finish(),
            Message::Assistant {
                content,
                tool_invocations,
            } => f
                .debug_struct("Assistant")
                .field("content", content)
                .field("tool_invocations", tool_invocations)
                .finish(),
            Message::User {
                content,
                participant,
            } => f
                .debug_struct("User")
                .field("content", content)
                .field("participant", participant)
                .finish(),
            Message::ToolResult {
                tool_call_id,
                content,
            } => f
                .debug_struct("ToolResult")
                .field("tool_call_id", tool_call_id)
                .field("content", content)
                .finish(),
        }
    }
}

/// A message as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolInvocation>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl OutgoingMessage {
    pub fn content(&self) -> Option<&str> {
        match self {
            OutgoingMessage::System { content }
            | OutgoingMessage::User { content }
            | OutgoingMessage::Tool { content, .. } => Some(content),
            OutgoingMessage::Assistant { content, .. } => content.as_deref(),
        }
    }
}

/// What the model is told about a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Fully-formed request. The provider just sends it.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: String,
    pub messages: Vec<OutgoingMessage>,
    pub tools: Vec<ToolDescriptor>,
    /// Pins tool choice to this tool when set.
    pub forced_tool: Option<String>,
}

/// What came back from the LLM.
#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Usage,
}

/// Token usage for a single inference call.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates_without_overflow() {
        let mut total = Usage {
            input_tokens: 10,
            output_tokens: u64::MAX - 1,
        };
        total.accumulate(&Usage {
            input_tokens: 5_000_000_000,
            output_tokens: 7,
        });
        assert_eq!(total.input_tokens, 5_000_000_010);
        assert_eq!(total.output_tokens, u64::MAX);
    }
}

use tracing::debug;

use crate::error::ChatError;
use crate::types::{Message, OutgoingMessage};

/// Tokens per 75 words, per OpenAI's rule of thumb (100 tokens ~= 75 words).
const TOKENS_PER_75_WORDS: u64 = 100;

/// Count words the way a reader would. Each CJK ideograph counts as a word
/// on its own; everything else is split on whitespace and punctuation.
pub fn count_words(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if is_cjk(c) {
            count += 1;
            in_word = false;
        } else if c.is_whitespace() || c.is_ascii_punctuation() || is_general_punctuation(c) {
            in_word = false;
        } else if !in_word {
            count += 1;
            in_word = true;
        }
    }
    count
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // kana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF)   // compatibility ideographs
}

fn is_general_punctuation(c: char) -> bool {
    matches!(c as u32, 0x2000..=0x206F | 0x3000..=0x303F | 0xFF00..=0xFF0F)
}

/// Estimate the token count of a set of messages from their word count.
pub fn estimate_tokens<'a>(messages: impl IntoIterator<Item = &'a Message>) -> u64 {
    let text = messages
        .into_iter()
        .map(Message::content)
        .collect::<Vec<_>>()
        .join("\n");
    // Rounded up so that `estimate > trigger` matches the exact fraction.
    (count_words(&text) as u64 * TOKENS_PER_75_WORDS).div_ceil(75)
}

/// Instruction sent to the model when the history must be compacted.
pub fn summary_prompt(word_count: usize) -> String {
    format!(
        "Please make a summary of the conversation you were having. Do not make the summary \
         longer than {word_count} words. Please include in the summary who said what."
    )
}

/// The committed conversation. Append-only, except for tool results that are
/// spliced next to their call and for compaction, which replaces everything.
#[derive(Debug, Default)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Insert each tool result right after the assistant message that
    /// requested it. Nothing is inserted unless every result has a match.
    pub fn splice_tool_results(&mut self, results: Vec<Message>) -> Result<(), ChatError> {
        for result in &results {
            if let Message::ToolResult { tool_call_id, .. } = result {
                if !self.messages.iter().any(|m| m.invokes(tool_call_id)) {
                    return Err(ChatError::Protocol(format!(
                        "could not find tool call with id {tool_call_id:?} in history"
                    )));
                }
            }
        }

        for result in results {
            let Message::ToolResult { tool_call_id, .. } = &result else {
                continue;
            };
            let position = self
                .messages
                .iter()
                .position(|m| m.invokes(tool_call_id))
                .map(|i| i + 1)
                .unwrap_or(self.messages.len());
            self.messages.insert(position, result);
        }
        Ok(())
    }

    /// Rewrite the first system message, or prepend one if there is none.
    pub fn replace_first_system(&mut self, new_content: String) {
        for message in &mut self.messages {
            if let Message::System { content, .. } = message {
                *content = new_content;
                return;
            }
        }
        self.messages.insert(0, Message::system(new_content));
    }

    /// Distinct participant ids, in the order they first spoke.
    pub fn participants(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for message in &self.messages {
            if let Message::User { participant, .. } = message {
                if !ids.contains(&participant.id) {
                    ids.push(participant.id.clone());
                }
            }
        }
        ids
    }

    pub fn estimate_tokens(&self) -> u64 {
        estimate_tokens(&self.messages)
    }

    /// Replace the whole history with a single system message.
    pub fn compact(&mut self, summary: String) {
        let pre_messages = self.messages.len();
        self.messages = vec![Message::system(summary)];
        debug!(pre_messages, post_messages = 1, "history compacted");
    }

    /// The history as the backend sees it.
    pub fn to_outgoing(&self, prefix_with_user_names: bool) -> Vec<OutgoingMessage> {
        self.messages
            .iter()
            .map(|message| match message {
                Message::System { content, .. } => OutgoingMessage::System {
                    content: content.clone(),
                },
                Message::User {
                    content,
                    participant,
                } => OutgoingMessage::User {
                    content: if prefix_with_user_names {
                        format!("{}: {content}", participant.name)
                    } else {
                        content.clone()
                    },
                },
                Message::Assistant {
                    content,
                    tool_invocations,
                } => OutgoingMessage::Assistant {
                    content: content.clone(),
                    tool_calls: tool_invocations.clone(),
                },
                Message::ToolResult {
                    tool_call_id,
                    content,
                } => OutgoingMessage::Tool {
                    tool_call_id: tool_call_id.clone(),
                    content: content.clone(),
                },
            })
            .collect()
    }
}

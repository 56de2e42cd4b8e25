pub mod context;
pub mod error;
pub mod events;
pub mod inference;
pub mod manager;
pub mod tools;
mod turn;
pub mod types;

use serde::Deserialize;

pub use context::{count_words, estimate_tokens, History};
pub use error::{ChatError, InferenceError};
pub use events::ChatEvent;
pub use inference::{InferenceProvider, OpenAiProvider};
pub use manager::ConversationManager;
pub use tools::{ResponseMode, ToolHandler, ToolRegistry};
pub use types::{
    InferenceRequest, InferenceResponse, Message, OutgoingMessage, Participant, ToolDescriptor,
    ToolInvocation, Usage,
};

/// Which kind of backend answers the bot. Some self-hosted servers reject a
/// conversation that has no user message at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendVariant {
    #[default]
    OpenAi,
    Realtime,
    CustomLlm,
}

impl BackendVariant {
    pub fn requires_user_message(self) -> bool {
        matches!(self, BackendVariant::CustomLlm)
    }
}

/// Conversation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub model: String,
    pub backend: BackendVariant,
    /// Target length, in words, of the summary that replaces a compacted history.
    pub summary_word_count: usize,
    /// Compact once the estimated token count of the history exceeds this.
    pub summary_token_trigger: u64,
    /// When false, tool registrations are ignored.
    pub enable_tools: bool,
    pub prefix_with_user_names: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            backend: BackendVariant::OpenAi,
            summary_word_count: 200,
            summary_token_trigger: 3200,
            enable_tools: true,
            prefix_with_user_names: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_loads_from_partial_json() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"model": "llama3", "backend": "customllm", "enable_tools": false}"#)
                .unwrap();
        assert_eq!(config.model, "llama3");
        assert_eq!(config.backend, BackendVariant::CustomLlm);
        assert!(!config.enable_tools);
        assert_eq!(config.summary_word_count, 200);
        assert_eq!(config.summary_token_trigger, 3200);
    }

    #[test]
    fn only_custom_backends_need_a_user_message() {
        assert!(BackendVariant::CustomLlm.requires_user_message());
        assert!(!BackendVariant::OpenAi.requires_user_message());
        assert!(!BackendVariant::Realtime.requires_user_message());
    }
}

use crate::error::ChatError;

/// Notifications emitted by the conversation, for the presentation layer.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A turn is about to ask the model. Drives the typing indicator.
    StartTalking,
    /// The turn that emitted `StartTalking` is over.
    StopTalking,
    Error { error: ChatError },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// History and tool-call wiring disagree. Always a bug in the caller or the backend.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid arguments for tool {tool}: {message}")]
    ToolArgument { tool: String, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] InferenceError),
    #[error("conversation stopped")]
    Stopped,
    #[error("conversation worker is gone")]
    Closed,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ChatError;

/// A tool's execution handler. Receives the untrusted arguments the model
/// sent and returns the text handed back to it.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, name: &str, input: Value) -> Result<String, ChatError>;
}

/// Whether a tool's result triggers another turn right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Ask the model again as soon as the result is queued.
    #[default]
    Synchronous,
    /// Leave the result queued for the next externally triggered turn.
    Deferred,
}

/// Handler that decodes its arguments into `A` before calling a closure.
pub struct TypedHandler<A, F> {
    callback: F,
    _args: PhantomData<fn() -> A>,
}

impl<A, F> TypedHandler<A, F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<A, F, Fut> ToolHandler for TypedHandler<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    async fn call(&self, name: &str, input: Value) -> Result<String, ChatError> {
        let args: A = serde_json::from_value(input).map_err(|e| ChatError::ToolArgument {
            tool: name.to_string(),
            message: e.to_string(),
        })?;
        Ok((self.callback)(args).await)
    }
}

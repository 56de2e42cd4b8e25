use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::InferenceProvider;
use crate::error::InferenceError;
use crate::types::{
    InferenceRequest, InferenceResponse, OutgoingMessage, ToolDescriptor, ToolInvocation, Usage,
};

/// OpenAI-compatible provider. Works with OpenAI itself, Azure deployments
/// behind a compatible gateway, or any custom LLM server implementing
/// `/v1/chat/completions`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Set an API key (required for OpenAI, optional for self-hosted servers).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn convert_tools(tools: &[ToolDescriptor]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }

    fn convert_messages(messages: &[OutgoingMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| match message {
                OutgoingMessage::System { content } => {
                    json!({ "role": "system", "content": content })
                }
                OutgoingMessage::User { content } => json!({ "role": "user", "content": content }),
                OutgoingMessage::Assistant {
                    content,
                    tool_calls,
                } => {
                    let mut msg = json!({ "role": "assistant", "content": content });
                    if !tool_calls.is_empty() {
                        msg["tool_calls"] = tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": call.arguments,
                                    }
                                })
                            })
                            .collect();
                    }
                    msg
                }
                OutgoingMessage::Tool {
                    tool_call_id,
                    content,
                } => json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }),
            })
            .collect()
    }

    fn build_body(request: &InferenceRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::convert_messages(&request.messages),
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(&request.tools));
            body["tool_choice"] = match request.forced_tool {
                Some(ref name) => json!({ "type": "function", "function": { "name": name } }),
                None => json!("auto"),
            };
        }

        body
    }

    fn parse_response(parsed: &Value) -> Result<InferenceResponse, InferenceError> {
        let message = parsed["choices"]
            .get(0)
            .map(|choice| &choice["message"])
            .filter(|message| message.is_object())
            .ok_or_else(|| InferenceError::Parse("response has no message".into()))?;

        let content = message["content"].as_str().map(String::from);

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    // Only function calls are part of the protocol.
                    .filter(|tc| tc["type"].as_str().unwrap_or("function") == "function")
                    .map(|tc| ToolInvocation {
                        id: tc["id"].as_str().unwrap_or("").to_string(),
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = Usage {
            input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(InferenceResponse {
            content,
            tool_calls,
            usage,
        })
    }
}

#[async_trait]
impl InferenceProvider for OpenAiProvider {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let body = Self::build_body(&request);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion request"
        );

        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        if status != 200 {
            return Err(InferenceError::ApiError { status, body: text });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| InferenceError::Parse(e.to_string()))?;

        Self::parse_response(&parsed)
    }
}

use super::errors::ModelError;
use crate::tools::ToolOutcome;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub use storage::Role;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The result the runtime returned from a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { tool_call_id: String, output: Value },
    Failure { tool_call_id: String, error: String },
}

impl ToolResult {
    pub fn new(tool_call_id: impl Into<String>, outcome: ToolOutcome) -> Self {
        let tool_call_id = tool_call_id.into();
        match outcome {
            ToolOutcome::Success(output) => Self::Success {
                tool_call_id,
                output,
            },
            ToolOutcome::Error(error) => Self::Failure {
                tool_call_id,
                error,
            },
        }
    }

    pub fn tool_call_id(&self) -> &str {
        match self {
            Self::Success { tool_call_id, .. } | Self::Failure { tool_call_id, .. } => {
                tool_call_id
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// The payload shown to the model.
    pub fn payload(&self) -> Value {
        match self {
            Self::Success { output, .. } => ToolOutcome::Success(output.clone()).to_payload(),
            Self::Failure { error, .. } => ToolOutcome::Error(error.clone()).to_payload(),
        }
    }
}

/// A part of a message, which can be text or a tool interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A message, consisting of a role and one or more parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn text_message(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, text)
    }

    /// A tool-role message carrying results back to the model.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            parts: results.into_iter().map(Part::ToolResult).collect(),
        }
    }

    /// Get combined text content from all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool calls from this message.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Everything needed for a model request.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

/// The response from a model.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: Message,
    pub usage: Usage,
}

/// One increment of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    Done { usage: Usage },
}

pub type ModelStream<'a> = BoxStream<'a, Result<StreamEvent, ModelError>>;

/// Trait for LLM provider backends.
pub trait Backend: Send + Sync {
    fn call(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;

    /// Stream a response.
    ///
    /// The default replays a single [`call`](Backend::call) as one text
    /// delta per text part, one event per tool call, then `Done`.
    fn stream<'a>(&'a self, request: ModelRequest<'a>) -> ModelStream<'a> {
        stream::once(self.call(request))
            .flat_map(|result| stream::iter(response_events(result)))
            .boxed()
    }
}

fn response_events(
    result: Result<ModelResponse, ModelError>,
) -> Vec<Result<StreamEvent, ModelError>> {
    let response = match result {
        Ok(response) => response,
        Err(e) => return vec![Err(e)],
    };
    let mut events: Vec<_> = response
        .message
        .parts
        .into_iter()
        .filter_map(|part| match part {
            Part::Text(text) if !text.is_empty() => Some(Ok(StreamEvent::TextDelta(text))),
            Part::ToolCall(call) => Some(Ok(StreamEvent::ToolCall(call))),
            _ => None,
        })
        .collect();
    events.push(Ok(StreamEvent::Done {
        usage: response.usage,
    }));
    events
}

/// A resolved model: which provider and model to use, and the backend that
/// talks to it.
#[derive(Debug)]
pub struct ModelHandle<B> {
    pub provider: String,
    pub model: String,
    pub enabled: bool,
    pub backend: Arc<B>,
}

impl<B> ModelHandle<B> {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, backend: B) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            enabled: true,
            backend: Arc::new(backend),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl<B> Clone for ModelHandle<B> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            model: self.model.clone(),
            enabled: self.enabled,
            backend: Arc::clone(&self.backend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn message_text_extraction() {
        let msg = Message {
            role: Role::Assistant,
            parts: vec![
                Part::Text("Hello ".into()),
                Part::ToolCall(ToolCall {
                    id: "1".into(),
                    name: "test".into(),
                    input: Value::Null,
                }),
                Part::Text("world".into()),
            ],
        };
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn message_tool_calls_extraction() {
        let msg = Message {
            role: Role::Assistant,
            parts: vec![
                Part::Text("Let me help".into()),
                Part::ToolCall(ToolCall {
                    id: "1".into(),
                    name: "search".into(),
                    input: Value::String("query".into()),
                }),
                Part::ToolCall(ToolCall {
                    id: "2".into(),
                    name: "read".into(),
                    input: Value::String("file".into()),
                }),
            ],
        };
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[1].name, "read");
    }

    #[test]
    fn tool_result_from_outcome() {
        let ok = ToolResult::new("a", ToolOutcome::Success(serde_json::json!({"n": 1})));
        let err = ToolResult::new("b", ToolOutcome::Error("boom".into()));
        assert!(!ok.is_error());
        assert!(err.is_error());
        assert_eq!(err.tool_call_id(), "b");
    }

    struct Canned;

    impl Backend for Canned {
        async fn call(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse {
                message: Message {
                    role: Role::Assistant,
                    parts: vec![
                        Part::Text("hi".into()),
                        Part::ToolCall(ToolCall {
                            id: "1".into(),
                            name: "echo".into(),
                            input: Value::Null,
                        }),
                    ],
                },
                usage: Usage {
                    input_tokens: 3,
                    output_tokens: 2,
                },
            })
        }
    }

    #[tokio::test]
    async fn default_stream_replays_call() {
        let messages = [Message::user("hello")];
        let events: Vec<StreamEvent> = Canned
            .stream(ModelRequest {
                messages: &messages,
                tools: &[],
            })
            .try_collect()
            .await
            .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::TextDelta("hi".into()));
        assert!(matches!(events[1], StreamEvent::ToolCall(ref call) if call.name == "echo"));
        assert!(matches!(events[2], StreamEvent::Done { usage } if usage.output_tokens == 2));
    }
}

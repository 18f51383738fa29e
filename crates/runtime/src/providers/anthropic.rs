//! Anthropic Messages API backend.
//!
//! Only the non-streaming `call` is implemented; streaming falls back to the
//! trait's default, which replays the whole response.

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolSpec,
    Usage,
};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

// OAuth tokens are only accepted with the Claude Code client identity.
const OAUTH_CLIENT_VERSION: &str = "2.1.2";
const OAUTH_BETA: &str = "claude-code-20250219,oauth-2025-04-20,fine-grained-tool-streaming-2025-05-14,interleaved-thinking-2025-05-14";
const OAUTH_IDENTITY: &str = "You are Claude Code, Anthropic's official CLI for Claude.";

/// Credential for the Messages API.
#[derive(Debug, Clone)]
pub enum AnthropicAuth {
    /// Standard API key (`sk-ant-api01-...`).
    ApiKey(String),
    /// Claude Code OAuth token (`sk-ant-oat-...`).
    ClaudeCodeOauth(String),
}

impl AnthropicAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => request.header("x-api-key", key),
            Self::ClaudeCodeOauth(token) => request
                .bearer_auth(token)
                .header("anthropic-beta", OAUTH_BETA)
                .header("anthropic-dangerous-direct-browser-access", "true")
                .header(
                    "user-agent",
                    format!("claude-cli/{OAUTH_CLIENT_VERSION} (external, cli)"),
                )
                .header("x-app", "cli"),
        }
    }

    /// OAuth sessions must open with the client identity block.
    fn system(&self, prompt: Option<String>) -> Option<Vec<TextBlock>> {
        let identity = match self {
            Self::ApiKey(_) => None,
            Self::ClaudeCodeOauth(_) => Some(OAUTH_IDENTITY.to_string()),
        };
        let blocks: Vec<TextBlock> = identity
            .into_iter()
            .chain(prompt)
            .map(TextBlock::new)
            .collect();
        (!blocks.is_empty()).then_some(blocks)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<TextBlock>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

impl TextBlock {
    fn new(text: String) -> Self {
        Self { kind: "text", text }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<OutBlock>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        // Tool results travel in user turns on this API.
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool | Role::System => "user",
        };
        let content = message
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => OutBlock::Text { text: text.clone() },
                Part::ToolCall(call) => OutBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                },
                Part::ToolResult(result) => OutBlock::ToolResult {
                    tool_use_id: result.tool_call_id().to_string(),
                    content: result.payload().to_string(),
                    is_error: result.is_error(),
                },
            })
            .collect();
        Self { role, content }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

impl<'a> From<&'a ToolSpec> for WireTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            name: &spec.name,
            description: &spec.description,
            input_schema: &spec.schema,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<InBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl From<WireResponse> for ModelResponse {
    fn from(response: WireResponse) -> Self {
        let parts = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                InBlock::Text { text } => Some(Part::Text(text)),
                InBlock::ToolUse { id, name, input } => {
                    Some(Part::ToolCall(ToolCall { id, name, input }))
                }
                InBlock::Other => None,
            })
            .collect();
        Self {
            message: Message {
                role: Role::Assistant,
                parts,
            },
            usage: response.usage,
        }
    }
}

/// Backend for one Anthropic model.
pub struct AnthropicBackend {
    client: reqwest::Client,
    auth: AnthropicAuth,
    model: String,
}

impl AnthropicBackend {
    pub fn new(auth: AnthropicAuth, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            model: model.into(),
        }
    }

    fn request<'a>(&'a self, request: &ModelRequest<'a>) -> WireRequest<'a> {
        // System messages are lifted out of the history into `system`.
        let (system, turns): (Vec<&Message>, Vec<&Message>) = request
            .messages
            .iter()
            .partition(|m| m.role == Role::System);
        let prompt: Vec<String> = system
            .into_iter()
            .map(Message::text)
            .filter(|text| !text.is_empty())
            .collect();

        WireRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: turns.into_iter().map(WireMessage::from).collect(),
            system: self
                .auth
                .system((!prompt.is_empty()).then(|| prompt.join("\n\n"))),
            tools: request.tools.iter().map(WireTool::from).collect(),
        }
    }
}

impl Backend for AnthropicBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.request(&request);
        let http = self
            .client
            .post(MESSAGES_URL)
            .header("anthropic-version", API_VERSION)
            .header("accept", "application/json");

        let response = self
            .auth
            .authorize(http)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {detail}")));
        }

        response
            .json::<WireResponse>()
            .await
            .map(ModelResponse::from)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolResult;
    use serde_json::json;

    fn wire(auth: AnthropicAuth, messages: &[Message], tools: &[ToolSpec]) -> Value {
        let backend = AnthropicBackend::new(auth, "claude-test");
        let request = ModelRequest { messages, tools };
        serde_json::to_value(backend.request(&request)).unwrap()
    }

    #[test]
    fn system_messages_move_to_system_field() {
        let messages = [
            Message::system("be brief"),
            Message::system("answer in French"),
            Message::user("hi"),
        ];
        let body = wire(AnthropicAuth::ApiKey("k".into()), &messages, &[]);

        assert_eq!(
            body["system"],
            json!([{"type": "text", "text": "be brief\n\nanswer in French"}])
        );
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": [{"type": "text", "text": "hi"}]}])
        );
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn oauth_prepends_client_identity() {
        let body = wire(
            AnthropicAuth::ClaudeCodeOauth("t".into()),
            &[Message::user("hi")],
            &[],
        );
        assert_eq!(body["system"][0]["text"], OAUTH_IDENTITY);
        assert_eq!(body["system"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn tools_are_declared() {
        let spec = ToolSpec {
            name: "read_file".into(),
            description: "Read a file".into(),
            schema: json!({"type": "object"}),
        };
        let body = wire(AnthropicAuth::ApiKey("k".into()), &[Message::user("hi")], &[spec]);
        assert_eq!(
            body["tools"],
            json!([{
                "name": "read_file",
                "description": "Read a file",
                "input_schema": {"type": "object"}
            }])
        );
    }

    #[test]
    fn tool_results_are_sent_as_user_blocks() {
        let message = Message::tool_results(vec![ToolResult::Failure {
            tool_call_id: "toolu_1".into(),
            error: "bad path".into(),
        }]);
        let api = serde_json::to_value(WireMessage::from(&message)).unwrap();
        assert_eq!(api["role"], "user");

        let block = &api["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "toolu_1");
        assert_eq!(block["is_error"], true);
        let content: Value = serde_json::from_str(block["content"].as_str().unwrap()).unwrap();
        assert_eq!(content, json!({"success": false, "error": "bad path"}));
    }

    #[test]
    fn response_blocks_become_parts() {
        let response: WireResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "toolu_2", "name": "read_file", "input": {"path": "a"}}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 7}
        }))
        .unwrap();

        let response = ModelResponse::from(response);
        assert_eq!(response.message.text(), "checking");
        assert_eq!(response.message.tool_calls()[0].name, "read_file");
        assert_eq!(response.usage.output_tokens, 7);
    }
}

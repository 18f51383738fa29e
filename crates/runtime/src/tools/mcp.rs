//! MCP (Model Context Protocol) tool source.
//!
//! Each configured server is spawned as a child process with the rmcp SDK;
//! its tools are registered under the server's name as a source.
//!
//! # Example
//!
//! ```ignore
//! use runtime::tools::{McpServerConfig, ToolRegistry, mcp};
//!
//! # async fn example() {
//! let config = McpServerConfig {
//!     name: "filesystem".into(),
//!     command: "mcp-filesystem".into(),
//!     args: vec!["--root".into(), "./workspace".into()],
//! };
//! let mut registry = ToolRegistry::new();
//! mcp::discover_into(&mut registry, &[config]).await;
//! # }
//! ```

use super::{ToolDescriptor, ToolError, ToolOutcome, ToolRegistry};
use policy::ToolGroup;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParams, Tool},
    service::{RoleClient, RunningService},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// How long a single MCP tool call may take.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for MCP operations.
pub type McpError = Box<dyn std::error::Error + Send + Sync>;

/// One `[[mcp_servers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// An MCP client connected to a server process.
pub struct McpClient {
    service: RunningService<RoleClient, ()>,
}

impl McpClient {
    /// Spawn an MCP server and connect to it.
    pub async fn spawn(
        command: impl AsRef<str>,
        args: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, McpError> {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();

        let transport = TokioChildProcess::new(Command::new(command.as_ref()).configure(|cmd| {
            for arg in &args {
                cmd.arg(arg);
            }
        }))?;

        let service = ().serve(transport).await?;
        Ok(Self { service })
    }

    /// List available tools from the server.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let response = self.service.list_tools(Default::default()).await?;
        Ok(response.tools)
    }

    /// Call a tool and turn its result into an outcome.
    pub async fn call_tool(&self, name: &str, input: Value) -> Result<ToolOutcome, ToolError> {
        let arguments = match input {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "arguments must be an object, got {other}"
                )));
            }
        };
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };

        let result = tokio::time::timeout(CALL_TIMEOUT, self.service.call_tool(params))
            .await
            .map_err(|_| ToolError::Execution(format!("{name} timed out after {CALL_TIMEOUT:?}")))?
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let result = serde_json::to_value(&result)
            .map_err(|e| ToolError::Execution(format!("serialize result: {e}")))?;
        Ok(outcome_from_result(result))
    }
}

/// Map a serialized `CallToolResult` onto the success/error contract.
fn outcome_from_result(result: Value) -> ToolOutcome {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let content = result.get("content").cloned().unwrap_or(Value::Null);

    if is_error {
        let text: Vec<&str> = content
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        return ToolOutcome::Error(if text.is_empty() {
            "tool reported an error".to_string()
        } else {
            text.join("\n")
        });
    }

    let mut output = Map::new();
    output.insert("content".into(), content);
    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        output.insert("structured".into(), structured.clone());
    }
    ToolOutcome::Success(Value::Object(output))
}

fn descriptor(source: &str, tool: Tool, client: Arc<McpClient>) -> ToolDescriptor {
    let id = tool.name.to_string();
    let name = id.clone();
    ToolDescriptor::new(
        id,
        ToolGroup::source(source),
        tool.description.as_deref().unwrap_or_default(),
        Value::Object((*tool.input_schema).clone()),
        move |input| {
            let client = Arc::clone(&client);
            let name = name.clone();
            async move {
                match client.call_tool(&name, input).await {
                    Ok(outcome) => outcome,
                    Err(e) => ToolOutcome::Error(e.to_string()),
                }
            }
        },
    )
}

/// Spawn one server and describe its tools.
pub async fn discover(config: &McpServerConfig) -> Result<Vec<ToolDescriptor>, McpError> {
    let client = Arc::new(McpClient::spawn(&config.command, &config.args).await?);
    let tools = client.list_tools().await?;
    Ok(tools
        .into_iter()
        .map(|tool| descriptor(&config.name, tool, Arc::clone(&client)))
        .collect())
}

/// Discover every configured server into the registry.
///
/// A server that fails to start is logged and registered with no tools, so
/// its source stays known and its policy can still be edited.
pub async fn discover_into(registry: &mut ToolRegistry, configs: &[McpServerConfig]) {
    for config in configs {
        let tools = match discover(config).await {
            Ok(tools) => {
                info!(server = %config.name, count = tools.len(), "discovered MCP tools");
                tools
            }
            Err(e) => {
                warn!(server = %config.name, error = %e, "failed to initialize MCP server");
                Vec::new()
            }
        };
        registry.set_source_tools(&config.name, tools);
    }
}

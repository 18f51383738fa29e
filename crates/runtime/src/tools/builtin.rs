//! Built-in leaf tools.

use super::{ToolDescriptor, ToolError, ToolOutcome, ToolRegistry};
use policy::ToolGroup;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;

/// Largest file `read_file` returns.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

pub const FILESYSTEM: &str = "filesystem";
pub const SYSTEM: &str = "system";

fn filesystem() -> ToolGroup {
    ToolGroup::category(FILESYSTEM, "Filesystem")
}

fn system() -> ToolGroup {
    ToolGroup::category(SYSTEM, "System")
}

/// Register every built-in tool.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register_builtin(read_file());
    registry.register_builtin(list_directory());
    registry.register_builtin(current_time());
}

#[derive(Deserialize)]
struct PathInput {
    path: PathBuf,
}

fn parse<T: for<'de> Deserialize<'de>>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))
}

pub fn read_file() -> ToolDescriptor {
    ToolDescriptor::new(
        "read_file",
        filesystem(),
        "Read a UTF-8 text file and return its contents.",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path of the file to read" }
            },
            "required": ["path"],
            "additionalProperties": false
        }),
        |input| async move { ToolOutcome::from(read_file_impl(input).await) },
    )
    .with_name("Read file")
}

async fn read_file_impl(input: Value) -> Result<Value, ToolError> {
    let PathInput { path } = parse(input)?;
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| ToolError::Execution(format!("{}: {e}", path.display())))?;
    if metadata.len() > MAX_READ_BYTES {
        return Err(ToolError::Execution(format!(
            "{} is {} bytes (max {MAX_READ_BYTES})",
            path.display(),
            metadata.len()
        )));
    }
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ToolError::Execution(format!("{}: {e}", path.display())))?;
    Ok(json!({ "path": path.display().to_string(), "content": content }))
}

pub fn list_directory() -> ToolDescriptor {
    ToolDescriptor::new(
        "list_directory",
        filesystem(),
        "List the entries of a directory.",
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" }
            },
            "required": ["path"],
            "additionalProperties": false
        }),
        |input| async move { ToolOutcome::from(list_directory_impl(input).await) },
    )
    .with_name("List directory")
}

async fn list_directory_impl(input: Value) -> Result<Value, ToolError> {
    let PathInput { path } = parse(input)?;
    let mut dir = tokio::fs::read_dir(&path)
        .await
        .map_err(|e| ToolError::Execution(format!("{}: {e}", path.display())))?;

    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "is_dir": is_dir,
        }));
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Ok(json!({ "path": path.display().to_string(), "entries": entries }))
}

pub fn current_time() -> ToolDescriptor {
    ToolDescriptor::new(
        "current_time",
        system(),
        "Return the current date and time in UTC (RFC 3339).",
        json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        |_| async { ToolOutcome::Success(json!({ "now": chrono::Utc::now().to_rfc3339() })) },
    )
    .with_name("Current time")
}

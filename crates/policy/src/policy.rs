//! Tool policy configuration.

use crate::{Error, Result, Status, ToolStatus, resolve};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Whether a group holds built-in tools or externally discovered ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// A category of built-in tools.
    Category,
    /// A source of dynamically discovered tools (e.g. an MCP server).
    Source,
}

/// Layered tool policy loaded from TOML.
///
/// Group entries set the default for every tool in the group; an override
/// pins a single tool regardless of its group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Status per built-in category.
    #[serde(default)]
    pub categories: BTreeMap<String, Status>,

    /// Status per dynamic tool source.
    #[serde(default)]
    pub sources: BTreeMap<String, Status>,

    /// Per-tool overrides.
    #[serde(default)]
    pub overrides: BTreeMap<String, ToolStatus>,
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Serialize the policy back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Serialize(e.to_string()))
    }

    /// Configured status of a group, if it has an entry.
    pub fn configured_group_status(&self, kind: GroupKind, group_id: &str) -> Option<Status> {
        self.groups(kind).get(group_id).copied()
    }

    /// Effective status of a group (unconfigured groups are always available).
    pub fn group_status(&self, kind: GroupKind, group_id: &str) -> Status {
        self.configured_group_status(kind, group_id)
            .unwrap_or_default()
    }

    /// Configured override for a tool.
    pub fn tool_status(&self, tool_id: &str) -> ToolStatus {
        self.overrides.get(tool_id).copied().unwrap_or_default()
    }

    /// Resolve a single tool against this policy.
    pub fn resolve_tool(&self, kind: GroupKind, group_id: &str, tool_id: &str) -> Status {
        resolve(
            self.tool_status(tool_id),
            self.configured_group_status(kind, group_id),
        )
    }

    /// Set a category's status. Returns whether anything changed.
    pub fn set_category_status(&mut self, category: impl Into<String>, status: Status) -> bool {
        self.categories.insert(category.into(), status) != Some(status)
    }

    /// Set a source's status. Returns whether anything changed.
    pub fn set_source_status(&mut self, source: impl Into<String>, status: Status) -> bool {
        self.sources.insert(source.into(), status) != Some(status)
    }

    /// Set a tool override. `Inherited` removes the entry.
    /// Returns whether anything changed.
    pub fn set_tool_status(&mut self, tool_id: impl Into<String>, status: ToolStatus) -> bool {
        let tool_id = tool_id.into();
        let previous = self.tool_status(&tool_id);
        if status == ToolStatus::Inherited {
            self.overrides.remove(&tool_id);
        } else {
            self.overrides.insert(tool_id, status);
        }
        previous != status
    }

    pub(crate) fn groups(&self, kind: GroupKind) -> &BTreeMap<String, Status> {
        match kind {
            GroupKind::Category => &self.categories,
            GroupKind::Source => &self.sources,
        }
    }
}

//! Catalogue of built-in and discovered tools.

use super::ToolDescriptor;
use policy::{GroupKind, ToolGroup};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Every tool the host knows about, before any policy is applied.
///
/// Built-in tools are registered once under a category. Discovered tools
/// are replaced wholesale per source whenever that source is rediscovered.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    builtin: BTreeMap<String, ToolDescriptor>,
    sources: BTreeMap<String, Vec<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in tool. Its group must be a category.
    ///
    /// Returns `false` if the group is not a category; the tool is dropped.
    pub fn register_builtin(&mut self, tool: ToolDescriptor) -> bool {
        if tool.group.kind != GroupKind::Category {
            warn!(tool = %tool.id, group = %tool.group.id, "built-in tool must belong to a category");
            return false;
        }
        debug!(tool = %tool.id, category = %tool.group.id, "registered built-in tool");
        self.builtin.insert(tool.id.clone(), tool);
        true
    }

    /// Replace the tools discovered from `source`.
    ///
    /// Every tool is re-homed under the source group. Tools whose id is
    /// already taken by a built-in or by another source are skipped, so the
    /// first registration of an id wins.
    pub fn set_source_tools(&mut self, source: &str, tools: Vec<ToolDescriptor>) {
        let group = ToolGroup::source(source);
        let mut kept: Vec<ToolDescriptor> = Vec::with_capacity(tools.len());
        for mut tool in tools {
            if let Some(owner) = self.owner_of(&tool.id, source) {
                warn!(tool = %tool.id, source, owner, "duplicate tool id; skipping");
                continue;
            }
            if kept.iter().any(|t| t.id == tool.id) {
                warn!(tool = %tool.id, source, "source lists the same tool twice; skipping");
                continue;
            }
            tool.group = group.clone();
            kept.push(tool);
        }
        debug!(source, count = kept.len(), "source tools replaced");
        self.sources.insert(source.to_string(), kept);
    }

    /// Who already provides `id`, ignoring `source` itself.
    fn owner_of(&self, id: &str, source: &str) -> Option<&str> {
        if self.builtin.contains_key(id) {
            return Some("built-in");
        }
        self.sources
            .iter()
            .filter(|(name, _)| name.as_str() != source)
            .find(|(_, tools)| tools.iter().any(|t| t.id == id))
            .map(|(name, _)| name.as_str())
    }

    /// Forget a source and its tools.
    pub fn remove_source(&mut self, source: &str) -> bool {
        self.sources.remove(source).is_some()
    }

    /// Names of the known sources, including those with no tools.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Every tool, built-ins first.
    pub fn list_all(&self) -> Vec<ToolDescriptor> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.builtin
            .values()
            .chain(self.sources.values().flatten())
    }

    pub fn get(&self, id: &str) -> Option<&ToolDescriptor> {
        self.builtin
            .get(id)
            .or_else(|| self.sources.values().flatten().find(|tool| tool.id == id))
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.sources.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutcome;
    use serde_json::{Value, json};

    fn tool(id: &str, group: ToolGroup) -> ToolDescriptor {
        ToolDescriptor::new(id, group, "test tool", json!({"type": "object"}), |_| async {
            ToolOutcome::Success(Value::Null)
        })
    }

    #[test]
    fn builtins_require_a_category() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register_builtin(tool("a", ToolGroup::category("fs", "Files"))));
        assert!(!registry.register_builtin(tool("b", ToolGroup::source("srv"))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn source_tools_are_rehomed_and_replaced() {
        let mut registry = ToolRegistry::new();
        registry.set_source_tools("github", vec![tool("issues", ToolGroup::category("x", "X"))]);

        let found = registry.get("issues").unwrap();
        assert_eq!(found.group, ToolGroup::source("github"));

        registry.set_source_tools("github", vec![]);
        assert!(registry.get("issues").is_none());
        assert_eq!(registry.sources().collect::<Vec<_>>(), vec!["github"]);

        assert!(registry.remove_source("github"));
        assert!(registry.is_empty());
    }

    #[test]
    fn discovered_tools_cannot_shadow_builtins() {
        let mut registry = ToolRegistry::new();
        registry.register_builtin(tool("read_file", ToolGroup::category("fs", "Files")));
        registry.set_source_tools("srv", vec![tool("read_file", ToolGroup::source("srv"))]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("read_file").unwrap().group.kind, GroupKind::Category);
    }

    #[test]
    fn list_all_puts_builtins_first() {
        let mut registry = ToolRegistry::new();
        registry.set_source_tools("srv", vec![tool("aaa", ToolGroup::source("srv"))]);
        registry.register_builtin(tool("zzz", ToolGroup::category("fs", "Files")));

        let ids: Vec<String> = registry.list_all().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["zzz", "aaa"]);
    }

    #[test]
    fn first_source_keeps_a_shared_tool_id() {
        let mut registry = ToolRegistry::new();
        registry.set_source_tools("alpha", vec![tool("search", ToolGroup::source("alpha"))]);
        registry.set_source_tools(
            "beta",
            vec![
                tool("search", ToolGroup::source("beta")),
                tool("fetch", ToolGroup::source("beta")),
                tool("fetch", ToolGroup::source("beta")),
            ],
        );

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("search").unwrap().group, ToolGroup::source("alpha"));
        let ids: Vec<String> = registry.list_all().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["search", "fetch"]);

        // Rediscovering the owner replaces its own entry rather than clashing.
        registry.set_source_tools("alpha", vec![tool("search", ToolGroup::source("alpha"))]);
        assert_eq!(registry.len(), 2);
    }
}

//! Resolution of the tool universe against a policy.

use crate::{GroupKind, Policy, Status, ToolStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// The category or source a tool belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ToolGroup {
    #[serde(skip)]
    pub kind: GroupKind,
    pub id: String,
    pub name: String,
}

impl ToolGroup {
    /// A built-in category.
    pub fn category(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: GroupKind::Category,
            id: id.into(),
            name: name.into(),
        }
    }

    /// A dynamic source. Sources are displayed under their own id.
    pub fn source(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind: GroupKind::Source,
            name: id.clone(),
            id,
        }
    }
}

/// Anything the resolver can classify.
pub trait CatalogTool {
    fn id(&self) -> &str;

    /// Display name, used for ordering in reports.
    fn name(&self) -> &str {
        self.id()
    }

    fn description(&self) -> &str;

    fn group(&self) -> &ToolGroup;
}

/// Status of one tool after applying override precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedToolInfo {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub group_id: String,
    pub description: String,
    #[serde(rename = "status")]
    pub configured_status: ToolStatus,
    pub resolved_status: Status,
}

/// One group in a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub kind: GroupKind,
    pub status: Status,
    pub tools: Vec<ResolvedToolInfo>,
}

/// Computes which tools a session may see.
///
/// Holds nothing but a borrowed policy, so every resolution reflects the
/// policy as it is at call time.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    policy: &'a Policy,
}

impl<'a> Resolver<'a> {
    pub fn new(policy: &'a Policy) -> Self {
        Self { policy }
    }

    /// Resolve a single tool.
    pub fn resolve<T: CatalogTool + ?Sized>(&self, tool: &T) -> ResolvedToolInfo {
        let group = tool.group();
        let configured_status = self.policy.tool_status(tool.id());
        ResolvedToolInfo {
            id: tool.id().to_string(),
            name: tool.name().to_string(),
            group_id: group.id.clone(),
            description: tool.description().to_string(),
            configured_status,
            resolved_status: crate::resolve(
                configured_status,
                self.policy.configured_group_status(group.kind, &group.id),
            ),
        }
    }

    /// The generation-facing tool set: every tool that is not disabled.
    ///
    /// Tools that require authorization are included; consent is collected
    /// when they are invoked.
    pub fn prepare_effective_set<T, I>(&self, tools: I) -> BTreeMap<String, T>
    where
        T: CatalogTool,
        I: IntoIterator<Item = T>,
    {
        tools
            .into_iter()
            .filter(|tool| {
                let group = tool.group();
                self.policy
                    .resolve_tool(group.kind, &group.id, tool.id())
                    .is_enabled()
            })
            .map(|tool| (tool.id().to_string(), tool))
            .collect()
    }

    /// Full status report, grouped for display.
    ///
    /// Categories come before sources; groups are ordered by name and tools
    /// by display name. Configured sources with no tools are still listed.
    pub fn compute_status_report<'t, T, I>(&self, tools: I) -> Vec<GroupReport>
    where
        T: CatalogTool + ?Sized + 't,
        I: IntoIterator<Item = &'t T>,
    {
        let mut groups: BTreeMap<(GroupKind, String), GroupReport> = BTreeMap::new();

        for tool in tools {
            let group = tool.group();
            let status = self.policy.group_status(group.kind, &group.id);
            let report = groups
                .entry((group.kind, group.id.clone()))
                .or_insert_with(|| GroupReport {
                    id: group.id.clone(),
                    name: group.name.clone(),
                    kind: group.kind,
                    status,
                    tools: Vec::new(),
                });
            report.status = status;
            report.tools.push(self.resolve(tool));
        }

        for (source, status) in &self.policy.sources {
            groups
                .entry((GroupKind::Source, source.clone()))
                .or_insert_with(|| GroupReport {
                    id: source.clone(),
                    name: source.clone(),
                    kind: GroupKind::Source,
                    status: *status,
                    tools: Vec::new(),
                });
        }

        let mut report: Vec<GroupReport> = groups.into_values().collect();
        report.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        for group in &mut report {
            group
                .tools
                .sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone)]
    struct FakeTool {
        id: &'static str,
        name: &'static str,
        group: ToolGroup,
    }

    impl CatalogTool for FakeTool {
        fn id(&self) -> &str {
            self.id
        }

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "fake"
        }

        fn group(&self) -> &ToolGroup {
            &self.group
        }
    }

    fn builtin(id: &'static str, name: &'static str, category: &str) -> FakeTool {
        FakeTool {
            id,
            name,
            group: ToolGroup::category(category, category.to_uppercase()),
        }
    }

    fn dynamic(id: &'static str, source: &str) -> FakeTool {
        FakeTool {
            id,
            name: id,
            group: ToolGroup::source(source),
        }
    }

    fn universe() -> Vec<FakeTool> {
        vec![
            builtin("read_file", "Read File", "filesystem"),
            builtin("list_directory", "List Directory", "filesystem"),
            builtin("current_time", "Current Time", "system"),
            dynamic("create_issue", "github"),
            dynamic("search", "brave"),
        ]
    }

    #[test]
    fn override_beats_disabled_group() {
        let mut policy = Policy::default();
        policy.set_category_status("g", Status::Disabled);
        policy.set_tool_status("x", ToolStatus::AlwaysAvailable);

        let tool = builtin("x", "X", "g");
        let info = Resolver::new(&policy).resolve(&tool);
        assert_eq!(info.resolved_status, Status::AlwaysAvailable);
        assert_eq!(info.configured_status, ToolStatus::AlwaysAvailable);
    }

    #[test]
    fn disabled_override_beats_available_group() {
        let mut policy = Policy::default();
        policy.set_source_status("github", Status::AlwaysAvailable);
        policy.set_tool_status("create_issue", ToolStatus::Disabled);

        let set = Resolver::new(&policy).prepare_effective_set(universe());
        assert!(!set.contains_key("create_issue"));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn effective_set_keeps_authorization_tools_and_drops_disabled() {
        let mut policy = Policy::default();
        policy.set_category_status("filesystem", Status::RequiresAuthorization);
        policy.set_source_status("brave", Status::Disabled);

        let set = Resolver::new(&policy).prepare_effective_set(universe());
        let ids: Vec<&str> = set.keys().map(String::as_str).collect();
        assert_eq!(
            ids,
            vec!["create_issue", "current_time", "list_directory", "read_file"]
        );
    }

    #[test]
    fn inherited_override_reports_group_status() {
        let policy = Policy::parse(
            r#"
[categories]
filesystem = "RequiresAuthorization"

[overrides]
read_file = "inherited"
"#,
        )
        .unwrap();
        let resolver = Resolver::new(&policy);
        let tools = universe();

        let report = resolver.compute_status_report(&tools);
        let filesystem = report.iter().find(|g| g.id == "filesystem").unwrap();
        let read_file = filesystem.tools.iter().find(|t| t.id == "read_file").unwrap();
        assert_eq!(read_file.configured_status, ToolStatus::Inherited);
        assert_eq!(read_file.resolved_status, Status::RequiresAuthorization);

        assert!(resolver.prepare_effective_set(tools).contains_key("read_file"));
    }

    #[test]
    fn report_orders_builtin_groups_first_then_by_name() {
        let policy = Policy::default();
        let tools = universe();
        let report = Resolver::new(&policy).compute_status_report(&tools);

        let order: Vec<(&str, GroupKind)> =
            report.iter().map(|g| (g.name.as_str(), g.kind)).collect();
        assert_eq!(
            order,
            vec![
                ("FILESYSTEM", GroupKind::Category),
                ("SYSTEM", GroupKind::Category),
                ("brave", GroupKind::Source),
                ("github", GroupKind::Source),
            ]
        );

        let names: Vec<&str> = report[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["List Directory", "Read File"]);
    }

    #[test]
    fn configured_source_without_tools_is_listed() {
        let mut policy = Policy::default();
        policy.set_source_status("offline", Status::RequiresAuthorization);

        let tools = universe();
        let report = Resolver::new(&policy).compute_status_report(&tools);
        let offline = report.iter().find(|g| g.id == "offline").unwrap();
        assert_eq!(offline.kind, GroupKind::Source);
        assert_eq!(offline.status, Status::RequiresAuthorization);
        assert!(offline.tools.is_empty());
    }

    #[test]
    fn group_status_reflects_current_policy() {
        let mut policy = Policy::default();
        policy.set_category_status("filesystem", Status::Disabled);
        let tools = universe();

        let report = Resolver::new(&policy).compute_status_report(&tools);
        let filesystem = report.iter().find(|g| g.id == "filesystem").unwrap();
        assert_eq!(filesystem.status, Status::Disabled);
        assert!(filesystem
            .tools
            .iter()
            .all(|t| t.resolved_status == Status::Disabled));

        policy.set_category_status("filesystem", Status::AlwaysAvailable);
        let report = Resolver::new(&policy).compute_status_report(&tools);
        let filesystem = report.iter().find(|g| g.id == "filesystem").unwrap();
        assert_eq!(filesystem.status, Status::AlwaysAvailable);
    }

    #[test]
    fn report_serializes_display_shape() {
        let policy = Policy::default();
        let tools = vec![builtin("read_file", "Read File", "filesystem")];
        let report = Resolver::new(&policy).compute_status_report(&tools);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "id": "filesystem",
                "name": "FILESYSTEM",
                "status": "always_available",
                "tools": [{
                    "id": "read_file",
                    "name": "Read File",
                    "description": "fake",
                    "status": "inherited",
                    "resolvedStatus": "always_available",
                }],
            }])
        );
    }
}

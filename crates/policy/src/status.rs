use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability of a tool group, or the resolved availability of a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Exposed to the model without asking.
    #[default]
    #[serde(alias = "AlwaysAvailable", alias = "alwaysAvailable")]
    AlwaysAvailable,
    /// Exposed to the model; the user confirms each invocation.
    #[serde(alias = "RequiresAuthorization", alias = "requiresAuthorization")]
    RequiresAuthorization,
    /// Never exposed to the model.
    #[serde(alias = "Disabled")]
    Disabled,
}

impl Status {
    pub fn is_enabled(self) -> bool {
        self != Status::Disabled
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlwaysAvailable => "always_available",
            Self::RequiresAuthorization => "requires_authorization",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Per-tool override. `Inherited` defers to the tool's group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    #[serde(alias = "Inherited")]
    Inherited,
    #[serde(alias = "AlwaysAvailable", alias = "alwaysAvailable")]
    AlwaysAvailable,
    #[serde(alias = "RequiresAuthorization", alias = "requiresAuthorization")]
    RequiresAuthorization,
    #[serde(alias = "Disabled")]
    Disabled,
}

impl ToolStatus {
    /// The concrete status this override pins, if any.
    pub fn concrete(self) -> Option<Status> {
        match self {
            Self::Inherited => None,
            Self::AlwaysAvailable => Some(Status::AlwaysAvailable),
            Self::RequiresAuthorization => Some(Status::RequiresAuthorization),
            Self::Disabled => Some(Status::Disabled),
        }
    }
}

impl From<Status> for ToolStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::AlwaysAvailable => Self::AlwaysAvailable,
            Status::RequiresAuthorization => Self::RequiresAuthorization,
            Status::Disabled => Self::Disabled,
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.concrete() {
            Some(status) => status.fmt(f),
            None => f.write_str("inherited"),
        }
    }
}

/// Resolve a tool's effective status.
///
/// A concrete override wins outright; otherwise the group's configured
/// status applies, and an unconfigured group counts as `AlwaysAvailable`.
pub fn resolve(configured: ToolStatus, group: Option<Status>) -> Status {
    configured
        .concrete()
        .unwrap_or_else(|| group.unwrap_or_default())
}

//! Layered tool authorization policy.
//!
//! Core principle: **a tool's exposure is a pure function of the policy.**
//! A per-tool override beats its group's status; an unconfigured group is
//! always available.

mod error;
mod policy;
mod resolver;
mod status;

pub use error::{Error, Result};
pub use policy::{GroupKind, Policy};
pub use resolver::{CatalogTool, GroupReport, ResolvedToolInfo, Resolver, ToolGroup};
pub use status::{Status, ToolStatus, resolve};

//! State distribution bus.
//!
//! Producers publish their latest value under a [`Topic`]; the bus keeps
//! the last delivered value per topic and hands the transport only the
//! structural change. Topics nobody subscribes to cost nothing: their
//! producers never run and nothing is cached.
//!
//! # Example
//!
//! ```no_run
//! use bus::{OutboundMessage, StateBus, Topic};
//! use std::sync::Arc;
//!
//! # async fn example() -> bus::Result<()> {
//! let bus = StateBus::new();
//! bus.set_transport(Arc::new(|message: OutboundMessage| {
//!     println!("{}", serde_json::to_string(&message).unwrap_or_default());
//! }))?;
//!
//! bus.subscribe(Topic::tool_status());
//! bus.publish_value(&Topic::tool_status(), serde_json::json!({"groups": []}))
//!     .await;
//! # Ok(())
//! # }
//! ```

mod bus;
pub mod diff;
mod envelope;
mod error;
mod topic;

pub use bus::{PublishOutcome, StateBus, Transport};
pub use diff::{PatchOperation, apply_patch};
pub use envelope::{OutboundMessage, PushUpdate, UpdateData};
pub use error::{Error, Result};
pub use topic::{Delivery, FixedTopic, ScopedTopic, Topic};

//! Topic keys.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Topics without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedTopic {
    /// Tool status report.
    ToolStatus,
    /// Which session, if any, is generating.
    ActiveSession,
}

impl FixedTopic {
    const ALL: [FixedTopic; 2] = [FixedTopic::ToolStatus, FixedTopic::ActiveSession];

    pub fn key(self) -> &'static str {
        match self {
            Self::ToolStatus => "tools/status",
            Self::ActiveSession => "session/active",
        }
    }
}

/// Topic families parametrized by an entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopedTopic {
    /// State of one session (status, history length, step count).
    Session,
    /// Raw text deltas of one session.
    SessionOutput,
}

impl ScopedTopic {
    const ALL: [ScopedTopic; 2] = [ScopedTopic::Session, ScopedTopic::SessionOutput];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Session => "sessions",
            Self::SessionOutput => "session-output",
        }
    }
}

/// How values published on a topic reach the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Diffed against the last published value; only patches go out.
    Diffed,
    /// Delivered as-is on every publish, never cached.
    Raw,
}

/// A key identifying one piece of observable state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Topic {
    Fixed(FixedTopic),
    Scoped(ScopedTopic, String),
}

impl Topic {
    pub fn tool_status() -> Self {
        Self::Fixed(FixedTopic::ToolStatus)
    }

    pub fn active_session() -> Self {
        Self::Fixed(FixedTopic::ActiveSession)
    }

    pub fn session(id: impl Into<String>) -> Self {
        Self::Scoped(ScopedTopic::Session, id.into())
    }

    pub fn session_output(id: impl Into<String>) -> Self {
        Self::Scoped(ScopedTopic::SessionOutput, id.into())
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            Self::Scoped(ScopedTopic::SessionOutput, _) => Delivery::Raw,
            _ => Delivery::Diffed,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(topic) => f.write_str(topic.key()),
            Self::Scoped(family, id) => write!(f, "{}/{id}", family.prefix()),
        }
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(fixed) = FixedTopic::ALL.into_iter().find(|t| t.key() == s) {
            return Ok(Self::Fixed(fixed));
        }
        let (prefix, id) = s
            .split_once('/')
            .ok_or_else(|| Error::UnknownTopic(s.to_string()))?;
        if id.is_empty() {
            return Err(Error::UnknownTopic(s.to_string()));
        }
        ScopedTopic::ALL
            .into_iter()
            .find(|family| family.prefix() == prefix)
            .map(|family| Self::Scoped(family, id.to_string()))
            .ok_or_else(|| Error::UnknownTopic(s.to_string()))
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

impl TryFrom<String> for Topic {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_parse_back() {
        for topic in [
            Topic::tool_status(),
            Topic::active_session(),
            Topic::session("abc"),
            Topic::session_output("abc"),
        ] {
            assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn scoped_id_may_contain_slashes() {
        let topic: Topic = "sessions/a/b".parse().unwrap();
        assert_eq!(topic, Topic::session("a/b"));
    }

    #[test]
    fn unknown_topics_are_rejected() {
        assert!("nope".parse::<Topic>().is_err());
        assert!("sessions/".parse::<Topic>().is_err());
        assert!("other/1".parse::<Topic>().is_err());
    }

    #[test]
    fn only_session_output_is_raw() {
        assert_eq!(Topic::session_output("1").delivery(), Delivery::Raw);
        assert_eq!(Topic::session("1").delivery(), Delivery::Diffed);
        assert_eq!(Topic::tool_status().delivery(), Delivery::Diffed);
    }
}

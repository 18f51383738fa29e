//! Messages handed to the transport.

use crate::{PatchOperation, Topic};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of a push update: a patch against the previous value, or a
/// full value for raw topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateData {
    Patch(Vec<PatchOperation>),
    Full(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushUpdate {
    pub topic: Topic,
    pub data: UpdateData,
}

/// Envelope delivered to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum OutboundMessage {
    PushUpdate(PushUpdate),
}

impl OutboundMessage {
    pub fn push(topic: Topic, data: UpdateData) -> Self {
        Self::PushUpdate(PushUpdate { topic, data })
    }

    pub fn topic(&self) -> &Topic {
        match self {
            Self::PushUpdate(update) => &update.topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_update_wire_shape() {
        let message = OutboundMessage::push(
            Topic::tool_status(),
            UpdateData::Patch(vec![PatchOperation::Add {
                path: "/0".into(),
                value: json!({"id": "fs"}),
            }]),
        );

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "pushUpdate",
                "payload": {
                    "topic": "tools/status",
                    "data": [{"op": "add", "path": "/0", "value": {"id": "fs"}}]
                }
            })
        );
    }

    #[test]
    fn raw_update_carries_value() {
        let message = OutboundMessage::push(
            Topic::session_output("s1"),
            UpdateData::Full(json!({"delta": "hel"})),
        );
        let wire = serde_json::to_string(&message).unwrap();
        let parsed: OutboundMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed.topic(), &Topic::session_output("s1"));
    }
}

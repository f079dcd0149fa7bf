//! Control messages posted by the application.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// A recognized control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Replace the waiting worker now.
    SkipWaiting,
    /// Ask for the active store's version identifier.
    GetVersion,
}

impl ClientMessage {
    /// Parse a posted payload. `None` for anything unrecognized.
    pub fn parse(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// Reply payload for `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// A message posted to the worker, with an optional reply port.
#[derive(Debug)]
pub struct MessageEvent {
    pub data: Value,
    pub reply: Option<oneshot::Sender<Value>>,
}

impl MessageEvent {
    pub fn new(data: Value) -> Self {
        Self { data, reply: None }
    }

    /// Attach a reply port. The receiver gets at most one reply.
    pub fn with_reply(data: Value) -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                data,
                reply: Some(tx),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_messages() {
        assert_eq!(
            ClientMessage::parse(&json!({"type": "SKIP_WAITING"})),
            Some(ClientMessage::SkipWaiting)
        );
        assert_eq!(
            ClientMessage::parse(&json!({"type": "GET_VERSION", "extra": 1})),
            Some(ClientMessage::GetVersion)
        );
    }

    #[test]
    fn test_parse_unknown_messages() {
        assert_eq!(ClientMessage::parse(&json!({"type": "RELOAD"})), None);
        assert_eq!(ClientMessage::parse(&json!("SKIP_WAITING")), None);
        assert_eq!(ClientMessage::parse(&json!({})), None);
    }

    #[test]
    fn test_version_reply_shape() {
        let reply = VersionReply {
            version: "salma-organizer-v2".into(),
        };
        assert_eq!(
            serde_json::to_value(reply).unwrap(),
            json!({"version": "salma-organizer-v2"})
        );
    }

    #[tokio::test]
    async fn test_reply_port() {
        let (event, rx) = MessageEvent::with_reply(json!({"type": "GET_VERSION"}));
        event.reply.unwrap().send(json!({"version": "x"})).unwrap();
        assert_eq!(rx.await.unwrap(), json!({"version": "x"}));
    }
}

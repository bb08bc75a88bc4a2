use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender name used for join/leave notices. Not a registrable username.
pub const SYSTEM_SENDER: &str = "system";

/// A chat message as persisted and as fanned out to peers.
///
/// `datetime` is stamped by the server at receipt; whatever a client sends
/// for it is discarded. `recipient` is carried end-to-end for future direct
/// messaging but does not affect routing yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub payload: String,
    pub datetime: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl ChatMessage {
    pub fn new(
        sender: impl Into<String>,
        payload: impl Into<String>,
        recipient: Option<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            payload: payload.into(),
            datetime: Utc::now(),
            recipient,
        }
    }

    /// A broadcast-only notice ("alice joined"). Never persisted.
    pub fn system(payload: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER, payload, None)
    }

    /// The single wire representation shared by every recipient of a fan-out.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What a client may say on the socket.
///
/// Sender identity and timestamps come from the server side of the
/// connection; unknown fields (including a client-supplied `sender` or
/// `datetime`) are ignored rather than trusted.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub payload: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

impl InboundFrame {
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        serde_json::from_str(raw).map_err(|e| FrameError::Malformed(e.to_string()))
    }

    /// Bind the authenticated sender and stamp the receipt time.
    pub fn into_message(self, sender: &str) -> ChatMessage {
        ChatMessage::new(sender, self.payload, self.recipient)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_frame() {
        let frame = InboundFrame::parse(r#"{"payload":"hi"}"#).unwrap();
        assert_eq!(frame.payload, "hi");
        assert!(frame.recipient.is_none());
    }

    #[test]
    fn parse_frame_with_recipient() {
        let frame = InboundFrame::parse(r#"{"payload":"psst","recipient":"bob"}"#).unwrap();
        assert_eq!(frame.recipient.as_deref(), Some("bob"));
    }

    #[test]
    fn client_supplied_sender_is_ignored() {
        let frame =
            InboundFrame::parse(r#"{"payload":"hi","sender":"mallory","datetime":"2020-01-01"}"#)
                .unwrap();
        let msg = frame.into_message("alice");
        assert_eq!(msg.sender, "alice");
    }

    #[test]
    fn missing_payload_is_malformed() {
        assert!(InboundFrame::parse(r#"{"recipient":"bob"}"#).is_err());
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(InboundFrame::parse("hello there").is_err());
    }

    #[test]
    fn into_message_stamps_server_time() {
        let before = Utc::now();
        let msg = InboundFrame::parse(r#"{"payload":"hi"}"#)
            .unwrap()
            .into_message("alice");
        assert!(msg.datetime >= before);
        assert!(msg.datetime <= Utc::now());
    }

    #[test]
    fn wire_omits_empty_recipient() {
        let wire = ChatMessage::new("alice", "hi", None).to_wire().unwrap();
        assert!(wire.contains("\"sender\":\"alice\""));
        assert!(!wire.contains("recipient"));
    }

    #[test]
    fn wire_roundtrip() {
        let msg = ChatMessage::new("alice", "hi", Some("bob".into()));
        let parsed: ChatMessage = serde_json::from_str(&msg.to_wire().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn system_notice_uses_reserved_sender() {
        let msg = ChatMessage::system("alice joined");
        assert_eq!(msg.sender, SYSTEM_SENDER);
        assert_eq!(msg.payload, "alice joined");
    }
}

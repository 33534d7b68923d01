use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as it travels over the wire and as it is persisted.
///
/// The same shape is used for history replay and live broadcast frames.
/// `time` is assigned by the hub when the message is accepted, never by the
/// client, and serializes as RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub username: String,
    pub content: String,
    pub time: DateTime<Utc>,
}

/// The only frame a client sends after attaching: the message body.
/// Channel and username are fixed at attach time and never re-specified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_rfc3339_time() {
        let msg = Message {
            channel: "general".into(),
            username: "alice".into(),
            content: "hi".into(),
            time: DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"channel\":\"general\""));
        assert!(json.contains("2025-01-02T03:04:05Z"));

        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn client_frame_ignores_unknown_fields() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"content":"hello","channel":"spoofed"}"#).unwrap();
        assert_eq!(frame.content, "hello");
    }
}

//! Channel message envelope.

use serde::{Deserialize, Serialize};

use crate::protocol::constants::Liveness;

/// `{topic, data}` message carried on music and care channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    /// Serialize for the wire.
    ///
    /// # Errors
    /// Returns [`AuthError::Json`](crate::AuthError::Json) if `data` cannot be encoded.
    pub fn to_text(&self) -> crate::AuthResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// What arrived on a channel socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Ping,
    Pong,
    Message(Envelope),
    /// Text that is neither a liveness frame nor a valid envelope.
    Unknown(String),
}

impl Frame {
    pub fn parse(text: &str) -> Self {
        match text {
            Liveness::PING => Frame::Ping,
            Liveness::PONG => Frame::Pong,
            _ => serde_json::from_str(text)
                .map_or_else(|_| Frame::Unknown(text.to_string()), Frame::Message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_liveness_frames() {
        assert_eq!(Frame::parse("ping"), Frame::Ping);
        assert_eq!(Frame::parse("pong"), Frame::Pong);
    }

    #[test]
    fn test_parse_envelope() {
        let frame = Frame::parse(r#"{"topic":"now_playing","data":{"track":"x"}}"#);
        assert_eq!(
            frame,
            Frame::Message(Envelope::new("now_playing", json!({"track": "x"})))
        );
    }

    #[test]
    fn test_envelope_without_data() {
        let frame = Frame::parse(r#"{"topic":"hello"}"#);
        assert_eq!(
            frame,
            Frame::Message(Envelope::new("hello", serde_json::Value::Null))
        );
    }

    #[test]
    fn test_unknown_text() {
        assert_eq!(Frame::parse("garbage"), Frame::Unknown("garbage".into()));
    }

    #[test]
    fn test_to_text_shape() {
        let text = Envelope::new("care", json!({"msg": "hi"})).to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"topic": "care", "data": {"msg": "hi"}}));
    }
}

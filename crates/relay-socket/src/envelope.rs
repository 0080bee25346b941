//! Socket Mode wire envelope codec.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Closed set of envelope kinds, with `Unknown` keeping forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeKind {
    EventCallback,
    Interactive,
    SlashCommand,
    Disconnect,
    Hello,
    Unknown(String),
}

impl EnvelopeKind {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "events_api" => Self::EventCallback,
            "interactive" => Self::Interactive,
            "slash_commands" => Self::SlashCommand,
            "disconnect" => Self::Disconnect,
            "hello" => Self::Hello,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::EventCallback => "events_api",
            Self::Interactive => "interactive",
            Self::SlashCommand => "slash_commands",
            Self::Disconnect => "disconnect",
            Self::Hello => "hello",
            Self::Unknown(value) => value.as_str(),
        }
    }

    /// Kinds that carry user-visible work and are forwarded downstream.
    pub fn is_forwarded(&self) -> bool {
        matches!(
            self,
            Self::EventCallback | Self::Interactive | Self::SlashCommand
        )
    }
}

/// One decoded Socket Mode frame. Consumed immediately, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: Option<String>,
    pub kind: EnvelopeKind,
    pub payload: Value,
    pub reason: Option<String>,
}

impl Envelope {
    /// Envelope id to acknowledge, if the frame carried a non-blank one.
    pub fn ack_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid utf-8 socket payload: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed socket envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("socket envelope is missing its type")]
    MissingType { envelope_id: Option<String> },
    #[error("failed to decode {kind} payload: {message}")]
    Payload { kind: String, message: String },
}

impl DecodeError {
    /// Envelope id recovered from a frame whose outer shape was readable.
    pub fn envelope_id(&self) -> Option<&str> {
        match self {
            Self::MissingType { envelope_id } => {
                envelope_id.as_deref().filter(|id| !id.trim().is_empty())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default, rename = "type")]
    envelope_type: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
}

/// Decodes the outer envelope. Inner payloads are decoded per kind in `events`.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    let wire = serde_json::from_str::<WireEnvelope>(text)?;
    let Some(envelope_type) = wire
        .envelope_type
        .filter(|value| !value.trim().is_empty())
    else {
        return Err(DecodeError::MissingType {
            envelope_id: wire.envelope_id,
        });
    };

    Ok(Envelope {
        id: wire.envelope_id,
        kind: EnvelopeKind::from_wire(envelope_type.trim()),
        payload: wire.payload,
        reason: wire.reason,
    })
}

/// Encodes the acknowledgment frame for `envelope_id`.
pub fn encode_ack(envelope_id: &str) -> String {
    json!({ "envelope_id": envelope_id }).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_envelope, encode_ack, DecodeError, EnvelopeKind};

    #[test]
    fn unit_decode_envelope_maps_known_kinds() {
        let cases = [
            ("events_api", EnvelopeKind::EventCallback),
            ("interactive", EnvelopeKind::Interactive),
            ("slash_commands", EnvelopeKind::SlashCommand),
            ("disconnect", EnvelopeKind::Disconnect),
            ("hello", EnvelopeKind::Hello),
        ];
        for (wire, expected) in cases {
            let raw = json!({ "envelope_id": "e1", "type": wire, "payload": {} }).to_string();
            let envelope = decode_envelope(raw.as_bytes()).expect("decode");
            assert_eq!(envelope.kind, expected);
            assert_eq!(envelope.kind.as_str(), wire);
        }
    }

    #[test]
    fn unit_decode_envelope_keeps_unknown_kinds_forward_compatible() {
        let raw = json!({ "envelope_id": "e9", "type": "app_rate_limited" }).to_string();
        let envelope = decode_envelope(raw.as_bytes()).expect("decode unknown");
        assert_eq!(
            envelope.kind,
            EnvelopeKind::Unknown("app_rate_limited".to_string())
        );
        assert_eq!(envelope.ack_id(), Some("e9"));
        assert!(!envelope.kind.is_forwarded());
    }

    #[test]
    fn unit_decode_envelope_reads_disconnect_reason_without_id() {
        let raw = json!({ "type": "disconnect", "reason": "refresh_requested" }).to_string();
        let envelope = decode_envelope(raw.as_bytes()).expect("decode disconnect");
        assert_eq!(envelope.kind, EnvelopeKind::Disconnect);
        assert_eq!(envelope.reason.as_deref(), Some("refresh_requested"));
        assert_eq!(envelope.ack_id(), None);
    }

    #[test]
    fn regression_decode_envelope_rejects_malformed_bytes() {
        assert!(matches!(
            decode_envelope(b"{not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_envelope(&[0xff, 0xfe, 0x00]),
            Err(DecodeError::Utf8(_))
        ));
    }

    #[test]
    fn regression_missing_type_still_exposes_envelope_id_for_ack() {
        let error = decode_envelope(br#"{"envelope_id":"e5","payload":{}}"#)
            .expect_err("missing type must fail");
        assert_eq!(error.envelope_id(), Some("e5"));

        let blank = decode_envelope(br#"{"envelope_id":" ","type":""}"#)
            .expect_err("blank type must fail");
        assert_eq!(blank.envelope_id(), None);
    }

    #[test]
    fn unit_ack_id_ignores_blank_ids() {
        let envelope = decode_envelope(br#"{"envelope_id":"  ","type":"hello"}"#).expect("decode");
        assert_eq!(envelope.ack_id(), None);
    }

    #[test]
    fn unit_encode_ack_matches_wire_shape() {
        let ack = encode_ack("abc-123");
        let value: serde_json::Value = serde_json::from_str(&ack).expect("ack json");
        assert_eq!(value, json!({ "envelope_id": "abc-123" }));
    }
}

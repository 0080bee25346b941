#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_socket::{decode_envelope, encode_ack, normalize_envelope, InboundEvent};

fuzz_target!(|data: &[u8]| {
    match decode_envelope(data) {
        Ok(envelope) => {
            assert!(!envelope.kind.as_str().trim().is_empty());
            if let Some(id) = envelope.ack_id() {
                let ack: serde_json::Value =
                    serde_json::from_str(&encode_ack(id)).expect("ack is valid json");
                assert_eq!(ack["envelope_id"].as_str(), Some(id));
            }
            let normalized = normalize_envelope(&envelope, Some("UBOT"));
            if !envelope.kind.is_forwarded() {
                assert!(matches!(normalized, Ok(None)));
            }
            if let Ok(Some(event)) = normalized {
                assert!(!event.conversation_id().trim().is_empty());
                if let InboundEvent::Interaction(action) = &event {
                    assert!(!action.action_id.trim().is_empty());
                }
            }
        }
        Err(error) => {
            assert!(!error.to_string().trim().is_empty());
        }
    }
});

//! Slack Socket Mode transport for the relay bridge.
//!
//! Layers, leaves first: the envelope codec, inner-payload normalization into
//! [`InboundEvent`]s, a single-connection [`SocketSession`] with keepalive and
//! ack-before-processing, and the reconnecting [`ConnectionManager`] that
//! merges every session into one long-lived event stream. The Web API client
//! used for the handshake and outbound posts lives here as well.

pub mod backoff;
pub mod envelope;
pub mod events;
pub mod manager;
pub mod session;
pub mod slack_api_client;
mod socket_helpers;

pub use backoff::Backoff;
pub use envelope::{decode_envelope, encode_ack, DecodeError, Envelope, EnvelopeKind};
pub use events::{
    normalize_envelope, Attachment, EventKind, InboundEvent, InteractionAction, NormalizedEvent,
};
pub use manager::{
    ConnectionError, ConnectionManager, ConnectionStatus, HandshakeError, ManagerConfig,
    SocketHandshake,
};
pub use session::{SessionConfig, SessionError, SessionEvent, SessionExit, SessionHandle, SocketSession};
pub use slack_api_client::{SlackApiClient, SlackPostedMessage};
pub use socket_helpers::truncate_for_error;

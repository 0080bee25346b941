//! One physical Socket Mode connection.
//!
//! A session runs as a single tokio task that multiplexes reads, keepalive
//! pings, the liveness deadline and the close signal. Every envelope carrying
//! an id is acknowledged before anything else happens to it. Forwarded
//! envelopes go out on a bounded channel with `try_send`, so a slow consumer
//! can never stall the keepalive path.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{
    tungstenite::{self, Message as WsMessage},
    WebSocketStream,
};

use crate::envelope::{decode_envelope, encode_ack, Envelope, EnvelopeKind};

const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_DISCONNECT_REASON: &str = "server requested disconnect";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Envelope(Envelope),
    Disconnect { reason: String },
}

impl SessionEvent {
    fn label(&self) -> &str {
        match self {
            Self::Envelope(envelope) => envelope.kind.as_str(),
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket read failed: {0}")]
    Read(#[source] tungstenite::Error),
    #[error("failed to acknowledge envelope {envelope_id}: {source}")]
    Ack {
        envelope_id: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("keepalive ping failed: {0}")]
    Ping(#[source] tungstenite::Error),
    #[error("session task ended abnormally: {0}")]
    Task(String),
}

/// Why a session stopped.
#[derive(Debug)]
pub enum SessionExit {
    Disconnected { reason: String },
    Closed,
    RemoteClosed,
    LivenessTimeout,
    Failed(SessionError),
}

impl SessionExit {
    pub fn describe(&self) -> String {
        match self {
            Self::Disconnected { reason } => format!("disconnected: {reason}"),
            Self::Closed => "closed locally".to_string(),
            Self::RemoteClosed => "closed by remote".to_string(),
            Self::LivenessTimeout => "liveness deadline expired".to_string(),
            Self::Failed(error) => error.to_string(),
        }
    }
}

/// Cloneable close switch for a running session. Only the first `close` fires.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    close_tx: Arc<watch::Sender<bool>>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Requests shutdown. Returns `true` only for the call that actually fired.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.close_tx.send_replace(true);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct SocketSession {
    handle: SessionHandle,
    task: JoinHandle<SessionExit>,
}

impl SocketSession {
    /// Starts the session task over an established websocket.
    ///
    /// The returned receiver closes exactly once, when the task ends.
    pub fn spawn<S>(
        stream: WebSocketStream<S>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (close_tx, close_rx) = watch::channel(false);
        let handle = SessionHandle {
            close_tx: Arc::new(close_tx),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let task = tokio::spawn(run_session(
            stream,
            config,
            events_tx,
            close_rx,
            handle.clone(),
        ));
        (Self { handle, task }, events_rx)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub async fn join(self) -> SessionExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(error) => SessionExit::Failed(SessionError::Task(error.to_string())),
        }
    }
}

async fn run_session<S>(
    stream: WebSocketStream<S>,
    config: SessionConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    mut close_rx: watch::Receiver<bool>,
    handle: SessionHandle,
) -> SessionExit
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();
    let ping_every = config.ping_interval.max(Duration::from_millis(1));
    let mut ping_ticker = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let liveness = tokio::time::sleep(config.pong_wait);
    tokio::pin!(liveness);

    let exit = loop {
        tokio::select! {
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break SessionExit::Closed;
                }
            }
            () = &mut liveness => break SessionExit::LivenessTimeout,
            _ = ping_ticker.tick() => {
                if let Err(error) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    break SessionExit::Failed(SessionError::Ping(error));
                }
                tracing::trace!("socket keepalive ping sent");
            }
            frame = source.next() => {
                let Some(frame) = frame else {
                    break SessionExit::RemoteClosed;
                };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(error) => break SessionExit::Failed(SessionError::Read(error)),
                };
                liveness.as_mut().reset(Instant::now() + config.pong_wait);
                if let Some(exit) = handle_frame(frame, &mut sink, &events_tx).await {
                    break exit;
                }
            }
        }
    };

    handle.close();
    let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sink.close()).await;
    tracing::debug!(exit = %exit.describe(), "socket session ended");
    exit
}

async fn handle_frame<Si>(
    frame: WsMessage,
    sink: &mut Si,
    events_tx: &mpsc::Sender<SessionEvent>,
) -> Option<SessionExit>
where
    Si: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let bytes: &[u8] = match &frame {
        WsMessage::Text(text) => text.as_bytes(),
        WsMessage::Binary(bytes) => bytes.as_ref(),
        WsMessage::Close(close_frame) => {
            tracing::debug!(frame = ?close_frame, "socket close frame received");
            return Some(SessionExit::RemoteClosed);
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => return None,
    };

    let envelope = match decode_envelope(bytes) {
        Ok(envelope) => envelope,
        Err(error) => {
            if let Some(envelope_id) = error.envelope_id() {
                if let Err(source) = send_ack(sink, envelope_id).await {
                    return Some(SessionExit::Failed(SessionError::Ack {
                        envelope_id: envelope_id.to_string(),
                        source,
                    }));
                }
            }
            tracing::warn!(%error, "dropping undecodable socket envelope");
            return None;
        }
    };

    if let Some(envelope_id) = envelope.ack_id() {
        if let Err(source) = send_ack(sink, envelope_id).await {
            return Some(SessionExit::Failed(SessionError::Ack {
                envelope_id: envelope_id.to_string(),
                source,
            }));
        }
    }

    match &envelope.kind {
        EnvelopeKind::Disconnect => {
            let reason = envelope
                .reason
                .clone()
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DISCONNECT_REASON.to_string());
            tracing::info!(reason = %reason, "socket disconnect envelope received");
            emit(
                events_tx,
                SessionEvent::Disconnect {
                    reason: reason.clone(),
                },
            );
            Some(SessionExit::Disconnected { reason })
        }
        EnvelopeKind::Hello => {
            tracing::debug!("socket hello received");
            None
        }
        EnvelopeKind::Unknown(kind) => {
            tracing::debug!(kind = %kind, "ignoring unknown socket envelope type");
            None
        }
        EnvelopeKind::EventCallback | EnvelopeKind::Interactive | EnvelopeKind::SlashCommand => {
            emit(events_tx, SessionEvent::Envelope(envelope));
            None
        }
    }
}

async fn send_ack<Si>(sink: &mut Si, envelope_id: &str) -> Result<(), tungstenite::Error>
where
    Si: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    sink.send(WsMessage::Text(encode_ack(envelope_id).into()))
        .await
}

fn emit(events_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            tracing::warn!(
                event = event.label(),
                "session event channel full; dropping event"
            );
        }
        Err(TrySendError::Closed(event)) => {
            tracing::debug!(event = event.label(), "session event receiver dropped");
        }
    }
}

//! Reconnecting Socket Mode connection manager.
//!
//! The manager owns at most one [`SocketSession`] at a time. It performs the
//! handshake, dials the returned URL, normalizes session envelopes and
//! forwards them onto a single merged channel that outlives every session.
//! Only a permanent auth failure or the shutdown signal ends it.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    backoff::Backoff,
    events::{normalize_envelope, InboundEvent},
    session::{SessionConfig, SessionEvent, SessionHandle, SocketSession},
};

const PERMANENT_AUTH_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("socket mode auth rejected: {0}")]
    Auth(String),
    #[error("socket mode handshake failed: {0}")]
    Transient(String),
}

impl HandshakeError {
    /// Classifies an `error` code returned by the handshake endpoint.
    pub fn from_api_error(code: &str) -> Self {
        let code = code.trim();
        if PERMANENT_AUTH_CODES.contains(&code) {
            Self::Auth(code.to_string())
        } else {
            Self::Transient(code.to_string())
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("socket mode connection stopped after permanent auth failure: {0}")]
    PermanentAuth(String),
}

/// Obtains a fresh websocket URL for the next session.
#[async_trait]
pub trait SocketHandshake: Send + Sync {
    async fn open_connection(&self) -> Result<String, HandshakeError>;
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub session: SessionConfig,
    pub merged_capacity: usize,
    /// The bot's own user id; its messages are flagged as bot authored.
    pub bot_user_id: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            session: SessionConfig::default(),
            merged_capacity: 64,
            bot_user_id: None,
        }
    }
}

/// Lifecycle transitions published on the optional status sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Handshaking { attempt: u64 },
    Connected { connection: u64 },
    Retrying { delay: Duration, reason: String },
    Terminal { permanent: bool },
}

enum ForwardOutcome {
    SessionEnded,
    Shutdown,
    ConsumerGone,
}

pub struct ConnectionManager {
    handshake: Arc<dyn SocketHandshake>,
    config: ManagerConfig,
    status_tx: Option<mpsc::UnboundedSender<ConnectionStatus>>,
}

impl ConnectionManager {
    pub fn new(handshake: Arc<dyn SocketHandshake>, config: ManagerConfig) -> Self {
        Self {
            handshake,
            config,
            status_tx: None,
        }
    }

    pub fn with_status_sink(mut self, status_tx: mpsc::UnboundedSender<ConnectionStatus>) -> Self {
        self.status_tx = Some(status_tx);
        self
    }

    /// Spawns the control loop and returns the merged event stream.
    ///
    /// The stream closes once, when the control task exits. The join handle
    /// resolves to `Err(ConnectionError::PermanentAuth)` when the handshake
    /// was rejected for good and `Ok(())` on shutdown.
    pub fn start(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> (
        mpsc::Receiver<InboundEvent>,
        JoinHandle<Result<(), ConnectionError>>,
    ) {
        let (merged_tx, merged_rx) = mpsc::channel(self.config.merged_capacity.max(1));
        let task = tokio::spawn(self.run(merged_tx, shutdown));
        (merged_rx, task)
    }

    async fn run(
        self,
        merged_tx: mpsc::Sender<InboundEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut attempt = 0_u64;
        let mut connections = 0_u64;

        loop {
            if *shutdown.borrow() {
                break;
            }
            attempt = attempt.saturating_add(1);
            self.publish(ConnectionStatus::Handshaking { attempt });

            let handshake = tokio::select! {
                result = self.handshake.open_connection() => result,
                () = wait_for_shutdown(&mut shutdown) => break,
            };
            let url = match handshake {
                Ok(url) => url,
                Err(HandshakeError::Auth(reason)) => {
                    tracing::error!(attempt, reason = %reason, "socket mode auth rejected; not retrying");
                    self.publish(ConnectionStatus::Terminal { permanent: true });
                    return Err(ConnectionError::PermanentAuth(reason));
                }
                Err(HandshakeError::Transient(reason)) => {
                    tracing::warn!(attempt, reason = %reason, "socket mode handshake failed");
                    if !self.pause(&mut backoff, reason, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let dial = tokio::select! {
                result = tokio_tungstenite::connect_async(url.as_str()) => result,
                () = wait_for_shutdown(&mut shutdown) => break,
            };
            let stream = match dial {
                Ok((stream, _response)) => stream,
                Err(error) => {
                    tracing::warn!(attempt, %error, "socket mode dial failed");
                    if !self
                        .pause(&mut backoff, format!("dial failed: {error}"), &mut shutdown)
                        .await
                    {
                        break;
                    }
                    continue;
                }
            };

            backoff.reset();
            connections = connections.saturating_add(1);
            self.publish(ConnectionStatus::Connected {
                connection: connections,
            });
            tracing::info!(connection = connections, "socket mode session connected");

            let (session, events) = SocketSession::spawn(stream, self.config.session.clone());
            let outcome = forward_session_events(
                session.handle(),
                events,
                self.config.bot_user_id.as_deref(),
                &merged_tx,
                &mut shutdown,
            )
            .await;
            let exit = session.join().await;
            tracing::info!(connection = connections, exit = %exit.describe(), "socket mode session ended");

            match outcome {
                ForwardOutcome::SessionEnded => {}
                ForwardOutcome::Shutdown => break,
                ForwardOutcome::ConsumerGone => {
                    tracing::debug!("merged event receiver dropped; stopping connection manager");
                    break;
                }
            }
            if !self.pause(&mut backoff, exit.describe(), &mut shutdown).await {
                break;
            }
        }

        self.publish(ConnectionStatus::Terminal { permanent: false });
        Ok(())
    }

    /// Sleeps the current backoff. Returns `false` when shutdown interrupted it.
    async fn pause(
        &self,
        backoff: &mut Backoff,
        reason: String,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let delay = backoff.current();
        tracing::debug!(delay_ms = delay.as_millis() as u64, reason = %reason, "socket mode reconnect scheduled");
        self.publish(ConnectionStatus::Retrying { delay, reason });
        tokio::select! {
            () = tokio::time::sleep(delay) => {
                backoff.advance();
                true
            }
            () = wait_for_shutdown(shutdown) => false,
        }
    }

    fn publish(&self, status: ConnectionStatus) {
        if let Some(status_tx) = &self.status_tx {
            let _ = status_tx.send(status);
        }
    }
}

async fn forward_session_events(
    session: SessionHandle,
    mut events: mpsc::Receiver<SessionEvent>,
    bot_user_id: Option<&str>,
    merged_tx: &mpsc::Sender<InboundEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> ForwardOutcome {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            () = wait_for_shutdown(shutdown) => {
                session.close();
                return ForwardOutcome::Shutdown;
            }
        };
        let Some(event) = event else {
            return ForwardOutcome::SessionEnded;
        };
        let envelope = match event {
            SessionEvent::Envelope(envelope) => envelope,
            SessionEvent::Disconnect { reason } => {
                tracing::debug!(reason = %reason, "session signalled disconnect");
                continue;
            }
        };
        let inbound = match normalize_envelope(&envelope, bot_user_id) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => {
                tracing::trace!(kind = envelope.kind.as_str(), "envelope carried no actionable event");
                continue;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to normalize socket envelope");
                continue;
            }
        };
        tokio::select! {
            sent = merged_tx.send(inbound) => {
                if sent.is_err() {
                    session.close();
                    return ForwardOutcome::ConsumerGone;
                }
            }
            () = wait_for_shutdown(shutdown) => {
                session.close();
                return ForwardOutcome::Shutdown;
            }
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

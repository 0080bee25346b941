//! Slack Web API client for the Socket Mode handshake and outbound posts.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    manager::{HandshakeError, SocketHandshake},
    socket_helpers::{
        is_auth_rejection_status, is_retryable_slack_status, is_retryable_transport_error,
        parse_retry_after, retry_delay, truncate_for_error,
    },
};

const RETRY_ATTEMPT_HEADER: &str = "x-relay-retry-attempt";

#[derive(Debug, Clone, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

/// Non-success HTTP status after retries were exhausted.
#[derive(Debug, Error)]
#[error("slack api {operation} failed with status {status}: {body}")]
struct SlackStatusError {
    operation: String,
    status: u16,
    body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackPostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        app_token: String,
        bot_token: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("relay-slack-bridge"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_token: app_token.trim().to_string(),
            bot_token: bot_token.trim().to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    pub async fn resolve_bot_user_id(&self) -> Result<String> {
        let response: SlackAuthTestResponse = self
            .request_json("auth.test", || {
                self.http
                    .post(format!("{}/auth.test", self.api_base))
                    .bearer_auth(&self.bot_token)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack auth.test failed: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
        }
        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))
    }

    /// Calls `apps.connections.open` with the app token.
    ///
    /// Auth error codes and HTTP 401/403 are permanent; everything else,
    /// including transport failures, is transient.
    pub async fn open_socket_connection(&self) -> Result<String, HandshakeError> {
        let response = self
            .request_json::<SlackOpenSocketResponse, _>("apps.connections.open", || {
                self.http
                    .post(format!("{}/apps.connections.open", self.api_base))
                    .bearer_auth(&self.app_token)
            })
            .await;
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                let auth_rejected = error
                    .downcast_ref::<SlackStatusError>()
                    .is_some_and(|status| is_auth_rejection_status(status.status));
                let message = format!("{error:#}");
                return Err(if auth_rejected {
                    HandshakeError::Auth(message)
                } else {
                    HandshakeError::Transient(message)
                });
            }
        };
        if !response.ok {
            return Err(HandshakeError::from_api_error(
                response.error.as_deref().unwrap_or("unknown_error"),
            ));
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                HandshakeError::Transient("apps.connections.open did not return url".to_string())
            })
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<SlackPostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        attach_thread(&mut payload, thread_ts);
        self.post_chat("chat.postMessage", &payload, channel, None)
            .await
    }

    /// Posts a message with Block Kit `blocks`; `text` is the notification fallback.
    pub async fn post_blocks(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
        blocks: Value,
    ) -> Result<SlackPostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "blocks": blocks,
        });
        attach_thread(&mut payload, thread_ts);
        self.post_chat("chat.postMessage", &payload, channel, None)
            .await
    }

    pub async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<SlackPostedMessage> {
        let payload = json!({
            "channel": channel,
            "ts": ts,
            "text": text,
        });
        self.post_chat("chat.update", &payload, channel, Some(ts))
            .await
    }

    async fn post_chat(
        &self,
        method: &str,
        payload: &Value,
        channel: &str,
        fallback_ts: Option<&str>,
    ) -> Result<SlackPostedMessage> {
        let response: SlackChatMessageResponse = self
            .request_json(method, || {
                self.http
                    .post(format!("{}/{method}", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack {method} failed: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
        }
        let ts = response
            .ts
            .or_else(|| fallback_ts.map(str::to_string))
            .ok_or_else(|| anyhow!("slack {method} response missing ts"))?;
        Ok(SlackPostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts,
        })
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .send()
                .await;
            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .with_context(|| format!("failed to decode slack {operation}"));
            }

            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            if attempt < self.retry_max_attempts && is_retryable_slack_status(status.as_u16()) {
                tracing::debug!(
                    operation,
                    attempt,
                    status = status.as_u16(),
                    "retrying slack api request"
                );
                tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, retry_after))
                    .await;
                continue;
            }

            return Err(SlackStatusError {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: truncate_for_error(&body, 800),
            }
            .into());
        }
    }
}

#[async_trait]
impl SocketHandshake for SlackApiClient {
    async fn open_connection(&self) -> Result<String, HandshakeError> {
        self.open_socket_connection().await
    }
}

fn attach_thread(payload: &mut Value, thread_ts: Option<&str>) {
    if let Some(thread_ts) = thread_ts.map(str::trim).filter(|value| !value.is_empty()) {
        payload["thread_ts"] = Value::String(thread_ts.to_string());
    }
}

use std::time::Duration;

use relay_core::truncate_text;

/// Retry-After seconds from a Web API response, when the header is numeric.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok()
}

/// Delay before retry `attempt` (1-based). A server-provided Retry-After wins.
pub(crate) fn retry_delay(
    base_delay_ms: u64,
    attempt: usize,
    retry_after_seconds: Option<u64>,
) -> Duration {
    match retry_after_seconds {
        Some(seconds) => Duration::from_secs(seconds),
        None => {
            let exponent = attempt.saturating_sub(1).min(6) as u32;
            Duration::from_millis(base_delay_ms.max(1).saturating_mul(1_u64 << exponent))
        }
    }
}

pub(crate) fn is_retryable_slack_status(status: u16) -> bool {
    matches!(status, 429 | 500..=599)
}

pub(crate) fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// HTTP statuses that mean the app token itself was rejected.
pub(crate) fn is_auth_rejection_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

/// Bounds a response body before it is embedded in an error message.
pub fn truncate_for_error(value: &str, max_chars: usize) -> String {
    truncate_text(value, max_chars)
}

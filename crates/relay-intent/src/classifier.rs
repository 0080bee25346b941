use std::time::Duration;

use async_trait::async_trait;
use relay_history::HistoryEntry;
use thiserror::Error;

use crate::{
    intent::Intent,
    patterns::{detect_intent, is_clear_question},
};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Request(String),
    #[error("classifier returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// External intent classifier, consulted before the pattern engine.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, history: &[HistoryEntry], text: &str)
        -> Result<Intent, ClassifierError>;
}

/// Resolves the intent of `text`.
///
/// Commands and clear questions short-circuit. Otherwise the classifier, when
/// present, gets `timeout` to answer; on timeout or error the pattern engine
/// decides.
pub async fn classify_with_fallback(
    classifier: Option<&dyn IntentClassifier>,
    history: &[HistoryEntry],
    text: &str,
    timeout: Duration,
) -> Intent {
    if text.trim_start().starts_with('/') {
        return Intent::Command;
    }
    if is_clear_question(text) {
        return Intent::Question;
    }
    let Some(classifier) = classifier else {
        return detect_intent(text);
    };

    match tokio::time::timeout(timeout, classifier.classify(history, text)).await {
        Ok(Ok(intent)) => {
            tracing::debug!(intent = intent.as_str(), "external classifier resolved intent");
            intent
        }
        Ok(Err(error)) => {
            tracing::debug!(%error, "external classifier failed; using pattern engine");
            detect_intent(text)
        }
        Err(_) => {
            tracing::debug!(
                timeout_ms = timeout.as_millis() as u64,
                "external classifier timed out; using pattern engine"
            );
            detect_intent(text)
        }
    }
}

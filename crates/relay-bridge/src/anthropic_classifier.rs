use std::time::Duration;

use async_trait::async_trait;
use relay_cli::ClassifierSettings;
use relay_history::HistoryEntry;
use relay_intent::{ClassifierError, Intent, IntentClassifier};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

const HISTORY_WINDOW: usize = 5;
const MAX_TOKENS: u32 = 100;
const SYSTEM_PROMPT: &str = r#"You are an intent classifier for a coding assistant bot. Classify the user's message into exactly one of these intents:

- command: Message starts with /
- greeting: Simple greeting like "hi", "hello", "hey"
- research: Requests for analysis/research (e.g., "research how X works", "analyze the auth flow")
- planning: Requests for implementation plans (e.g., "plan how to add X", "design a solution for Y")
- question: Questions about code/project (e.g., "what files handle auth?", "how does X work?")
- chat: Conversational/opinion-seeking (e.g., "what do you think about...", "should I...")
- task: Requests to make changes (e.g., "add a button", "fix the bug", "implement feature X")

"What do you think about adding X?" is chat, not task. "Add X to the project" is task.
Questions that need no code changes are question. When unsure between task and chat, answer chat.

Respond with JSON only: {"intent": "...", "confidence": 0.0-1.0}"#;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassificationPayload {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// [`IntentClassifier`] backed by the Anthropic Messages API.
#[derive(Debug, Clone)]
pub(crate) struct AnthropicClassifier {
    client: reqwest::Client,
    messages_url: String,
    model: String,
}

impl AnthropicClassifier {
    pub(crate) fn new(settings: &ClassifierSettings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", HeaderValue::from_str(settings.api_key.trim())?);
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(settings.request_timeout_ms.max(1)))
            .build()?;

        let base = settings.api_base.trim_end_matches('/');
        let messages_url = if base.ends_with("/messages") {
            base.to_string()
        } else {
            format!("{base}/messages")
        };
        Ok(Self {
            client,
            messages_url,
            model: settings.model.clone(),
        })
    }

    fn request_body(&self, history: &[HistoryEntry], text: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": render_classification_prompt(history, text) }],
        })
    }
}

fn render_classification_prompt(history: &[HistoryEntry], text: &str) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let recent = &history[start..];
    let mut prompt = String::new();
    if !recent.is_empty() {
        prompt.push_str("Recent conversation:\n");
        for entry in recent {
            prompt.push_str(&format!("[{}] {}\n", entry.role.as_str(), entry.content));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("Classify this message: {text}"));
    prompt
}

/// Extracts the classification from the model's text, tolerating code fences
/// and prose around the JSON object.
fn parse_classification(text: &str) -> Result<Intent, ClassifierError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(ClassifierError::InvalidResponse(format!(
                "no JSON object in '{}'",
                relay_core::truncate_text(text.trim(), 120)
            )))
        }
    };
    let payload: ClassificationPayload = serde_json::from_str(json)
        .map_err(|error| ClassifierError::InvalidResponse(error.to_string()))?;
    let intent = Intent::from_label(&payload.intent);
    tracing::debug!(
        intent = intent.as_str(),
        confidence = payload.confidence.unwrap_or_default(),
        "anthropic classification"
    );
    Ok(intent)
}

#[async_trait]
impl IntentClassifier for AnthropicClassifier {
    async fn classify(
        &self,
        history: &[HistoryEntry],
        text: &str,
    ) -> Result<Intent, ClassifierError> {
        let response = self
            .client
            .post(&self.messages_url)
            .json(&self.request_body(history, text))
            .send()
            .await
            .map_err(|error| ClassifierError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Request(format!(
                "anthropic returned status {}",
                status.as_u16()
            )));
        }
        let response: MessagesResponse = response
            .json()
            .await
            .map_err(|error| ClassifierError::InvalidResponse(error.to_string()))?;
        let text = response
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| ClassifierError::InvalidResponse("empty content".to_string()))?;
        parse_classification(&text)
    }
}

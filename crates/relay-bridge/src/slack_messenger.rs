use anyhow::Result;
use async_trait::async_trait;
use relay_core::chunk_text;
use relay_orchestrator::{MessageRef, Messenger, TaskOutcome};
use relay_socket::SlackApiClient;

use crate::slack_format::{
    confirmation_blocks, confirmation_fallback_text, progress_text, result_body, result_header,
    SLACK_BLOCK_TEXT_LIMIT,
};

/// [`Messenger`] backed by the Slack Web API. Every reply lands in the
/// originating thread when one is known.
#[derive(Clone)]
pub(crate) struct SlackMessenger {
    client: SlackApiClient,
}

impl SlackMessenger {
    pub(crate) fn new(client: SlackApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Messenger for SlackMessenger {
    async fn send_text(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        text: &str,
    ) -> Result<()> {
        self.client
            .post_message(conversation_id, text, thread_id)
            .await?;
        Ok(())
    }

    async fn send_confirmation(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        task_id: &str,
        description: &str,
    ) -> Result<MessageRef> {
        let posted = self
            .client
            .post_blocks(
                conversation_id,
                thread_id,
                &confirmation_fallback_text(task_id),
                confirmation_blocks(task_id, description),
            )
            .await?;
        Ok(MessageRef(posted.ts))
    }

    async fn send_progress(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        message_ref: Option<&MessageRef>,
        task_id: &str,
        phase: &str,
        percent: u8,
        detail: &str,
    ) -> Result<MessageRef> {
        let text = progress_text(task_id, phase, percent, detail);
        let posted = match message_ref {
            Some(message_ref) => {
                self.client
                    .update_message(conversation_id, message_ref.as_str(), &text)
                    .await?
            }
            None => {
                self.client
                    .post_message(conversation_id, &text, thread_id)
                    .await?
            }
        };
        Ok(MessageRef(posted.ts))
    }

    async fn send_result(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        task_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<()> {
        self.send_text(conversation_id, thread_id, &result_header(task_id, outcome))
            .await?;
        if let Some(body) = result_body(outcome) {
            self.send_chunked(conversation_id, thread_id, &body, None)
                .await?;
        }
        Ok(())
    }

    async fn send_chunked(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        text: &str,
        title: Option<&str>,
    ) -> Result<()> {
        let heading = title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(|title| format!("*{title}*\n\n"));
        let budget = self
            .max_message_length()
            .saturating_sub(heading.as_deref().map_or(0, |heading| heading.chars().count()));
        for (index, chunk) in chunk_text(text, budget).into_iter().enumerate() {
            let message = match (&heading, index) {
                (Some(heading), 0) => format!("{heading}{chunk}"),
                _ => chunk,
            };
            self.send_text(conversation_id, thread_id, &message).await?;
        }
        Ok(())
    }

    fn max_message_length(&self) -> usize {
        SLACK_BLOCK_TEXT_LIMIT
    }
}

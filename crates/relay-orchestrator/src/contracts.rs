//! Seams between the orchestrator and the outside world.
//!
//! The orchestrator only talks to chat through [`Messenger`], runs work
//! through [`TaskExecutor`], and optionally maps chat users to team members
//! through [`MemberResolver`].

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

/// Handle to a posted message that can later be edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef(pub String);

impl MessageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: String,
    pub link: Option<String>,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        text: &str,
    ) -> anyhow::Result<()>;

    /// Posts a confirmation prompt for `task_id`, with execute/cancel controls
    /// where the platform supports them.
    async fn send_confirmation(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        task_id: &str,
        description: &str,
    ) -> anyhow::Result<MessageRef>;

    /// Posts a progress message, or updates `message_ref` when given.
    #[allow(clippy::too_many_arguments)]
    async fn send_progress(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        message_ref: Option<&MessageRef>,
        task_id: &str,
        phase: &str,
        percent: u8,
        detail: &str,
    ) -> anyhow::Result<MessageRef>;

    async fn send_result(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        task_id: &str,
        outcome: &TaskOutcome,
    ) -> anyhow::Result<()>;

    /// Sends `text` split into messages of at most [`Self::max_message_length`].
    async fn send_chunked(
        &self,
        conversation_id: &str,
        thread_id: Option<&str>,
        text: &str,
        title: Option<&str>,
    ) -> anyhow::Result<()>;

    fn max_message_length(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub working_dir: PathBuf,
    pub wants_pr: bool,
    pub member_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: String,
    pub success: bool,
    pub error: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to launch executor: {0}")]
    Launch(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub phase: String,
    pub percent: u8,
    pub detail: String,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs `task` to completion. Dropping the returned future must stop the work.
    async fn execute(&self, task: ExecutorTask) -> Result<ExecutionResult, ExecutorError>;

    fn on_progress(&self, task_id: &str, callback: ProgressCallback);

    fn remove_progress(&self, task_id: &str);
}

#[async_trait]
pub trait MemberResolver: Send + Sync {
    /// Maps a chat sender to a team member id, `None` when unknown.
    async fn resolve_identity(&self, sender_id: &str) -> anyhow::Result<Option<String>>;
}

//! Routes admitted chat events by intent and owns the task lifecycle.
//!
//! A conversation moves from no task, to a pending task awaiting
//! confirmation, to a running executor call, and back. All of that state
//! lives in one [`TaskStateService`]; everything outside the process is
//! reached through the traits in [`contracts`].

pub mod commands;
pub mod contracts;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod state;

pub use commands::{parse_command, Command, Project};
pub use contracts::{
    ExecutionResult, ExecutorError, ExecutorTask, MemberResolver, MessageRef, Messenger,
    ProgressCallback, ProgressUpdate, TaskExecutor, TaskOutcome,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorParts};
pub use progress::{ProgressRegistry, ProgressThrottle, ProgressThrottleConfig};
pub use state::{
    CancelOutcome, PendingKind, PendingTask, PromoteOutcome, RunningTaskInfo, TaskStateService,
};

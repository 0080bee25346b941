//! Intake loop and task lifecycle.
//!
//! Admission, classification and state transitions run inline on the intake
//! loop in arrival order. Replies and executor calls are spawned so a slow
//! chat API or executor never stalls intake.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use relay_core::{clean_internal_signals, format_elapsed, truncate_text, ConversationKey};
use relay_history::{HistoryEntry, HistoryStore};
use relay_intent::{classify_with_fallback, is_ephemeral_task, Intent, IntentClassifier};
use relay_policy::{is_direct_message_channel, AdmissionPolicy, AdmissionRequest, RateLimiter};
use relay_socket::{EventKind, InboundEvent, InteractionAction, NormalizedEvent};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval_at, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    commands::{
        find_project, parse_command, render_help, render_projects, render_queue, render_status,
        Command, Project,
    },
    contracts::{
        ExecutionResult, ExecutorTask, MemberResolver, MessageRef, Messenger, ProgressUpdate,
        TaskExecutor, TaskOutcome,
    },
    progress::{ProgressThrottle, ProgressThrottleConfig},
    prompts::{
        confirmation_fallback, pending_discarded, pending_expired, pending_refusal,
        plan_task_description, still_running, task_cancelled, task_failed, task_rate_limited,
        task_timed_out, ReadOnlyKind, GREETING_REPLY,
    },
    state::{CancelOutcome, PendingKind, PendingTask, PromoteOutcome, TaskStateService},
};

const PROGRESS_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const AFFIRMATIVE_REPLIES: &[&str] = &["yes", "y", "confirm", "ok"];
const NEGATIVE_REPLIES: &[&str] = &["no", "n", "cancel", "nope"];

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub task_id_prefix: String,
    pub default_project: Project,
    pub projects: Vec<Project>,
    pub classifier_timeout: Duration,
    /// History entries handed to the external classifier.
    pub history_context: usize,
    pub history_entry_chars: usize,
    pub question_timeout: Duration,
    pub research_timeout: Duration,
    pub chat_timeout: Duration,
    pub planning_timeout: Duration,
    pub task_timeout: Duration,
    pub pending_ttl: Duration,
    pub expiry_sweep_interval: Duration,
    pub rate_limit_idle: Duration,
    pub progress: ProgressThrottleConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_id_prefix: "TASK".to_string(),
            default_project: Project::new("default", "."),
            projects: Vec::new(),
            classifier_timeout: Duration::from_secs(2),
            history_context: 5,
            history_entry_chars: 500,
            question_timeout: Duration::from_secs(90),
            research_timeout: Duration::from_secs(180),
            chat_timeout: Duration::from_secs(60),
            planning_timeout: Duration::from_secs(120),
            task_timeout: Duration::from_secs(30 * 60),
            pending_ttl: Duration::from_secs(5 * 60),
            expiry_sweep_interval: Duration::from_secs(60),
            rate_limit_idle: Duration::from_secs(60 * 60),
            progress: ProgressThrottleConfig::default(),
        }
    }
}

/// Collaborators the orchestrator is wired with.
pub struct OrchestratorParts {
    pub messenger: Arc<dyn Messenger>,
    pub executor: Arc<dyn TaskExecutor>,
    pub state: Arc<TaskStateService>,
    pub limiter: Arc<RateLimiter>,
    pub history: Arc<HistoryStore>,
    pub policy: AdmissionPolicy,
    pub classifier: Option<Arc<dyn IntentClassifier>>,
    pub members: Option<Arc<dyn MemberResolver>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    messenger: Arc<dyn Messenger>,
    executor: Arc<dyn TaskExecutor>,
    state: Arc<TaskStateService>,
    limiter: Arc<RateLimiter>,
    history: Arc<HistoryStore>,
    policy: AdmissionPolicy,
    classifier: Option<Arc<dyn IntentClassifier>>,
    members: Option<Arc<dyn MemberResolver>>,
}

enum RunOutcome {
    Finished(ExecutionResult),
    Failed(String),
    TimedOut,
    Cancelled,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts, config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                messenger: parts.messenger,
                executor: parts.executor,
                state: parts.state,
                limiter: parts.limiter,
                history: parts.history,
                policy: parts.policy,
                classifier: parts.classifier,
                members: parts.members,
            }),
        }
    }

    pub fn state(&self) -> &Arc<TaskStateService> {
        &self.inner.state
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.history
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn spawn(
        self,
        events: mpsc::Receiver<InboundEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, shutdown))
    }

    /// Consumes `events` until the stream closes or `shutdown` flips to true.
    /// Running tasks are signalled to stop on exit.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<InboundEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let sweep_interval = self.inner.config.expiry_sweep_interval;
        let mut expiry = interval_at(tokio::time::Instant::now() + sweep_interval, sweep_interval);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = wait_for_shutdown(&mut shutdown) => {
                    info!("orchestrator shutdown requested");
                    break;
                }
                _ = expiry.tick() => self.run_maintenance(),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("inbound event stream closed");
                        break;
                    }
                },
            }
        }

        let signalled = self.inner.state.cancel_all_running();
        if signalled > 0 {
            info!(signalled, "signalled running tasks to stop");
        }
    }

    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => {
                let addressed = message.kind == EventKind::AppMention;
                self.handle_message(message, addressed).await;
            }
            InboundEvent::SlashCommand(command) => self.handle_message(command, true).await,
            InboundEvent::Interaction(action) => self.handle_interaction(action),
        }
    }

    /// Expires stale pending tasks and forgets idle rate-limit buckets.
    pub fn run_maintenance(&self) {
        let ttl = self.inner.config.pending_ttl;
        for pending in self.inner.state.expire_pending(Instant::now(), ttl) {
            info!(
                conversation = %pending.key,
                task_id = %pending.task_id,
                "pending task expired"
            );
            self.reply(&pending.key, pending_expired(&pending.task_id, &format_elapsed(ttl)));
        }
        let purged = self.inner.limiter.cleanup(self.inner.config.rate_limit_idle);
        if purged > 0 {
            debug!(purged, "purged idle rate limit buckets");
        }
        let forgotten = self
            .inner
            .state
            .forget_idle_senders(Instant::now(), self.inner.config.rate_limit_idle);
        if forgotten > 0 {
            debug!(forgotten, "forgot idle conversation senders");
        }
    }

    async fn handle_message(&self, message: NormalizedEvent, addressed: bool) {
        let key = ConversationKey::for_message(
            &message.conversation_id,
            message.thread_id.as_deref(),
            &message.timestamp,
            is_direct_message_channel(&message.conversation_id),
        );
        let request = AdmissionRequest {
            conversation_id: &message.conversation_id,
            sender_id: &message.sender_id,
            is_from_bot: message.is_from_bot,
            addressed,
        };
        if !self.admit(&request, &key) {
            return;
        }
        self.inner.state.record_sender(&key, &message.sender_id);

        let text = message.text.trim();
        if text.is_empty() {
            debug!(conversation = %key, "ignoring empty message");
            return;
        }
        if let Some(confirmed) = confirmation_reply(text) {
            self.resolve_confirmation(&key, None, confirmed);
            return;
        }

        let config = &self.inner.config;
        let history = self.inner.history.recent(&key, config.history_context);
        self.inner.history.add(
            &key,
            HistoryEntry::user(
                truncate_text(text, config.history_entry_chars),
                &message.sender_id,
            ),
        );
        let intent = classify_with_fallback(
            self.inner.classifier.as_deref(),
            &history,
            text,
            config.classifier_timeout,
        )
        .await;
        info!(conversation = %key, intent = intent.as_str(), "dispatching message");

        match intent {
            Intent::Command => self.handle_command(&key, text),
            Intent::Greeting => self.reply(&key, GREETING_REPLY.to_string()),
            Intent::Question => self.spawn_read_only(ReadOnlyKind::Question, key, &message),
            Intent::Research => self.spawn_read_only(ReadOnlyKind::Research, key, &message),
            Intent::Planning => self.spawn_read_only(ReadOnlyKind::Planning, key, &message),
            Intent::Chat => self.spawn_read_only(ReadOnlyKind::Chat, key, &message),
            Intent::Task => self.request_task(&key, &message.sender_id, text),
        }
    }

    fn handle_interaction(&self, action: InteractionAction) {
        let key = ConversationKey::for_message(
            &action.conversation_id,
            action.thread_id.as_deref(),
            action.message_ts.as_deref().unwrap_or_default(),
            is_direct_message_channel(&action.conversation_id),
        );
        let request = AdmissionRequest {
            conversation_id: &action.conversation_id,
            sender_id: &action.sender_id,
            is_from_bot: false,
            addressed: true,
        };
        if !self.admit(&request, &key) {
            return;
        }
        self.inner.state.record_sender(&key, &action.sender_id);

        let task_id = Some(action.value.trim()).filter(|value| !value.is_empty());
        match action.action_id.as_str() {
            "execute_task" | "execute_plan" => self.resolve_confirmation(&key, task_id, true),
            "cancel_task" | "cancel_plan" => self.resolve_confirmation(&key, task_id, false),
            other => debug!(conversation = %key, action_id = other, "ignoring unknown action"),
        }
    }

    fn admit(&self, request: &AdmissionRequest<'_>, key: &ConversationKey) -> bool {
        let screened = self.inner.policy.screen_sender(request);
        if !screened.is_allowed() {
            debug!(
                conversation = %key,
                sender = request.sender_id,
                reason_code = screened.reason_code(),
                "event dropped by sender policy"
            );
            return false;
        }
        if !self.inner.limiter.allow_message(&key.conversation_root()) {
            warn!(
                conversation = %key,
                sender = request.sender_id,
                "message rate limit exceeded; dropping event"
            );
            return false;
        }
        let visibility = self.inner.policy.check_visibility(request);
        if !visibility.is_allowed() {
            debug!(
                conversation = %key,
                reason_code = visibility.reason_code(),
                "event dropped by visibility policy"
            );
            return false;
        }
        true
    }

    fn resolve_confirmation(&self, key: &ConversationKey, task_id: Option<&str>, confirmed: bool) {
        if !confirmed {
            match self.inner.state.discard_pending(key, task_id) {
                Some(pending) => {
                    info!(conversation = %key, task_id = %pending.task_id, "pending task discarded");
                    self.reply(key, pending_discarded(&pending.task_id));
                }
                None => debug!(conversation = %key, "no pending task to cancel"),
            }
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        match self.inner.state.promote_pending(key, task_id, cancel_tx) {
            PromoteOutcome::Promoted(pending) => {
                info!(conversation = %key, task_id = %pending.task_id, "task confirmed");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.execute_task(pending, cancel_rx).await });
            }
            PromoteOutcome::AlreadyRunning {
                running_task_id,
                pending_task_id,
            } => self.reply(key, still_running(&running_task_id, &pending_task_id)),
            PromoteOutcome::NothingPending => {
                debug!(conversation = %key, "no pending task to confirm");
            }
        }
    }

    fn request_task(&self, key: &ConversationKey, sender_id: &str, text: &str) {
        let state = &self.inner.state;
        if let Some(existing) = state.pending(key) {
            self.reply(key, pending_refusal(&existing.task_id));
            return;
        }
        if !self.inner.limiter.allow_task(&key.conversation_root()) {
            warn!(conversation = %key, sender = sender_id, "task rate limit exceeded");
            self.reply(key, task_rate_limited().to_string());
            return;
        }

        let pending = PendingTask {
            task_id: state.allocate_task_id(&self.inner.config.task_id_prefix),
            description: text.to_string(),
            key: key.clone(),
            thread_id: key.thread_id().map(str::to_string),
            sender_id: sender_id.to_string(),
            created_at: Instant::now(),
            kind: PendingKind::Task,
        };
        match state.try_insert_pending(pending.clone()) {
            Ok(()) => {
                info!(conversation = %key, task_id = %pending.task_id, "task awaiting confirmation");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let description = pending.description.clone();
                    inner.request_confirmation(&pending, &description).await;
                });
            }
            Err(existing) => self.reply(key, pending_refusal(&existing.task_id)),
        }
    }

    fn handle_command(&self, key: &ConversationKey, text: &str) {
        let state = &self.inner.state;
        let config = &self.inner.config;
        let conversation_id = key.conversation_id();
        let command = parse_command(text);
        debug!(conversation = %key, command = ?command, "handling command");

        let reply = match command {
            Command::Help => render_help(),
            Command::Status => {
                let (running, pending) = state.counts();
                render_status(&self.inner.active_project(conversation_id), running, pending)
            }
            Command::Queue => {
                let (running, pending) = state.conversation_tasks(conversation_id);
                render_queue(&running, &pending, Instant::now())
            }
            Command::Switch(None) => {
                render_projects(&config.projects, &self.inner.active_project(conversation_id))
            }
            Command::Switch(Some(name)) => match find_project(&config.projects, &name) {
                Some(project) => {
                    state.set_active_project(conversation_id, &project.name);
                    info!(conversation = %key, project = %project.name, "switched active project");
                    format!(
                        "✅ Switched to *{}* (`{}`)",
                        project.name,
                        project.path.display()
                    )
                }
                None => format!("Project `{name}` not found. Use `/switch` to list projects."),
            },
            Command::Cancel(task_id) => {
                let target = state.command_key(key, task_id.as_deref());
                match state.cancel(&target, task_id.as_deref()) {
                    CancelOutcome::Pending(pending) => {
                        info!(conversation = %target, task_id = %pending.task_id, "pending task cancelled");
                        format!("❌ Cancelled pending task `{}`", pending.task_id)
                    }
                    CancelOutcome::Running(running) => {
                        info!(conversation = %target, task_id = %running.task_id, "stopping running task");
                        format!("🛑 Stopping task `{}`", running.task_id)
                    }
                    CancelOutcome::Nothing => "Nothing to cancel.".to_string(),
                }
            }
            Command::Unknown(name) => format!("Unknown command `/{name}`. Try `/help`."),
        };
        self.reply(key, reply);
    }

    fn spawn_read_only(&self, kind: ReadOnlyKind, key: ConversationKey, message: &NormalizedEvent) {
        let inner = Arc::clone(&self.inner);
        let request = message.text.trim().to_string();
        let sender_id = message.sender_id.clone();
        tokio::spawn(async move { inner.run_read_only(kind, key, request, sender_id).await });
    }

    fn reply(&self, key: &ConversationKey, text: String) {
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        tokio::spawn(async move { inner.send_text(&key, &text).await });
    }
}

impl OrchestratorInner {
    fn active_project(&self, conversation_id: &str) -> Project {
        self.state
            .active_project(conversation_id)
            .and_then(|name| find_project(&self.config.projects, &name).cloned())
            .unwrap_or_else(|| self.config.default_project.clone())
    }

    fn read_only_timeout(&self, kind: ReadOnlyKind) -> Duration {
        match kind {
            ReadOnlyKind::Question => self.config.question_timeout,
            ReadOnlyKind::Research => self.config.research_timeout,
            ReadOnlyKind::Planning => self.config.planning_timeout,
            ReadOnlyKind::Chat => self.config.chat_timeout,
        }
    }

    async fn run_read_only(
        &self,
        kind: ReadOnlyKind,
        key: ConversationKey,
        request: String,
        sender_id: String,
    ) {
        self.send_text(&key, kind.acknowledgement()).await;

        let project = self.active_project(key.conversation_id());
        let task = ExecutorTask {
            id: self.state.allocate_task_id(kind.task_id_prefix()),
            title: kind.title(&request),
            description: kind.prompt(&request, &project.path),
            working_dir: project.path,
            wants_pr: false,
            member_id: None,
        };
        let task_id = task.id.clone();
        debug!(conversation = %key, task_id = %task_id, kind = kind.as_str(), "read-only run started");

        let output = match tokio::time::timeout(
            self.read_only_timeout(kind),
            self.executor.execute(task),
        )
        .await
        {
            Err(_) => {
                warn!(conversation = %key, task_id = %task_id, kind = kind.as_str(), "read-only run timed out");
                self.send_text(&key, kind.timed_out_reply()).await;
                return;
            }
            Ok(Err(error)) => {
                warn!(conversation = %key, task_id = %task_id, %error, "read-only run failed");
                self.send_text(&key, &kind.failed_reply(&error.to_string()))
                    .await;
                return;
            }
            Ok(Ok(result)) if !result.success => {
                let detail = failure_detail(&result);
                warn!(conversation = %key, task_id = %task_id, detail = %detail, "read-only run reported failure");
                self.send_text(&key, &kind.failed_reply(&detail)).await;
                return;
            }
            Ok(Ok(result)) => clean_internal_signals(&result.output),
        };
        let output = if output.trim().is_empty() {
            "I couldn't find anything to report.".to_string()
        } else {
            output
        };

        match kind {
            ReadOnlyKind::Question => self.send_chunked(&key, &output, None).await,
            ReadOnlyKind::Research => {
                self.send_chunked(&key, &output, Some("Research findings"))
                    .await
            }
            ReadOnlyKind::Chat => {
                let reply = truncate_text(&output, self.messenger.max_message_length());
                self.send_text(&key, &reply).await;
                self.history.add(
                    &key,
                    HistoryEntry::assistant(truncate_text(&reply, self.config.history_entry_chars)),
                );
            }
            ReadOnlyKind::Planning => self.offer_plan(&key, &sender_id, &request, &output).await,
        }
    }

    async fn offer_plan(&self, key: &ConversationKey, sender_id: &str, request: &str, plan: &str) {
        let pending = PendingTask {
            task_id: self.state.allocate_task_id(&self.config.task_id_prefix),
            description: plan_task_description(plan, request),
            key: key.clone(),
            thread_id: key.thread_id().map(str::to_string),
            sender_id: sender_id.to_string(),
            created_at: Instant::now(),
            kind: PendingKind::Plan,
        };
        if let Err(existing) = self.state.try_insert_pending(pending.clone()) {
            self.send_chunked(key, plan, Some("Implementation Plan")).await;
            self.send_text(key, &pending_refusal(&existing.task_id)).await;
            return;
        }
        info!(conversation = %key, task_id = %pending.task_id, "plan awaiting confirmation");
        let limit = self.messenger.max_message_length().saturating_sub(100);
        self.request_confirmation(&pending, &truncate_text(plan, limit))
            .await;
    }

    async fn request_confirmation(&self, pending: &PendingTask, description: &str) {
        let conversation_id = pending.key.conversation_id();
        let thread_id = pending.thread_id.as_deref();
        if let Err(error) = self
            .messenger
            .send_confirmation(conversation_id, thread_id, &pending.task_id, description)
            .await
        {
            warn!(
                conversation = %pending.key,
                task_id = %pending.task_id,
                %error,
                "confirmation prompt failed; falling back to text"
            );
            self.send_text(
                &pending.key,
                &confirmation_fallback(&pending.task_id, description),
            )
            .await;
        }
    }

    async fn execute_task(&self, pending: PendingTask, mut cancel_rx: watch::Receiver<bool>) {
        let key = pending.key.clone();
        let task_id = pending.task_id.clone();
        let conversation_id = key.conversation_id().to_string();
        let thread_id = pending.thread_id.clone();
        let wants_pr = !is_ephemeral_task(&pending.description);
        let phase = if wants_pr {
            "Starting"
        } else {
            "Starting (no PR)"
        };

        let message_ref = match self
            .messenger
            .send_progress(
                &conversation_id,
                thread_id.as_deref(),
                None,
                &task_id,
                phase,
                0,
                "Initializing...",
            )
            .await
        {
            Ok(message_ref) => Some(message_ref),
            Err(error) => {
                warn!(conversation = %key, task_id = %task_id, %error, "failed to post start message");
                None
            }
        };

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let throttle = Mutex::new(ProgressThrottle::new(self.config.progress));
        let callback_task_id = task_id.clone();
        self.executor.on_progress(
            &task_id,
            Arc::new(move |update: ProgressUpdate| {
                if update.task_id != callback_task_id {
                    return;
                }
                let emit = throttle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .should_emit(&update.phase, update.percent, Instant::now());
                if emit {
                    let _ = progress_tx.send(update);
                }
            }),
        );
        let mut forwarder = tokio::spawn(forward_progress(
            Arc::clone(&self.messenger),
            conversation_id.clone(),
            thread_id.clone(),
            message_ref,
            progress_rx,
        ));

        let task = ExecutorTask {
            id: task_id.clone(),
            title: truncate_text(&pending.description, 50),
            description: pending.description.clone(),
            working_dir: self.active_project(&conversation_id).path,
            wants_pr,
            member_id: self.resolve_member(&pending).await,
        };
        info!(conversation = %key, task_id = %task_id, wants_pr, "task execution started");

        let started = Instant::now();
        let execution = tokio::time::timeout(self.config.task_timeout, self.executor.execute(task));
        let outcome = tokio::select! {
            result = execution => match result {
                Ok(Ok(result)) => RunOutcome::Finished(result),
                Ok(Err(error)) => RunOutcome::Failed(error.to_string()),
                Err(_) => RunOutcome::TimedOut,
            },
            () = wait_for_cancel(&mut cancel_rx) => RunOutcome::Cancelled,
        };

        self.executor.remove_progress(&task_id);
        if tokio::time::timeout(PROGRESS_DRAIN_TIMEOUT, &mut forwarder)
            .await
            .is_err()
        {
            forwarder.abort();
            debug!(task_id = %task_id, "progress forwarder aborted after drain timeout");
        }
        self.state.finish_running(&key, &task_id);

        let elapsed = format_elapsed(started.elapsed());
        match outcome {
            RunOutcome::Finished(result) => {
                info!(conversation = %key, task_id = %task_id, success = result.success, elapsed = %elapsed, "task finished");
                let output = if result.success {
                    clean_internal_signals(&result.output)
                } else {
                    failure_detail(&result)
                };
                let outcome = TaskOutcome {
                    success: result.success,
                    output,
                    link: result.link,
                };
                if let Err(error) = self
                    .messenger
                    .send_result(&conversation_id, thread_id.as_deref(), &task_id, &outcome)
                    .await
                {
                    warn!(conversation = %key, task_id = %task_id, %error, "failed to send task result");
                }
            }
            RunOutcome::Failed(detail) => {
                warn!(conversation = %key, task_id = %task_id, detail = %detail, "task failed");
                self.send_text(&key, &task_failed(&task_id, &detail)).await;
            }
            RunOutcome::TimedOut => {
                warn!(conversation = %key, task_id = %task_id, elapsed = %elapsed, "task timed out");
                self.send_text(&key, &task_timed_out(&task_id, &elapsed))
                    .await;
            }
            RunOutcome::Cancelled => {
                info!(conversation = %key, task_id = %task_id, "task cancelled");
                self.send_text(&key, &task_cancelled(&task_id)).await;
            }
        }
    }

    async fn resolve_member(&self, pending: &PendingTask) -> Option<String> {
        let resolver = self.members.as_ref()?;
        let sender_id = self
            .state
            .last_sender(&pending.key)
            .unwrap_or_else(|| pending.sender_id.clone());
        match resolver.resolve_identity(&sender_id).await {
            Ok(member_id) => member_id,
            Err(error) => {
                warn!(sender = %sender_id, %error, "member resolution failed");
                None
            }
        }
    }

    async fn send_text(&self, key: &ConversationKey, text: &str) {
        if let Err(error) = self
            .messenger
            .send_text(key.conversation_id(), key.thread_id(), text)
            .await
        {
            warn!(conversation = %key, %error, "failed to send reply");
        }
    }

    async fn send_chunked(&self, key: &ConversationKey, text: &str, title: Option<&str>) {
        if let Err(error) = self
            .messenger
            .send_chunked(key.conversation_id(), key.thread_id(), text, title)
            .await
        {
            warn!(conversation = %key, %error, "failed to send chunked reply");
        }
    }
}

async fn forward_progress(
    messenger: Arc<dyn Messenger>,
    conversation_id: String,
    thread_id: Option<String>,
    mut message_ref: Option<MessageRef>,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    while let Some(update) = updates.recv().await {
        match messenger
            .send_progress(
                &conversation_id,
                thread_id.as_deref(),
                message_ref.as_ref(),
                &update.task_id,
                &update.phase,
                update.percent,
                &update.detail,
            )
            .await
        {
            Ok(posted) => message_ref = Some(posted),
            Err(error) => {
                warn!(task_id = %update.task_id, %error, "failed to send progress update");
            }
        }
    }
}

/// `Some(true)` for an affirmative reply, `Some(false)` for a negative one.
fn confirmation_reply(text: &str) -> Option<bool> {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!'])
        .to_ascii_lowercase();
    if AFFIRMATIVE_REPLIES.contains(&normalized.as_str()) {
        Some(true)
    } else if NEGATIVE_REPLIES.contains(&normalized.as_str()) {
        Some(false)
    } else {
        None
    }
}

fn failure_detail(result: &ExecutionResult) -> String {
    result
        .error
        .as_deref()
        .map(str::trim)
        .filter(|error| !error.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let output = clean_internal_signals(&result.output);
            if output.trim().is_empty() {
                "executor reported failure without output".to_string()
            } else {
                output
            }
        })
}

async fn wait_for_cancel(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

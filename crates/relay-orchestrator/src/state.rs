//! Per-conversation task state behind one lock.
//!
//! Every transition is a single critical section so that a key never holds
//! more than one pending and one running task. The lock is never held across
//! an await.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use relay_core::{current_unix_timestamp, ConversationKey};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Task,
    Plan,
}

impl PendingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Plan => "plan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub task_id: String,
    pub description: String,
    pub key: ConversationKey,
    pub thread_id: Option<String>,
    pub sender_id: String,
    pub created_at: Instant,
    pub kind: PendingKind,
}

/// Snapshot of a running task; the cancel signal stays inside the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTaskInfo {
    pub task_id: String,
    pub key: ConversationKey,
    pub started_at: Instant,
    pub cancel_requested: bool,
}

#[derive(Debug)]
struct RunningTask {
    task_id: String,
    key: ConversationKey,
    started_at: Instant,
    cancel: watch::Sender<bool>,
}

impl RunningTask {
    fn info(&self) -> RunningTaskInfo {
        RunningTaskInfo {
            task_id: self.task_id.clone(),
            key: self.key.clone(),
            started_at: self.started_at,
            cancel_requested: *self.cancel.borrow(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    Promoted(PendingTask),
    AlreadyRunning {
        running_task_id: String,
        pending_task_id: String,
    },
    NothingPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Pending(PendingTask),
    Running(RunningTaskInfo),
    Nothing,
}

#[derive(Debug, Default)]
struct TaskState {
    pending: HashMap<ConversationKey, PendingTask>,
    running: HashMap<ConversationKey, RunningTask>,
    active_project: HashMap<String, String>,
    last_sender: HashMap<ConversationKey, (String, Instant)>,
}

impl TaskState {
    /// Drops the remembered sender once `key` holds no pending or running task.
    fn release_sender(&mut self, key: &ConversationKey) {
        if !self.pending.contains_key(key) && !self.running.contains_key(key) {
            self.last_sender.remove(key);
        }
    }
}

#[derive(Debug)]
pub struct TaskStateService {
    state: Mutex<TaskState>,
    next_task_number: AtomicU64,
}

impl Default for TaskStateService {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStateService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TaskState::default()),
            next_task_number: AtomicU64::new(current_unix_timestamp()),
        }
    }

    /// Returns a fresh `PREFIX-<n>` id; `n` starts at the current unix time.
    pub fn allocate_task_id(&self, prefix: &str) -> String {
        let number = self.next_task_number.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{number}")
    }

    /// Stores `task` unless its key already has one pending, in which case the
    /// existing task is returned.
    pub fn try_insert_pending(&self, task: PendingTask) -> Result<(), PendingTask> {
        let mut state = self.lock_state();
        if let Some(existing) = state.pending.get(&task.key) {
            return Err(existing.clone());
        }
        state.pending.insert(task.key.clone(), task);
        Ok(())
    }

    pub fn pending(&self, key: &ConversationKey) -> Option<PendingTask> {
        self.lock_state().pending.get(key).cloned()
    }

    pub fn running(&self, key: &ConversationKey) -> Option<RunningTaskInfo> {
        self.lock_state().running.get(key).map(RunningTask::info)
    }

    /// Moves the pending task of `key` to running. When `task_id` is given it
    /// must name the pending task.
    pub fn promote_pending(
        &self,
        key: &ConversationKey,
        task_id: Option<&str>,
        cancel: watch::Sender<bool>,
    ) -> PromoteOutcome {
        let mut state = self.lock_state();
        let Some(pending) = state.pending.get(key) else {
            return PromoteOutcome::NothingPending;
        };
        if task_id.is_some_and(|task_id| task_id != pending.task_id) {
            return PromoteOutcome::NothingPending;
        }
        if let Some(running) = state.running.get(key) {
            return PromoteOutcome::AlreadyRunning {
                running_task_id: running.task_id.clone(),
                pending_task_id: pending.task_id.clone(),
            };
        }
        let Some(pending) = state.pending.remove(key) else {
            return PromoteOutcome::NothingPending;
        };
        state.running.insert(
            key.clone(),
            RunningTask {
                task_id: pending.task_id.clone(),
                key: key.clone(),
                started_at: Instant::now(),
                cancel,
            },
        );
        PromoteOutcome::Promoted(pending)
    }

    /// Removes the pending task of `key`, optionally only if it is `task_id`.
    pub fn discard_pending(
        &self,
        key: &ConversationKey,
        task_id: Option<&str>,
    ) -> Option<PendingTask> {
        let mut state = self.lock_state();
        let matches = state
            .pending
            .get(key)
            .is_some_and(|pending| task_id.is_none_or(|task_id| task_id == pending.task_id));
        if !matches {
            return None;
        }
        let removed = state.pending.remove(key);
        state.release_sender(key);
        removed
    }

    /// Clears the running entry of `key` if it still belongs to `task_id`.
    pub fn finish_running(&self, key: &ConversationKey, task_id: &str) -> bool {
        let mut state = self.lock_state();
        if state
            .running
            .get(key)
            .is_some_and(|running| running.task_id == task_id)
        {
            state.running.remove(key);
            state.release_sender(key);
            true
        } else {
            false
        }
    }

    /// Cancels the pending task of `key` or signals its running task. The
    /// running entry stays until the execution reports back.
    pub fn cancel(&self, key: &ConversationKey, task_id: Option<&str>) -> CancelOutcome {
        let mut state = self.lock_state();
        let pending_matches = state
            .pending
            .get(key)
            .is_some_and(|pending| task_id.is_none_or(|task_id| task_id == pending.task_id));
        if pending_matches {
            if let Some(pending) = state.pending.remove(key) {
                state.release_sender(key);
                return CancelOutcome::Pending(pending);
            }
        }
        match state.running.get(key) {
            Some(running) if task_id.is_none_or(|task_id| task_id == running.task_id) => {
                let info = running.info();
                running.cancel.send_replace(true);
                CancelOutcome::Running(info)
            }
            _ => CancelOutcome::Nothing,
        }
    }

    /// Running and pending tasks across every thread of `conversation_id`,
    /// oldest first.
    pub fn conversation_tasks(&self, conversation_id: &str) -> (Vec<RunningTaskInfo>, Vec<PendingTask>) {
        let state = self.lock_state();
        let mut running = state
            .running
            .values()
            .filter(|running| running.key.conversation_id() == conversation_id)
            .map(RunningTask::info)
            .collect::<Vec<_>>();
        running.sort_by_key(|running| running.started_at);
        let mut pending = state
            .pending
            .values()
            .filter(|pending| pending.key.conversation_id() == conversation_id)
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by_key(|pending| pending.created_at);
        (running, pending)
    }

    /// Resolves the key a conversation-level command such as `/cancel` acts
    /// on. Slash commands carry no thread, so a task id, or a single thread
    /// with work in the conversation, selects the thread.
    pub fn command_key(&self, key: &ConversationKey, task_id: Option<&str>) -> ConversationKey {
        let state = self.lock_state();
        let conversation_id = key.conversation_id();
        if let Some(task_id) = task_id {
            let owner = state
                .pending
                .values()
                .find(|pending| {
                    pending.key.conversation_id() == conversation_id && pending.task_id == task_id
                })
                .map(|pending| pending.key.clone())
                .or_else(|| {
                    state
                        .running
                        .values()
                        .find(|running| {
                            running.key.conversation_id() == conversation_id
                                && running.task_id == task_id
                        })
                        .map(|running| running.key.clone())
                });
            return owner.unwrap_or_else(|| key.clone());
        }
        if state.pending.contains_key(key) || state.running.contains_key(key) {
            return key.clone();
        }
        let candidates = state
            .pending
            .keys()
            .chain(state.running.keys())
            .filter(|candidate| candidate.conversation_id() == conversation_id)
            .collect::<BTreeSet<_>>();
        match candidates.into_iter().collect::<Vec<_>>().as_slice() {
            [only] => (*only).clone(),
            _ => key.clone(),
        }
    }

    /// Signals every running task; used on shutdown.
    pub fn cancel_all_running(&self) -> usize {
        let state = self.lock_state();
        for running in state.running.values() {
            running.cancel.send_replace(true);
        }
        state.running.len()
    }

    /// Removes and returns pending tasks created more than `ttl` before `now`.
    pub fn expire_pending(&self, now: Instant, ttl: Duration) -> Vec<PendingTask> {
        let mut state = self.lock_state();
        let expired_keys = state
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.created_at) > ttl)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        let mut expired = expired_keys
            .iter()
            .filter_map(|key| state.pending.remove(key))
            .collect::<Vec<_>>();
        for key in &expired_keys {
            state.release_sender(key);
        }
        expired.sort_by(|left, right| left.task_id.cmp(&right.task_id));
        expired
    }

    pub fn set_active_project(&self, conversation_id: &str, project: &str) {
        self.lock_state()
            .active_project
            .insert(conversation_id.to_string(), project.to_string());
    }

    pub fn active_project(&self, conversation_id: &str) -> Option<String> {
        self.lock_state().active_project.get(conversation_id).cloned()
    }

    pub fn record_sender(&self, key: &ConversationKey, sender_id: &str) {
        self.lock_state()
            .last_sender
            .insert(key.clone(), (sender_id.to_string(), Instant::now()));
    }

    pub fn last_sender(&self, key: &ConversationKey) -> Option<String> {
        self.lock_state()
            .last_sender
            .get(key)
            .map(|(sender_id, _)| sender_id.clone())
    }

    /// Forgets senders not seen for `idle` on keys without pending or running
    /// work. Returns how many entries were dropped.
    pub fn forget_idle_senders(&self, now: Instant, idle: Duration) -> usize {
        let mut state = self.lock_state();
        let TaskState {
            pending,
            running,
            last_sender,
            ..
        } = &mut *state;
        let before = last_sender.len();
        last_sender.retain(|key, (_, seen_at)| {
            pending.contains_key(key)
                || running.contains_key(key)
                || now.saturating_duration_since(*seen_at) <= idle
        });
        before - last_sender.len()
    }

    /// Number of conversations with a remembered sender.
    pub fn tracked_senders(&self) -> usize {
        self.lock_state().last_sender.len()
    }

    /// `(running, pending)` across all conversations.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.lock_state();
        (state.running.len(), state.pending.len())
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use relay_core::ConversationKey;
    use tokio::sync::watch;

    use super::{CancelOutcome, PendingKind, PendingTask, PromoteOutcome, TaskStateService};

    fn key(thread: &str) -> ConversationKey {
        ConversationKey::new("C1", Some(thread.to_string()))
    }

    fn pending(service: &TaskStateService, key: &ConversationKey) -> PendingTask {
        PendingTask {
            task_id: service.allocate_task_id("TASK"),
            description: "add a logout button".to_string(),
            key: key.clone(),
            thread_id: key.thread_id().map(str::to_string),
            sender_id: "U1".to_string(),
            created_at: Instant::now(),
            kind: PendingKind::Task,
        }
    }

    #[test]
    fn unit_allocate_task_id_is_unique_and_prefixed() {
        let service = TaskStateService::new();
        let first = service.allocate_task_id("TASK");
        let second = service.allocate_task_id("TASK");
        assert!(first.starts_with("TASK-"));
        assert_ne!(first, second);
    }

    #[test]
    fn functional_second_pending_task_is_refused_with_existing() {
        let service = TaskStateService::new();
        let key = key("1.0");
        let first = pending(&service, &key);
        service
            .try_insert_pending(first.clone())
            .expect("first insert");

        let refused = service
            .try_insert_pending(pending(&service, &key))
            .expect_err("second insert must be refused");
        assert_eq!(refused.task_id, first.task_id);
    }

    #[test]
    fn functional_promote_moves_pending_to_running_once() {
        let service = TaskStateService::new();
        let key = key("1.0");
        let task = pending(&service, &key);
        service.try_insert_pending(task.clone()).expect("insert");

        let (cancel_tx, _cancel_rx) = watch::channel(false);
        assert_eq!(
            service.promote_pending(&key, Some(&task.task_id), cancel_tx),
            PromoteOutcome::Promoted(task.clone())
        );
        assert!(service.pending(&key).is_none());
        assert_eq!(
            service.running(&key).map(|running| running.task_id),
            Some(task.task_id.clone())
        );

        let (cancel_tx, _cancel_rx) = watch::channel(false);
        assert_eq!(
            service.promote_pending(&key, None, cancel_tx),
            PromoteOutcome::NothingPending
        );
    }

    #[test]
    fn functional_promote_keeps_pending_while_another_task_runs() {
        let service = TaskStateService::new();
        let key = key("1.0");
        let first = pending(&service, &key);
        service.try_insert_pending(first.clone()).expect("insert");
        let (cancel_tx, _first_rx) = watch::channel(false);
        service.promote_pending(&key, None, cancel_tx);

        let second = pending(&service, &key);
        service.try_insert_pending(second.clone()).expect("insert");
        let (cancel_tx, _second_rx) = watch::channel(false);
        assert_eq!(
            service.promote_pending(&key, None, cancel_tx),
            PromoteOutcome::AlreadyRunning {
                running_task_id: first.task_id,
                pending_task_id: second.task_id.clone(),
            }
        );
        assert_eq!(service.pending(&key).map(|task| task.task_id), Some(second.task_id));
    }

    #[test]
    fn regression_mismatched_task_id_does_not_resolve_pending() {
        let service = TaskStateService::new();
        let key = key("1.0");
        let task = pending(&service, &key);
        service.try_insert_pending(task.clone()).expect("insert");

        assert!(service.discard_pending(&key, Some("TASK-0")).is_none());
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        assert_eq!(
            service.promote_pending(&key, Some("TASK-0"), cancel_tx),
            PromoteOutcome::NothingPending
        );
        assert!(service.pending(&key).is_some());
    }

    #[test]
    fn functional_cancel_signals_running_task_and_keeps_entry() {
        let service = TaskStateService::new();
        let key = key("1.0");
        let task = pending(&service, &key);
        service.try_insert_pending(task.clone()).expect("insert");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        service.promote_pending(&key, None, cancel_tx);

        match service.cancel(&key, None) {
            CancelOutcome::Running(info) => assert_eq!(info.task_id, task.task_id),
            other => panic!("unexpected cancel outcome: {other:?}"),
        }
        assert!(*cancel_rx.borrow());
        assert!(service
            .running(&key)
            .is_some_and(|running| running.cancel_requested));

        assert!(!service.finish_running(&key, "TASK-0"));
        assert!(service.finish_running(&key, &task.task_id));
        assert_eq!(service.cancel(&key, None), CancelOutcome::Nothing);
    }

    #[test]
    fn functional_expire_pending_removes_only_stale_tasks() {
        let service = TaskStateService::new();
        let stale_key = key("1.0");
        let fresh_key = key("2.0");
        let now = Instant::now();
        let mut stale = pending(&service, &stale_key);
        stale.created_at = now;
        let mut fresh = pending(&service, &fresh_key);
        fresh.created_at = now + Duration::from_secs(240);
        service.try_insert_pending(stale.clone()).expect("insert");
        service.try_insert_pending(fresh).expect("insert");

        let expired = service.expire_pending(now + Duration::from_secs(301), Duration::from_secs(300));
        assert_eq!(expired, vec![stale]);
        assert!(service.pending(&stale_key).is_none());
        assert!(service.pending(&fresh_key).is_some());
    }

    #[test]
    fn integration_concurrent_requests_leave_at_most_one_pending_and_running() {
        let service = Arc::new(TaskStateService::new());
        let key = key("1.0");
        let handles = (0..16)
            .map(|_| {
                let service = Arc::clone(&service);
                let key = key.clone();
                std::thread::spawn(move || {
                    let inserted = service.try_insert_pending(pending(&service, &key)).is_ok();
                    let (cancel_tx, _cancel_rx) = watch::channel(false);
                    let promoted = matches!(
                        service.promote_pending(&key, None, cancel_tx),
                        PromoteOutcome::Promoted(_)
                    );
                    (inserted, promoted)
                })
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|(_, promoted)| *promoted).count(), 1);
        let inserted = results.iter().filter(|(inserted, _)| *inserted).count();
        assert!((1..=2).contains(&inserted));
        let (running, pending) = service.counts();
        assert_eq!(running, 1);
        assert!(pending <= 1);
    }

    #[test]
    fn functional_command_key_finds_the_thread_with_work() {
        let service = TaskStateService::new();
        let channel = ConversationKey::new("C1", None);
        let thread_key = key("1.0");
        let task = pending(&service, &thread_key);
        service.try_insert_pending(task.clone()).expect("insert");

        assert_eq!(service.command_key(&channel, None), thread_key);
        assert_eq!(service.command_key(&channel, Some(&task.task_id)), thread_key);
        assert_eq!(service.command_key(&channel, Some("TASK-0")), channel);

        let other_key = key("2.0");
        service
            .try_insert_pending(pending(&service, &other_key))
            .expect("insert");
        assert_eq!(service.command_key(&channel, None), channel);
        let (running, pending) = service.conversation_tasks("C1");
        assert!(running.is_empty());
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn unit_active_project_and_last_sender_are_tracked() {
        let service = TaskStateService::new();
        let key = key("1.0");
        assert!(service.active_project("C1").is_none());
        service.set_active_project("C1", "web");
        service.record_sender(&key, "U7");
        assert_eq!(service.active_project("C1").as_deref(), Some("web"));
        assert_eq!(service.last_sender(&key).as_deref(), Some("U7"));
    }

    #[test]
    fn regression_last_sender_is_released_when_task_work_ends() {
        let service = TaskStateService::new();
        let finished = key("1.0");
        let discarded = key("2.0");
        let expired = key("3.0");
        for key in [&finished, &discarded, &expired] {
            service.record_sender(key, "U1");
        }

        let task = pending(&service, &finished);
        service.try_insert_pending(task.clone()).expect("insert");
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        service.promote_pending(&finished, None, cancel_tx);
        assert_eq!(service.last_sender(&finished).as_deref(), Some("U1"));
        assert!(service.finish_running(&finished, &task.task_id));
        assert!(service.last_sender(&finished).is_none());

        service
            .try_insert_pending(pending(&service, &discarded))
            .expect("insert");
        assert!(service.discard_pending(&discarded, None).is_some());
        assert!(service.last_sender(&discarded).is_none());

        service
            .try_insert_pending(pending(&service, &expired))
            .expect("insert");
        let later = Instant::now() + Duration::from_secs(600);
        assert_eq!(service.expire_pending(later, Duration::from_secs(300)).len(), 1);
        assert!(service.last_sender(&expired).is_none());
        assert_eq!(service.tracked_senders(), 0);
    }

    #[test]
    fn regression_idle_senders_without_work_are_forgotten() {
        let service = TaskStateService::new();
        let chatter = key("1.0");
        let waiting = key("2.0");
        service.record_sender(&chatter, "U1");
        service.record_sender(&waiting, "U2");
        service
            .try_insert_pending(pending(&service, &waiting))
            .expect("insert");

        let later = Instant::now() + Duration::from_secs(7_200);
        assert_eq!(service.forget_idle_senders(Instant::now(), Duration::from_secs(3_600)), 0);
        assert_eq!(service.forget_idle_senders(later, Duration::from_secs(3_600)), 1);
        assert!(service.last_sender(&chatter).is_none());
        assert_eq!(service.last_sender(&waiting).as_deref(), Some("U2"));
    }
}

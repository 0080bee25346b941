use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::contracts::{ProgressCallback, ProgressUpdate};

/// Progress callbacks keyed by task id.
#[derive(Default)]
pub struct ProgressRegistry {
    callbacks: Mutex<HashMap<String, ProgressCallback>>,
}

impl fmt::Debug for ProgressRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: &str, callback: ProgressCallback) {
        self.lock_callbacks().insert(task_id.to_string(), callback);
    }

    pub fn unregister(&self, task_id: &str) {
        self.lock_callbacks().remove(task_id);
    }

    /// Invokes the callback for `update.task_id`, if any. The callback runs
    /// after the registry lock is released.
    pub fn emit(&self, update: ProgressUpdate) -> bool {
        let callback = self.lock_callbacks().get(&update.task_id).cloned();
        match callback {
            Some(callback) => {
                callback(update);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock_callbacks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, HashMap<String, ProgressCallback>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressThrottleConfig {
    pub min_delta: u8,
    pub min_interval: Duration,
}

impl Default for ProgressThrottleConfig {
    fn default() -> Self {
        Self {
            min_delta: 50,
            min_interval: Duration::from_secs(3),
        }
    }
}

/// Decides which executor progress reports are worth a chat update.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    config: ProgressThrottleConfig,
    last_phase: Option<String>,
    last_percent: u8,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(config: ProgressThrottleConfig) -> Self {
        Self {
            config,
            last_phase: None,
            last_percent: 0,
            last_emit: None,
        }
    }

    /// Emits on a phase change, a jump of at least `min_delta` points, or once
    /// `min_interval` has passed since the last emission.
    pub fn should_emit(&mut self, phase: &str, percent: u8, now: Instant) -> bool {
        let phase_changed = self.last_phase.as_deref() != Some(phase);
        let delta_reached = percent.abs_diff(self.last_percent) >= self.config.min_delta;
        let interval_elapsed = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.min_interval);
        if !(phase_changed || delta_reached || interval_elapsed) {
            return false;
        }
        self.last_phase = Some(phase.to_string());
        self.last_percent = percent;
        self.last_emit = Some(now);
        true
    }
}

//! Per-conversation token buckets for messages and task launches.
//!
//! Buckets are created on first use, start full and refill lazily from a
//! monotonic clock on every call. There is no background ticker.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use relay_core::ConversationKey;

/// Sentinel reported by [`RateLimiter::remaining`] when limiting is disabled.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub messages_per_minute: u32,
    pub tasks_per_hour: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_minute: 20,
            tasks_per_hour: 10,
            burst: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketRate {
    per_second: f64,
    burst: f64,
}

impl BucketRate {
    fn new(per_window: u32, window: Duration, burst: u32) -> Self {
        Self {
            per_second: f64::from(per_window) / window.as_secs_f64(),
            burst: f64::from(per_window.min(burst)),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    message_tokens: f64,
    task_tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(messages: BucketRate, tasks: BucketRate, now: Instant) -> Self {
        Self {
            message_tokens: messages.burst,
            task_tokens: tasks.burst,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, messages: BucketRate, tasks: BucketRate, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.message_tokens = refill_level(self.message_tokens, elapsed, messages);
        self.task_tokens = refill_level(self.task_tokens, elapsed, tasks);
        self.last_refill = now;
    }
}

fn refill_level(level: f64, elapsed_secs: f64, rate: BucketRate) -> f64 {
    (level + elapsed_secs * rate.per_second).clamp(0.0, rate.burst)
}

fn take_token(level: &mut f64) -> bool {
    if *level >= 1.0 {
        *level -= 1.0;
        true
    } else {
        false
    }
}

#[derive(Debug, Clone, Copy)]
enum BucketKind {
    Message,
    Task,
}

#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    messages: BucketRate,
    tasks: BucketRate,
    buckets: Mutex<HashMap<ConversationKey, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            messages: BucketRate::new(
                config.messages_per_minute,
                Duration::from_secs(60),
                config.burst,
            ),
            tasks: BucketRate::new(config.tasks_per_hour, Duration::from_secs(3_600), config.burst),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn allow_message(&self, key: &ConversationKey) -> bool {
        self.allow_message_at(key, Instant::now())
    }

    pub fn allow_task(&self, key: &ConversationKey) -> bool {
        self.allow_task_at(key, Instant::now())
    }

    /// [`Self::allow_message`] evaluated at an explicit instant.
    pub fn allow_message_at(&self, key: &ConversationKey, now: Instant) -> bool {
        self.admit(key, now, BucketKind::Message)
    }

    /// [`Self::allow_task`] evaluated at an explicit instant.
    pub fn allow_task_at(&self, key: &ConversationKey, now: Instant) -> bool {
        self.admit(key, now, BucketKind::Task)
    }

    /// Whole tokens left as `(messages, tasks)`, or [`UNLIMITED`] when disabled.
    pub fn remaining(&self, key: &ConversationKey) -> (i64, i64) {
        self.remaining_at(key, Instant::now())
    }

    pub fn remaining_at(&self, key: &ConversationKey, now: Instant) -> (i64, i64) {
        if !self.enabled {
            return (UNLIMITED, UNLIMITED);
        }
        let mut buckets = self.lock_buckets();
        match buckets.get_mut(key) {
            Some(bucket) => {
                bucket.refill(self.messages, self.tasks, now);
                (
                    bucket.message_tokens.floor() as i64,
                    bucket.task_tokens.floor() as i64,
                )
            }
            None => (self.messages.burst as i64, self.tasks.burst as i64),
        }
    }

    /// Drops buckets untouched for longer than `max_age`. Returns how many went.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.cleanup_at(max_age, Instant::now())
    }

    pub fn cleanup_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut buckets = self.lock_buckets();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= max_age);
        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "rate limit buckets purged");
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock_buckets().len()
    }

    fn admit(&self, key: &ConversationKey, now: Instant, kind: BucketKind) -> bool {
        let mut buckets = self.lock_buckets();
        let bucket = buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucket::full(self.messages, self.tasks, now));
        bucket.refill(self.messages, self.tasks, now);
        bucket.last_seen = now;
        if !self.enabled {
            return true;
        }
        match kind {
            BucketKind::Message => take_token(&mut bucket.message_tokens),
            BucketKind::Task => take_token(&mut bucket.task_tokens),
        }
    }

    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<ConversationKey, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

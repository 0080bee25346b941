//! Bounded, TTL-evicted per-conversation message history.
//!
//! Each [`ConversationKey`] keeps a ring of its most recent entries. Keys idle
//! past the TTL are removed by [`HistoryStore::sweep_expired`], which the
//! background sweeper from [`spawn_sweeper`] runs on an interval.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use relay_core::{current_unix_timestamp, ConversationKey};
use tokio::{sync::oneshot, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRole {
    User,
    Assistant,
}

impl HistoryRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub sender_id: String,
    pub timestamp: u64,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
            sender_id: sender_id.into(),
            timestamp: current_unix_timestamp(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Assistant,
            content: content.into(),
            sender_id: String::new(),
            timestamp: current_unix_timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    pub max_size: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct HistoryMaps {
    entries: HashMap<ConversationKey, VecDeque<HistoryEntry>>,
    last_seen: HashMap<ConversationKey, Instant>,
}

#[derive(Debug)]
pub struct HistoryStore {
    config: HistoryConfig,
    maps: Mutex<HistoryMaps>,
}

impl HistoryStore {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config: HistoryConfig {
                max_size: config.max_size.max(1),
                ..config
            },
            maps: Mutex::new(HistoryMaps::default()),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Appends `entry`, evicting the oldest entries beyond `max_size`.
    pub fn add(&self, key: &ConversationKey, entry: HistoryEntry) {
        self.add_at(key, entry, Instant::now());
    }

    pub fn add_at(&self, key: &ConversationKey, entry: HistoryEntry, now: Instant) {
        let mut maps = self.lock_maps();
        let ring = maps.entries.entry(key.clone()).or_default();
        ring.push_back(entry);
        while ring.len() > self.config.max_size {
            ring.pop_front();
        }
        maps.last_seen.insert(key.clone(), now);
    }

    /// Owned copy of the key's entries, oldest first.
    pub fn get(&self, key: &ConversationKey) -> Vec<HistoryEntry> {
        self.lock_maps()
            .entries
            .get(key)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The newest `limit` entries, oldest first.
    pub fn recent(&self, key: &ConversationKey, limit: usize) -> Vec<HistoryEntry> {
        let maps = self.lock_maps();
        let Some(ring) = maps.entries.get(key) else {
            return Vec::new();
        };
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self, key: &ConversationKey) {
        let mut maps = self.lock_maps();
        maps.entries.remove(key);
        maps.last_seen.remove(key);
    }

    /// Removes keys idle for longer than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let ttl = self.config.ttl;
        let mut maps = self.lock_maps();
        let expired = maps
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > ttl)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in &expired {
            maps.entries.remove(key);
            maps.last_seen.remove(key);
        }
        expired.len()
    }

    pub fn key_count(&self) -> usize {
        self.lock_maps().entries.len()
    }

    fn lock_maps(&self) -> MutexGuard<'_, HistoryMaps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the background TTL sweep started by [`spawn_sweeper`].
#[derive(Debug)]
pub struct HistorySweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HistorySweeper {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the sweep and waits for the task to finish. Safe to call twice.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Runs [`HistoryStore::sweep_expired`] every `sweep_interval`.
pub fn spawn_sweeper(store: Arc<HistoryStore>) -> HistorySweeper {
    let period = store.config.sweep_interval.max(Duration::from_millis(1));
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = store.sweep_expired(Instant::now());
                    if removed > 0 {
                        tracing::debug!(removed, remaining = store.key_count(), "conversation history swept");
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });
    HistorySweeper {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use relay_core::ConversationKey;

    use super::{spawn_sweeper, HistoryConfig, HistoryEntry, HistoryRole, HistoryStore};

    fn key(id: &str) -> ConversationKey {
        ConversationKey::new(id, None)
    }

    fn store(max_size: usize, ttl: Duration) -> HistoryStore {
        HistoryStore::new(HistoryConfig {
            max_size,
            ttl,
            ..HistoryConfig::default()
        })
    }

    #[test]
    fn unit_add_evicts_oldest_first_beyond_max_size() {
        let history = store(3, Duration::from_secs(60));
        let conversation = key("C1");
        for index in 0..5 {
            history.add(&conversation, HistoryEntry::user(format!("m{index}"), "U1"));
        }
        let contents = history
            .get(&conversation)
            .into_iter()
            .map(|entry| entry.content)
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn regression_get_returns_detached_copy() {
        let history = store(10, Duration::from_secs(60));
        let conversation = key("C1");
        history.add(&conversation, HistoryEntry::user("original", "U1"));

        let mut copy = history.get(&conversation);
        copy[0].content = "mutated".to_string();
        copy.push(HistoryEntry::assistant("injected"));

        let fresh = history.get(&conversation);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].content, "original");
        assert_eq!(fresh[0].role, HistoryRole::User);
    }

    #[test]
    fn unit_recent_returns_newest_entries_in_order() {
        let history = store(10, Duration::from_secs(60));
        let conversation = key("C1");
        for index in 0..4 {
            history.add(&conversation, HistoryEntry::user(format!("m{index}"), "U1"));
        }
        let recent = history.recent(&conversation, 2);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[1].content, "m3");
        assert!(history.recent(&key("missing"), 5).is_empty());
    }

    #[test]
    fn functional_sweep_expired_removes_idle_keys_only() {
        let history = store(10, Duration::from_secs(60));
        let start = Instant::now();
        history.add_at(&key("idle"), HistoryEntry::user("a", "U1"), start);
        history.add_at(
            &key("active"),
            HistoryEntry::user("b", "U1"),
            start + Duration::from_secs(90),
        );

        let removed = history.sweep_expired(start + Duration::from_secs(100));
        assert_eq!(removed, 1);
        assert!(history.get(&key("idle")).is_empty());
        assert_eq!(history.get(&key("active")).len(), 1);
    }

    #[tokio::test]
    async fn functional_sweeper_runs_on_interval_and_stops() {
        let history = Arc::new(HistoryStore::new(HistoryConfig {
            max_size: 10,
            ttl: Duration::from_millis(20),
            sweep_interval: Duration::from_millis(25),
        }));
        history.add(&key("C1"), HistoryEntry::user("hello", "U1"));

        let mut sweeper = spawn_sweeper(Arc::clone(&history));
        assert!(sweeper.is_running());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(history.key_count(), 0);

        sweeper.stop().await;
        assert!(!sweeper.is_running());
        sweeper.stop().await;
    }
}

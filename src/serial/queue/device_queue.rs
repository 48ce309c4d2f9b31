use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::item::QueueItem;
use super::types::{Pattern, QueueMetrics};
use super::waiter::WaiterHandle;
use super::QueueError;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    /// Applied to waiters added without an explicit timeout; `None` waits forever
    pub default_timeout: Option<Duration>,
    pub strict_eq_check: bool,
    /// Log pruned waiters at warn instead of debug
    pub log_expired: bool,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Millisecond form used by settings files: zero or negative means no timeout
    pub fn timeout_from_ms(ms: i64) -> Option<Duration> {
        u64::try_from(ms).ok().filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "unspecified".to_string(),
            default_timeout: None,
            strict_eq_check: false,
            log_expired: false,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: Vec<QueueItem>,
    metrics: QueueMetrics,
}

/// Correlation table for one device. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DeviceQueue {
    config: Arc<QueueConfig>,
    state: Arc<Mutex<QueueState>>,
}

impl DeviceQueue {
    pub fn new(config: QueueConfig) -> Self {
        log::debug!(
            "Initializing DeviceQueue name='{}' timeout={:?} strict_eq_check={}",
            config.name,
            config.default_timeout,
            config.strict_eq_check
        );
        Self { config: Arc::new(config), state: Arc::new(Mutex::new(QueueState::default())) }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Register interest in `pattern` with the queue's default timeout
    pub async fn add_item(&self, pattern: impl Into<Pattern>) -> WaiterHandle {
        self.add_item_with_timeout(pattern, self.config.default_timeout).await
    }

    /// Register interest in `pattern`. A resident item with an equal pattern
    /// gets another waiter instead of a second item being created.
    pub async fn add_item_with_timeout(
        &self,
        pattern: impl Into<Pattern>,
        timeout: Option<Duration>,
    ) -> WaiterHandle {
        let pattern = pattern.into();
        let mut state = self.state.lock().await;
        state.metrics.waiters_added += 1;

        if let Some(idx) = state.items.iter().position(|item| item.looking_for() == &pattern) {
            log::debug!("[{}] Coalescing '{}' onto item idx={}", self.config.name, pattern, idx);
            state.metrics.waiters_coalesced += 1;
            return state.items[idx].add_waiter_with_timeout(timeout);
        }

        log::debug!(
            "[{}] New item idx={} looking_for='{}' strict_eq_check={} timeout={:?}",
            self.config.name,
            state.items.len(),
            pattern,
            self.config.strict_eq_check,
            timeout
        );
        let mut item = QueueItem::new(pattern, self.config.strict_eq_check);
        let handle = item.add_waiter_with_timeout(timeout);
        state.items.push(item);
        state.metrics.items_created += 1;
        handle
    }

    /// Prune, then resolve the first item (insertion order) matching `subject`.
    /// Waiters receive `passthrough`, or the item's pattern if `None`.
    /// Returns the number of waiters resolved.
    pub async fn check_for_completions(&self, subject: &Pattern, passthrough: Option<Pattern>) -> usize {
        let mut state = self.state.lock().await;
        self.prune_locked(&mut state);

        let Some(idx) = state.items.iter().position(|item| item.check_completion(subject)) else {
            state.metrics.unmatched_subjects += 1;
            log::trace!("[{}] No item matched '{}'", self.config.name, subject);
            return 0;
        };

        let item = state.items.remove(idx);
        log::debug!("[{}] Item idx={} hit for '{}'", self.config.name, idx, subject);
        let resolved = item.complete(passthrough);
        state.metrics.items_completed += 1;
        state.metrics.waiters_resolved += resolved as u64;
        resolved
    }

    /// Remove rejected/abandoned waiters and items left without any.
    /// Returns the number of waiters removed.
    pub async fn prune(&self) -> usize {
        let mut state = self.state.lock().await;
        self.prune_locked(&mut state)
    }

    fn prune_locked(&self, state: &mut QueueState) -> usize {
        let mut pruned = 0;
        let name = &self.config.name;
        let log_expired = self.config.log_expired;

        state.items.retain_mut(|item| {
            let removed = item.prune();
            if removed > 0 {
                pruned += removed;
                if log_expired {
                    log::warn!("[{}] Pruned {} expired waiter(s) for '{}'", name, removed, item.looking_for());
                } else {
                    log::debug!("[{}] Pruned {} expired waiter(s) for '{}'", name, removed, item.looking_for());
                }
            }
            if item.is_empty() {
                log::debug!(
                    "[{}] Item '{}' has no waiters left after {:?}; removing it",
                    name,
                    item.looking_for(),
                    item.age()
                );
                false
            } else {
                true
            }
        });

        state.metrics.waiters_pruned += pruned as u64;
        pruned
    }

    /// Reject every pending waiter and empty the queue, e.g. when the link drops.
    pub async fn reject_all(&self, reason: &str) -> usize {
        let mut state = self.state.lock().await;
        let items = std::mem::take(&mut state.items);
        let rejected: usize = items
            .into_iter()
            .map(|item| item.reject_all(QueueError::Rejected(reason.to_string())))
            .sum();
        state.metrics.waiters_rejected += rejected as u64;
        if rejected > 0 {
            log::warn!("[{}] Rejected {} pending waiter(s): {}", self.config.name, rejected, reason);
        }
        rejected
    }

    /// Number of resident items
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Waiters attached to the item for `pattern`, zero if none is resident
    pub async fn waiter_count(&self, pattern: &Pattern) -> usize {
        let state = self.state.lock().await;
        state
            .items
            .iter()
            .find(|item| item.looking_for() == pattern)
            .map_or(0, QueueItem::waiter_count)
    }

    /// Resident patterns in insertion order
    pub async fn patterns(&self) -> Vec<Pattern> {
        let state = self.state.lock().await;
        state.items.iter().map(|item| item.looking_for().clone()).collect()
    }

    pub async fn metrics(&self) -> QueueMetrics {
        self.state.lock().await.metrics.clone()
    }
}

impl std::fmt::Debug for DeviceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceQueue").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_from_ms() {
        assert_eq!(QueueConfig::timeout_from_ms(0), None);
        assert_eq!(QueueConfig::timeout_from_ms(-1), None);
        assert_eq!(QueueConfig::timeout_from_ms(250), Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_empty_queue_operations() {
        let queue = DeviceQueue::new(QueueConfig::new("empty"));
        assert_eq!(queue.check_for_completions(&Pattern::from("x"), None).await, 0);
        assert_eq!(queue.prune().await, 0);
        assert_eq!(queue.reject_all("nothing").await, 0);
        assert!(queue.is_empty().await);
        assert_eq!(queue.metrics().await.unmatched_subjects, 1);
    }

    #[tokio::test]
    async fn test_item_pattern_used_without_passthrough() {
        let queue = DeviceQueue::new(QueueConfig::new("passthrough"));
        let handle = queue.add_item("ready").await;
        assert_eq!(queue.check_for_completions(&Pattern::from("ready!"), None).await, 1);
        assert_eq!(handle.await, Ok(Pattern::from("ready")));
    }

    #[tokio::test]
    async fn test_dropped_handle_is_pruned() {
        let queue = DeviceQueue::new(QueueConfig::new("abandon"));
        let handle = queue.add_item("never").await;
        drop(handle);
        assert_eq!(queue.prune().await, 1);
        assert!(queue.is_empty().await);
    }
}

use std::time::{Duration, Instant};

use super::types::Pattern;
use super::waiter::{Waiter, WaiterHandle};
use super::QueueError;

/// One resident expectation and everyone waiting on it
#[derive(Debug)]
pub struct QueueItem {
    looking_for: Pattern,
    strict_eq_check: bool,
    waiters: Vec<Waiter>,
    created: Instant,
}

impl QueueItem {
    pub fn new(looking_for: Pattern, strict_eq_check: bool) -> Self {
        Self { looking_for, strict_eq_check, waiters: Vec::new(), created: Instant::now() }
    }

    pub fn looking_for(&self) -> &Pattern {
        &self.looking_for
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn add_waiter_with_timeout(&mut self, timeout: Option<Duration>) -> WaiterHandle {
        let (waiter, handle) = Waiter::new(timeout);
        self.waiters.push(waiter);
        handle
    }

    pub fn check_completion(&self, subject: &Pattern) -> bool {
        self.looking_for.matches(subject, self.strict_eq_check)
    }

    /// Resolve every waiter with `passthrough`, or with the item's own pattern
    /// when none is given. Returns how many waiters were fulfilled.
    pub fn complete(self, passthrough: Option<Pattern>) -> usize {
        let payload = passthrough.unwrap_or_else(|| self.looking_for.clone());
        self.waiters.iter().filter(|w| w.resolve(payload.clone())).count()
    }

    /// Reject every pending waiter. Returns how many were rejected.
    pub fn reject_all(self, error: QueueError) -> usize {
        self.waiters.iter().filter(|w| w.reject(error.clone())).count()
    }

    /// Drop waiters that timed out, were rejected or lost their caller.
    pub fn prune(&mut self) -> usize {
        let before = self.waiters.len();
        self.waiters.retain(|w| !w.is_abandoned());
        before - self.waiters.len()
    }
}

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::{Pattern, WaiterState};
use super::QueueError;

pub type WaiterResult = Result<Pattern, QueueError>;

struct WaiterCell {
    state: WaiterState,
    responder: Option<oneshot::Sender<WaiterResult>>,
}

type SharedCell = Arc<Mutex<WaiterCell>>;

fn lock(cell: &Mutex<WaiterCell>) -> MutexGuard<'_, WaiterCell> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Move a pending cell to its terminal state and deliver `outcome`.
/// Returns false if the cell was already terminal.
fn settle(cell: &Mutex<WaiterCell>, outcome: WaiterResult) -> bool {
    let mut guard = lock(cell);
    if guard.state.is_terminal() {
        return false;
    }
    guard.state = if outcome.is_ok() { WaiterState::Fulfilled } else { WaiterState::Rejected };
    if let Some(tx) = guard.responder.take() {
        let _ = tx.send(outcome);
    }
    true
}

/// Queue-side half of one pending expectation.
///
/// Owns the timeout timer. Dropping a still-pending waiter rejects its handle
/// with [`QueueError::Dropped`].
pub struct Waiter {
    id: Uuid,
    cell: SharedCell,
    timer: Option<JoinHandle<()>>,
}

impl Waiter {
    /// Create a waiter and the handle given to the caller. A `timeout` of
    /// `None` or zero waits forever. Must be called inside a tokio runtime
    /// when a timeout is set.
    pub fn new(timeout: Option<Duration>) -> (Waiter, WaiterHandle) {
        let (tx, rx) = oneshot::channel();
        let cell = Arc::new(Mutex::new(WaiterCell { state: WaiterState::Pending, responder: Some(tx) }));
        let id = Uuid::new_v4();

        let timer = timeout.filter(|t| !t.is_zero()).map(|t| {
            let cell = cell.clone();
            tokio::spawn(async move {
                tokio::time::sleep(t).await;
                if settle(&cell, Err(QueueError::Timeout)) {
                    log::debug!("Waiter {} timed out after {:?}", id, t);
                }
            })
        });

        let handle = WaiterHandle { id, cell: cell.clone(), rx };
        (Waiter { id, cell, timer }, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WaiterState {
        lock(&self.cell).state
    }

    pub fn resolve(&self, payload: Pattern) -> bool {
        let settled = settle(&self.cell, Ok(payload));
        if settled {
            self.stop_timer();
        }
        settled
    }

    pub fn reject(&self, error: QueueError) -> bool {
        let settled = settle(&self.cell, Err(error));
        if settled {
            self.stop_timer();
        }
        settled
    }

    /// Rejected, or the caller dropped its handle while still pending.
    pub fn is_abandoned(&self) -> bool {
        let guard = lock(&self.cell);
        match guard.state {
            WaiterState::Rejected => true,
            WaiterState::Fulfilled => false,
            WaiterState::Pending => guard.responder.as_ref().map_or(true, |tx| tx.is_closed()),
        }
    }

    fn stop_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        settle(&self.cell, Err(QueueError::Dropped));
        self.stop_timer();
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("id", &self.id).field("state", &self.state()).finish()
    }
}

/// Caller-side half: await it for the matched payload, or query its state.
pub struct WaiterHandle {
    id: Uuid,
    cell: SharedCell,
    rx: oneshot::Receiver<WaiterResult>,
}

impl WaiterHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WaiterState {
        lock(&self.cell).state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == WaiterState::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state() == WaiterState::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == WaiterState::Rejected
    }

    /// Reject from the caller's side; a no-op once terminal.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        settle(&self.cell, Err(QueueError::Rejected(reason.into())))
    }
}

impl Future for WaiterHandle {
    type Output = WaiterResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(QueueError::Dropped)))
    }
}

impl std::fmt::Debug for WaiterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterHandle").field("id", &self.id).field("state", &self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_is_terminal() {
        let (waiter, handle) = Waiter::new(None);
        assert!(waiter.resolve(Pattern::from("ok")));
        assert!(!waiter.reject(QueueError::Timeout));
        assert!(!waiter.resolve(Pattern::from("again")));
        assert!(handle.is_fulfilled());
        assert_eq!(handle.await, Ok(Pattern::from("ok")));
    }

    #[tokio::test]
    async fn test_timeout_rejects() {
        let (waiter, handle) = Waiter::new(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(waiter.state(), WaiterState::Rejected);
        assert!(waiter.is_abandoned());
        assert!(!waiter.resolve(Pattern::from("late")));
        assert_eq!(handle.await, Err(QueueError::Timeout));
    }

    #[tokio::test]
    async fn test_drop_rejects_pending_handle() {
        let (waiter, handle) = Waiter::new(None);
        drop(waiter);
        assert_eq!(handle.await, Err(QueueError::Dropped));
    }

    #[tokio::test]
    async fn test_dropped_handle_marks_abandoned() {
        let (waiter, handle) = Waiter::new(None);
        assert!(!waiter.is_abandoned());
        drop(handle);
        assert!(waiter.is_abandoned());
    }

    #[tokio::test]
    async fn test_handle_side_reject() {
        let (waiter, handle) = Waiter::new(None);
        assert!(handle.reject("cancelled"));
        assert!(waiter.is_abandoned());
        assert_eq!(handle.await, Err(QueueError::Rejected("cancelled".into())));
    }
}

//! Correlation of outbound expectations with inbound device records.
//!
//! Callers register a [`Pattern`] they expect to see and get a [`WaiterHandle`]
//! back. Identical concurrent requests share one [`QueueItem`]; the first
//! inbound record that matches resolves every waiter on it.
pub mod types;
pub mod waiter;
pub mod item;
pub mod device_queue;

pub use types::{Pattern, QueueMetrics, WaiterState};
pub use waiter::{Waiter, WaiterHandle};
pub use item::QueueItem;
pub use device_queue::{DeviceQueue, QueueConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("TIMEOUT")]
    Timeout,

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Waiter dropped before completion")]
    Dropped,
}

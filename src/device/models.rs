use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::serial::reader::LinkMetrics;

/// Device connection state, driven by the liveness probe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Probing,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Replied,
    Missed,
}

impl ConnectionState {
    /// Next state after a probe. `misses` is the number of consecutive missed
    /// probes including this one.
    pub fn on_probe(self, outcome: ProbeOutcome, misses: u32, max_missed: u32) -> ConnectionState {
        match (self, outcome) {
            (_, ProbeOutcome::Replied) => ConnectionState::Connected,
            (ConnectionState::Connected, ProbeOutcome::Missed) if misses < max_missed.max(1) => {
                ConnectionState::Connected
            }
            (_, ProbeOutcome::Missed) => ConnectionState::Disconnected,
        }
    }

    /// State while a probe is in flight
    pub fn on_probe_start(self) -> ConnectionState {
        match self {
            ConnectionState::Disconnected => ConnectionState::Probing,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeStats {
    pub sent: u64,
    pub replied: u64,
    pub missed: u64,
    pub consecutive_misses: u32,
    pub last_reply: Option<DateTime<Utc>>,
}

/// Snapshot of one driver for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: Uuid,
    pub name: String,
    pub port_name: String,
    pub attached: bool,
    pub connection_state: ConnectionState,
    pub last_state_change: DateTime<Utc>,
    pub pending_items: usize,
    pub probe: ProbeStats,
    pub link: LinkMetrics,
}

impl DeviceStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state, ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;
    use ProbeOutcome::*;

    #[test]
    fn test_probe_transitions() {
        assert_eq!(Disconnected.on_probe_start(), Probing);
        assert_eq!(Connected.on_probe_start(), Connected);
        assert_eq!(Probing.on_probe(Replied, 0, 2), Connected);
        assert_eq!(Probing.on_probe(Missed, 1, 2), Disconnected);
        assert_eq!(Connected.on_probe(Replied, 0, 2), Connected);
        assert_eq!(Connected.on_probe(Missed, 1, 2), Connected);
        assert_eq!(Connected.on_probe(Missed, 2, 2), Disconnected);
        assert_eq!(Disconnected.on_probe(Missed, 5, 2), Disconnected);
    }

    #[test]
    fn test_zero_max_missed_behaves_like_one() {
        assert_eq!(Connected.on_probe(Missed, 1, 0), Disconnected);
    }
}

//! Inbound pump: transport bytes → framer → queue completions
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Mutex};

use super::interface::Transport;
use super::protocol::{CommandFramer, CommandRecord};
use super::queue::DeviceQueue;
use super::SerialError;

const READ_CHUNK: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LinkEvent {
    /// A framed record; `matched` is false for unsolicited telemetry
    Record { record: CommandRecord, matched: bool },
    /// The link failed and the reader stopped
    Closed { reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkMetrics {
    pub bytes_read: u64,
    pub records_framed: u64,
    pub blank_records: u64,
    pub matched_records: u64,
    pub unmatched_records: u64,
    pub buffer_overflows: u64,
    pub prune_passes: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    Shutdown,
    Lost(String),
}

pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub struct ReaderContext {
    pub transport: SharedTransport,
    pub queue: DeviceQueue,
    pub framer: CommandFramer,
    pub read_timeout_ms: u64,
    pub prune_interval: Duration,
    pub events_tx: broadcast::Sender<LinkEvent>,
    pub metrics_tx: Arc<watch::Sender<LinkMetrics>>,
}

/// Frame one chunk and offer every non-blank record to the queue.
/// Returns the records with whether each one resolved an expectation.
pub async fn dispatch_chunk(
    chunk: &[u8],
    framer: &mut CommandFramer,
    queue: &DeviceQueue,
    metrics: &mut LinkMetrics,
) -> Vec<(CommandRecord, bool)> {
    metrics.bytes_read += chunk.len() as u64;
    let mut dispatched = Vec::new();

    for record in framer.push(chunk) {
        if record.is_blank() {
            metrics.blank_records += 1;
            continue;
        }
        metrics.records_framed += 1;
        log::debug!("Complete command recognized: {} values={:?}", record.name, record.values);

        let subject = record.to_pattern();
        let matched = queue.check_for_completions(&subject, Some(subject.clone())).await > 0;
        if matched {
            metrics.matched_records += 1;
        } else {
            metrics.unmatched_records += 1;
        }
        dispatched.push((record, matched));
    }

    metrics.buffer_overflows = framer.overflows();
    dispatched
}

/// Runs until `stop_rx` fires (or its sender is dropped) or the transport fails.
pub async fn reader_task(ctx: ReaderContext, mut stop_rx: mpsc::Receiver<()>) -> ReaderExit {
    use tokio::select;

    let ReaderContext { transport, queue, mut framer, read_timeout_ms, prune_interval, events_tx, metrics_tx } = ctx;
    let mut metrics = metrics_tx.borrow().clone();
    let mut prune_tick = tokio::time::interval(prune_interval);
    prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        select! {
            _ = stop_rx.recv() => {
                log::debug!("[{}] Reader stopping", queue.name());
                return ReaderExit::Shutdown;
            },
            _ = prune_tick.tick() => {
                queue.prune().await;
                metrics.prune_passes += 1;
            },
            read_res = async {
                let mut buf = [0u8; READ_CHUNK];
                let res = { let mut guard = transport.lock().await; guard.read_data(&mut buf, read_timeout_ms).await };
                res.map(|n| (buf, n))
            } => {
                match read_res {
                    Ok((buf, n)) if n > 0 => {
                        for (record, matched) in dispatch_chunk(&buf[..n], &mut framer, &queue, &mut metrics).await {
                            let _ = events_tx.send(LinkEvent::Record { record, matched });
                        }
                        metrics_tx.send_replace(metrics.clone());
                    },
                    Ok(_) => {},
                    Err(SerialError::Timeout) => {},
                    Err(e) => {
                        let reason = e.to_string();
                        log::error!("[{}] Link read failed: {}", queue.name(), reason);
                        metrics.last_error = Some(reason.clone());
                        metrics_tx.send_replace(metrics.clone());
                        let _ = events_tx.send(LinkEvent::Closed { reason: reason.clone() });
                        return ReaderExit::Lost(reason);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{Pattern, QueueConfig, Separators};

    #[tokio::test]
    async fn test_dispatch_across_chunks() {
        let queue = DeviceQueue::new(QueueConfig::new("reader"));
        let mut framer = CommandFramer::new(Separators::default());
        let mut metrics = LinkMetrics::default();
        let handle = queue.add_item(["temp", "21"]).await;

        assert!(dispatch_chunk(b"te", &mut framer, &queue, &mut metrics).await.is_empty());
        let out = dispatch_chunk(b"mp|21;;hello;", &mut framer, &queue, &mut metrics).await;

        assert_eq!(out.len(), 2);
        assert!(out[0].1);
        assert_eq!(out[1], (CommandRecord::bare("hello"), false));
        assert_eq!(handle.await, Ok(Pattern::from(["temp", "21"])));
        assert_eq!(metrics.bytes_read, 15);
        assert_eq!(metrics.blank_records, 1);
        assert_eq!(metrics.records_framed, 2);
        assert_eq!(metrics.unmatched_records, 1);
    }
}

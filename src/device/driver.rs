use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::serial::protocol::{encode_command, DEFAULT_MAX_BUFFER};
use crate::serial::reader::{reader_task, LinkEvent, LinkMetrics, ReaderContext, ReaderExit, SharedTransport};
use crate::serial::{
    CommandFramer, DeviceQueue, NullTransport, Pattern, QueueConfig, SerialInterface, Separators, Transport,
};
use super::models::{ConnectionState, DeviceStatus, ProbeOutcome, ProbeStats};
use super::{DeviceError, Result};

const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(1);

/// Liveness probe settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub command: String,
    pub reply: Pattern,
    /// Consecutive misses tolerated before a connected device counts as gone
    pub max_missed: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            command: "ping".to_string(),
            reply: Pattern::from("pong"),
            max_missed: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub name: String,
    pub separators: Separators,
    pub queue: QueueConfig,
    pub read_timeout_ms: u64,
    pub prune_interval: Duration,
    pub max_buffer: usize,
    pub event_capacity: usize,
    pub probe: ProbeConfig,
}

impl DriverConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { queue: QueueConfig::new(name.clone()), name, ..Self::default() }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "arduino".to_string(),
            separators: Separators::default(),
            queue: QueueConfig::new("arduino"),
            read_timeout_ms: 25,
            prune_interval: Duration::from_secs(1),
            max_buffer: DEFAULT_MAX_BUFFER,
            event_capacity: 256,
            probe: ProbeConfig::default(),
        }
    }
}

struct LinkInfo {
    port_name: String,
    last_state_change: DateTime<Utc>,
    probe: ProbeStats,
}

/// State shared between the driver and its background tasks
#[derive(Clone)]
struct Link {
    name: Arc<str>,
    transport: SharedTransport,
    attached: Arc<AtomicBool>,
    queue: DeviceQueue,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    info: Arc<Mutex<LinkInfo>>,
}

impl Link {
    async fn set_state(&self, next: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            log::info!("[{}] Connection state -> {:?}", self.name, next);
            self.info.lock().await.last_state_change = Utc::now();
        }
    }

    async fn install(&self, transport: Box<dyn Transport>) {
        let attached = transport.is_attached();
        let description = transport.describe();
        *self.transport.lock().await = transport;
        self.attached.store(attached, Ordering::Release);
        self.info.lock().await.port_name = description;
    }

    async fn on_lost(&self, reason: &str) {
        log::warn!("[{}] Device link lost ({}); running without device", self.name, reason);
        self.install(Box::new(NullTransport)).await;
        self.queue.reject_all(&format!("connection lost: {}", reason)).await;
        self.set_state(ConnectionState::Disconnected).await;
    }
}

struct ReaderSession {
    task_handle: JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

/// Driver for one line-oriented device (an Arduino on a serial port).
///
/// Starts in degraded mode with no transport: writes are swallowed with a
/// warning and awaited commands fail with [`DeviceError::NotConnected`].
pub struct ArduinoDriver {
    id: Uuid,
    config: DriverConfig,
    link: Link,
    events_tx: broadcast::Sender<LinkEvent>,
    metrics_tx: Arc<watch::Sender<LinkMetrics>>,
    reader: Mutex<Option<ReaderSession>>,
}

impl ArduinoDriver {
    pub fn new(config: DriverConfig) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let (metrics_tx, _metrics_rx) = watch::channel(LinkMetrics::default());
        let (events_tx, _events_rx) = broadcast::channel(config.event_capacity.max(1));

        let link = Link {
            name: Arc::from(config.name.as_str()),
            transport: Arc::new(Mutex::new(Box::new(NullTransport) as Box<dyn Transport>)),
            attached: Arc::new(AtomicBool::new(false)),
            queue: DeviceQueue::new(config.queue.clone()),
            state_tx: Arc::new(state_tx),
            info: Arc::new(Mutex::new(LinkInfo {
                port_name: NullTransport.describe(),
                last_state_change: Utc::now(),
                probe: ProbeStats::default(),
            })),
        };

        Self {
            id: Uuid::new_v4(),
            config,
            link,
            events_tx,
            metrics_tx: Arc::new(metrics_tx),
            reader: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn queue(&self) -> &DeviceQueue {
        &self.link.queue
    }

    /// Open a serial port and start reading from it.
    ///
    /// On failure the driver stays in degraded mode and the error is returned.
    pub async fn connect(&self, port_name: &str, baud_rate: u32) -> Result<()> {
        match SerialInterface::open(port_name, baud_rate) {
            Ok(interface) => {
                self.attach(Box::new(interface)).await;
                log::info!("[{}] Device attached on {}", self.config.name, port_name);
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "[{}] Running without valid device; opening {} failed: {}",
                    self.config.name,
                    port_name,
                    e
                );
                self.link.set_state(ConnectionState::Disconnected).await;
                Err(DeviceError::SerialError(e))
            }
        }
    }

    /// Install `transport` and start the reader. Replaces any previous link.
    pub async fn attach(&self, transport: Box<dyn Transport>) {
        self.stop_reader().await;
        self.link.install(transport).await;

        let ctx = ReaderContext {
            transport: self.link.transport.clone(),
            queue: self.link.queue.clone(),
            framer: CommandFramer::with_max_buffer(self.config.separators, self.config.max_buffer),
            read_timeout_ms: self.config.read_timeout_ms.max(1),
            prune_interval: self.config.prune_interval,
            events_tx: self.events_tx.clone(),
            metrics_tx: self.metrics_tx.clone(),
        };
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let link = self.link.clone();
        let task_handle = tokio::spawn(async move {
            if let ReaderExit::Lost(reason) = reader_task(ctx, stop_rx).await {
                link.on_lost(&reason).await;
            }
        });

        *self.reader.lock().await = Some(ReaderSession { task_handle, stop_tx });
    }

    /// Drop the transport and reject everything still waiting on it
    pub async fn detach(&self) {
        self.stop_reader().await;
        self.link.install(Box::new(NullTransport)).await;
        self.link.queue.reject_all("connection closed").await;
        self.link.set_state(ConnectionState::Disconnected).await;
    }

    pub async fn shutdown(&self) {
        self.stop_reader().await;
        self.link.queue.reject_all("driver shut down").await;
        self.link.set_state(ConnectionState::Disconnected).await;
    }

    async fn stop_reader(&self) {
        let session = self.reader.lock().await.take();
        if let Some(session) = session {
            let _ = session.stop_tx.send(()).await;
            if timeout(Duration::from_secs(2), session.task_handle).await.is_err() {
                log::warn!("[{}] Reader did not stop within 2s", self.config.name);
            }
        }
    }

    /// Fire-and-forget write of `name;` or `name|value;`
    pub async fn send_command(&self, name: &str, value: Option<&str>) -> Result<()> {
        let line = encode_command(name, value, self.config.separators);
        log::debug!("[{}] -> {}", self.config.name, line);
        let mut transport = self.link.transport.lock().await;
        transport.send_data(line.as_bytes()).await?;
        Ok(())
    }

    /// Write a command and wait for an inbound record matching `expected`.
    ///
    /// The expectation is registered before the write so a fast reply is not
    /// missed. `timeout` of `None` uses the queue default.
    pub async fn send_command_awaiting(
        &self,
        name: &str,
        value: Option<&str>,
        expected: impl Into<Pattern>,
        timeout: Option<Duration>,
    ) -> Result<Pattern> {
        if !self.is_attached() {
            return Err(DeviceError::NotConnected);
        }

        let timeout = timeout.or(self.config.queue.default_timeout);
        let handle = self.link.queue.add_item_with_timeout(expected, timeout).await;
        if let Err(e) = self.send_command(name, value).await {
            handle.reject(e.to_string());
            return Err(e);
        }
        Ok(handle.await?)
    }

    pub fn is_attached(&self) -> bool {
        self.link.attached.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.link.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    pub fn metrics_receiver(&self) -> watch::Receiver<LinkMetrics> {
        self.metrics_tx.subscribe()
    }

    /// Run one liveness probe and apply its outcome to the connection state
    pub async fn probe_once(&self) -> ConnectionState {
        if !self.is_attached() {
            self.link.set_state(ConnectionState::Disconnected).await;
            return ConnectionState::Disconnected;
        }

        self.link.set_state(self.connection_state().on_probe_start()).await;

        let probe = &self.config.probe;
        // zero would mean no waiter timer at all
        let wait = probe.timeout.max(MIN_PROBE_TIMEOUT);
        let outcome = match self
            .send_command_awaiting(&probe.command, None, probe.reply.clone(), Some(wait))
            .await
        {
            Ok(_) => ProbeOutcome::Replied,
            Err(e) => {
                log::debug!("[{}] Probe missed: {}", self.config.name, e);
                ProbeOutcome::Missed
            }
        };

        let misses = {
            let mut info = self.link.info.lock().await;
            info.probe.sent += 1;
            match outcome {
                ProbeOutcome::Replied => {
                    info.probe.replied += 1;
                    info.probe.consecutive_misses = 0;
                    info.probe.last_reply = Some(Utc::now());
                }
                ProbeOutcome::Missed => {
                    info.probe.missed += 1;
                    info.probe.consecutive_misses += 1;
                }
            }
            info.probe.consecutive_misses
        };

        let next = self.connection_state().on_probe(outcome, misses, probe.max_missed);
        self.link.set_state(next).await;
        next
    }

    /// Probe every `probe.interval` until the driver is dropped or the handle aborted
    pub fn spawn_probe(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.probe.interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(driver) = weak.upgrade() else { break };
                driver.probe_once().await;
            }
        })
    }

    pub async fn status(&self) -> DeviceStatus {
        let (port_name, last_state_change, probe) = {
            let info = self.link.info.lock().await;
            (info.port_name.clone(), info.last_state_change, info.probe.clone())
        };
        DeviceStatus {
            id: self.id,
            name: self.config.name.clone(),
            port_name,
            attached: self.is_attached(),
            connection_state: self.connection_state(),
            last_state_change,
            pending_items: self.link.queue.len().await,
            probe,
            link: self.metrics_tx.borrow().clone(),
        }
    }
}

// In-memory transport used by the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skreen_lib::serial::{Result, SerialError, Transport};
use tokio::sync::mpsc;

type Replies = Arc<Mutex<HashMap<String, String>>>;

pub struct ScriptedTransport {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
    written: Arc<Mutex<Vec<String>>>,
    replies: Replies,
}

/// Test-side controls for a [`ScriptedTransport`]
pub struct ScriptedLink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    written: Arc<Mutex<Vec<String>>>,
    replies: Replies,
}

pub fn scripted() -> (ScriptedTransport, ScriptedLink) {
    let (tx, rx) = mpsc::unbounded_channel();
    let written = Arc::new(Mutex::new(Vec::new()));
    let replies: Replies = Arc::new(Mutex::new(HashMap::new()));
    (
        ScriptedTransport { inbound: rx, pending: VecDeque::new(), written: written.clone(), replies: replies.clone() },
        ScriptedLink { tx: Some(tx), written, replies },
    )
}

impl ScriptedLink {
    /// Bytes the device "sends"
    pub fn feed(&self, data: &str) {
        if let Some(tx) = &self.tx {
            tx.send(data.as_bytes().to_vec()).unwrap();
        }
    }

    /// Answer every write equal to `request` with `reply`
    pub fn set_reply(&self, request: &str, reply: Option<&str>) {
        let mut replies = self.replies.lock().unwrap();
        match reply {
            Some(r) => replies.insert(request.to_string(), r.to_string()),
            None => replies.remove(request),
        };
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    /// Simulate the device disappearing
    pub fn close(&mut self) {
        self.tx = None;
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let text = String::from_utf8_lossy(data).into_owned();
        if let Some(reply) = self.replies.lock().unwrap().get(&text) {
            self.pending.extend(reply.as_bytes());
        }
        self.written.lock().unwrap().push(text);
        Ok(data.len())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        if self.pending.is_empty() {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), self.inbound.recv()).await {
                Ok(Some(chunk)) => self.pending.extend(chunk),
                Ok(None) => return Err(SerialError::ConnectionFailed("scripted link closed".into())),
                Err(_) => return Err(SerialError::Timeout),
            }
        }
        let n = buffer.len().min(self.pending.len());
        for (slot, byte) in buffer.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Poll `check` until it holds or `limit` elapses
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use vigil_common::signal::SignalSample;

const CHANNEL_CAPACITY: usize = 256;
const RECENT_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum SubscribeError {
    UnknownProcess(u32),
}

impl std::fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProcess(pid) => write!(f, "no signal stream for pid {pid}"),
        }
    }
}

impl std::error::Error for SubscribeError {}

/// Fan-out point between channel sessions (producers) and trigger evaluators
/// (consumers). One broadcast channel per attached pid, plus a short ring of
/// recent samples for metric snapshots.
pub struct SignalHub {
    streams: DashMap<u32, broadcast::Sender<SignalSample>>,
    recent: DashMap<u32, VecDeque<SignalSample>>,
    open_subscriptions: Arc<AtomicUsize>,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHub {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            recent: DashMap::new(),
            open_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn register(&self, pid: u32) {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.streams.insert(pid, tx);
        self.recent.insert(pid, VecDeque::with_capacity(RECENT_CAPACITY));
    }

    /// Dropping the sender closes every subscriber's stream.
    pub fn unregister(&self, pid: u32) {
        self.streams.remove(&pid);
        self.recent.remove(&pid);
    }

    pub fn publish(&self, pid: u32, sample: SignalSample) {
        if let Some(mut ring) = self.recent.get_mut(&pid) {
            if ring.len() == RECENT_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(sample.clone());
        }
        if let Some(tx) = self.streams.get(&pid) {
            // No receivers yet is fine; samples before any rule binds are dropped.
            let _ = tx.send(sample);
        }
    }

    pub fn subscribe(&self, pid: u32) -> Result<Subscription, SubscribeError> {
        let rx = self
            .streams
            .get(&pid)
            .map(|tx| tx.subscribe())
            .ok_or(SubscribeError::UnknownProcess(pid))?;
        self.open_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Subscription {
            rx,
            gauge: self.open_subscriptions.clone(),
        })
    }

    pub fn recent(&self, pid: u32) -> Vec<SignalSample> {
        self.recent
            .get(&pid)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Gauge of live subscriptions. Teardown is complete when this returns to
    /// the value it had before the instances were bound.
    pub fn open_subscriptions(&self) -> usize {
        self.open_subscriptions.load(Ordering::SeqCst)
    }
}

/// A live subscription to one process's signal stream. The gauge is released
/// on drop, on every exit path of the holding task.
pub struct Subscription {
    rx: broadcast::Receiver<SignalSample>,
    gauge: Arc<AtomicUsize>,
}

impl Subscription {
    /// Next sample, or `None` once the process's stream is gone. Lagged
    /// receivers skip ahead rather than terminate.
    pub async fn recv(&mut self) -> Option<SignalSample> {
        loop {
            match self.rx.recv().await {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "signal subscription lagged, skipping");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

// Streaming Receiver
// Background task per instance that drains its transport into a shared ring buffer

use crate::registry::ResourceGuard;
use crate::stream::RingBuffer;
use crate::transport::{TransportError, TransportLink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

// ============================================================================
// RECEIVE STATISTICS
// ============================================================================

/// Counters for one instance's input stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiveStats {
    /// Bytes read from the transport, kept or not
    pub bytes_received: u64,
    /// Bytes dropped because the ring buffer was full
    pub bytes_lost: u64,
    /// Bytes currently waiting to be read
    pub bytes_buffered: usize,
    /// Transport reads that failed
    pub read_errors: u64,
    /// Most recent read failure
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ErrorLog {
    count: u64,
    last: Option<(TransportError, DateTime<Utc>)>,
}

// ============================================================================
// STREAM BUFFER
// ============================================================================

/// Ring buffer shared between one receiver task and its consumers
#[derive(Debug)]
pub struct StreamBuffer {
    ring: Mutex<RingBuffer>,
    errors: Mutex<ErrorLog>,
    _allocation: ResourceGuard,
}

impl StreamBuffer {
    pub fn new(ring: RingBuffer, allocation: ResourceGuard) -> Self {
        Self {
            ring: Mutex::new(ring),
            errors: Mutex::new(ErrorLog::default()),
            _allocation: allocation,
        }
    }

    fn ring(&self) -> MutexGuard<'_, RingBuffer> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn errors(&self) -> MutexGuard<'_, ErrorLog> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.ring().capacity()
    }

    pub fn bytes_available(&self) -> usize {
        self.ring().len()
    }

    /// Bytes lost at the input since creation
    pub fn loss(&self) -> u64 {
        self.ring().lost()
    }

    /// Consume up to `max` of the oldest bytes
    pub fn read(&self, max: usize) -> Vec<u8> {
        self.ring().read_vec(max)
    }

    pub fn peek(&self, max: usize) -> Vec<u8> {
        self.ring().peek(max)
    }

    /// Append incoming bytes, returning how many were dropped
    pub fn push(&self, data: &[u8]) -> usize {
        self.ring().push(data)
    }

    /// Throw away anything still buffered
    pub fn drain(&self) -> usize {
        self.ring().drain()
    }

    pub fn record_error(&self, error: &TransportError) {
        let mut errors = self.errors();
        errors.count = errors.count.saturating_add(1);
        errors.last = Some((error.clone(), Utc::now()));
    }

    pub fn last_error(&self) -> Option<TransportError> {
        self.errors().last.as_ref().map(|(e, _)| e.clone())
    }

    pub fn stats(&self) -> ReceiveStats {
        let (bytes_received, bytes_lost, bytes_buffered) = {
            let ring = self.ring();
            (ring.received(), ring.lost(), ring.len())
        };
        let errors = self.errors();

        ReceiveStats {
            bytes_received,
            bytes_lost,
            bytes_buffered,
            read_errors: errors.count,
            last_error: errors.last.as_ref().map(|(e, _)| e.to_string()),
            last_error_at: errors.last.as_ref().map(|(_, at)| *at),
        }
    }
}

// ============================================================================
// RECEIVER TASK
// ============================================================================

/// Handle to a running receiver task
#[derive(Debug)]
pub struct Receiver {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Start draining `link` into `buffer` every `poll_interval`.
    ///
    /// `guard` is held by the task and released when it exits.
    pub fn spawn(
        label: String,
        link: Arc<TransportLink>,
        buffer: Arc<StreamBuffer>,
        print_messages: Arc<AtomicBool>,
        poll_interval: Duration,
        guard: ResourceGuard,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let span = tracing::info_span!("receiver", device = %label, endpoint = %link.endpoint());

        let task = tokio::spawn(
            run(link, buffer, print_messages, poll_interval, stop_rx, guard).instrument(span),
        );

        Self {
            stop,
            task: Some(task),
        }
    }

    /// Check whether the task has not yet exited
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Signal the task to stop and wait for it to exit
    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "receiver task ended abnormally");
            }
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        // Not joined; the task still sees the signal and exits on its next turn
        if self.task.is_some() {
            let _ = self.stop.send(true);
        }
    }
}

async fn run(
    link: Arc<TransportLink>,
    buffer: Arc<StreamBuffer>,
    print_messages: Arc<AtomicBool>,
    poll_interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    _guard: ResourceGuard,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("receiver started");

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        // A read still in flight is dropped on stop, releasing the bus lock with it
        let read = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            read = link.read_available() => read,
        };

        match read {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                if print_messages.load(Ordering::Relaxed) {
                    debug!(len = bytes.len(), data = %hex::encode(&bytes), "received");
                }

                let dropped = buffer.push(&bytes);
                if dropped > 0 {
                    debug!(dropped, "ring buffer full, incoming bytes dropped");
                }
            }
            Err(e) => {
                warn!(error = %e, "transport read failed");
                buffer.record_error(&e);
            }
        }
    }

    info!("receiver stopped");
}

// Resource Accounting
// Counts live instance records, ring buffers and receiver tasks for teardown leak checks

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a guard accounts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Instance,
    RingBuffer { bytes: usize },
    Receiver,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub instances: usize,
    pub ring_buffers: usize,
    pub receivers: usize,
    pub buffer_bytes: usize,
}

impl ResourceSnapshot {
    /// Number of live allocations of any kind
    pub fn total(&self) -> usize {
        self.instances + self.ring_buffers + self.receivers
    }
}

/// Live resource counters for one registry
#[derive(Debug, Default)]
pub struct ResourceTracker {
    instances: AtomicUsize,
    ring_buffers: AtomicUsize,
    receivers: AtomicUsize,
    buffer_bytes: AtomicUsize,
}

impl ResourceTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count a resource until the returned guard is dropped
    pub fn acquire(self: &Arc<Self>, kind: ResourceKind) -> ResourceGuard {
        match kind {
            ResourceKind::Instance => {
                self.instances.fetch_add(1, Ordering::SeqCst);
            }
            ResourceKind::RingBuffer { bytes } => {
                self.ring_buffers.fetch_add(1, Ordering::SeqCst);
                self.buffer_bytes.fetch_add(bytes, Ordering::SeqCst);
            }
            ResourceKind::Receiver => {
                self.receivers.fetch_add(1, Ordering::SeqCst);
            }
        }

        ResourceGuard {
            tracker: Arc::clone(self),
            kind,
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            instances: self.instances.load(Ordering::SeqCst),
            ring_buffers: self.ring_buffers.load(Ordering::SeqCst),
            receivers: self.receivers.load(Ordering::SeqCst),
            buffer_bytes: self.buffer_bytes.load(Ordering::SeqCst),
        }
    }

    fn release(&self, kind: ResourceKind) {
        match kind {
            ResourceKind::Instance => {
                self.instances.fetch_sub(1, Ordering::SeqCst);
            }
            ResourceKind::RingBuffer { bytes } => {
                self.ring_buffers.fetch_sub(1, Ordering::SeqCst);
                self.buffer_bytes.fetch_sub(bytes, Ordering::SeqCst);
            }
            ResourceKind::Receiver => {
                self.receivers.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// RAII token for one counted resource
#[derive(Debug)]
pub struct ResourceGuard {
    tracker: Arc<ResourceTracker>,
    kind: ResourceKind,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.tracker.release(self.kind);
    }
}

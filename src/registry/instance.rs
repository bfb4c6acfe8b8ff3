// Instances
// One configured receiver binding: transport link, stream, power and settings

use crate::device::ModuleType;
use crate::power::{PinDriver, PinId, PowerSequencer, PowerState};
use crate::registry::{GnssError, ResourceGuard};
use crate::stream::{ReceiveStats, Receiver, StreamBuffer};
use crate::transport::{PortNumber, TransportEndpoint, TransportLink, TransportType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

// ============================================================================
// DEVICE HANDLE
// ============================================================================

/// Opaque identifier of a live instance.
///
/// Handles are never reissued by the registry that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle(u32);

impl DeviceHandle {
    /// Create from a raw value (e.g. one received over FFI)
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gnss#{}", self.0)
    }
}

/// Issues handles in increasing order, never the same one twice
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU32,
}

impl HandleAllocator {
    /// Start issuing at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Take the next handle, or `None` once the handle space is used up
    pub fn allocate(&self) -> Option<DeviceHandle> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(1))
            .ok()
            .map(DeviceHandle)
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// INSTANCE
// ============================================================================

pub(crate) struct Instance {
    pub(crate) handle: DeviceHandle,
    pub(crate) module_type: ModuleType,
    pub(crate) link: Arc<TransportLink>,
    pub(crate) buffer: Arc<StreamBuffer>,
    pub(crate) receiver: Receiver,
    pub(crate) power: Arc<PowerSequencer>,
    pub(crate) print_messages: Arc<AtomicBool>,
    pub(crate) timeout_ms: u32,
    pub(crate) retries: u32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) _record: ResourceGuard,
}

impl Instance {
    pub(crate) fn endpoint(&self) -> TransportEndpoint {
        self.link.endpoint()
    }

    pub(crate) fn transport_type(&self) -> TransportType {
        self.endpoint().transport_type()
    }

    /// Stop and join the receiver, retire the power sequencer, then discard
    /// whatever the receiver left buffered.
    ///
    /// Consumes the instance so the buffer and record are released on return.
    pub(crate) async fn shutdown(mut self, pins: &dyn PinDriver) -> usize {
        self.receiver.stop().await;
        self.power.retire(pins).await;
        self.buffer.drain()
    }

    pub(crate) fn info(&self, port_number: PortNumber) -> InstanceInfo {
        InstanceInfo {
            handle: self.handle,
            module_type: self.module_type,
            endpoint: self.endpoint(),
            port_number,
            i2c_address: self.link.i2c_address(),
            power_state: self.power.state(),
            power_pin: self.power.pin(),
            leave_power_alone: self.power.leave_power_alone(),
            print_messages: self.print_messages.load(Ordering::Relaxed),
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            ring_buffer_size: self.buffer.capacity(),
            stats: self.buffer.stats(),
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// INSTANCE INFO
// ============================================================================

/// Snapshot of one instance's configuration and counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub handle: DeviceHandle,
    pub module_type: ModuleType,
    pub endpoint: TransportEndpoint,
    pub port_number: PortNumber,
    pub i2c_address: Option<u8>,
    pub power_state: PowerState,
    pub power_pin: Option<PinId>,
    pub leave_power_alone: bool,
    pub print_messages: bool,
    pub timeout_ms: u32,
    pub retries: u32,
    pub ring_buffer_size: usize,
    pub stats: ReceiveStats,
    pub created_at: DateTime<Utc>,
}

impl InstanceInfo {
    /// Export state for serialization
    pub fn export_state(&self) -> Result<Vec<u8>, GnssError> {
        postcard::to_allocvec(self).map_err(|e| GnssError::SerializationError(e.to_string()))
    }

    /// Import state from serialized bytes
    pub fn import_state(bytes: &[u8]) -> Result<Self, GnssError> {
        postcard::from_bytes(bytes).map_err(|e| GnssError::SerializationError(e.to_string()))
    }
}

// I2C Addressing
// Per-instance target addresses and the per-bus transaction locks that let
// several receivers share one I2C bus

use crate::transport::{RawHandle, TransportEndpoint};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Highest valid 7-bit I2C address
pub const MAX_I2C_ADDRESS: u8 = 0x7F;

/// Check that an address fits in 7 bits
pub fn is_valid_address(address: u8) -> bool {
    address <= MAX_I2C_ADDRESS
}

/// Address `offset` steps above `base`, if it stays in 7 bits
pub fn offset_address(base: u8, offset: u8) -> Option<u8> {
    base.checked_add(offset).filter(|address| is_valid_address(*address))
}

// ============================================================================
// ADDRESS CELL
// ============================================================================

/// Target address read by the receiver on every transaction
#[derive(Debug)]
pub struct AddressCell {
    address: AtomicU8,
}

impl AddressCell {
    pub fn new(address: u8) -> Self {
        Self {
            address: AtomicU8::new(address),
        }
    }

    pub fn get(&self) -> u8 {
        self.address.load(Ordering::Acquire)
    }

    /// Store a new address; returns false and leaves the old one if invalid
    pub fn set(&self, address: u8) -> bool {
        if !is_valid_address(address) {
            return false;
        }
        self.address.store(address, Ordering::Release);
        true
    }
}

// ============================================================================
// BUS LOCKS
// ============================================================================

/// Held for the duration of one bus transaction
pub type BusLock = tokio::sync::Mutex<()>;

/// Hands out one lock per physical I2C bus.
///
/// Point-to-point endpoints get a private lock each; I2C endpoints with the
/// same raw bus handle share one. Entries die with their last user.
#[derive(Debug, Default)]
pub struct BusLocks {
    buses: Mutex<HashMap<RawHandle, Weak<BusLock>>>,
}

impl BusLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the transaction lock for an endpoint
    pub fn acquire(&self, endpoint: TransportEndpoint) -> Arc<BusLock> {
        let TransportEndpoint::I2c(bus) = endpoint else {
            return Arc::new(BusLock::new(()));
        };

        let mut buses = self.buses.lock().unwrap_or_else(|e| e.into_inner());
        buses.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = buses.get(&bus).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(BusLock::new(()));
        buses.insert(bus, Arc::downgrade(&lock));
        lock
    }

    /// Number of live instances sharing the lock of an I2C bus
    pub fn users(&self, bus: RawHandle) -> usize {
        let buses = self.buses.lock().unwrap_or_else(|e| e.into_inner());
        buses.get(&bus).map(Weak::strong_count).unwrap_or(0)
    }
}

// Transport Link
// One instance's binding to a driver endpoint; every transaction holds the bus lock

use crate::device::{AddressCell, BusLock};
use crate::transport::{TransportDriver, TransportEndpoint, TransportError};
use std::fmt;
use std::sync::Arc;

/// A driver endpoint plus the addressing and locking needed to use it
pub struct TransportLink {
    driver: Arc<dyn TransportDriver>,
    endpoint: TransportEndpoint,
    address: Option<AddressCell>,
    bus: Arc<BusLock>,
}

impl TransportLink {
    /// Bind an endpoint. `i2c_address` is only kept for I2C endpoints.
    pub fn new(
        driver: Arc<dyn TransportDriver>,
        endpoint: TransportEndpoint,
        i2c_address: u8,
        bus: Arc<BusLock>,
    ) -> Self {
        let address = match endpoint {
            TransportEndpoint::I2c(_) => Some(AddressCell::new(i2c_address)),
            _ => None,
        };

        Self {
            driver,
            endpoint,
            address,
            bus,
        }
    }

    pub fn endpoint(&self) -> TransportEndpoint {
        self.endpoint
    }

    /// Current target address, `None` for non-I2C links
    pub fn i2c_address(&self) -> Option<u8> {
        self.address.as_ref().map(AddressCell::get)
    }

    /// Retarget an I2C link. Returns false for non-I2C links or invalid addresses.
    pub fn set_i2c_address(&self, address: u8) -> bool {
        self.address.as_ref().map(|cell| cell.set(address)).unwrap_or(false)
    }

    /// Drain whatever the device has ready
    pub async fn read_available(&self) -> Result<Vec<u8>, TransportError> {
        let _bus = self.bus.lock().await;
        self.driver
            .read_available(self.endpoint, self.i2c_address())
            .await
    }

    pub async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let _bus = self.bus.lock().await;
        self.driver
            .write(self.endpoint, self.i2c_address(), data)
            .await
    }

    /// Ask the driver whether the device answers; errors count as "not yet"
    pub async fn probe(&self) -> bool {
        let _bus = self.bus.lock().await;
        self.driver
            .probe(self.endpoint, self.i2c_address())
            .await
            .unwrap_or(false)
    }
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink")
            .field("endpoint", &self.endpoint)
            .field("i2c_address", &self.i2c_address())
            .finish()
    }
}

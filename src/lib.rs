// GNSS Registry
// Manages GNSS receiver instances over UART, I2C and SPI: endpoint ownership,
// background streaming into loss-accounted ring buffers, power sequencing
// and I2C addressing on shared buses.

pub mod device;
pub mod power;
pub mod registry;
pub mod stream;
pub mod transport;

pub use device::ModuleType;
pub use registry::{DeviceHandle, GnssError, Registry, RegistryConfig};
pub use transport::{PortNumber, TransportEndpoint, TransportType};

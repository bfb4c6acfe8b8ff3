// Transport module - THE WIRE (abstract)
// Normalizes UART, UART_2, I2C and SPI endpoints and resolves port numbers

mod link;
mod mock;
mod traits;

pub use traits::{
    // Endpoint types
    RawHandle, TransportEndpoint, TransportType,
    // Port resolution
    port_number, PortNumber,
    // Driver contract
    TransportConfig, TransportDriver, TransportError,
};

pub use link::TransportLink;
pub use mock::MockTransport;

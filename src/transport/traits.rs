// Transport Traits and Core Types
// Endpoint types, port resolution and the raw driver contract shared by UART, I2C and SPI

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raw handle returned by the platform when a UART, I2C bus or SPI bus is opened
pub type RawHandle = i32;

// ============================================================================
// TRANSPORT TYPE
// ============================================================================

/// The kind of physical link a receiver is attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    Uart,
    /// Second logical name for a UART; shares the physical channel with `Uart`
    Uart2,
    I2c,
    Spi,
}

impl TransportType {
    /// Check if this is one of the two UART aliases
    pub fn is_uart(&self) -> bool {
        matches!(self, Self::Uart | Self::Uart2)
    }

    /// Point-to-point links can be owned by exactly one instance
    pub fn is_point_to_point(&self) -> bool {
        !matches!(self, Self::I2c)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uart => write!(f, "uart"),
            Self::Uart2 => write!(f, "uart2"),
            Self::I2c => write!(f, "i2c"),
            Self::Spi => write!(f, "spi"),
        }
    }
}

// ============================================================================
// TRANSPORT ENDPOINT
// ============================================================================

/// A raw transport handle tagged with the kind of link it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportEndpoint {
    Uart(RawHandle),
    Uart2(RawHandle),
    I2c(RawHandle),
    Spi(RawHandle),
}

impl TransportEndpoint {
    /// Build an endpoint from a transport type and raw handle
    pub fn new(transport_type: TransportType, handle: RawHandle) -> Self {
        match transport_type {
            TransportType::Uart => Self::Uart(handle),
            TransportType::Uart2 => Self::Uart2(handle),
            TransportType::I2c => Self::I2c(handle),
            TransportType::Spi => Self::Spi(handle),
        }
    }

    /// Get the transport type tag
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Uart(_) => TransportType::Uart,
            Self::Uart2(_) => TransportType::Uart2,
            Self::I2c(_) => TransportType::I2c,
            Self::Spi(_) => TransportType::Spi,
        }
    }

    /// Get the raw platform handle
    pub fn raw_handle(&self) -> RawHandle {
        match self {
            Self::Uart(h) | Self::Uart2(h) | Self::I2c(h) | Self::Spi(h) => *h,
        }
    }

    /// Check whether two endpoints name the same physical channel.
    ///
    /// `Uart` and `Uart2` are aliases over one serial channel, so they match
    /// each other whenever the raw handles match.
    pub fn same_physical(&self, other: &TransportEndpoint) -> bool {
        match (self, other) {
            (Self::Uart(a) | Self::Uart2(a), Self::Uart(b) | Self::Uart2(b)) => a == b,
            (Self::I2c(a), Self::I2c(b)) => a == b,
            (Self::Spi(a), Self::Spi(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport_type(), self.raw_handle())
    }
}

// ============================================================================
// PORT NUMBER
// ============================================================================

/// Logical port identifier as seen by the receiver-side protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortNumber {
    I2c,
    Uart1,
    Uart2,
    Usb,
    Spi,
}

impl PortNumber {
    /// Numeric port ID used in UBX port configuration messages
    pub fn id(&self) -> u8 {
        match self {
            Self::I2c => 0,
            Self::Uart1 => 1,
            Self::Uart2 => 2,
            Self::Usb => 3,
            Self::Spi => 4,
        }
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I2c => "I2C",
            Self::Uart1 => "UART1",
            Self::Uart2 => "UART2",
            Self::Usb => "USB",
            Self::Spi => "SPI",
        };
        write!(f, "{}", name)
    }
}

/// Resolve the port number the receiver sees for a given transport type.
///
/// A platform override always wins. Platforms whose physical UART reaches the
/// receiver through a USB-CDC bridge report `Usb` for both UART aliases.
pub fn port_number(
    transport_type: TransportType,
    platform_override: Option<PortNumber>,
    uart_via_usb: bool,
) -> PortNumber {
    if let Some(port) = platform_override {
        return port;
    }

    match transport_type {
        TransportType::Uart | TransportType::Uart2 if uart_via_usb => PortNumber::Usb,
        TransportType::Uart => PortNumber::Uart1,
        TransportType::Uart2 => PortNumber::Uart2,
        TransportType::I2c => PortNumber::I2c,
        TransportType::Spi => PortNumber::Spi,
    }
}

// ============================================================================
// TRANSPORT CONFIG
// ============================================================================

/// Parameters for opening a raw transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportConfig {
    Uart { uart: i32, baud_rate: u32 },
    I2c { bus: i32, clock_hz: u32 },
    Spi { bus: i32, clock_hz: u32 },
}

impl TransportConfig {
    /// UART at the receiver's factory-default rate
    pub fn uart(uart: i32) -> Self {
        Self::Uart { uart, baud_rate: 9600 }
    }

    /// I2C at 100 kHz standard mode
    pub fn i2c(bus: i32) -> Self {
        Self::I2c { bus, clock_hz: 100_000 }
    }

    pub fn spi(bus: i32) -> Self {
        Self::Spi { bus, clock_hz: 1_000_000 }
    }

    pub fn with_baud_rate(self, baud_rate: u32) -> Self {
        match self {
            Self::Uart { uart, .. } => Self::Uart { uart, baud_rate },
            other => other,
        }
    }

    pub fn with_clock_hz(self, clock_hz: u32) -> Self {
        match self {
            Self::I2c { bus, .. } => Self::I2c { bus, clock_hz },
            Self::Spi { bus, .. } => Self::Spi { bus, clock_hz },
            other => other,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        match self {
            Self::Uart { baud_rate: 0, .. } => {
                Err(TransportError::InvalidConfig("baud_rate cannot be 0".to_string()))
            }
            Self::I2c { clock_hz: 0, .. } | Self::Spi { clock_hz: 0, .. } => {
                Err(TransportError::InvalidConfig("clock_hz cannot be 0".to_string()))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// TRANSPORT ERROR
// ============================================================================

/// Errors raised by the raw transport layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport handle {0} is not open")]
    NotOpen(RawHandle),

    #[error("No acknowledge from I2C address 0x{0:02X}")]
    Nack(u8),

    #[error("Transport timeout")]
    Timeout,

    #[error("Pin {0} unavailable")]
    PinUnavailable(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl TransportError {
    /// Check if the operation can be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Nack(_) | Self::Timeout | Self::IoError(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// TRANSPORT DRIVER TRAIT
// ============================================================================

/// Raw transport primitives provided by the platform.
///
/// `i2c_address` is `Some` only for I2C endpoints and names the target
/// device on the shared bus.
#[async_trait]
pub trait TransportDriver: Send + Sync {
    /// Open a raw transport
    async fn open(&self, config: &TransportConfig) -> Result<RawHandle, TransportError>;

    /// Close a raw transport
    async fn close(&self, handle: RawHandle) -> Result<(), TransportError>;

    /// Return every byte currently available, possibly none
    async fn read_available(
        &self,
        endpoint: TransportEndpoint,
        i2c_address: Option<u8>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Write bytes, returning how many were accepted
    async fn write(
        &self,
        endpoint: TransportEndpoint,
        i2c_address: Option<u8>,
        data: &[u8],
    ) -> Result<usize, TransportError>;

    /// Check whether a device answers on the endpoint
    async fn probe(
        &self,
        endpoint: TransportEndpoint,
        i2c_address: Option<u8>,
    ) -> Result<bool, TransportError>;
}

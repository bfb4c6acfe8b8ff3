// Registry Configuration
// Sizes, timings and platform port routing for a registry

use crate::transport::PortNumber;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Registry`](crate::registry::Registry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Ring buffer allocated for every instance, in bytes
    pub ring_buffer_size: usize,
    /// Hard ceiling on `ring_buffer_size`
    pub max_ring_buffer_size: usize,
    /// Maximum number of live instances
    pub max_instances: usize,
    /// How often each receiver polls its transport
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for a receiver to come up after power-on
    pub power_on_timeout_ms: u64,
    /// Gap between readiness probes during power-on
    pub ready_poll_interval_ms: u64,
    /// Port number reported for every instance regardless of transport
    pub port_override: Option<PortNumber>,
    /// The physical UART reaches the receiver through a USB-CDC bridge
    pub uart_via_usb: bool,
    /// Initial response timeout handed to the protocol layer
    pub default_timeout_ms: u32,
    /// Initial retry count handed to the protocol layer
    pub default_retries: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 2048,
            max_ring_buffer_size: 64 * 1024,
            max_instances: 16,
            poll_interval_ms: 10,
            power_on_timeout_ms: 2000,
            ready_poll_interval_ms: 50,
            port_override: None,
            uart_via_usb: false,
            default_timeout_ms: 10_000,
            default_retries: 2,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ring_buffer_size(mut self, bytes: usize) -> Self {
        self.ring_buffer_size = bytes;
        self
    }

    pub fn with_max_ring_buffer_size(mut self, bytes: usize) -> Self {
        self.max_ring_buffer_size = bytes;
        self
    }

    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = max;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_power_on_timeout(mut self, ms: u64) -> Self {
        self.power_on_timeout_ms = ms;
        self
    }

    pub fn with_ready_poll_interval(mut self, ms: u64) -> Self {
        self.ready_poll_interval_ms = ms;
        self
    }

    pub fn with_port_override(mut self, port: Option<PortNumber>) -> Self {
        self.port_override = port;
        self
    }

    pub fn with_uart_via_usb(mut self, via_usb: bool) -> Self {
        self.uart_via_usb = via_usb;
        self
    }

    pub fn with_default_timeout(mut self, ms: u32) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn power_on_timeout(&self) -> Duration {
        Duration::from_millis(self.power_on_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.ring_buffer_size == 0 {
            return Err("ring_buffer_size cannot be 0".to_string());
        }
        if self.ring_buffer_size > self.max_ring_buffer_size {
            return Err(format!(
                "ring_buffer_size {} exceeds max_ring_buffer_size {}",
                self.ring_buffer_size, self.max_ring_buffer_size
            ));
        }
        if self.max_instances == 0 {
            return Err("max_instances cannot be 0".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms cannot be 0".to_string());
        }
        if self.ready_poll_interval_ms == 0 {
            return Err("ready_poll_interval_ms cannot be 0".to_string());
        }
        Ok(())
    }
}

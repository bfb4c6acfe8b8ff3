// Instance Registry
// Owns the live receiver instances, enforces endpoint uniqueness and mediates every operation

use crate::device::{is_valid_address, BusLocks, ModuleType};
use crate::power::{PinDriver, PinId, PowerError, PowerSequencer, PowerState, PowerTiming};
use crate::registry::{
    DeviceHandle, HandleAllocator, Instance, InstanceInfo, RegistryConfig, ResourceKind,
    ResourceSnapshot, ResourceTracker,
};
use crate::stream::{ReceiveStats, Receiver, RingBuffer, StreamBuffer};
use crate::transport::{
    port_number, PortNumber, TransportDriver, TransportEndpoint, TransportError, TransportLink,
    TransportType,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ============================================================================
// ERRORS
// ============================================================================

/// Errors returned by registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GnssError {
    #[error("Invalid handle: {0}")]
    InvalidHandle(DeviceHandle),

    #[error("Transport {0} is already owned by {1}")]
    DuplicateTransport(TransportEndpoint, DeviceHandle),

    #[error("Receiver did not power on in time")]
    PowerOnTimeout,

    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I2C address operations need an I2C transport, {0} uses {1}")]
    AddressNotApplicable(DeviceHandle, TransportType),

    #[error("Invalid I2C address 0x{0:02X}")]
    InvalidAddress(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl GnssError {
    /// Check if the error means the handle is no longer usable
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Self::InvalidHandle(_))
    }

    fn from_power(handle: DeviceHandle, e: PowerError) -> Self {
        match e {
            PowerError::Timeout(_) => Self::PowerOnTimeout,
            PowerError::Pin(e) => Self::Transport(e),
            // Removed while the sequence was running
            PowerError::Retired => Self::InvalidHandle(handle),
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The set of live receiver instances.
///
/// Mutations (add, remove, deinit, set_*) take the write side of one
/// registry-wide lock; queries take the read side. Power sequences run
/// under a per-instance lock so a slow power-on never stalls the registry.
pub struct Registry {
    config: RegistryConfig,
    driver: Arc<dyn TransportDriver>,
    pins: Arc<dyn PinDriver>,
    instances: RwLock<HashMap<DeviceHandle, Instance>>,
    handles: HandleAllocator,
    bus_locks: BusLocks,
    resources: Arc<ResourceTracker>,
}

impl Registry {
    /// Create an empty registry
    pub fn init(
        config: RegistryConfig,
        driver: Arc<dyn TransportDriver>,
        pins: Arc<dyn PinDriver>,
    ) -> Result<Self, GnssError> {
        config.validate().map_err(GnssError::InvalidConfig)?;
        info!(
            ring_buffer_size = config.ring_buffer_size,
            max_instances = config.max_instances,
            "GNSS registry initialised"
        );

        Ok(Self {
            config,
            driver,
            pins,
            instances: RwLock::new(HashMap::new()),
            handles: HandleAllocator::new(),
            bus_locks: BusLocks::new(),
            resources: ResourceTracker::new(),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Add a receiver instance bound to `endpoint` and start its receiver task.
    ///
    /// UART, UART_2 and SPI endpoints may be owned by one instance only, with
    /// UART and UART_2 on the same raw handle counting as the same endpoint.
    /// I2C buses may be shared.
    pub async fn add(
        &self,
        module_type: ModuleType,
        endpoint: TransportEndpoint,
        power_pin: Option<PinId>,
        leave_power_alone: bool,
    ) -> Result<DeviceHandle, GnssError> {
        let mut instances = self.instances.write().await;

        if endpoint.transport_type().is_point_to_point() {
            if let Some(owner) = instances
                .values()
                .find(|instance| instance.endpoint().same_physical(&endpoint))
            {
                return Err(GnssError::DuplicateTransport(endpoint, owner.handle));
            }
        }

        if instances.len() >= self.config.max_instances {
            return Err(GnssError::AllocationFailure(format!(
                "instance limit of {} reached",
                self.config.max_instances
            )));
        }

        let ring = RingBuffer::with_capacity(self.config.ring_buffer_size)
            .map_err(|e| GnssError::AllocationFailure(e.to_string()))?;

        let handle = self
            .handles
            .allocate()
            .ok_or_else(|| GnssError::AllocationFailure("device handles exhausted".to_string()))?;
        let record = self.resources.acquire(ResourceKind::Instance);
        let buffer = Arc::new(StreamBuffer::new(
            ring,
            self.resources.acquire(ResourceKind::RingBuffer {
                bytes: self.config.ring_buffer_size,
            }),
        ));
        let link = Arc::new(TransportLink::new(
            Arc::clone(&self.driver),
            endpoint,
            module_type.default_i2c_address(),
            self.bus_locks.acquire(endpoint),
        ));
        let print_messages = Arc::new(AtomicBool::new(false));

        let receiver = Receiver::spawn(
            handle.to_string(),
            Arc::clone(&link),
            Arc::clone(&buffer),
            Arc::clone(&print_messages),
            self.config.poll_interval(),
            self.resources.acquire(ResourceKind::Receiver),
        );

        instances.insert(
            handle,
            Instance {
                handle,
                module_type,
                link,
                buffer,
                receiver,
                power: Arc::new(PowerSequencer::new(power_pin, leave_power_alone)),
                print_messages,
                timeout_ms: self.config.default_timeout_ms,
                retries: self.config.default_retries,
                created_at: Utc::now(),
                _record: record,
            },
        );

        info!(
            %handle,
            %module_type,
            %endpoint,
            ?power_pin,
            leave_power_alone,
            "GNSS instance added"
        );
        Ok(handle)
    }

    /// Stop an instance's receiver, release its buffer and forget the handle
    pub async fn remove(&self, handle: DeviceHandle) -> Result<(), GnssError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .remove(&handle)
            .ok_or(GnssError::InvalidHandle(handle))?;

        let discarded = instance.shutdown(self.pins.as_ref()).await;
        info!(%handle, discarded, "GNSS instance removed");
        Ok(())
    }

    /// Remove every remaining instance
    pub async fn deinit(&self) {
        let mut instances = self.instances.write().await;
        let count = instances.len();

        let mut drained: Vec<Instance> = instances.drain().map(|(_, instance)| instance).collect();
        drained.sort_by_key(|instance| instance.handle);
        for instance in drained {
            let handle = instance.handle;
            let discarded = instance.shutdown(self.pins.as_ref()).await;
            debug!(%handle, discarded, "GNSS instance removed by deinit");
        }

        info!(removed = count, "GNSS registry deinitialised");
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Number of live instances
    pub async fn live_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Handles of all live instances, oldest first
    pub async fn handles(&self) -> Vec<DeviceHandle> {
        let mut handles: Vec<DeviceHandle> = self.instances.read().await.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Current resource counters for leak checks
    pub fn resources(&self) -> ResourceSnapshot {
        self.resources.snapshot()
    }

    /// Run `f` against a live instance under the read lock
    async fn with_instance<T>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&Instance) -> T,
    ) -> Result<T, GnssError> {
        let instances = self.instances.read().await;
        instances
            .get(&handle)
            .map(f)
            .ok_or(GnssError::InvalidHandle(handle))
    }

    /// Run `f` against a live instance under the write lock
    async fn with_instance_mut<T>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&mut Instance) -> T,
    ) -> Result<T, GnssError> {
        let mut instances = self.instances.write().await;
        instances
            .get_mut(&handle)
            .map(f)
            .ok_or(GnssError::InvalidHandle(handle))
    }

    /// Transport type and endpoint an instance was added with
    pub async fn transport_handle(
        &self,
        handle: DeviceHandle,
    ) -> Result<(TransportType, TransportEndpoint), GnssError> {
        self.with_instance(handle, |instance| (instance.transport_type(), instance.endpoint()))
            .await
    }

    /// Port number the receiver sees this instance on
    pub async fn port_number(&self, handle: DeviceHandle) -> Result<PortNumber, GnssError> {
        let transport_type = self
            .with_instance(handle, |instance| instance.transport_type())
            .await?;
        Ok(self.resolve_port(transport_type))
    }

    fn resolve_port(&self, transport_type: TransportType) -> PortNumber {
        port_number(
            transport_type,
            self.config.port_override,
            self.config.uart_via_usb,
        )
    }

    pub async fn module_type(&self, handle: DeviceHandle) -> Result<ModuleType, GnssError> {
        self.with_instance(handle, |instance| instance.module_type).await
    }

    /// Snapshot of an instance's settings and counters
    pub async fn info(&self, handle: DeviceHandle) -> Result<InstanceInfo, GnssError> {
        let instances = self.instances.read().await;
        let instance = instances
            .get(&handle)
            .ok_or(GnssError::InvalidHandle(handle))?;
        Ok(instance.info(self.resolve_port(instance.transport_type())))
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    /// Enable or disable hex logging of everything the receiver reads
    pub async fn set_ubx_message_print(
        &self,
        handle: DeviceHandle,
        enabled: bool,
    ) -> Result<(), GnssError> {
        self.with_instance_mut(handle, |instance| {
            instance.print_messages.store(enabled, Ordering::Relaxed)
        })
        .await
    }

    pub async fn ubx_message_print(&self, handle: DeviceHandle) -> Result<bool, GnssError> {
        self.with_instance(handle, |instance| {
            instance.print_messages.load(Ordering::Relaxed)
        })
        .await
    }

    /// Response timeout the protocol layer should use for this instance
    pub async fn timeout(&self, handle: DeviceHandle) -> Result<u32, GnssError> {
        self.with_instance(handle, |instance| instance.timeout_ms).await
    }

    pub async fn set_timeout(
        &self,
        handle: DeviceHandle,
        timeout_ms: u32,
    ) -> Result<(), GnssError> {
        self.with_instance_mut(handle, |instance| instance.timeout_ms = timeout_ms).await
    }

    /// Retry count the protocol layer should use for this instance
    pub async fn retries(&self, handle: DeviceHandle) -> Result<u32, GnssError> {
        self.with_instance(handle, |instance| instance.retries).await
    }

    pub async fn set_retries(&self, handle: DeviceHandle, retries: u32) -> Result<(), GnssError> {
        self.with_instance_mut(handle, |instance| instance.retries = retries).await
    }

    // ------------------------------------------------------------------------
    // I2C addressing
    // ------------------------------------------------------------------------

    /// Target address of an I2C instance
    pub async fn i2c_address(&self, handle: DeviceHandle) -> Result<u8, GnssError> {
        self.with_instance(handle, |instance| {
            instance
                .link
                .i2c_address()
                .ok_or(GnssError::AddressNotApplicable(handle, instance.transport_type()))
        })
        .await?
    }

    /// Retarget an I2C instance; used from the receiver's next poll onwards
    pub async fn set_i2c_address(
        &self,
        handle: DeviceHandle,
        address: u8,
    ) -> Result<(), GnssError> {
        self.with_instance_mut(handle, |instance| {
            let transport_type = instance.transport_type();
            if transport_type != TransportType::I2c {
                return Err(GnssError::AddressNotApplicable(handle, transport_type));
            }
            if !is_valid_address(address) || !instance.link.set_i2c_address(address) {
                return Err(GnssError::InvalidAddress(address));
            }
            debug!(%handle, address, "I2C address set");
            Ok(())
        })
        .await?
    }

    // ------------------------------------------------------------------------
    // Power
    // ------------------------------------------------------------------------

    pub async fn power_state(&self, handle: DeviceHandle) -> Result<PowerState, GnssError> {
        self.with_instance(handle, |instance| instance.power.state()).await
    }

    /// Power an instance up, waiting (bounded) for the receiver to answer
    pub async fn power_on(&self, handle: DeviceHandle) -> Result<(), GnssError> {
        let (power, link) = self
            .with_instance(handle, |instance| {
                (Arc::clone(&instance.power), Arc::clone(&instance.link))
            })
            .await?;

        let timing = PowerTiming {
            timeout: self.config.power_on_timeout(),
            poll_interval: self.config.ready_poll_interval(),
        };

        match power.power_on(self.pins.as_ref(), || link.probe(), timing).await {
            Ok(()) => {
                info!(%handle, "GNSS powered on");
                Ok(())
            }
            Err(e) => {
                warn!(%handle, error = %e, "GNSS power on failed");
                Err(GnssError::from_power(handle, e))
            }
        }
    }

    /// Power an instance down; always succeeds for a live handle
    pub async fn power_off(&self, handle: DeviceHandle) -> Result<(), GnssError> {
        let power = self.with_instance(handle, |instance| Arc::clone(&instance.power)).await?;

        power.power_off(self.pins.as_ref()).await;
        info!(%handle, "GNSS powered off");
        Ok(())
    }

    /// Ask the receiver whether it answers on its transport
    pub async fn is_alive(&self, handle: DeviceHandle) -> Result<bool, GnssError> {
        let link = self.with_instance(handle, |instance| Arc::clone(&instance.link)).await?;
        Ok(link.probe().await)
    }

    // ------------------------------------------------------------------------
    // Stream
    // ------------------------------------------------------------------------

    /// Bytes dropped at the input of the ring buffer since the instance was added
    pub async fn stream_loss(&self, handle: DeviceHandle) -> Result<u64, GnssError> {
        self.with_instance(handle, |instance| instance.buffer.loss()).await
    }

    pub async fn receive_stats(&self, handle: DeviceHandle) -> Result<ReceiveStats, GnssError> {
        self.with_instance(handle, |instance| instance.buffer.stats()).await
    }

    /// Bytes waiting in the ring buffer
    pub async fn bytes_available(&self, handle: DeviceHandle) -> Result<usize, GnssError> {
        self.with_instance(handle, |instance| instance.buffer.bytes_available()).await
    }

    /// Consume up to `max` of the oldest buffered bytes
    pub async fn read(&self, handle: DeviceHandle, max: usize) -> Result<Vec<u8>, GnssError> {
        self.with_instance(handle, |instance| instance.buffer.read(max)).await
    }

    /// Look at up to `max` buffered bytes without consuming them
    pub async fn peek(&self, handle: DeviceHandle, max: usize) -> Result<Vec<u8>, GnssError> {
        self.with_instance(handle, |instance| instance.buffer.peek(max)).await
    }

    /// Send raw bytes to the receiver
    pub async fn write(&self, handle: DeviceHandle, data: &[u8]) -> Result<usize, GnssError> {
        let link = self.with_instance(handle, |instance| Arc::clone(&instance.link)).await?;
        Ok(link.write(data).await?)
    }
}

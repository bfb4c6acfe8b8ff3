// Registry module - WHO IS CONNECTED
// Owns receiver instances and is the entry point for every operation on them

mod config;
mod instance;
mod registry;
mod resources;

pub use config::RegistryConfig;
pub use instance::{DeviceHandle, HandleAllocator, InstanceInfo};
pub use registry::{GnssError, Registry};
pub use resources::{ResourceGuard, ResourceKind, ResourceSnapshot, ResourceTracker};

pub(crate) use instance::Instance;

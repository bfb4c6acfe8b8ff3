// Device module - WHAT IS ON THE OTHER END
// Receiver module families and I2C addressing on shared buses

mod i2c;
mod module;

pub use i2c::{
    is_valid_address, offset_address, AddressCell, BusLock, BusLocks, MAX_I2C_ADDRESS,
};
pub use module::{ModuleType, DEFAULT_I2C_ADDRESS};

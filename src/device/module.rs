// Module Types
// The receiver families the registry knows about and their fixed defaults

use serde::{Deserialize, Serialize};
use std::fmt;

/// Factory-default I2C address shared by every u-blox receiver family
pub const DEFAULT_I2C_ADDRESS: u8 = 0x42;

/// Receiver module family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleType {
    M8,
    M9,
    M10,
    F9,
}

impl ModuleType {
    /// I2C address the module answers on straight out of reset
    pub fn default_i2c_address(&self) -> u8 {
        match self {
            Self::M8 | Self::M9 | Self::M10 | Self::F9 => DEFAULT_I2C_ADDRESS,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::M8 => "M8",
            Self::M9 => "M9",
            Self::M10 => "M10",
            Self::F9 => "F9",
        };
        write!(f, "{}", name)
    }
}

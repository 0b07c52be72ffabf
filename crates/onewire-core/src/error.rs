//! Error type shared across the bus master crates

use thiserror::Error;

use crate::types::Capability;

#[derive(Error, Debug)]
pub enum OneWireError {
    #[error("Specified port \"{port}\" could not be selected for adapter \"{adapter}\"")]
    PortUnavailable { adapter: String, port: String },
    #[error("Port found \"{port}\" but adapter \"{adapter}\" not detected")]
    AdapterNotDetected { adapter: String, port: String },
    #[error("Specified adapter name \"{0}\" is not known")]
    AdapterNotFound(String),
    #[error("Adapter does not support {0}")]
    CapabilityUnsupported(Capability),
    #[error("Adapter cannot apply setting: {0}")]
    UnsupportedSetting(String),
    #[error("No port selected")]
    PortNotSelected,
    #[error("Bus I/O error: {0}")]
    Io(String),
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),
}

impl OneWireError {
    /// Whether the failure came from the bus rather than from selection or configuration
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

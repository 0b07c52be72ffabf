//! 1-Wire Access - Adapter registry and default resolution
//!
//! This crate provides:
//! - A registration table of adapter constructors, built-in or enabled by
//!   `onewire.register.adapterN` properties
//! - Enumeration, select-and-verify lookup and the default adapter/port
//! - Property resolution over runtime properties, the environment,
//!   `onewire.properties` files and smart defaults
//! - The built-in simulated adapter type

pub mod config;
pub mod error;
pub mod properties;
pub mod registry;
pub mod simulator;

pub use config::{RegistryConfig, DEFAULT_ADAPTER_KEY, DEFAULT_PORT_KEY};
pub use error::ConfigError;
pub use properties::Properties;
pub use registry::{
    AdapterDescriptor, AdapterFactory, Enumeration, Origin, PropertyLookup, Registry, SkipReason,
    SkippedAdapter,
};

/// Version of the bus master crates
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! 1-Wire Core - Shared types for the bus master
//!
//! This crate provides the foundational types used by every other crate:
//! - Device addresses (ROM codes) with parsing, formatting and checksum checks
//! - Bus-level enums: reset results, speeds, power conditions, search commands
//! - Static adapter capability flags
//! - The common error type

pub mod address;
pub mod crc;
pub mod error;
pub mod types;

pub use address::DeviceAddress;
pub use error::OneWireError;
pub use types::{
    Capabilities, Capability, PowerCondition, PowerDuration, ResetResult, SearchCommand, Speed,
    ADDRESS_BITS, MATCH_ROM, NO_DEVICE,
};

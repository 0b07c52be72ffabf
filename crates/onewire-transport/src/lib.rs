//! 1-Wire Transport - Bus primitives consumed by the bus master
//!
//! This crate defines the boundary to the electrical layer:
//! - `BusTransport`, the primitive reset/bit/byte/block, search step, speed,
//!   power and exclusive-open operations of one physical adapter
//! - `SimulatedBus`, a bit-protocol simulator of a populated bus

pub mod sim;
pub mod transport;

pub use sim::{BusEvent, SimNetwork, SimulatedBus, SIMULATOR_PORTS};
pub use transport::BusTransport;

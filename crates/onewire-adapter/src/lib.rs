//! 1-Wire Adapter - A bus transport bound to its search engine
//!
//! This crate provides:
//! - Exclusive access arbitration, with unbounded, single-shot and
//!   deadline/cancel bounded acquisition
//! - The discrepancy search over device addresses, with alarm-only search,
//!   family filtering and isolated presence checks
//! - `Adapter`, which binds one transport to its cursor, filter and
//!   capability flags and only hands out bus operations inside a session

pub mod adapter;
pub mod arbiter;
pub mod search;

pub use adapter::{Adapter, BusSession, BusState, Devices};
pub use arbiter::{Arbiter, CancelToken, ExclusiveAccess, ExclusiveSession, POLL_INTERVAL};
pub use search::{FamilyFilter, SearchCursor};

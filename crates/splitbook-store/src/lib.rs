//! Persistence for the splitbook settlement engine: the append-only player
//! instance registry and the smoothed-balance store.

#![deny(unsafe_code)]

pub mod balance;
pub mod error;
pub mod registry;

pub use balance::{BalanceChange, BalanceStorageConfig, BalanceStore};
pub use error::StoreError;
pub use registry::{InstanceRegistry, RosterEntry};

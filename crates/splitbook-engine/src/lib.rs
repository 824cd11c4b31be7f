//! Weekly settlement computation engine.
//!
//! A pure computation stage between a data-access collaborator and a
//! presentation collaborator: per-player weekly figures go in, per-agent
//! nets, rule-based split allocations, and a minimal transfer plan come out.

#![deny(unsafe_code)]

pub mod aggregate;
pub mod error;
pub mod run;
pub mod smoother;
pub mod split;
pub mod transfers;

pub use aggregate::{AgentBucket, Aggregator, WeekAggregate};
pub use error::EngineError;
pub use run::SettlementEngine;
pub use smoother::{BubbleSmoother, SmoothingOutcome};
pub use split::{allocate, AgentStanding, SplitDecision};
pub use transfers::{entitlements, plan};

//! Rebuild object scan and shipment for Scour.
//!
//! When targets fail, every surviving target scans its local objects, works
//! out which shards now belong elsewhere, and ships descriptors of them to
//! their new owners. This crate provides:
//!
//! - [`ShipQueue`]: deduplicating target → container → object queue.
//! - [`Scanner`] and [`scan_collective`]: per-context object evaluation
//!   against the placement oracle, fanned out and joined.
//! - [`Shipper`]: batched shipment with retry and target-down abandonment.
//! - [`ScanLeader`]: the per-rebuild state machine and its teardown.
//! - [`RebuildRegistry`]: scan-trigger handling and per-rebuild
//!   [`RebuildTracker`]s.
//! - [`trigger_scan`]: leader-side fan-out and reply aggregation.
//! - [`RebuildProtocol`]: the iroh protocol handler for inbound RPCs.
//! - [`FaultInjector`]: fail points for exercising error paths.

pub mod backoff;
pub mod config;
pub mod error;
pub mod fault;
pub mod handler;
pub mod leader;
pub mod queue;
pub mod registry;
pub mod scanner;
pub mod shipper;
pub mod source;
pub mod tracker;
pub mod trigger;

pub use backoff::Backoff;
pub use config::{ConfigError, RebuildConfig};
pub use error::RebuildError;
pub use fault::{FailPoint, FaultInjector};
pub use handler::{ObjectsSink, RebuildProtocol, dispatch};
pub use leader::{RebuildDeps, ScanLeader, ScanState, ScanSummary};
pub use queue::{DrainedBatch, InsertOutcome, ShipQueue};
pub use registry::RebuildRegistry;
pub use scanner::{ScanShared, ScanStats, Scanner, scan_collective};
pub use shipper::{ShipStats, Shipper};
pub use source::{LocalObject, MemoryObjectSource, ObjectSource};
pub use tracker::{RebuildTracker, TrackerStatus};
pub use trigger::trigger_scan;

#[cfg(test)]
mod tests;

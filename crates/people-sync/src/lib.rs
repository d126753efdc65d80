//! Person reconciliation: matching incoming records against the canonical
//! registry, merging them into one survivor, and sweeping a directory source
//! end to end.

pub mod cache;
pub mod directory;
pub mod mapping;
pub mod merge;
pub mod sweep;

pub use merge::{Reconciled, reconcile};
pub use sweep::{RunContext, SweepError, SweepReport, Synchronizer};

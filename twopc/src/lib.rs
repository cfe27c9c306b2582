//! Two-phase commit coordinator for the replicated sensor store.
//!
//! The coordinator drives every write through a prepare phase and a decision
//! phase against a fixed set of replicas, so a reading lands on all of them
//! or on none. It keeps no state between calls; rounds it abandons are
//! cleaned up by the replicas' own expiry sweepers.

pub mod client;
pub mod coordinator;
pub mod perf;

pub use client::ReplicaClient;
pub use coordinator::{CommitError, Coordinator};
pub use perf::LatencyStats;

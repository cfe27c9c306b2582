//! Replica node of a redundant sensor record store.
//!
//! Each replica keeps a bounded in-memory log of committed readings plus the
//! prepared entries of in-flight two-phase commit rounds. The wire surface is
//! a tarpc service speaking JSON over TCP; a coordinator drives the prepare
//! and decision phases against two of these nodes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::SensorDataRequest;

pub mod engine;
pub mod record;
pub mod server;
pub mod store;

/// Default maximum number of readings kept in a replica log.
pub const DEFAULT_DATA_LIMIT: usize = 1_000_000;

/// Prepared transactions older than this are expired by the sweeper.
pub const TXN_TIMEOUT: Duration = Duration::from_secs(30);

/// Period of the expiry sweeper.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// Per-call deadline, set by clients and enforced by the server framework.
pub const RPC_DEADLINE: Duration = Duration::from_secs(5);

/// Receive/send limit per RPC frame.
pub const MAX_FRAME_LEN: usize = 200 * 1024 * 1024;

#[tarpc::service]
pub trait SensorDb {
    /// Append a reading directly, bypassing two-phase commit. Writes taken
    /// through this path land on this replica only; kept for performance
    /// baselining.
    async fn create(data: SensorDataRequest) -> OperationResponse;

    /// Phase 1: reserve `data` under `transaction_id` without making it
    /// visible to readers.
    async fn prepare(transaction_id: String, data: SensorDataRequest) -> PrepareResponse;

    /// Phase 2: move the reading prepared under `transaction_id` into the log.
    async fn commit(transaction_id: String) -> OperationResponse;

    /// Phase 2: discard the reading prepared under `transaction_id`.
    async fn abort(transaction_id: String) -> OperationResponse;

    /// All committed readings in log order.
    async fn read_all() -> Vec<SensorDataRequest>;

    /// Committed readings of one sensor in log order.
    async fn read_by_sensor(sensor_id: String) -> Vec<SensorDataRequest>;

    /// Maintenance operation: overwrite value and unit of the reading
    /// matching `(sensor_id, timestamp)`. Applies to this replica only and
    /// is not routed through the commit protocol.
    async fn update(data: SensorDataRequest) -> OperationResponse;

    /// Maintenance operation: drop every reading of `sensor_id` from this
    /// replica only.
    async fn delete(sensor_id: String) -> OperationResponse;
}

/// Reply of every operation that carries no data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Reply of the prepare phase; `success` is the participant's vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub success: bool,
    pub message: String,
    pub transaction_id: String,
}

impl PrepareResponse {
    pub fn yes(transaction_id: String) -> Self {
        Self {
            success: true,
            message: "transaction prepared".to_string(),
            transaction_id,
        }
    }

    pub fn no(transaction_id: String, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            transaction_id,
        }
    }
}

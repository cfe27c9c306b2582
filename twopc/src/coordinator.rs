use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use sensordb::record::SensorReading;

use crate::client::ReplicaClient;

/// Caller-facing outcome of a failed commit round.
#[derive(Debug, Error)]
pub enum CommitError {
    /// At least one replica refused or missed the prepare phase; the reading
    /// is on no replica.
    #[error("transaction {txid} aborted: {reason}")]
    Aborted { txid: String, reason: String },
    /// Commit was decided but not every replica applied it; the reading is
    /// on at least one replica and stays there.
    #[error("transaction {txid} partially committed: {detail}")]
    PartiallyCommitted { txid: String, detail: String },
}

/// Drives two-phase commit across a fixed replica set and serves reads.
///
/// Stateless between calls: every `commit_record` is a fresh round with a
/// fresh transaction id, and a round abandoned mid-flight is expired by the
/// replicas' sweepers.
pub struct Coordinator {
    replicas: Vec<ReplicaClient>,
}

enum Vote {
    Yes,
    No(String),
}

impl Coordinator {
    /// Connect to every replica, in order. Construction is atomic: when one
    /// connection cannot be opened, the already-opened ones are dropped, and
    /// thereby closed, before the error returns.
    pub async fn connect(addrs: &[String]) -> Result<Self> {
        if addrs.len() < 2 {
            return Err(anyhow!(
                "two-phase commit needs at least 2 replica addresses, got {}",
                addrs.len()
            ));
        }
        let mut replicas = Vec::with_capacity(addrs.len());
        for addr in addrs {
            replicas.push(ReplicaClient::connect(addr).await?);
        }
        Ok(Self { replicas })
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// The replica serving reads and direct baseline writes.
    pub(crate) fn primary(&self) -> &ReplicaClient {
        &self.replicas[0]
    }

    /// Write `reading` to every replica or to none.
    pub async fn commit_record(&self, reading: SensorReading) -> Result<(), CommitError> {
        let txid = new_txid();
        info!(
            "starting transaction {} for sensor {}",
            txid, reading.sensor_id
        );

        // Phase 1. Every replica gets a prepare before anything is decided,
        // so none is left holding an entry the decision never covers.
        let mut votes = Vec::with_capacity(self.replicas.len());
        for client in &self.replicas {
            let vote = match client.prepare(&txid, reading.clone()).await {
                Ok(resp) if resp.success => Vote::Yes,
                Ok(resp) => Vote::No(format!(
                    "{} refused prepare: {}",
                    client.addr(),
                    resp.message
                )),
                Err(e) => Vote::No(format!("{:#}", e)),
            };
            votes.push(vote);
        }

        let refusal = votes.iter().find_map(|vote| match vote {
            Vote::Yes => None,
            Vote::No(reason) => Some(reason.clone()),
        });

        // Phase 2.
        match refusal {
            None => self.commit_all(&txid).await,
            Some(reason) => {
                warn!("aborting transaction {}: {}", txid, reason);
                self.abort_all(&txid).await;
                Err(CommitError::Aborted { txid, reason })
            }
        }
    }

    async fn commit_all(&self, txid: &str) -> Result<(), CommitError> {
        let mut committed = 0;
        let mut last_error = None;
        for client in &self.replicas {
            match client.commit(txid).await {
                Ok(()) => committed += 1,
                Err(e) => {
                    warn!("commit of {} failed at {}: {:#}", txid, client.addr(), e);
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error {
            return Err(CommitError::PartiallyCommitted {
                txid: txid.to_string(),
                detail: format!(
                    "{} of {} replicas committed, last error: {:#}",
                    committed,
                    self.replicas.len(),
                    e
                ),
            });
        }
        info!(
            "transaction {} committed on all {} replicas",
            txid,
            self.replicas.len()
        );
        Ok(())
    }

    async fn abort_all(&self, txid: &str) {
        for client in &self.replicas {
            // A replica that never voted YES answers "not prepared" here;
            // that is expected cleanup noise, not a failure of the round.
            if let Err(e) = client.abort(txid).await {
                debug!("abort of {} at {}: {:#}", txid, client.addr(), e);
            }
        }
    }

    /// All committed readings, served by replica 0.
    pub async fn get_all(&self) -> Result<Vec<SensorReading>> {
        self.primary().read_all().await
    }

    /// Committed readings of one sensor, served by replica 0.
    pub async fn get_by_sensor(&self, sensor_id: &str) -> Result<Vec<SensorReading>> {
        self.primary().read_by_sensor(sensor_id).await
    }
}

/// 128-bit random transaction id, `txn_`-prefixed hex. Falls back to the
/// nanosecond clock when the random source is unavailable.
fn new_txid() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => {
            let mut id = String::with_capacity(4 + 2 * bytes.len());
            id.push_str("txn_");
            for b in &bytes {
                id.push_str(&format!("{:02x}", b));
            }
            id
        }
        Err(e) => {
            warn!(
                "random source unavailable ({}), falling back to clock-based transaction id",
                e
            );
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            format!("txn_{}", nanos)
        }
    }
}

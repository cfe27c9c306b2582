use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::{future, prelude::*};
use log::info;
use tarpc::{
    context,
    server::{self, Channel, Handler},
    tokio_serde::formats::Json,
};
use tokio::task::JoinHandle;

use crate::engine::{PreparedSet, Sweeper};
use crate::record::SensorDataRequest;
use crate::store::SensorStore;
use crate::{
    OperationResponse, PrepareResponse, SensorDb, DEFAULT_DATA_LIMIT, MAX_FRAME_LEN, SWEEP_PERIOD,
    TXN_TIMEOUT,
};

/// Tunables of one replica. `Default` matches the production settings.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Maximum number of readings kept in the log.
    pub data_limit: usize,
    /// Prepared transactions older than this are expired.
    pub txn_timeout: Duration,
    /// Period of the expiry sweeper.
    pub sweep_period: Duration,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            data_limit: DEFAULT_DATA_LIMIT,
            txn_timeout: TXN_TIMEOUT,
            sweep_period: SWEEP_PERIOD,
        }
    }
}

// This is the type that implements the generated service trait. One clone
// serves each in-flight call; the log and the prepared set are shared.
#[derive(Clone)]
pub struct Replica {
    store: Arc<SensorStore>,
    txns: Arc<PreparedSet>,
}

#[tarpc::server]
impl SensorDb for Replica {
    async fn create(self, _: context::Context, data: SensorDataRequest) -> OperationResponse {
        if data.sensor_id.is_empty() {
            return OperationResponse::fail("missing sensor id");
        }
        self.store.append(data.into_reading());
        OperationResponse::ok("data stored")
    }

    async fn prepare(
        self,
        _: context::Context,
        transaction_id: String,
        data: SensorDataRequest,
    ) -> PrepareResponse {
        if transaction_id.is_empty() {
            return PrepareResponse::no(transaction_id, "missing transaction id");
        }
        if data.sensor_id.is_empty() {
            return PrepareResponse::no(transaction_id, "missing sensor id in sensor data");
        }

        let reading = data.into_reading();
        let sensor_id = reading.sensor_id.clone();
        if !self.txns.insert(&transaction_id, reading) {
            return PrepareResponse::no(transaction_id, "transaction already prepared");
        }
        info!(
            "prepared transaction {} for sensor {}",
            transaction_id, sensor_id
        );
        PrepareResponse::yes(transaction_id)
    }

    async fn commit(self, _: context::Context, transaction_id: String) -> OperationResponse {
        if transaction_id.is_empty() {
            return OperationResponse::fail("missing transaction id");
        }
        // The prepared lock is released by `take` before the log lock is
        // acquired by `append`; the two must never be held together.
        match self.txns.take(&transaction_id) {
            Some(reading) => {
                info!(
                    "committed transaction {} for sensor {}",
                    transaction_id, reading.sensor_id
                );
                self.store.append(reading);
                OperationResponse::ok("transaction committed")
            }
            None => OperationResponse::fail(format!(
                "transaction {} not prepared",
                transaction_id
            )),
        }
    }

    async fn abort(self, _: context::Context, transaction_id: String) -> OperationResponse {
        if transaction_id.is_empty() {
            return OperationResponse::fail("missing transaction id");
        }
        match self.txns.take(&transaction_id) {
            Some(reading) => {
                info!(
                    "aborted transaction {} for sensor {}",
                    transaction_id, reading.sensor_id
                );
                OperationResponse::ok("transaction aborted")
            }
            None => OperationResponse::fail(format!(
                "transaction {} not prepared",
                transaction_id
            )),
        }
    }

    async fn read_all(self, _: context::Context) -> Vec<SensorDataRequest> {
        self.store
            .all()
            .into_iter()
            .map(SensorDataRequest::from)
            .collect()
    }

    async fn read_by_sensor(
        self,
        _: context::Context,
        sensor_id: String,
    ) -> Vec<SensorDataRequest> {
        self.store
            .by_sensor(&sensor_id)
            .into_iter()
            .map(SensorDataRequest::from)
            .collect()
    }

    async fn update(self, _: context::Context, data: SensorDataRequest) -> OperationResponse {
        let timestamp = match data.timestamp {
            Some(ts) if !data.sensor_id.is_empty() => ts,
            _ => return OperationResponse::fail("missing sensor id or timestamp"),
        };
        if self
            .store
            .update(&data.sensor_id, timestamp, data.value, &data.unit)
        {
            OperationResponse::ok("data updated")
        } else {
            OperationResponse::fail("data not found")
        }
    }

    async fn delete(self, _: context::Context, sensor_id: String) -> OperationResponse {
        if sensor_id.is_empty() {
            return OperationResponse::fail("missing sensor id");
        }
        let removed = self.store.delete(&sensor_id);
        OperationResponse::ok(format!("deleted {} readings for sensor {}", removed, sensor_id))
    }
}

impl Replica {
    /// Bind `addr` and serve the replica on it. The returned handle owns the
    /// accept loop and the expiry sweeper.
    pub async fn listen(addr: SocketAddr, config: ReplicaConfig) -> Result<RunningReplica> {
        let store = Arc::new(SensorStore::new(config.data_limit));
        let txns = Arc::new(PreparedSet::new(config.txn_timeout));
        let sweeper = Sweeper::spawn(txns.clone(), config.sweep_period);
        let replica = Replica { store, txns };

        let mut listener = tarpc::serde_transport::tcp::listen(&addr, Json::default).await?;
        listener.config_mut().max_frame_length(MAX_FRAME_LEN);
        let local_addr = listener.local_addr();
        info!("replica listening on {}", local_addr);

        let accept = tokio::spawn(async move {
            listener
                // Ignore accept errors.
                .filter_map(|r| future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .max_channels_per_key(10, |t| t.as_ref().peer_addr().unwrap().ip())
                .map(|channel| channel.respond_with(replica.clone().serve()).execute())
                .buffer_unordered(64)
                .for_each(|_| async {})
                .await;
        });

        Ok(RunningReplica {
            local_addr,
            accept,
            sweeper,
        })
    }
}

/// A replica serving its RPC surface, with its sweeper running.
pub struct RunningReplica {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
    sweeper: Sweeper,
}

impl RunningReplica {
    /// The address the replica actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Graceful shutdown. The sweeper is stopped and joined first so it can
    /// never run against a half-torn-down replica, then the accept loop and
    /// its channels are dropped.
    pub async fn shutdown(self) {
        self.sweeper.stop().await;
        self.accept.abort();
        let _ = self.accept.await;
        info!("replica {} stopped", self.local_addr);
    }
}

use std::time::SystemTime;

use anyhow::{anyhow, Context as _, Result};
use tarpc::{client, context, tokio_serde::formats::Json};

use sensordb::record::{SensorDataRequest, SensorReading};
use sensordb::{OperationResponse, PrepareResponse, SensorDbClient, MAX_FRAME_LEN, RPC_DEADLINE};

/// Long-lived connection to one replica.
#[derive(Clone)]
pub struct ReplicaClient {
    addr: String,
    rpc: SensorDbClient,
}

/// Per-call context carrying the call deadline.
fn deadline() -> context::Context {
    let mut ctx = context::current();
    ctx.deadline = SystemTime::now() + RPC_DEADLINE;
    ctx
}

impl ReplicaClient {
    /// Open a connection to `addr`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let mut transport = tarpc::serde_transport::tcp::connect(addr, Json::default);
        transport.config_mut().max_frame_length(MAX_FRAME_LEN);
        let transport = transport
            .await
            .with_context(|| format!("failed to connect to replica {}", addr))?;
        let rpc = SensorDbClient::new(client::Config::default(), transport).spawn()?;
        Ok(Self {
            addr: addr.to_string(),
            rpc,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Direct write to this replica only, bypassing the commit protocol.
    pub async fn create(&self, reading: SensorReading) -> Result<()> {
        let resp = self
            .rpc
            .clone()
            .create(deadline(), reading.into())
            .await
            .with_context(|| format!("create call to {} failed", self.addr))?;
        if !resp.success {
            return Err(anyhow!("create refused by {}: {}", self.addr, resp.message));
        }
        Ok(())
    }

    /// Phase 1 of a commit round. Transport failures surface as `Err`; a NO
    /// vote comes back inside the response.
    pub async fn prepare(&self, txid: &str, reading: SensorReading) -> Result<PrepareResponse> {
        self.rpc
            .clone()
            .prepare(deadline(), txid.to_string(), reading.into())
            .await
            .with_context(|| format!("prepare call to {} failed", self.addr))
    }

    /// Phase 2: apply the decision to commit `txid`.
    pub async fn commit(&self, txid: &str) -> Result<()> {
        let resp = self
            .rpc
            .clone()
            .commit(deadline(), txid.to_string())
            .await
            .with_context(|| format!("commit call to {} failed", self.addr))?;
        if !resp.success {
            return Err(anyhow!("commit refused by {}: {}", self.addr, resp.message));
        }
        Ok(())
    }

    /// Phase 2: apply the decision to abort `txid`.
    pub async fn abort(&self, txid: &str) -> Result<()> {
        let resp = self
            .rpc
            .clone()
            .abort(deadline(), txid.to_string())
            .await
            .with_context(|| format!("abort call to {} failed", self.addr))?;
        if !resp.success {
            return Err(anyhow!("abort refused by {}: {}", self.addr, resp.message));
        }
        Ok(())
    }

    /// All committed readings of this replica in log order.
    pub async fn read_all(&self) -> Result<Vec<SensorReading>> {
        let data = self
            .rpc
            .clone()
            .read_all(deadline())
            .await
            .with_context(|| format!("read_all call to {} failed", self.addr))?;
        Ok(data.into_iter().map(SensorDataRequest::into_reading).collect())
    }

    /// Committed readings of one sensor on this replica.
    pub async fn read_by_sensor(&self, sensor_id: &str) -> Result<Vec<SensorReading>> {
        let data = self
            .rpc
            .clone()
            .read_by_sensor(deadline(), sensor_id.to_string())
            .await
            .with_context(|| format!("read_by_sensor call to {} failed", self.addr))?;
        Ok(data.into_iter().map(SensorDataRequest::into_reading).collect())
    }

    /// Maintenance operation: overwrite the reading matching the sensor id
    /// and timestamp of `reading`, on this replica only. The response is
    /// non-success when nothing matches.
    pub async fn update(&self, reading: SensorReading) -> Result<OperationResponse> {
        self.rpc
            .clone()
            .update(deadline(), reading.into())
            .await
            .with_context(|| format!("update call to {} failed", self.addr))
    }

    /// Maintenance operation: drop every reading of `sensor_id` from this
    /// replica only.
    pub async fn delete_by_sensor(&self, sensor_id: &str) -> Result<OperationResponse> {
        self.rpc
            .clone()
            .delete(deadline(), sensor_id.to_string())
            .await
            .with_context(|| format!("delete call to {} failed", self.addr))
    }
}

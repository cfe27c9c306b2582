use std::net::SocketAddr;

use structopt::StructOpt;

use sensordb::server::{Replica, ReplicaConfig};

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
struct Opt {
    /// Port to serve the replica on
    #[structopt(short, long, default_value = "50051")]
    port: u16,

    /// Maximum number of readings to keep
    #[structopt(long, default_value = "1000000")]
    data_limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let config = ReplicaConfig {
        data_limit: opt.data_limit,
        ..ReplicaConfig::default()
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], opt.port));
    let replica = Replica::listen(addr, config).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down replica");
    replica.shutdown().await;
    Ok(())
}

use std::time::Instant;

use anyhow::Context as _;
use structopt::StructOpt;

use twopc::{Coordinator, LatencyStats};

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
struct Opt {
    /// Address of the first replica
    #[structopt(long, default_value = "127.0.0.1:50051")]
    db_addr1: String,

    /// Address of the second replica
    #[structopt(long, default_value = "127.0.0.1:50052")]
    db_addr2: String,

    /// Rounds per measurement
    #[structopt(short = "n", long, default_value = "1000")]
    requests: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let coordinator = Coordinator::connect(&[opt.db_addr1, opt.db_addr2]).await?;

    println!("direct rpc baseline ({} requests)", opt.requests);
    println!("{}", coordinator.measure_direct(opt.requests).await?);

    println!("two-phase commit, sequential ({} requests)", opt.requests);
    let start = Instant::now();
    let mut rtts = Vec::with_capacity(opt.requests);
    for _ in 0..opt.requests {
        rtts.push(coordinator.measure_one().await?);
    }
    let sequential = LatencyStats::from_samples(rtts, start.elapsed())
        .context("no measurement round succeeded")?;
    println!("{}", sequential);

    println!("two-phase commit, concurrent ({} requests)", opt.requests);
    println!("{}", coordinator.measure_batch(opt.requests).await?);

    Ok(())
}

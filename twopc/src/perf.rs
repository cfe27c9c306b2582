//! Latency harness: round-trip measurements of the write paths. Used by the
//! bench binary only, never on the request path.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Result};
use futures::future;
use log::warn;

use sensordb::record::SensorReading;

use crate::coordinator::Coordinator;

/// Round-trip statistics of one measurement run.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub median: Duration,
    pub std_dev: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub requests_per_second: f64,
    pub total: Duration,
}

impl LatencyStats {
    /// Compute the statistics block over raw round-trip samples. `None` when
    /// no sample survived.
    pub fn from_samples(mut rtts: Vec<Duration>, total: Duration) -> Option<Self> {
        if rtts.is_empty() {
            return None;
        }
        rtts.sort();

        let count = rtts.len();
        let sum: Duration = rtts.iter().sum();
        let mean = sum / count as u32;
        let median = if count % 2 == 0 {
            (rtts[count / 2 - 1] + rtts[count / 2]) / 2
        } else {
            rtts[count / 2]
        };
        let variance = rtts
            .iter()
            .map(|rtt| {
                let diff = rtt.as_secs_f64() - mean.as_secs_f64();
                diff * diff
            })
            .sum::<f64>()
            / count as f64;
        let percentile = |p: f64| rtts[((count as f64 * p) as usize).min(count - 1)];

        Some(Self {
            count,
            min: rtts[0],
            max: rtts[count - 1],
            mean,
            median,
            std_dev: Duration::from_secs_f64(variance.sqrt()),
            p90: percentile(0.90),
            p95: percentile(0.95),
            p99: percentile(0.99),
            requests_per_second: count as f64 / total.as_secs_f64(),
            total,
        })
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  total requests:      {}", self.count)?;
        writeln!(f, "  min rtt:             {:?}", self.min)?;
        writeln!(f, "  max rtt:             {:?}", self.max)?;
        writeln!(f, "  mean rtt:            {:?}", self.mean)?;
        writeln!(f, "  median rtt:          {:?}", self.median)?;
        writeln!(f, "  standard deviation:  {:?}", self.std_dev)?;
        writeln!(f, "  90th percentile:     {:?}", self.p90)?;
        writeln!(f, "  95th percentile:     {:?}", self.p95)?;
        writeln!(f, "  99th percentile:     {:?}", self.p99)?;
        writeln!(f, "  requests per second: {:.2}", self.requests_per_second)?;
        write!(f, "  total duration:      {:?}", self.total)
    }
}

fn probe_reading(sensor_id: &str) -> SensorReading {
    SensorReading {
        sensor_id: sensor_id.to_string(),
        timestamp: SystemTime::now(),
        value: 42.0,
        unit: "test".to_string(),
    }
}

impl Coordinator {
    /// One full commit round against all replicas, timed.
    pub async fn measure_one(&self) -> Result<Duration> {
        let start = Instant::now();
        self.commit_record(probe_reading("2pc-perf-test")).await?;
        Ok(start.elapsed())
    }

    /// `n` concurrent commit rounds, timed individually. Rounds that fail
    /// are logged and excluded from the statistics.
    pub async fn measure_batch(&self, n: usize) -> Result<LatencyStats> {
        let start = Instant::now();
        let rounds = (0..n).map(|i| async move {
            let reading = probe_reading(&format!("2pc-perf-{}", i));
            let round_start = Instant::now();
            self.commit_record(reading)
                .await
                .map(|()| round_start.elapsed())
        });

        let mut rtts = Vec::with_capacity(n);
        for outcome in future::join_all(rounds).await {
            match outcome {
                Ok(rtt) => rtts.push(rtt),
                Err(e) => warn!("measurement round failed: {}", e),
            }
        }
        LatencyStats::from_samples(rtts, start.elapsed())
            .ok_or_else(|| anyhow!("no measurement round succeeded"))
    }

    /// Baseline: `n` sequential direct writes to replica 0, bypassing the
    /// commit protocol.
    pub async fn measure_direct(&self, n: usize) -> Result<LatencyStats> {
        let start = Instant::now();
        let mut rtts = Vec::with_capacity(n);
        for _ in 0..n {
            let round_start = Instant::now();
            self.primary().create(probe_reading("direct-rpc-perf")).await?;
            rtts.push(round_start.elapsed());
        }
        LatencyStats::from_samples(rtts, start.elapsed())
            .ok_or_else(|| anyhow!("no measurement round succeeded"))
    }
}

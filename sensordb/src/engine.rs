use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::record::SensorReading;

/// A reading reserved by the prepare phase, not yet committed or discarded.
struct PreparedEntry {
    reading: SensorReading,
    prepared_at: Instant,
}

/// Prepared transactions of one replica.
///
/// Lives behind its own lock so transaction bookkeeping never delays log
/// readers. This lock and the log lock are never held at the same time: the
/// commit path removes the entry here, releases the lock, and only then
/// appends to the log.
pub struct PreparedSet {
    entries: RwLock<HashMap<String, PreparedEntry>>,
    ttl: Duration,
}

impl PreparedSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Reserve `reading` under `txid`. Refuses when the id is already
    /// prepared, leaving the existing entry untouched.
    pub fn insert(&self, txid: &str, reading: SensorReading) -> bool {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(txid) {
            return false;
        }
        entries.insert(
            txid.to_string(),
            PreparedEntry {
                reading,
                prepared_at: Instant::now(),
            },
        );
        true
    }

    /// Remove and return the reading prepared under `txid`, if any. Commit
    /// and abort both resolve entries through here; a txid that was already
    /// committed, aborted or expired yields `None`.
    pub fn take(&self, txid: &str) -> Option<SensorReading> {
        self.entries.write().unwrap().remove(txid).map(|e| e.reading)
    }

    /// Drop every entry older than the ttl. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|txid, entry| {
            if entry.prepared_at.elapsed() > ttl {
                info!("expired prepared transaction {}", txid);
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle of the background task that expires stale prepared entries. This
/// is the only recovery path for rounds whose coordinator never delivered a
/// decision.
pub struct Sweeper {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweeper over `set`, ticking every `period`.
    pub fn spawn(set: Arc<PreparedSet>, period: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = set.sweep();
                        if expired > 0 {
                            debug!("sweeper removed {} expired transactions", expired);
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
        });
        Self { stop, task }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::SystemTime;

use log::info;

use crate::record::SensorReading;

/// Bounded in-memory log of committed readings.
///
/// Reads take the shared side of the lock and return defensive copies; the
/// writers are `append` and the maintenance operations. Past `capacity` the
/// oldest readings are evicted so the most recent `capacity` remain; the
/// deque front is the eviction end, which keeps appends O(1) amortised.
pub struct SensorStore {
    log: RwLock<VecDeque<SensorReading>>,
    capacity: usize,
}

impl SensorStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append one reading, evicting the oldest entries past capacity.
    pub fn append(&self, reading: SensorReading) {
        info!("stored reading {}", reading);
        let mut log = self.log.write().unwrap();
        log.push_back(reading);
        while log.len() > self.capacity {
            log.pop_front();
        }
    }

    /// All readings in log order.
    pub fn all(&self) -> Vec<SensorReading> {
        self.log.read().unwrap().iter().cloned().collect()
    }

    /// Readings of one sensor in log order. An empty id matches nothing.
    pub fn by_sensor(&self, sensor_id: &str) -> Vec<SensorReading> {
        if sensor_id.is_empty() {
            return Vec::new();
        }
        self.log
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.sensor_id == sensor_id)
            .cloned()
            .collect()
    }

    /// Overwrite value and unit of the first reading matching `(sensor_id,
    /// timestamp)`. Returns false when nothing matches.
    pub fn update(&self, sensor_id: &str, timestamp: SystemTime, value: f64, unit: &str) -> bool {
        let mut log = self.log.write().unwrap();
        match log
            .iter_mut()
            .find(|r| r.sensor_id == sensor_id && r.timestamp == timestamp)
        {
            Some(reading) => {
                reading.value = value;
                reading.unit = unit.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop every reading of `sensor_id`. Returns the number removed.
    pub fn delete(&self, sensor_id: &str) -> usize {
        let mut log = self.log.write().unwrap();
        let before = log.len();
        log.retain(|r| r.sensor_id != sensor_id);
        before - log.len()
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

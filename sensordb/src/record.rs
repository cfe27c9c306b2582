use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// One sensor measurement. Immutable once constructed; a replica only ever
/// appends, evicts or drops whole readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    /// Wall-clock instant of the measurement, nanosecond precision.
    pub timestamp: SystemTime,
    pub value: f64,
    pub unit: String,
}

impl SensorReading {
    /// Sort key for deterministic comparisons: timestamp first, sensor id
    /// second. Storage itself keeps insertion order.
    pub fn sort_key(&self) -> (SystemTime, &str) {
        (self.timestamp, self.sensor_id.as_str())
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.2} {}", self.sensor_id, self.value, self.unit)
    }
}

/// Wire form of a reading. The timestamp is optional; a receiver fills in
/// its own clock when it is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDataRequest {
    pub sensor_id: String,
    pub timestamp: Option<SystemTime>,
    pub value: f64,
    pub unit: String,
}

impl SensorDataRequest {
    /// Resolve into a reading, substituting the current time for an absent
    /// timestamp.
    pub fn into_reading(self) -> SensorReading {
        SensorReading {
            sensor_id: self.sensor_id,
            timestamp: self.timestamp.unwrap_or_else(SystemTime::now),
            value: self.value,
            unit: self.unit,
        }
    }
}

impl From<SensorReading> for SensorDataRequest {
    fn from(reading: SensorReading) -> Self {
        Self {
            sensor_id: reading.sensor_id,
            timestamp: Some(reading.timestamp),
            value: reading.value,
            unit: reading.unit,
        }
    }
}

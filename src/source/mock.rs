//! random telemetry for running the dashboard without any devices.
//!
//! every fetch produces a fresh reading per configured device id within
//! plausible indoor ranges. uptime grows with wall-clock time since the
//! source was created, offset per device so cards don't all match.

use super::{PollingSource, SourceResult};
use crate::domain::{ReadingSet, SensorReading};
use crate::stats::round1;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::time::Instant;

pub struct MockSource {
    devices: Vec<String>,
    started: Instant,
}

impl MockSource {
    pub fn new(devices: Vec<String>) -> Self {
        Self {
            devices,
            started: Instant::now(),
        }
    }

    fn generate(&self) -> ReadingSet {
        let mut rng = rand::thread_rng();
        let elapsed = self.started.elapsed().as_secs();
        let now = Utc::now();

        self.devices
            .iter()
            .enumerate()
            .map(|(idx, id)| SensorReading {
                id: id.clone(),
                temperature: Some(round1(rng.gen_range(18.0..30.0))),
                humidity: Some(round1(rng.gen_range(30.0..85.0))),
                pressure: Some(round1(rng.gen_range(990.0..1030.0))),
                rssi: Some(f64::from(rng.gen_range(-95..-60))),
                uptime: Some(elapsed + idx as u64 * 3_600),
                timestamp: Some(now),
            })
            .collect()
    }
}

#[async_trait]
impl PollingSource for MockSource {
    async fn fetch_readings(&self) -> SourceResult {
        Ok(self.generate())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

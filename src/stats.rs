//! aggregate statistics over the current reading set.
//!
//! recomputed from scratch on every update; nothing here is cached or merged.

use crate::domain::ReadingSet;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    /// mean temperature of readings that have one, one decimal
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub avg_pressure: Option<f64>,
    /// readings whose signal tier is not weak
    pub online: usize,
    pub total: usize,
}

impl AggregateStats {
    /// `None` for an empty set
    pub fn compute(set: &ReadingSet) -> Option<Self> {
        if set.is_empty() {
            return None;
        }

        let online = set
            .iter()
            .filter(|r| r.signal_tier().is_some_and(|tier| tier.is_online()))
            .count();

        Some(Self {
            avg_temperature: mean(set.iter().filter_map(|r| r.temperature)),
            avg_humidity: mean(set.iter().filter_map(|r| r.humidity)),
            avg_pressure: mean(set.iter().filter_map(|r| r.pressure)),
            online,
            total: set.len(),
        })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| round1(sum / count as f64))
}

/// round to one decimal place
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

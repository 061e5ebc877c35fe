//! ==============================================================================
//! domain.rs - sensor readings and the reading set
//! ==============================================================================
//!
//! purpose:
//!     the canonical reading schema shared by every telemetry source.
//!     devices push `{temperature, humidity, pressure, rssi, uptime, timestamp}`
//!     keyed by device id; the rest collector sends a subset of that with
//!     `last_updated` in place of `timestamp`.
//!
//! decoding rules:
//!     numbers and numeric strings are accepted for every measurement.
//!     anything that fails to coerce becomes `None` ("unavailable") for that
//!     field only - the rest of the reading survives.
//!
//! relationships:
//!     - used by: source/* (decode payloads into readings)
//!     - used by: stats.rs, render.rs, presenter.rs
//!
//! ==============================================================================

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// epoch values above this are taken to be milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

// ==============================================================================
// signal tier
// ==============================================================================

/// coarse rssi classification used for colouring cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalTier {
    Strong,
    Moderate,
    Weak,
}

impl SignalTier {
    /// > -70 dBm strong, > -90 dBm moderate, anything else weak
    pub fn from_rssi(rssi: f64) -> Self {
        if rssi > -70.0 {
            SignalTier::Strong
        } else if rssi > -90.0 {
            SignalTier::Moderate
        } else {
            SignalTier::Weak
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SignalTier::Strong => "strong",
            SignalTier::Moderate => "moderate",
            SignalTier::Weak => "weak",
        }
    }

    /// a device counts as online unless its link is weak
    pub fn is_online(self) -> bool {
        self != SignalTier::Weak
    }
}

// ==============================================================================
// sensor reading
// ==============================================================================

/// latest measurement from one physical device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// device id, unique within a reading set
    pub id: String,
    /// temperature in celsius
    pub temperature: Option<f64>,
    /// relative humidity (0-100%)
    pub humidity: Option<f64>,
    /// pressure in hPa (push-store devices only)
    pub pressure: Option<f64>,
    /// signal strength in dBm (negative)
    pub rssi: Option<f64>,
    /// seconds since device boot
    pub uptime: Option<u64>,
    /// time of the last measurement
    pub timestamp: Option<DateTime<Utc>>,
}

impl SensorReading {
    /// a reading that carries nothing but its id
    pub fn unavailable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            temperature: None,
            humidity: None,
            pressure: None,
            rssi: None,
            uptime: None,
            timestamp: None,
        }
    }

    /// decode a device payload; non-object payloads keep the id only
    pub fn from_value(id: impl Into<String>, value: &Value) -> Self {
        match value.as_object() {
            Some(fields) => Self::from_fields(id, fields),
            None => Self::unavailable(id),
        }
    }

    pub fn from_fields(id: impl Into<String>, fields: &Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            temperature: coerce_f64(fields.get("temperature")),
            humidity: coerce_f64(fields.get("humidity")),
            pressure: coerce_f64(fields.get("pressure")),
            rssi: coerce_f64(fields.get("rssi")),
            uptime: coerce_uptime(fields.get("uptime")),
            timestamp: coerce_timestamp(fields.get("timestamp"))
                .or_else(|| coerce_timestamp(fields.get("last_updated"))),
        }
    }

    pub fn signal_tier(&self) -> Option<SignalTier> {
        self.rssi.map(SignalTier::from_rssi)
    }
}

// ==============================================================================
// reading set
// ==============================================================================

/// every current reading, keyed by device id.
/// always replaced as a whole, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReadingSet {
    readings: BTreeMap<String, SensorReading>,
}

impl ReadingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert a reading; a later reading with the same id replaces the earlier one
    pub fn insert(&mut self, reading: SensorReading) {
        self.readings.insert(reading.id.clone(), reading);
    }

    pub fn get(&self, id: &str) -> Option<&SensorReading> {
        self.readings.get(id)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// readings in id order
    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.values()
    }
}

impl FromIterator<SensorReading> for ReadingSet {
    fn from_iter<I: IntoIterator<Item = SensorReading>>(iter: I) -> Self {
        let mut set = ReadingSet::new();
        for reading in iter {
            set.insert(reading);
        }
        set
    }
}

// ==============================================================================
// write path payload
// ==============================================================================

/// shape a device (or a seeding script) writes under `devices/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePayload {
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    pub rssi: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// epoch seconds
    pub timestamp: i64,
}

impl DevicePayload {
    pub fn to_value(&self) -> Value {
        // a struct of plain numbers always serializes
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ==============================================================================
// field coercion
// ==============================================================================

/// number or numeric string -> finite f64
pub fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    let v = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

fn coerce_uptime(value: Option<&Value>) -> Option<u64> {
    coerce_f64(value)
        .filter(|secs| *secs >= 0.0)
        .map(|secs| secs.trunc() as u64)
}

/// epoch seconds (number or string), rfc 3339, or naive iso-8601 taken as utc
pub fn coerce_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => from_epoch(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<f64>() {
                return from_epoch(secs);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .ok()
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let secs = if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        value / 1000.0
    } else {
        value
    };
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tier_boundaries() {
        assert_eq!(SignalTier::from_rssi(-65.0), SignalTier::Strong);
        assert_eq!(SignalTier::from_rssi(-69.9), SignalTier::Strong);
        assert_eq!(SignalTier::from_rssi(-70.0), SignalTier::Moderate);
        assert_eq!(SignalTier::from_rssi(-89.0), SignalTier::Moderate);
        assert_eq!(SignalTier::from_rssi(-90.0), SignalTier::Weak);
        assert_eq!(SignalTier::from_rssi(-110.0), SignalTier::Weak);
        assert!(!SignalTier::from_rssi(-90.0).is_online());
        assert!(SignalTier::from_rssi(-70.0).is_online());
    }

    #[test]
    fn decodes_store_payload() {
        let value = json!({
            "temperature": 21.5, "humidity": 55, "pressure": 1013.2,
            "rssi": -65, "uptime": 3661, "timestamp": 1700000000
        });
        let r = SensorReading::from_value("node-1", &value);
        assert_eq!(r.id, "node-1");
        assert_eq!(r.temperature, Some(21.5));
        assert_eq!(r.humidity, Some(55.0));
        assert_eq!(r.pressure, Some(1013.2));
        assert_eq!(r.rssi, Some(-65.0));
        assert_eq!(r.uptime, Some(3661));
        assert_eq!(r.timestamp.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(r.signal_tier(), Some(SignalTier::Strong));
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let value = json!({"temperature": " 19.25 ", "humidity": "40", "rssi": "-80"});
        let r = SensorReading::from_value("a", &value);
        assert_eq!(r.temperature, Some(19.25));
        assert_eq!(r.humidity, Some(40.0));
        assert_eq!(r.signal_tier(), Some(SignalTier::Moderate));
    }

    #[test]
    fn bad_field_only_degrades_that_field() {
        let value = json!({"temperature": "hot", "humidity": 61.0, "rssi": -72, "uptime": -5});
        let r = SensorReading::from_value("b", &value);
        assert_eq!(r.temperature, None);
        assert_eq!(r.humidity, Some(61.0));
        assert_eq!(r.rssi, Some(-72.0));
        assert_eq!(r.uptime, None);
    }

    #[test]
    fn non_finite_strings_are_unavailable() {
        assert_eq!(coerce_f64(Some(&json!("NaN"))), None);
        assert_eq!(coerce_f64(Some(&json!("inf"))), None);
        assert_eq!(coerce_f64(Some(&json!(true))), None);
        assert_eq!(coerce_f64(None), None);
    }

    #[test]
    fn non_object_payload_keeps_id() {
        let r = SensorReading::from_value("c", &json!("garbage"));
        assert_eq!(r, SensorReading::unavailable("c"));
    }

    #[test]
    fn timestamp_formats() {
        let expected = DateTime::from_timestamp(1_700_000_000, 0);
        assert_eq!(coerce_timestamp(Some(&json!(1700000000))), expected);
        assert_eq!(coerce_timestamp(Some(&json!("1700000000"))), expected);
        assert_eq!(coerce_timestamp(Some(&json!(1700000000000i64))), expected);
        assert_eq!(coerce_timestamp(Some(&json!("2023-11-14T22:13:20Z"))), expected);
        assert_eq!(coerce_timestamp(Some(&json!("2023-11-14T23:13:20+01:00"))), expected);
        assert_eq!(coerce_timestamp(Some(&json!("2023-11-14T22:13:20"))), expected);

        let python = coerce_timestamp(Some(&json!("2023-11-14T22:13:20.500000"))).unwrap();
        assert_eq!(python.timestamp_millis(), 1_700_000_000_500);

        assert_eq!(coerce_timestamp(Some(&json!("yesterday"))), None);
        assert_eq!(coerce_timestamp(Some(&json!({"s": 1}))), None);
    }

    #[test]
    fn rest_rows_use_last_updated() {
        let value = json!({"id": "x", "temperature": 20.0, "last_updated": "2023-11-14T22:13:20"});
        let r = SensorReading::from_value("x", &value);
        assert_eq!(r.timestamp, DateTime::from_timestamp(1_700_000_000, 0));
        assert_eq!(r.pressure, None);
    }

    #[test]
    fn reading_set_last_write_wins() {
        let mut first = SensorReading::unavailable("dup");
        first.temperature = Some(1.0);
        let mut second = SensorReading::unavailable("dup");
        second.temperature = Some(2.0);

        let set: ReadingSet = vec![first, second, SensorReading::unavailable("a")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("dup").and_then(|r| r.temperature), Some(2.0));
        let ids: Vec<_> = set.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "dup"]);
    }

    #[test]
    fn payload_skips_absent_optionals() {
        let payload = DevicePayload {
            temperature: 20.0,
            humidity: 50.0,
            pressure: None,
            rssi: -80,
            uptime: None,
            timestamp: 1,
        };
        let value = payload.to_value();
        assert!(value.get("pressure").is_none());
        assert_eq!(value["rssi"], json!(-80));
    }
}

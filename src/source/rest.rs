//! polling client for the sensor collector's rest api.
//!
//! `GET {base_url}/sensors/` returns a json array of
//! `{id, temperature, humidity, rssi, last_updated}` rows. there is no auth
//! and no pagination; anything other than a 2xx is reported as unavailable.

use super::{json_kind, PollingSource, SourceResult};
use crate::domain::{ReadingSet, SensorReading};
use crate::error::SourceError;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub struct RestSource {
    client: reqwest::Client,
    endpoint: String,
}

impl RestSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/sensors/", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PollingSource for RestSource {
    async fn fetch_readings(&self) -> SourceResult {
        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!(
                "GET {} returned {}",
                self.endpoint, status
            )));
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ReadingSet::new());
        }
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| SourceError::Decode(format!("invalid json from {}: {}", self.endpoint, e)))?;
        decode_rows(&value)
    }

    fn name(&self) -> &str {
        "rest"
    }
}

/// decode the collector's array of rows
pub fn decode_rows(value: &Value) -> SourceResult {
    let rows = match value {
        Value::Null => return Ok(ReadingSet::new()),
        Value::Array(rows) => rows,
        other => {
            return Err(SourceError::Decode(format!(
                "expected an array of sensors, got {}",
                json_kind(other)
            )))
        }
    };

    let mut set = ReadingSet::new();
    for (idx, row) in rows.iter().enumerate() {
        match row_id(row) {
            Some(id) => set.insert(SensorReading::from_value(id, row)),
            None => tracing::warn!(row = idx, "skipping sensor row without an id"),
        }
    }
    Ok(set)
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

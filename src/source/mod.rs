//! ==============================================================================
//! source/mod.rs - telemetry source capability
//! ==============================================================================
//!
//! purpose:
//!     a telemetry source hands the presenter complete snapshots of every
//!     device. it comes in two shapes:
//!
//! ```text
//!     - polling: `fetch_readings()` is called by the presenter's timer or by
//!       a manual refresh (rest collector, mock generator)
//!     - push: `subscribe(sink)` starts a background task that delivers a
//!       fresh snapshot whenever the store changes (realtime store, memory)
//! ```
//!
//! teardown:
//!     a `Subscription` closes its sink before aborting its task, so once
//!     `unsubscribe()` returns no further update can reach the receiver.
//!     `unsubscribe` consumes the subscription: tearing down twice does not
//!     type-check. a source whose feed has ended for good closes the sink
//!     itself; after the last queued update the receiver sees the channel end.
//!
//! relationships:
//!     - used by: dashboard.rs (drives fetches and subscriptions)
//!     - uses: domain.rs (decodes payloads into readings)
//!
//! ==============================================================================

pub mod memory;
pub mod mock;
pub mod realtime;
pub mod rest;

use crate::config::{PollingConfig, SourceConfig, SourceKind};
use crate::domain::{ReadingSet, SensorReading};
use crate::error::SourceError;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// one delivery from a source: a full snapshot or the reason there isn't one
pub type SourceResult = Result<ReadingSet, SourceError>;

/// request/response source
#[async_trait]
pub trait PollingSource: Send + Sync {
    async fn fetch_readings(&self) -> SourceResult;
    fn name(&self) -> &str;
}

/// live subscription source
pub trait PushSource: Send + Sync {
    /// must be called from within a tokio runtime
    fn subscribe(&self, sink: UpdateSink) -> Subscription;
    fn name(&self) -> &str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceMode {
    Polling,
    Push,
}

#[derive(Clone)]
pub enum TelemetrySource {
    Polling(Arc<dyn PollingSource>),
    Push(Arc<dyn PushSource>),
}

impl TelemetrySource {
    pub fn mode(&self) -> SourceMode {
        match self {
            TelemetrySource::Polling(_) => SourceMode::Polling,
            TelemetrySource::Push(_) => SourceMode::Push,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TelemetrySource::Polling(s) => s.name(),
            TelemetrySource::Push(s) => s.name(),
        }
    }

    /// build the source selected in `[source]`
    pub fn from_config(source: &SourceConfig, polling: &PollingConfig) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(polling.request_timeout_seconds);
        Ok(match source.kind {
            SourceKind::Rest => {
                TelemetrySource::Polling(Arc::new(rest::RestSource::new(&source.rest.base_url, timeout)?))
            }
            SourceKind::Realtime => TelemetrySource::Push(Arc::new(realtime::RealtimeStore::new(
                &source.realtime.database_url,
                &source.realtime.node,
                timeout,
            )?)),
            SourceKind::Mock => {
                TelemetrySource::Polling(Arc::new(mock::MockSource::new(source.mock.devices.clone())))
            }
        })
    }
}

// ==============================================================================
// update sink / subscription
// ==============================================================================

/// sending half handed to a push source
#[derive(Clone, Debug)]
pub struct UpdateSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<SourceResult>>>>,
}

impl UpdateSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SourceResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Arc::new(Mutex::new(Some(tx))) }, rx)
    }

    /// false once the subscription is torn down or the receiver is gone
    pub fn deliver(&self, update: SourceResult) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(update).is_ok(),
            None => false,
        }
    }

    /// no further deliveries, from any clone of this sink
    pub fn close(&self) {
        let mut guard = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }
}

/// live push subscription; dropping it tears it down
#[derive(Debug)]
pub struct Subscription {
    sink: UpdateSink,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(sink: UpdateSink, task: JoinHandle<()>) -> Self {
        Self { sink, task }
    }

    pub fn unsubscribe(self) {}

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.sink.close();
        self.task.abort();
    }
}

// ==============================================================================
// keyed node decoding (shared by push stores)
// ==============================================================================

/// decode a `devices` node: object keyed by id, or an array whose
/// indices are the ids (how the store returns numeric keys)
pub fn decode_device_node(node: &Value) -> SourceResult {
    match node {
        Value::Null => Ok(ReadingSet::new()),
        Value::Object(devices) => Ok(devices
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(id, v)| SensorReading::from_value(id.as_str(), v))
            .collect()),
        Value::Array(devices) => Ok(devices
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(idx, v)| SensorReading::from_value(idx.to_string(), v))
            .collect()),
        other => Err(SourceError::Decode(format!(
            "expected an object of devices, got {}",
            json_kind(other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use axum::Router;

    /// serve `router` on an ephemeral localhost port, returning its base url
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// a base url nothing is listening on
    pub async fn dead_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }
}

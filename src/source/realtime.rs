//! ==============================================================================
//! source/realtime.rs - live subscription to a hosted realtime database
//! ==============================================================================
//!
//! purpose:
//!     subscribes to the `devices` node of a firebase-style realtime database
//!     through its rest streaming protocol and pushes a full snapshot to the
//!     presenter after every change.
//!
//! protocol:
//!     GET {database_url}/{node}.json with `Accept: text/event-stream`.
//!     the server answers with server-sent events:
//!
//! ```text
//!         event: put                    event: patch
//!         data: {"path": "/", "data": {...}}   data: {"path": "/n1", "data": {"rssi": -70}}
//!
//!     `put` replaces the value at `path` (null deletes), `patch` merges the
//!     children of `data` under `path`. `keep-alive` carries nothing.
//!     `cancel` and `auth_revoked` end the stream.
//!
//!     we keep a local mirror of the node, apply each event to it, and decode
//!     the whole mirror into a fresh ReadingSet. a closed stream is delivered
//!     as `SourceError::Unavailable` and then the sink is closed; the next
//!     manual refresh opens a new stream. a line or event larger than
//!     MAX_PENDING_BYTES ends the stream the same way.
//! ```
//!
//! write path:
//!     `set(id, payload)` issues PUT {database_url}/{node}/{id}.json, which is
//!     how devices (or a seeding script) publish readings. the id is a single
//!     percent-encoded path segment.
//!
//! ==============================================================================

use super::{decode_device_node, PushSource, Subscription, UpdateSink};
use crate::domain::DevicePayload;
use crate::error::SourceError;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// upper bound on an unterminated line plus the data of the event being built
pub const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

pub struct RealtimeStore {
    /// bounded by the request timeout, used for writes
    client: reqwest::Client,
    /// connect timeout only; the event stream stays open indefinitely
    stream_client: reqwest::Client,
    database_url: String,
    node: String,
}

impl RealtimeStore {
    pub fn new(database_url: &str, node: &str, timeout: Duration) -> Result<Self, SourceError> {
        let build_err = |e: reqwest::Error| SourceError::Unavailable(format!("failed to build http client: {}", e));
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(build_err)?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(build_err)?;

        Ok(Self {
            client,
            stream_client,
            database_url: database_url.trim_end_matches('/').to_string(),
            node: node.trim_matches('/').to_string(),
        })
    }

    pub fn node_url(&self) -> String {
        format!("{}/{}.json", self.database_url, self.node)
    }

    fn device_url(&self, id: &str) -> Result<reqwest::Url, SourceError> {
        let bad_url = |reason: String| SourceError::Unavailable(format!("bad database url {}: {}", self.database_url, reason));
        let mut url = reqwest::Url::parse(&self.database_url).map_err(|e| bad_url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| bad_url("cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(self.node.split('/').filter(|s| !s.is_empty()))
            .push(&format!("{}.json", id));
        Ok(url)
    }

    /// publish one device's reading
    pub async fn set(&self, id: &str, payload: &DevicePayload) -> Result<(), SourceError> {
        let url = self.device_url(id)?;
        let response = self.client.put(url.clone()).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("PUT {} returned {}", url, status)));
        }
        tracing::debug!(device = id, "wrote device payload");
        Ok(())
    }
}

impl PushSource for RealtimeStore {
    fn subscribe(&self, sink: UpdateSink) -> Subscription {
        let client = self.stream_client.clone();
        let url = self.node_url();
        let task_sink = sink.clone();

        let task = tokio::spawn(async move {
            tracing::info!(url = %url, "subscribing to realtime store");
            if let Err(e) = stream_node(&client, &url, &task_sink).await {
                tracing::warn!(error = %e, "realtime subscription ended");
                task_sink.deliver(Err(e));
            }
            task_sink.close();
        });

        Subscription::new(sink, task)
    }

    fn name(&self) -> &str {
        "realtime"
    }
}

/// returns Ok only when the sink was closed from our side
async fn stream_node(client: &reqwest::Client, url: &str, sink: &UpdateSink) -> Result<(), SourceError> {
    let mut response = client.get(url).header(ACCEPT, "text/event-stream").send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Unavailable(format!("GET {} returned {}", url, status)));
    }

    let mut parser = EventParser::default();
    let mut mirror = NodeMirror::default();

    while let Some(chunk) = response.chunk().await? {
        for event in parser.feed(&chunk)? {
            let delivered = match mirror.apply(&event) {
                Applied::Changed => sink.deliver(decode_device_node(mirror.value())),
                Applied::Unchanged => continue,
                Applied::Malformed(reason) => sink.deliver(Err(SourceError::Decode(reason))),
                Applied::Closed(reason) => return Err(SourceError::Unavailable(reason)),
            };
            if !delivered {
                return Ok(());
            }
        }
    }

    Err(SourceError::Unavailable("event stream closed".to_string()))
}

// ==============================================================================
// server-sent events parser
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: String,
    pub data: String,
}

/// incremental text/event-stream parser; chunks may split lines anywhere
#[derive(Debug)]
pub struct EventParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl EventParser {
    pub fn with_limit(limit: usize) -> Self {
        Self { buffer: Vec::new(), event: None, data: Vec::new(), data_len: 0, limit }
    }

    /// errors once the pending line or event outgrows the limit
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, SourceError> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(|c| c == '\n' || c == '\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => {
                    self.data_len += value.len();
                    self.data.push(value.to_string());
                }
                _ => {}
            }
            if self.data_len > self.limit {
                return Err(self.overflow("event data"));
            }
        }

        if self.buffer.len() > self.limit {
            return Err(self.overflow("unterminated line"));
        }
        Ok(events)
    }

    fn overflow(&mut self, what: &str) -> SourceError {
        *self = Self::with_limit(self.limit);
        SourceError::Unavailable(format!("{} exceeds {} bytes", what, self.limit))
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        self.data_len = 0;
        Some(StreamEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

// ==============================================================================
// node mirror
// ==============================================================================

#[derive(Debug, PartialEq)]
pub enum Applied {
    Changed,
    Unchanged,
    Malformed(String),
    Closed(String),
}

#[derive(Deserialize)]
struct PathUpdate {
    path: String,
    data: Value,
}

/// local copy of the subscribed node
#[derive(Debug, Default)]
pub struct NodeMirror {
    root: Value,
}

impl NodeMirror {
    pub fn value(&self) -> &Value {
        &self.root
    }

    pub fn apply(&mut self, event: &StreamEvent) -> Applied {
        match event.event.as_str() {
            "put" | "patch" => {}
            "keep-alive" => return Applied::Unchanged,
            "cancel" => return Applied::Closed(format!("subscription cancelled by store: {}", event.data)),
            "auth_revoked" => return Applied::Closed("store credential revoked".to_string()),
            other => {
                tracing::debug!(event = other, "ignoring unknown stream event");
                return Applied::Unchanged;
            }
        }

        let update: PathUpdate = match serde_json::from_str(&event.data) {
            Ok(update) => update,
            Err(e) => return Applied::Malformed(format!("bad {} payload: {}", event.event, e)),
        };
        let segments: Vec<&str> = update.path.split('/').filter(|s| !s.is_empty()).collect();

        if event.event == "put" {
            set_at(&mut self.root, &segments, update.data);
            return Applied::Changed;
        }

        let Value::Object(children) = update.data else {
            return Applied::Malformed("patch data must be an object".to_string());
        };
        // multi-path updates send keys like "n1/rssi"
        for (key, value) in children {
            let mut path = segments.clone();
            path.extend(key.split('/').filter(|s| !s.is_empty()));
            set_at(&mut self.root, &path, value);
        }
        Applied::Changed
    }
}

/// write `value` at `segments`; null removes the key and prunes empty parents
fn set_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if node.is_array() {
        let items = match std::mem::take(node) {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        let indexed: Map<String, Value> = items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(idx, v)| (idx.to_string(), v))
            .collect();
        *node = Value::Object(indexed);
    }
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = &mut *node else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*first);
        } else {
            map.insert(first.to_string(), value);
        }
    } else {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        set_at(child, rest, value);
        let prune = child.is_null() || child.as_object().is_some_and(|m| m.is_empty());
        if prune {
            map.remove(*first);
        }
    }

    if map.is_empty() {
        *node = Value::Null;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testutil::serve;
    use axum::{
        extract::{Path, State},
        http::header,
        routing::{get, put},
        Json, Router,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn event(name: &str, data: Value) -> StreamEvent {
        StreamEvent { event: name.to_string(), data: data.to_string() }
    }

    #[test]
    fn parser_handles_split_chunks_and_crlf() {
        let mut parser = EventParser::default();
        assert!(parser.feed(b"event: pu").unwrap().is_empty());
        assert!(parser.feed(b"t\r\ndata: {\"path\":\"/\",").unwrap().is_empty());
        let events = parser
            .feed(b"\"data\":null}\r\n\r\n: comment\n\nevent: keep-alive\ndata: null\n\n")
            .unwrap();

        assert_eq!(
            events,
            vec![
                StreamEvent { event: "put".into(), data: r#"{"path":"/","data":null}"#.into() },
                StreamEvent { event: "keep-alive".into(), data: "null".into() },
            ]
        );
    }

    #[test]
    fn parser_joins_multiline_data() {
        let mut parser = EventParser::default();
        let events = parser.feed(b"data: a\ndata: b\n\n").unwrap();
        assert_eq!(events, vec![StreamEvent { event: "message".into(), data: "a\nb".into() }]);
    }

    #[test]
    fn parser_refuses_oversized_lines_and_events() {
        let mut parser = EventParser::with_limit(16);
        assert!(parser.feed(b"data: 0123456789").unwrap().is_empty());
        assert!(matches!(parser.feed(b"abcdefgh"), Err(SourceError::Unavailable(_))));

        // state is reset after the error
        let events = parser.feed(b"data: ok\n\n").unwrap();
        assert_eq!(events, vec![StreamEvent { event: "message".into(), data: "ok".into() }]);

        // short lines, but too much data before the blank line
        let mut parser = EventParser::with_limit(16);
        assert!(parser.feed(b"data: 0123456789\n").unwrap().is_empty());
        assert!(parser.feed(b"data: 0123456789\n").is_err());

        // the per-event count starts over after each dispatch
        let mut parser = EventParser::with_limit(16);
        let events = parser.feed(b"data: 0123456789\n\ndata: 0123456789\n\n").unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn device_ids_are_single_path_segments() {
        let store = RealtimeStore::new("http://localhost:9000/db/", "/devices/", Duration::from_secs(5)).unwrap();
        assert_eq!(store.device_url("node-1").unwrap().as_str(), "http://localhost:9000/db/devices/node-1.json");
        assert_eq!(
            store.device_url("a/b#c?d").unwrap().as_str(),
            "http://localhost:9000/db/devices/a%2Fb%23c%3Fd.json"
        );

        let store = RealtimeStore::new("not a url", "devices", Duration::from_secs(5)).unwrap();
        assert!(matches!(store.device_url("n1"), Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn mirror_applies_put_and_patch() {
        let mut mirror = NodeMirror::default();
        let initial = json!({"path": "/", "data": {"n1": {"temperature": 20, "rssi": -60}}});
        assert_eq!(mirror.apply(&event("put", initial)), Applied::Changed);

        let patch = json!({"path": "/n1", "data": {"rssi": -95, "humidity": 40}});
        assert_eq!(mirror.apply(&event("patch", patch)), Applied::Changed);

        let add = json!({"path": "/n2", "data": {"temperature": 25}});
        mirror.apply(&event("put", add));

        assert_eq!(
            mirror.value(),
            &json!({
                "n1": {"temperature": 20, "rssi": -95, "humidity": 40},
                "n2": {"temperature": 25}
            })
        );
    }

    #[test]
    fn mirror_patch_keys_are_paths() {
        let mut mirror = NodeMirror::default();
        mirror.apply(&event("put", json!({"path": "/", "data": {"n1": {"rssi": -60}, "n2": {"rssi": -61}}})));
        let patch = json!({"path": "/", "data": {"n1/rssi": -95, "n2/humidity": 40, "n3/temperature": 18}});
        assert_eq!(mirror.apply(&event("patch", patch)), Applied::Changed);

        assert_eq!(
            mirror.value(),
            &json!({
                "n1": {"rssi": -95},
                "n2": {"rssi": -61, "humidity": 40},
                "n3": {"temperature": 18}
            })
        );
        let set = decode_device_node(mirror.value()).unwrap();
        let ids: Vec<&str> = set.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["n1", "n2", "n3"]);

        mirror.apply(&event("patch", json!({"path": "/n2", "data": {"humidity": null}})));
        mirror.apply(&event("patch", json!({"path": "/", "data": {"n3/temperature": null}})));
        assert_eq!(mirror.value(), &json!({"n1": {"rssi": -95}, "n2": {"rssi": -61}}));
    }

    #[test]
    fn mirror_null_put_deletes_and_prunes() {
        let mut mirror = NodeMirror::default();
        mirror.apply(&event("put", json!({"path": "/", "data": {"n1": {"temperature": 20}, "n2": {"humidity": 1}}})));
        mirror.apply(&event("put", json!({"path": "/n1/temperature", "data": null})));
        assert_eq!(mirror.value(), &json!({"n2": {"humidity": 1}}));

        mirror.apply(&event("put", json!({"path": "/n2", "data": null})));
        assert_eq!(mirror.value(), &Value::Null);
    }

    #[test]
    fn mirror_upgrades_array_nodes() {
        let mut mirror = NodeMirror::default();
        mirror.apply(&event("put", json!({"path": "/", "data": [null, {"temperature": 20}]})));
        mirror.apply(&event("put", json!({"path": "/2", "data": {"temperature": 21}})));
        assert_eq!(mirror.value(), &json!({"1": {"temperature": 20}, "2": {"temperature": 21}}));
    }

    #[test]
    fn mirror_control_events() {
        let mut mirror = NodeMirror::default();
        assert_eq!(mirror.apply(&event("keep-alive", Value::Null)), Applied::Unchanged);
        assert!(matches!(mirror.apply(&event("cancel", json!("permission denied"))), Applied::Closed(_)));
        assert!(matches!(mirror.apply(&event("auth_revoked", Value::Null)), Applied::Closed(_)));
        let bad = StreamEvent { event: "put".into(), data: "{not json".into() };
        assert!(matches!(mirror.apply(&bad), Applied::Malformed(_)));
    }

    const STREAM: &str = "event: put\n\
data: {\"path\":\"/\",\"data\":{\"n1\":{\"temperature\":21.5,\"humidity\":55,\"rssi\":-65}}}\n\n\
event: keep-alive\n\
data: null\n\n\
event: patch\n\
data: {\"path\":\"/\",\"data\":{\"n2\":{\"temperature\":19.0,\"rssi\":-91}}}\n\n";

    #[tokio::test]
    async fn subscription_delivers_snapshots_then_closes() {
        let router = Router::new().route(
            "/devices.json",
            get(|| async { ([(header::CONTENT_TYPE, "text/event-stream")], STREAM) }),
        );
        let base = serve(router).await;
        let store = RealtimeStore::new(&base, "devices", Duration::from_secs(5)).unwrap();

        let (sink, mut rx) = UpdateSink::channel();
        let _subscription = store.subscribe(sink);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.get("n1").and_then(|r| r.temperature), Some(21.5));

        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second.get("n2").and_then(|r| r.rssi), Some(-91.0));

        let closed = rx.recv().await.unwrap();
        assert!(matches!(closed, Err(SourceError::Unavailable(_))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn set_puts_device_payload() {
        let written: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let router = Router::new()
            .route(
                "/devices/:file",
                put(
                    |State(log): State<Arc<Mutex<Vec<(String, Value)>>>>,
                     Path(file): Path<String>,
                     Json(body): Json<Value>| async move {
                        log.lock().unwrap().push((file, body.clone()));
                        Json(body)
                    },
                ),
            )
            .with_state(written.clone());
        let base = serve(router).await;
        let store = RealtimeStore::new(&format!("{}/", base), "/devices/", Duration::from_secs(5)).unwrap();

        let payload = DevicePayload {
            temperature: 21.5,
            humidity: 55.0,
            pressure: Some(1013.2),
            rssi: -65,
            uptime: Some(3661),
            timestamp: 1_700_000_000,
        };
        store.set("node-1", &payload).await.unwrap();

        let log = written.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "node-1.json");
        assert_eq!(log[0].1["uptime"], json!(3661));
    }
}

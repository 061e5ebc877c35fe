//! in-process keyed store with the same write path and push semantics as
//! the realtime store. used for seeding demos and driving tests.
//!
//! subscribers always receive the latest node; writes that land faster than
//! a subscriber drains are coalesced into one snapshot.

use super::{decode_device_node, PushSource, Subscription, UpdateSink};
use crate::domain::{DevicePayload, ReadingSet};

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct MemoryStore {
    node: Arc<watch::Sender<Map<String, Value>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Map::new());
        Self { node: Arc::new(tx) }
    }

    pub fn set(&self, id: &str, payload: &DevicePayload) {
        self.set_raw(id, payload.to_value());
    }

    /// write an arbitrary value under `id`, malformed payloads included
    pub fn set_raw(&self, id: &str, value: Value) {
        self.node.send_modify(|node| {
            node.insert(id.to_string(), value);
        });
    }

    pub fn remove(&self, id: &str) {
        self.node.send_modify(|node| {
            node.remove(id);
        });
    }

    pub fn clear(&self) {
        self.node.send_replace(Map::new());
    }

    pub fn snapshot(&self) -> ReadingSet {
        let node = Value::Object(self.node.borrow().clone());
        // an object node always decodes
        decode_device_node(&node).unwrap_or_default()
    }
}

impl PushSource for MemoryStore {
    fn subscribe(&self, sink: UpdateSink) -> Subscription {
        let mut rx = self.node.subscribe();
        let task_sink = sink.clone();

        let task = tokio::spawn(async move {
            loop {
                let node = Value::Object(rx.borrow_and_update().clone());
                if !task_sink.deliver(decode_device_node(&node)) {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
            task_sink.close();
        });

        Subscription::new(sink, task)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

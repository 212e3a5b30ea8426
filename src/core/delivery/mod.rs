mod http;

pub use http::{BatchStream, TelemetryApi};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logging::EventSender;

/// How a payload is applied to the remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Shallow property merge.
    Patch,
    /// RFC 6902 operations.
    JsonPatch,
    /// Full replacement.
    Post,
}

impl UpdateType {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateType::Patch => "patch",
            UpdateType::JsonPatch => "json_patch",
            UpdateType::Post => "post",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub server_url: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("server_url", &self.server_url)
            .finish()
    }
}

/// A dashboard object identified by its tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub tag: String,
    pub data: Value,
}

impl Flow {
    pub fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }
}

/// Updates of one type, keyed by tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub update_type: UpdateType,
    pub entries: Map<String, Value>,
}

impl Batch {
    pub fn new(update_type: UpdateType) -> Self {
        Self {
            update_type,
            entries: Map::new(),
        }
    }

    pub fn single(tag: impl Into<String>, data: Value, update_type: UpdateType) -> Self {
        let mut batch = Self::new(update_type);
        batch.entries.insert(tag.into(), data);
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Updates waiting for the next flush.
///
/// Merges for one tag combine key by key, replacements overwrite, and
/// JSON-Patch operations accumulate in order.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    batches: BTreeMap<UpdateType, Map<String, Value>>,
}

impl PendingUpdates {
    pub fn push(&mut self, tag: &str, data: Value, update_type: UpdateType) {
        let entries = self.batches.entry(update_type).or_default();
        let unmerged = match (update_type, entries.get_mut(tag), data) {
            (UpdateType::Patch, Some(Value::Object(existing)), Value::Object(incoming)) => {
                existing.extend(incoming);
                None
            }
            (UpdateType::JsonPatch, Some(Value::Array(existing)), Value::Array(incoming)) => {
                existing.extend(incoming);
                None
            }
            (_, _, data) => Some(data),
        };
        if let Some(data) = unmerged {
            entries.insert(tag.to_string(), data);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batches.values().all(Map::is_empty)
    }

    pub fn drain(&mut self) -> Vec<Batch> {
        std::mem::take(&mut self.batches)
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(update_type, entries)| Batch {
                update_type,
                entries,
            })
            .collect()
    }
}

/// Outbound queue shared by every job of one account.
#[async_trait]
pub trait DeliveryStream: Send + Sync {
    fn send_data(&self, tag: &str, data: Value, update_type: UpdateType);

    fn send_flow(&self, flow: Flow) {
        self.send_data(&flow.tag, flow.data, UpdateType::Post);
    }

    /// Publishes everything queued so far.
    async fn flush(&self) -> Result<()>;
}

/// Factory for credentials and streams, plus direct publishing.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn credentials(&self, api_key: &str, server_url: &str) -> Result<Credentials>;

    fn open_stream(
        &self,
        credentials: &Credentials,
        interval: Duration,
        events: EventSender,
    ) -> Result<Arc<dyn DeliveryStream>>;

    async fn publish(&self, credentials: &Credentials, batch: Batch) -> Result<()>;
}

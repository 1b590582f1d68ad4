//! The data model shared by every layer of the pipeline: a decoded log
//! record and the opaque key that multiplexes streams.

use base::FastHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, Result};

/// A decoded log record: a millisecond epoch timestamp, a free-form map of
/// user key-value pairs, and an optional map of auto-generated ones (e.g. a
/// source file path). Immutable after decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub fields: FastHashMap<String, serde_json::Value>,
    pub auto_fields: Option<FastHashMap<String, serde_json::Value>>,
}

impl LogEvent {
    pub fn new(timestamp_ms: i64, fields: FastHashMap<String, serde_json::Value>) -> Self {
        LogEvent {
            timestamp_ms,
            fields,
            auto_fields: None,
        }
    }

    /// Looks up a top-level field, the way the single-key extraction option
    /// (§6 `single_key`) does.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// The opaque, non-empty string identifying a logical stream, supplied per
/// flush by the host collector. Unique per logical stream for the lifetime
/// of the process.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct StreamKey(Arc<str>);

impl StreamKey {
    pub fn new(tag: impl Into<Arc<str>>) -> Result<Self> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(CoreError::DecodeError("stream key must not be empty".into()));
        }
        Ok(StreamKey(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

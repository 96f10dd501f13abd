//! Event records and field values
//!
//! An [`EventRecord`] is the unit of telemetry that flows through the agent:
//! produced by application code, buffered in a queue, and eventually shipped
//! to the remote collector as part of an upload batch.
//!
//! Fields are a closed set of scalar variants rather than arbitrary JSON so
//! that snapshots round-trip losslessly and content hashes are stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Maximum number of custom fields a single event may carry.
pub const MAX_FIELDS: usize = 64;

/// A single event field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

/// Geographic fix attached to an event by the location collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A structured telemetry event.
///
/// Immutable once it has passed validation; the coordinator backfills
/// `user_id` from the process-wide identity before the record reaches a
/// queue, and the optional location augmentation sets `location`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name (e.g. "screen_view", "purchase")
    pub name: String,

    /// Identity of the user this event belongs to.
    ///
    /// May be empty on construction; the coordinator rejects the event if it
    /// cannot be backfilled from the process-wide identity.
    #[serde(default)]
    pub user_id: String,

    /// When the producer recorded the event
    pub recorded_at: DateTime<Utc>,

    /// Custom fields, ordered by key
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,

    /// Optional geolocation metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl EventRecord {
    /// Create a new event with the given name, stamped now.
    pub fn new(name: impl Into<String>) -> Self {
        EventRecord {
            name: name.into(),
            user_id: String::new(),
            recorded_at: Utc::now(),
            fields: BTreeMap::new(),
            location: None,
        }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Builder-style user identity.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Content sanity check applied before an event may be enqueued.
    ///
    /// Identity presence is checked separately by the coordinator, after
    /// backfill from the process-wide identity.
    pub fn sanity_check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("event name must not be empty".to_string()));
        }
        if self.fields.len() > MAX_FIELDS {
            return Err(Error::Validation(format!(
                "event carries {} fields, maximum is {}",
                self.fields.len(),
                MAX_FIELDS
            )));
        }
        if self.fields.keys().any(|k| k.trim().is_empty()) {
            return Err(Error::Validation("field keys must not be empty".to_string()));
        }
        Ok(())
    }

    /// Content-based hash used for adjacent-duplicate detection.
    ///
    /// Returns a 32-character hex digest of SHA-256 over the event name and
    /// its fields. Timestamps and identity are deliberately excluded so that
    /// "the same event recorded twice in a row" hashes equal.
    pub fn content_hash(&self) -> String {
        let fields = serde_json::to_string(&self.fields).unwrap_or_default();
        let hash_input = format!("{}:{}", self.name, fields);

        let mut hasher = Sha256::new();
        hasher.update(hash_input.as_bytes());
        let result = hasher.finalize();

        // Take first 16 bytes (32 hex chars)
        hex::encode(&result[..16])
    }
}

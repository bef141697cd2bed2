//! Canonical record types for the panel's resource collections.
//!
//! The panel backend has gone through several drafts and its list endpoints
//! disagree on field names (`userid` vs `client_id`, `members` vs `clients`,
//! `session_status` vs `session`). Every record type here deserializes from
//! a loose wire shape and is normalized into a single canonical type at the
//! remote boundary. Canonical types serialize in one shape only, which is
//! also the shape of the local fallback snapshot.

pub mod client;
pub mod copy_setup;
pub mod group;
pub mod report;

pub use client::{Broker, Client};
pub use copy_setup::CopySetup;
pub use group::Group;
pub use report::{AccountSummary, Holding, Order, Position};

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::validate::ValidationError;

/// Which collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Clients,
    Groups,
    CopySetups,
    Orders,
    Positions,
    Holdings,
    Summary,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Clients => "clients",
            ResourceKind::Groups => "groups",
            ResourceKind::CopySetups => "copy_setups",
            ResourceKind::Orders => "orders",
            ResourceKind::Positions => "positions",
            ResourceKind::Holdings => "holdings",
            ResourceKind::Summary => "summary",
        }
    }

    /// Field that wraps the array in `{ <field>: [...] }` list responses.
    pub fn collection_field(&self) -> &'static str {
        match self {
            ResourceKind::Clients => "clients",
            ResourceKind::Groups => "groups",
            ResourceKind::CopySetups => "setups",
            ResourceKind::Orders => "orders",
            ResourceKind::Positions => "positions",
            ResourceKind::Holdings => "holdings",
            ResourceKind::Summary => "summary",
        }
    }

    /// Local storage key of the fallback snapshot.
    pub fn cache_key(&self) -> String {
        format!("fallback_{}", self.as_str())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one record within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Broker login session state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum SessionStatus {
    Active,
    Pending,
    Failed,
    #[default]
    Unknown,
}

impl SessionStatus {
    /// Lenient parse. Also understands the `"Logged in"` / `"Logged out"`
    /// strings some backend drafts return.
    pub fn parse_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "logged in" | "logged_in" => SessionStatus::Active,
            "pending" | "logging in" => SessionStatus::Pending,
            "failed" | "error" => SessionStatus::Failed,
            _ => SessionStatus::Unknown,
        }
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        SessionStatus::parse_loose(&s)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::Pending => write!(f, "PENDING"),
            SessionStatus::Failed => write!(f, "FAILED"),
            SessionStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A record type stored in a remote collection and mirrored in the
/// fallback cache.
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Loose shape accepted from list endpoints.
    type Wire: DeserializeOwned;

    /// Normalize a wire record. `None` drops records missing their identity.
    fn from_wire(wire: Self::Wire) -> Option<Self>;

    fn key(&self) -> RecordKey;

    /// Identifier the backend knows the record by, for write bodies that
    /// reference records by id.
    fn remote_id(key: &RecordKey) -> String {
        key.as_str().to_string()
    }

    /// Fill in whatever a bucketed listing (`{"dhan": [...]}`) implies about
    /// a raw record before it is decoded. `bucket` is the field name.
    fn adopt_bucket(_item: &mut serde_json::Map<String, serde_json::Value>, _bucket: &str) {}

    fn validate(&self) -> Result<(), ValidationError>;

    /// Numeric id used when minting ids for records created offline.
    /// Records without an id field return `None`.
    fn numeric_id(&self) -> Option<u64> {
        None
    }

    /// Whether the record has no id yet and can take a locally minted one.
    fn needs_id(&self) -> bool {
        false
    }

    fn assign_id(&mut self, _id: u64) {}
}

/// Records whose backend side effect (a broker login) is confirmed by
/// polling until the session status flips.
pub trait Activatable: Resource {
    fn session_status(&self) -> SessionStatus;
}

/// Drop duplicate keys, keeping the position of the first occurrence and the
/// value of the last.
pub fn dedupe_by_key<R: Resource>(records: Vec<R>) -> Vec<R> {
    let mut index: HashMap<RecordKey, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<R> = Vec::with_capacity(records.len());
    for record in records {
        let key = record.key();
        match index.get(&key) {
            Some(&i) => out[i] = record,
            None => {
                index.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

// ─── wire helpers ───────────────────────────────────────────────────────────

/// Render a JSON scalar as a trimmed, non-empty string.
pub(crate) fn value_to_string(v: &serde_json::Value) -> Option<String> {
    let s = match v {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Decode a number or numeric string from its exact text. Empty strings and
/// nulls are `None`.
pub(crate) fn value_to_decimal(v: &serde_json::Value) -> Option<Decimal> {
    let text = match v {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Collect a JSON array of scalars into strings, skipping empties.
pub(crate) fn value_to_strings(v: &serde_json::Value) -> Vec<String> {
    v.as_array()
        .map(|arr| arr.iter().filter_map(value_to_string).collect())
        .unwrap_or_default()
}

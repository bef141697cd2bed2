use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{value_to_decimal, value_to_string, Activatable, RecordKey, Resource, ResourceKind, SessionStatus};
use crate::validate::{self, ValidationError};

/// Credential fields some drafts send at the top level instead of under `creds`.
const CREDENTIAL_FIELDS: [&str; 5] = ["access_token", "apikey", "password", "pan", "totpkey"];

/// Brokerage a client account lives at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Broker {
    Dhan,
    Motilal,
    Other(String),
}

impl Broker {
    pub fn as_str(&self) -> &str {
        match self {
            Broker::Dhan => "dhan",
            Broker::Motilal => "motilal",
            Broker::Other(s) => s,
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Broker::Dhan
    }
}

impl From<String> for Broker {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "dhan" => Broker::Dhan,
            "motilal" => Broker::Motilal,
            other => Broker::Other(other.to_string()),
        }
    }
}

impl From<Broker> for String {
    fn from(b: Broker) -> Self {
        b.as_str().to_string()
    }
}

impl std::fmt::Display for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broker account managed by the panel user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    #[serde(default)]
    pub broker: Broker,
    pub userid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capital: Option<Decimal>,
    /// Opaque broker credentials. Never inspected beyond presence checks.
    #[serde(default)]
    pub creds: BTreeMap<String, String>,
    #[serde(default)]
    pub session_status: SessionStatus,
}

impl Client {
    pub fn new(broker: Broker, userid: impl Into<String>) -> Self {
        Self {
            broker,
            userid: userid.into(),
            display_name: None,
            capital: None,
            creds: BTreeMap::new(),
            session_status: SessionStatus::Unknown,
        }
    }

    pub fn with_credential(mut self, field: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.creds.insert(field.to_string(), value);
        }
        self
    }

    pub fn credential(&self, field: &str) -> Option<&str> {
        self.creds
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Composite key `broker::userid`, e.g. `dhan::U1`.
    pub fn key_for(broker: &Broker, userid: &str) -> RecordKey {
        RecordKey::new(format!("{}::{}", broker, userid))
    }
}

/// Client record as returned by any backend draft.
#[derive(Debug, Deserialize)]
pub struct ClientWire {
    #[serde(default)]
    broker: Option<String>,
    #[serde(default)]
    userid: Option<serde_json::Value>,
    #[serde(default)]
    client_id: Option<serde_json::Value>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    capital: Option<serde_json::Value>,
    #[serde(default)]
    creds: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    session_status: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    session_active: Option<bool>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl Resource for Client {
    const KIND: ResourceKind = ResourceKind::Clients;
    type Wire = ClientWire;

    fn from_wire(wire: ClientWire) -> Option<Self> {
        let userid = wire
            .userid
            .as_ref()
            .and_then(value_to_string)
            .or_else(|| wire.client_id.as_ref().and_then(value_to_string))?;

        let mut creds = BTreeMap::new();
        if let Some(map) = &wire.creds {
            for (k, v) in map {
                if let Some(s) = value_to_string(v) {
                    creds.insert(k.clone(), s);
                }
            }
        }
        for field in CREDENTIAL_FIELDS {
            if creds.contains_key(field) {
                continue;
            }
            if let Some(s) = wire.rest.get(field).and_then(value_to_string) {
                creds.insert(field.to_string(), s);
            }
        }

        let session_status = match (&wire.session_status, &wire.session, wire.session_active) {
            (Some(s), _, _) => SessionStatus::parse_loose(s),
            (None, Some(s), _) => SessionStatus::parse_loose(s),
            (None, None, Some(true)) => SessionStatus::Active,
            _ => SessionStatus::Unknown,
        };

        Some(Client {
            broker: wire.broker.map(Broker::from).unwrap_or_default(),
            userid,
            display_name: wire
                .display_name
                .or(wire.name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            capital: wire.capital.as_ref().and_then(value_to_decimal),
            creds,
            session_status,
        })
    }

    fn key(&self) -> RecordKey {
        Client::key_for(&self.broker, &self.userid)
    }

    /// The backend addresses clients by bare user id.
    fn remote_id(key: &RecordKey) -> String {
        match key.as_str().split_once("::") {
            Some((_, userid)) => userid.to_string(),
            None => key.as_str().to_string(),
        }
    }

    fn adopt_bucket(item: &mut serde_json::Map<String, serde_json::Value>, bucket: &str) {
        let has_broker = item
            .get("broker")
            .and_then(value_to_string)
            .is_some();
        if !has_broker {
            item.insert("broker".to_string(), serde_json::Value::String(bucket.to_string()));
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate::client(self)
    }
}

impl Activatable for Client {
    fn session_status(&self) -> SessionStatus {
        self.session_status
    }
}

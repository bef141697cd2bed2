use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{value_to_decimal, value_to_string, value_to_strings, RecordKey, Resource, ResourceKind};
use crate::validate::{self, ValidationError};

/// A named set of clients that trade together with a quantity multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub multiplier: Decimal,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>, multiplier: Decimal, members: Vec<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            multiplier,
            members,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupWire {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    group_name: Option<String>,
    #[serde(default)]
    multiplier: Option<serde_json::Value>,
    #[serde(default)]
    members: Option<serde_json::Value>,
    #[serde(default)]
    clients: Option<serde_json::Value>,
    #[serde(default)]
    client_names: Option<serde_json::Value>,
}

impl Resource for Group {
    const KIND: ResourceKind = ResourceKind::Groups;
    type Wire = GroupWire;

    fn from_wire(wire: GroupWire) -> Option<Self> {
        let id = wire.id.as_ref().and_then(value_to_string);
        let name = wire
            .name
            .or(wire.group_name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if id.is_none() && name.is_none() {
            return None;
        }

        let members = [&wire.members, &wire.clients, &wire.client_names]
            .into_iter()
            .flatten()
            .map(value_to_strings)
            .find(|m| !m.is_empty())
            .unwrap_or_default();

        Some(Group {
            name: name.unwrap_or_else(|| id.clone().unwrap_or_default()),
            id,
            multiplier: wire
                .multiplier
                .as_ref()
                .and_then(value_to_decimal)
                .unwrap_or(Decimal::ONE),
            members,
        })
    }

    /// Server id when known, otherwise the group name.
    fn key(&self) -> RecordKey {
        match &self.id {
            Some(id) => RecordKey::new(id.clone()),
            None => RecordKey::new(self.name.clone()),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate::group(self)
    }

    fn numeric_id(&self) -> Option<u64> {
        self.id.as_deref().and_then(|id| id.parse().ok())
    }

    fn needs_id(&self) -> bool {
        self.id.is_none()
    }

    fn assign_id(&mut self, id: u64) {
        self.id = Some(id.to_string());
    }
}

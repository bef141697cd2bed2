use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{value_to_decimal, value_to_string, value_to_strings, RecordKey, Resource, ResourceKind};
use crate::validate::{self, ValidationError};

/// Copy-trading setup: orders on `master` are mirrored to every child,
/// scaled by the child's multiplier (1 when absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopySetup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_id: Option<String>,
    pub name: String,
    pub master: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub multipliers: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub enabled: bool,
}

impl CopySetup {
    pub fn new(name: impl Into<String>, master: impl Into<String>, children: Vec<String>) -> Self {
        Self {
            setup_id: None,
            name: name.into(),
            master: master.into(),
            children,
            multipliers: BTreeMap::new(),
            enabled: false,
        }
    }

    pub fn multiplier_for(&self, child: &str) -> Decimal {
        self.multipliers.get(child).copied().unwrap_or(Decimal::ONE)
    }
}

#[derive(Debug, Deserialize)]
pub struct CopySetupWire {
    #[serde(default)]
    setup_id: Option<serde_json::Value>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    setup_name: Option<String>,
    #[serde(default)]
    master: Option<serde_json::Value>,
    #[serde(default)]
    children: Option<serde_json::Value>,
    #[serde(default)]
    members: Option<serde_json::Value>,
    #[serde(default)]
    multipliers: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    enabled: Option<bool>,
}

impl Resource for CopySetup {
    const KIND: ResourceKind = ResourceKind::CopySetups;
    type Wire = CopySetupWire;

    fn from_wire(wire: CopySetupWire) -> Option<Self> {
        let setup_id = wire
            .setup_id
            .as_ref()
            .or(wire.id.as_ref())
            .and_then(value_to_string);
        let name = wire
            .name
            .or(wire.setup_name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if setup_id.is_none() && name.is_none() {
            return None;
        }

        let children = [&wire.children, &wire.members]
            .into_iter()
            .flatten()
            .map(value_to_strings)
            .find(|c| !c.is_empty())
            .unwrap_or_default();

        let multipliers = wire
            .multipliers
            .unwrap_or_default()
            .iter()
            .filter_map(|(k, v)| value_to_decimal(v).map(|d| (k.clone(), d)))
            .collect();

        Some(CopySetup {
            name: name.unwrap_or_else(|| setup_id.clone().unwrap_or_default()),
            setup_id,
            master: wire
                .master
                .as_ref()
                .and_then(value_to_string)
                .unwrap_or_default(),
            children,
            multipliers,
            enabled: wire.enabled.unwrap_or(false),
        })
    }

    fn key(&self) -> RecordKey {
        match &self.setup_id {
            Some(id) => RecordKey::new(id.clone()),
            None => RecordKey::new(self.name.clone()),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate::copy_setup(self)
    }

    fn numeric_id(&self) -> Option<u64> {
        self.setup_id.as_deref().and_then(|id| id.parse().ok())
    }

    fn needs_id(&self) -> bool {
        self.setup_id.is_none()
    }

    fn assign_id(&mut self, id: u64) {
        self.setup_id = Some(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalizes_listing() {
        let wire: CopySetupWire = serde_json::from_value(json!({
            "setup_id": "nifty_20250101_093000",
            "name": "Nifty mirror",
            "master": "U1",
            "children": ["U2", "U3"],
            "multipliers": { "U2": 2, "U3": "0.5" },
            "enabled": true
        }))
        .unwrap();
        let s = CopySetup::from_wire(wire).unwrap();
        assert_eq!(s.key().as_str(), "nifty_20250101_093000");
        assert_eq!(s.numeric_id(), None);
        assert!(s.enabled);
        assert_eq!(s.multiplier_for("U2"), Decimal::from(2));
        assert_eq!(s.multiplier_for("U3"), Decimal::new(5, 1));
        assert_eq!(s.multiplier_for("U9"), Decimal::ONE);
    }

    #[test]
    fn test_normalizes_setup_name_and_members() {
        let wire: CopySetupWire = serde_json::from_value(json!({
            "setup_name": "Bank",
            "master": "U1",
            "members": ["U4"]
        }))
        .unwrap();
        let s = CopySetup::from_wire(wire).unwrap();
        assert_eq!(s.key().as_str(), "Bank");
        assert_eq!(s.children, vec!["U4"]);
        assert!(!s.enabled);
    }
}

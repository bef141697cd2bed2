//! Read-only dashboard collections: orders, positions, holdings and the
//! per-account summary. The backend derives them from the broker books; the
//! panel only lists them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{value_to_decimal, value_to_string, RecordKey, Resource, ResourceKind};
use crate::validate::ValidationError;

/// Raw report row. Field names follow the dashboard endpoints.
pub type ReportWire = serde_json::Map<String, serde_json::Value>;

fn text(fields: &ReportWire, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| fields.get(*n).and_then(value_to_string))
}

fn amount(fields: &ReportWire, names: &[&str]) -> Decimal {
    names
        .iter()
        .find_map(|n| fields.get(*n).and_then(value_to_decimal))
        .unwrap_or_default()
}

fn account_symbol_key(name: &str, symbol: &str) -> RecordKey {
    RecordKey::new(format!("{}::{}", name, symbol))
}

/// An order from a client's order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Client display name.
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub transaction_type: String,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Resource for Order {
    const KIND: ResourceKind = ResourceKind::Orders;
    type Wire = ReportWire;

    fn from_wire(wire: ReportWire) -> Option<Self> {
        Some(Order {
            symbol: text(&wire, &["symbol"])?,
            name: text(&wire, &["name"]).unwrap_or_default(),
            transaction_type: text(&wire, &["transaction_type", "buyorsell"]).unwrap_or_default(),
            quantity: amount(&wire, &["quantity", "orderqty"]),
            price: amount(&wire, &["price"]),
            status: text(&wire, &["status", "orderstatus"]).unwrap_or_default(),
            order_id: text(&wire, &["order_id", "uniqueorderid"]),
        })
    }

    fn key(&self) -> RecordKey {
        match &self.order_id {
            Some(id) => RecordKey::new(id.clone()),
            None => account_symbol_key(&self.name, &self.symbol),
        }
    }

    /// Orders arrive bucketed by status (`pending`, `traded`, ...).
    fn adopt_bucket(item: &mut ReportWire, bucket: &str) {
        if text(item, &["status", "orderstatus"]).is_none() {
            item.insert("status".to_string(), serde_json::Value::String(bucket.to_string()));
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Net position of one client in one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub name: String,
    pub symbol: String,
    /// Buy quantity minus sell quantity.
    pub quantity: Decimal,
    pub buy_avg: Decimal,
    pub sell_avg: Decimal,
    pub net_profit: Decimal,
}

impl Position {
    pub fn is_open(&self) -> bool {
        !self.quantity.is_zero()
    }
}

impl Resource for Position {
    const KIND: ResourceKind = ResourceKind::Positions;
    type Wire = ReportWire;

    fn from_wire(wire: ReportWire) -> Option<Self> {
        Some(Position {
            symbol: text(&wire, &["symbol"])?,
            name: text(&wire, &["name"]).unwrap_or_default(),
            quantity: amount(&wire, &["quantity"]),
            buy_avg: amount(&wire, &["buy_avg"]),
            sell_avg: amount(&wire, &["sell_avg"]),
            net_profit: amount(&wire, &["net_profit"]),
        })
    }

    fn key(&self) -> RecordKey {
        account_symbol_key(&self.name, &self.symbol)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Demat holding valued at the last traded price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub name: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub buy_avg: Decimal,
    pub ltp: Decimal,
    pub pnl: Decimal,
}

impl Resource for Holding {
    const KIND: ResourceKind = ResourceKind::Holdings;
    type Wire = ReportWire;

    fn from_wire(wire: ReportWire) -> Option<Self> {
        Some(Holding {
            symbol: text(&wire, &["symbol", "scripname"])?,
            name: text(&wire, &["name"]).unwrap_or_default(),
            quantity: amount(&wire, &["quantity", "dpquantity"]),
            buy_avg: amount(&wire, &["buy_avg", "buyavgprice"]),
            ltp: amount(&wire, &["ltp"]),
            pnl: amount(&wire, &["pnl"]),
        })
    }

    fn key(&self) -> RecordKey {
        account_symbol_key(&self.name, &self.symbol)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Per-account totals shown on the summary tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub name: String,
    pub capital: Decimal,
    pub invested: Decimal,
    pub pnl: Decimal,
    pub current_value: Decimal,
    pub available_margin: Decimal,
    pub net_gain: Decimal,
}

impl Resource for AccountSummary {
    const KIND: ResourceKind = ResourceKind::Summary;
    type Wire = ReportWire;

    fn from_wire(wire: ReportWire) -> Option<Self> {
        Some(AccountSummary {
            name: text(&wire, &["name"])?,
            capital: amount(&wire, &["capital"]),
            invested: amount(&wire, &["invested"]),
            pnl: amount(&wire, &["pnl"]),
            current_value: amount(&wire, &["current_value"]),
            available_margin: amount(&wire, &["available_margin"]),
            net_gain: amount(&wire, &["net_gain"]),
        })
    }

    fn key(&self) -> RecordKey {
        RecordKey::new(self.name.clone())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

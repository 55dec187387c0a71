//! Trading account state as reported by the terminal.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{Timestamp, ValidationError};

/// Full account state read from the trading terminal.
///
/// Numeric fields default to zero so a gateway that omits optional
/// fields still produces a usable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: i64,
    #[serde(default)]
    pub trade_mode: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub leverage: i64,
    #[serde(default)]
    pub limit_orders: i64,
    #[serde(default)]
    pub margin_so_mode: i32,
    #[serde(default)]
    pub trade_allowed: bool,
    #[serde(default)]
    pub trade_expert: bool,
    #[serde(default)]
    pub margin_mode: i32,
    #[serde(default)]
    pub currency_digits: i32,
    #[serde(default)]
    pub fifo_close: bool,

    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub credit: f64,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub margin: f64,
    #[serde(default)]
    pub margin_free: f64,
    #[serde(default)]
    pub margin_level: f64,
    #[serde(default)]
    pub margin_so_call: f64,
    #[serde(default)]
    pub margin_so_so: f64,
    #[serde(default)]
    pub margin_initial: f64,
    #[serde(default)]
    pub margin_maintenance: f64,
    #[serde(default)]
    pub assets: f64,
    #[serde(default)]
    pub liabilities: f64,
    #[serde(default)]
    pub commission_blocked: f64,

    /// When this value was read. Not part of the comparable snapshot.
    #[serde(default)]
    pub last_update: Option<Timestamp>,
}

impl AccountInfo {
    /// Checks the invariants the terminal is expected to uphold.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.login <= 0 {
            return Err(ValidationError::invalid_format("login", "must be positive"));
        }
        if self.currency.len() != 3 || self.currency.chars().any(|c| !c.is_ascii_uppercase()) {
            return Err(ValidationError::invalid_format(
                "currency",
                "must be a three letter uppercase code",
            ));
        }
        Ok(())
    }

    /// Marks the value as read now.
    pub fn touched(mut self) -> Self {
        self.last_update = Some(Timestamp::now());
        self
    }

    /// Serialized form used for change detection.
    ///
    /// Excludes `last_update` so two reads of an unchanged account
    /// compare equal.
    pub fn snapshot(&self) -> AccountSnapshot {
        let mut value = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        if let JsonValue::Object(map) = &mut value {
            map.remove("last_update");
        }
        AccountSnapshot(value)
    }
}

/// Comparable, fully-serialized account state.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot(JsonValue);

impl AccountSnapshot {
    /// Returns the serialized value.
    pub fn as_json(&self) -> &JsonValue {
        &self.0
    }

    /// Consumes the snapshot, returning the serialized value.
    pub fn into_json(self) -> JsonValue {
        self.0
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time view of the account used by the concentration check.
///
/// `exposure_by_symbol` is gross market exposure per underlying, in micros.
/// Built from a broker account snapshot plus the open position list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioView {
    pub account_value_micros: i64,
    pub exposure_by_symbol: BTreeMap<String, i64>,
}

impl PortfolioView {
    pub fn new(account_value_micros: i64) -> Self {
        Self {
            account_value_micros,
            exposure_by_symbol: BTreeMap::new(),
        }
    }

    pub fn with_exposure(mut self, symbol: impl Into<String>, micros: i64) -> Self {
        *self.exposure_by_symbol.entry(symbol.into()).or_insert(0) += micros;
        self
    }

    /// Existing gross exposure to `symbol`; zero when the symbol is not held.
    pub fn exposure(&self, symbol: &str) -> i64 {
        self.exposure_by_symbol.get(symbol).copied().unwrap_or(0)
    }
}

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::money::OPTION_CONTRACT_MULTIPLIER;

/// Side of a single leg.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn opposite(self) -> Self {
        match self {
            Action::Buy => Action::Sell,
            Action::Sell => Action::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    fn occ_char(&self) -> char {
        match self {
            OptionRight::Call => 'C',
            OptionRight::Put => 'P',
        }
    }
}

/// Listed option contract a leg trades.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractDescriptor {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike_micros: i64,
    pub right: OptionRight,
}

impl ContractDescriptor {
    pub fn new(
        underlying: impl Into<String>,
        expiry: NaiveDate,
        strike_micros: i64,
        right: OptionRight,
    ) -> Self {
        Self {
            underlying: underlying.into(),
            expiry,
            strike_micros,
            right,
        }
    }

    /// OCC-style contract symbol, e.g. `SPY261120C00450000`.
    ///
    /// Used as the stable position key on both sides of the broker boundary.
    pub fn occ_symbol(&self) -> String {
        format!(
            "{}{}{}{:08}",
            self.underlying,
            self.expiry.format("%y%m%d"),
            self.right.occ_char(),
            self.strike_micros / 1_000
        )
    }

    /// True when both contracts belong to the same expiry/right series and
    /// can therefore offset each other inside a vertical spread.
    pub fn same_series(&self, other: &ContractDescriptor) -> bool {
        self.underlying == other.underlying
            && self.expiry == other.expiry
            && self.right == other.right
    }
}

/// One side of a (possibly multi-part) order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Leg {
    pub action: Action,
    pub contract: ContractDescriptor,
    /// Contracts. Must be > 0; direction is carried by `action`.
    pub quantity: i64,
    /// Per-share limit price in micros. Must be > 0.
    pub price_micros: i64,
}

impl Leg {
    pub fn new(action: Action, contract: ContractDescriptor, quantity: i64, price_micros: i64) -> Self {
        Self {
            action,
            contract,
            quantity,
            price_micros,
        }
    }

    /// Premium paid (buy) or received (sell) for the whole leg, unsigned.
    pub fn premium_micros(&self) -> i128 {
        self.price_micros as i128 * self.quantity as i128 * OPTION_CONTRACT_MULTIPLIER as i128
    }
}

/// Candidate trade produced upstream. Consumed once by the execution gate;
/// only its trade records are persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Order {
    pub symbol: String,
    pub strategy: String,
    pub legs: Vec<Leg>,
    /// Declared worst-case loss of the structure, in micros.
    pub max_risk_micros: i64,
    /// Buying power the structure consumes, in micros.
    pub capital_required_micros: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Order {
    /// Net premium paid across all legs (buys minus sells), floored at zero.
    /// A credit structure has a net debit of zero.
    pub fn net_debit_micros(&self) -> i128 {
        let net: i128 = self
            .legs
            .iter()
            .map(|l| match l.action {
                Action::Buy => l.premium_micros(),
                Action::Sell => -l.premium_micros(),
            })
            .sum();
        net.max(0)
    }

    /// Canonical JSON of the order. `BTreeMap` metadata keeps key order
    /// stable, so equal orders always produce equal bytes.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tg_execution::{BrokerOrderStatus, BrokerPosition, OrderLegRequest};
use tg_schemas::{Action, FillReport};

/// How a placed order executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillMode {
    /// Every leg fills at its limit price on placement.
    #[default]
    Immediate,
    /// Orders rest as working until filled explicitly.
    Resting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperOrder {
    pub broker_order_id: String,
    pub client_order_id: String,
    /// Client id of the connection that placed it.
    pub owner: String,
    pub legs: Vec<OrderLegRequest>,
    pub status: BrokerOrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperFill {
    pub owner: String,
    pub report: FillReport,
}

/// Entire venue: account, positions keyed by contract symbol, orders keyed
/// by client order id. This is what the state file holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueState {
    pub account_value_micros: i64,
    pub buying_power_micros: i64,
    #[serde(default)]
    pub fill_mode: FillMode,
    #[serde(default)]
    pub next_order_seq: u64,
    #[serde(default)]
    pub next_fill_seq: u64,
    #[serde(default)]
    pub orders: BTreeMap<String, PaperOrder>,
    #[serde(default)]
    pub positions: BTreeMap<String, BrokerPosition>,
    #[serde(default)]
    pub fills: Vec<PaperFill>,
}

impl VenueState {
    pub fn new(account_value_micros: i64) -> Self {
        Self {
            account_value_micros,
            buying_power_micros: account_value_micros,
            ..Self::default()
        }
    }

    pub(crate) fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read venue state failed: {}", path.display()))?;
        let st = serde_json::from_str(&raw)
            .with_context(|| format!("parse venue state failed: {}", path.display()))?;
        Ok(Some(st))
    }

    /// Write to a sibling temp file, then rename over the target.
    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create_dir_all failed: {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(self).context("serialize venue state failed")?;
        fs::write(&tmp, body).with_context(|| format!("write failed: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("rename {} -> {} failed", tmp.display(), path.display()))?;
        Ok(())
    }

    /// Move the position for `leg` by its signed quantity, marking it at
    /// `price_micros`. Flat positions are removed.
    pub(crate) fn apply_execution(&mut self, leg: &OrderLegRequest, price_micros: i64) {
        let symbol = leg.contract.occ_symbol();
        let delta = match leg.action {
            Action::Buy => leg.quantity,
            Action::Sell => -leg.quantity,
        };
        let pos = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| BrokerPosition {
                contract: leg.contract.clone(),
                quantity: 0,
                mark_price_micros: price_micros,
            });
        pos.quantity += delta;
        pos.mark_price_micros = price_micros;
        if pos.quantity == 0 {
            self.positions.remove(&symbol);
        }
    }
}

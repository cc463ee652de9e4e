//! Emergency flatten: cancel whatever the trading process left working, then
//! liquidate every open position through the watchdog's own broker
//! connection.

use std::collections::HashSet;

use serde::Serialize;
use tg_execution::{
    call_with_retry, liquidating_limit_micros, BrokerAdapter, BrokerError, BrokerPosition,
    OrderLegRequest, PlaceOrderRequest, RetryPolicy,
};
use tg_schemas::Action;

const FLATTEN_PREFIX: &str = "flatten:";

/// Deterministic per (contract, signed quantity), so a repeat flatten of an
/// unchanged position targets the same broker order.
pub fn flatten_client_order_id(p: &BrokerPosition) -> String {
    format!("{FLATTEN_PREFIX}{}:{}", p.contract_symbol(), p.quantity)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlattenFailure {
    pub client_order_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenReport {
    /// Working non-flatten orders canceled before liquidating.
    pub canceled: Vec<String>,
    /// Client order ids placed this pass.
    pub submitted: Vec<String>,
    /// Client order ids already working at the venue.
    pub already_working: Vec<String>,
    pub failed: Vec<FlattenFailure>,
}

impl FlattenReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One flatten pass. `Err` means the open order or position list itself
/// could not be read.
///
/// Working entry orders are canceled first, so nothing the stopped trading
/// process left behind can fill after the positions are closed. Positions are
/// read after the cancels and include anything that filled meanwhile.
pub async fn emergency_flatten(
    broker: &dyn BrokerAdapter,
    retry: &RetryPolicy,
    slippage_bps: u32,
) -> Result<FlattenReport, BrokerError> {
    let mut report = FlattenReport::default();
    let open = call_with_retry(retry, "open_orders", || broker.open_orders()).await?;
    let mut working = HashSet::new();
    for o in open {
        if o.client_order_id.starts_with(FLATTEN_PREFIX) {
            working.insert(o.client_order_id);
            continue;
        }
        let broker_order_id = o.broker_order_id.as_str();
        match call_with_retry(retry, "cancel_order", || broker.cancel_order(broker_order_id)).await
        {
            Ok(()) => {
                tracing::warn!(
                    client_order_id = %o.client_order_id,
                    broker_order_id = %o.broker_order_id,
                    "working order canceled before flatten"
                );
                report.canceled.push(o.client_order_id);
            }
            Err(e) => {
                tracing::error!(client_order_id = %o.client_order_id, error = %e, "cancel before flatten failed");
                report.failed.push(FlattenFailure {
                    client_order_id: o.client_order_id,
                    error: e.to_string(),
                });
            }
        }
    }

    let positions = call_with_retry(retry, "positions", || broker.positions()).await?;
    for p in positions.iter().filter(|p| p.quantity != 0) {
        let client_order_id = flatten_client_order_id(p);
        if working.contains(&client_order_id) {
            report.already_working.push(client_order_id);
            continue;
        }
        let action = if p.quantity > 0 { Action::Sell } else { Action::Buy };
        let req = PlaceOrderRequest {
            client_order_id: client_order_id.clone(),
            legs: vec![OrderLegRequest {
                action,
                contract: p.contract.clone(),
                quantity: p.quantity.abs(),
                limit_price_micros: liquidating_limit_micros(p.mark_price_micros, action, slippage_bps),
            }],
        };
        match call_with_retry(retry, "place_order", || broker.place_order(&req)).await {
            Ok(ack) => {
                tracing::warn!(
                    client_order_id = %client_order_id,
                    broker_order_id = %ack.broker_order_id,
                    contract = %p.contract_symbol(),
                    qty = p.quantity,
                    "flatten order placed"
                );
                report.submitted.push(client_order_id);
            }
            Err(e) => {
                tracing::error!(client_order_id = %client_order_id, error = %e, "flatten order failed");
                report.failed.push(FlattenFailure {
                    client_order_id,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

use anyhow::{Context, Result};
use tg_schemas::Order;
use uuid::Uuid;

/// Namespace for trade ids. Changing it changes every trade id.
const TRADE_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_2a1e_7b44_4d7a_9c1e_3a8b_6d2f_e410);

/// Deterministic trade id: UUIDv5 over the canonical JSON of the order.
/// Equal orders always map to the same id.
pub fn trade_id(order: &Order) -> Result<String> {
    let canonical = order
        .canonical_json()
        .context("serialize order for trade_id failed")?;
    Ok(Uuid::new_v5(&TRADE_NAMESPACE, canonical.as_bytes()).to_string())
}

pub fn leg_client_order_id(trade_id: &str, leg_index: usize) -> String {
    format!("{trade_id}:{leg_index}")
}

/// Client order id for an atomic multi-leg placement.
pub fn combo_client_order_id(trade_id: &str) -> String {
    format!("{trade_id}:combo")
}

/// Client order id for the compensating close of leg `leg_index`.
pub fn unwind_client_order_id(trade_id: &str, leg_index: usize) -> String {
    format!("{trade_id}:{leg_index}:unwind")
}

/// Trade id a client order id was derived from, if it has that shape.
pub fn trade_id_of(client_order_id: &str) -> Option<&str> {
    client_order_id
        .split_once(':')
        .map(|(t, _)| t)
        .filter(|t| Uuid::parse_str(t).is_ok())
}

//! tg-execution
//!
//! Broker boundary and the execution gate.
//!
//! - `BrokerAdapter`: async venue interface, one connection per process
//! - `RetryPolicy` / `call_with_retry`: per-call timeout with bounded backoff
//! - `ExecutionGate`: validate-then-submit with durable trade records
//! - `Alerter`: operator alert sink (log or webhook)
//!
//! The gate reads `RiskState` from the store on every call; there is no
//! in-memory copy to drift from what the watchdog writes.

mod alert;
mod broker;
mod gate;
mod ids;
mod locks;
mod prices;
mod retry;

pub use alert::{alerter_for, raise, Alert, AlertSeverity, Alerter, LogAlerter, WebhookAlerter};
pub use broker::{
    AccountSnapshot, BrokerAdapter, BrokerError, BrokerOrderStatus, BrokerPosition, OpenOrder,
    OrderLegRequest, PlaceOrderAck, PlaceOrderRequest,
};
pub use gate::{portfolio_view, ExecutionGate, Preview, SubmitOutcome};
pub use ids::{
    combo_client_order_id, leg_client_order_id, trade_id, trade_id_of, unwind_client_order_id,
};
pub use locks::SymbolLocks;
pub use prices::{liquidating_limit_micros, DEFAULT_UNWIND_SLIPPAGE_BPS};
pub use retry::{call_with_retry, with_timeout, RetryPolicy};

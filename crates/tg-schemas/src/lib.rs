//! tg-schemas
//!
//! Shared data model for the trading process and the watchdog.
//!
//! Everything here is plain data: orders and legs as they arrive from the
//! upstream decision engine, the immutable safety limits, the persisted risk
//! state, trade records and the heartbeat. No IO, no clock, no broker calls.
//!
//! Money, prices and strikes are integer micros (1 USD = 1_000_000 micros).

mod money;
mod order;
mod portfolio;
mod reason;
mod records;
mod risk_state;

pub use money::{
    micros_to_price, price_to_micros, usd, PricingError, MICROS_PER_UNIT,
    OPTION_CONTRACT_MULTIPLIER,
};
pub use order::{Action, ContractDescriptor, Leg, OptionRight, Order};
pub use portfolio::PortfolioView;
pub use reason::{ReasonCode, Rejection};
pub use records::{FillReport, HeartbeatRecord, NewTradeRecord, TradeOutcome, TradeRecord};
pub use risk_state::{BreakerState, RiskState, SafetyLimits};

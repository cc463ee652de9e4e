//! tg-risk
//!
//! Safety validator and the pure risk-state transitions around it.
//!
//! - `validate`: eight ordered checks, first failure wins
//! - `evaluate_drawdown`: session drawdown vs the circuit breaker fraction
//! - `apply_realized_pnl` / `roll_session`: fill-driven and day-boundary updates
//!
//! Deterministic, pure logic. No IO, no clock, no broker calls. Callers pass
//! `now` in and persist whatever comes back out.

mod session;
mod validator;

pub use session::{apply_realized_pnl, evaluate_drawdown, roll_session, DrawdownCheck};
pub use validator::{validate, worst_case_loss, Decision};

//! tg-runtime: the trading process.
//!
//! Wraps the execution gate in a single loop that reads upstream orders,
//! records fills and closes, and proves liveness through the heartbeat row.

pub mod input;
pub mod session;

pub use input::{parse_line, CloseReport, TraderInput, TraderOutput};
pub use session::TradingSession;

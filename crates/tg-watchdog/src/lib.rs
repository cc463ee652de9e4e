//! tg-watchdog library target.
//!
//! The poll loop, emergency flatten, process termination and the operator
//! router. The binary `main.rs` wires them to config and serves the router.

pub mod api_types;
pub mod flatten;
pub mod routes;
pub mod terminate;
pub mod watchdog;

pub use flatten::{emergency_flatten, flatten_client_order_id, FlattenFailure, FlattenReport};
pub use terminate::{ProcessTerminator, SigkillTerminator, TerminateOutcome};
pub use watchdog::{HeartbeatStatus, PollReport, Watchdog, WatchdogSettings};

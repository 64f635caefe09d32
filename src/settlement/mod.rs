//! Settlement: grading proposition bets against loaded box scores.

pub mod engine; // Open -> Won/Lost/Push/Void state machine
pub mod metrics; // canonical metric keys and derived-metric math

pub use engine::{evaluate, SettlementEngine, SettlementReport, PUSH_EPSILON};
pub use metrics::{canonical_metric_key, resolve_actual};

//! Boxline ETL core
//!
//! Consolidates game feeds and betting-market boards into one canonical
//! store: cross-source identity resolution, watermark-driven incremental
//! windows, idempotent loads, and prop bet settlement.

pub mod identity;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod settlement;
pub mod storage;

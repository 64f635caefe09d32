//! Storage Module - Embedded SQLite Persistence
//!
//! One store behind the persistence contract: transactional upserts, scoped
//! reads by natural key, watermark state, and alias audit rows.

pub mod db;

pub use db::{EtlDb, StoreCounts};

//! Provider seam between external feeds and the pipeline.
//!
//! Providers hand over raw JSON payloads tagged with their source name and
//! make no schema promises; the normalizer owns validation. Swapping a
//! file drop for an HTTP client is a provider change only.

pub mod fs; // File-drop providers reading staged JSON payloads

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use fs::{FileDropBoard, FileDropGames};

/// One raw payload from one source. The payload shape is whatever the
/// source emitted; only the source tag is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub payload: Value,
}

impl RawRecord {
    pub fn new(source: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            payload,
        }
    }
}

/// Everything a game feed exposes for one game.
#[derive(Debug, Clone, Default)]
pub struct RawGameFeed {
    pub box_scores: Vec<RawRecord>,
    pub pitches: Vec<RawRecord>,
}

/// One market board snapshot: price observations plus prop offers.
#[derive(Debug, Clone, Default)]
pub struct RawBoard {
    pub quotes: Vec<RawRecord>,
    pub props: Vec<RawRecord>,
}

/// Primary source for schedules, box scores, and pitch-level detail.
#[async_trait]
pub trait GameDataProvider: Send + Sync {
    fn source_name(&self) -> &str;

    /// All games scheduled on a date. An off-day is an empty list, not an
    /// error.
    async fn schedule_for_date(&self, date: NaiveDate) -> Result<Vec<RawRecord>>;

    /// Per-game detail. Providers return an empty feed when nothing has
    /// been published yet; the pipeline decides whether that is a gap.
    async fn game_feed(&self, game_id: &str) -> Result<RawGameFeed>;
}

/// A betting-market source publishing quotes and prop offers.
#[async_trait]
pub trait MarketBoardProvider: Send + Sync {
    fn source_name(&self) -> &str;

    async fn board(&self) -> Result<RawBoard>;
}

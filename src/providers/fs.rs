//! File-drop providers: feeds staged as JSON files under a payload
//! directory. Used for replays and as the default local setup, where an
//! upstream fetcher (or a human) drops payloads and the pipeline consumes
//! them.
//!
//! Layout:
//!   <root>/<YYYY-MM-DD>/schedule.json   array of schedule objects
//!   <root>/games/<game_id>.json         {"box_scores": [...], "pitches": [...]}
//!   <root>/board/<source>.json          {"quotes": [...], "props": [...]}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{GameDataProvider, MarketBoardProvider, RawBoard, RawGameFeed, RawRecord};

#[derive(Debug, Deserialize, Default)]
struct FeedFile {
    #[serde(default)]
    box_scores: Vec<Value>,
    #[serde(default)]
    pitches: Vec<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct BoardFile {
    #[serde(default)]
    quotes: Vec<Value>,
    #[serde(default)]
    props: Vec<Value>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading payload file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing payload file {}", path.display()))
}

/// Game-data source backed by staged files.
pub struct FileDropGames {
    root: PathBuf,
    source: String,
}

impl FileDropGames {
    pub fn new(root: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl GameDataProvider for FileDropGames {
    fn source_name(&self) -> &str {
        &self.source
    }

    async fn schedule_for_date(&self, date: NaiveDate) -> Result<Vec<RawRecord>> {
        let path = self
            .root
            .join(date.format("%Y-%m-%d").to_string())
            .join("schedule.json");
        if !path.exists() {
            debug!(date = %date, "No schedule drop; treating as off-day");
            return Ok(Vec::new());
        }
        let rows: Vec<Value> = read_json(&path)?;
        Ok(rows
            .into_iter()
            .map(|payload| RawRecord::new(&self.source, payload))
            .collect())
    }

    async fn game_feed(&self, game_id: &str) -> Result<RawGameFeed> {
        let path = self.root.join("games").join(format!("{game_id}.json"));
        if !path.exists() {
            // Nothing published yet. For a live or final game the pipeline
            // flags this as a gap; for a scheduled game it is normal.
            return Ok(RawGameFeed::default());
        }
        let file: FeedFile = read_json(&path)?;
        Ok(RawGameFeed {
            box_scores: file
                .box_scores
                .into_iter()
                .map(|payload| RawRecord::new(&self.source, payload))
                .collect(),
            pitches: file
                .pitches
                .into_iter()
                .map(|payload| RawRecord::new(&self.source, payload))
                .collect(),
        })
    }
}

/// Market board backed by one staged file per source.
pub struct FileDropBoard {
    root: PathBuf,
    source: String,
}

impl FileDropBoard {
    pub fn new(root: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl MarketBoardProvider for FileDropBoard {
    fn source_name(&self) -> &str {
        &self.source
    }

    async fn board(&self) -> Result<RawBoard> {
        let path = self.root.join("board").join(format!("{}.json", self.source));
        if !path.exists() {
            debug!(source = %self.source, "No board drop staged");
            return Ok(RawBoard::default());
        }
        let file: BoardFile = read_json(&path)?;
        Ok(RawBoard {
            quotes: file
                .quotes
                .into_iter()
                .map(|payload| RawRecord::new(&self.source, payload))
                .collect(),
            props: file
                .props
                .into_iter()
                .map(|payload| RawRecord::new(&self.source, payload))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_schedule_drop_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2024-04-11");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(
            day.join("schedule.json"),
            json!([
                {"game_pk": 745001, "official_date": "2024-04-11", "status": "Final",
                 "home_team": "KC", "away_team": "CWS", "home_score": 2, "away_score": 5}
            ])
            .to_string(),
        )
        .unwrap();

        let provider = FileDropGames::new(dir.path(), "statsapi");
        let date = NaiveDate::from_ymd_opt(2024, 4, 11).unwrap();
        let records = provider.schedule_for_date(date).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "statsapi");
        assert_eq!(records[0].payload["game_pk"], 745001);

        // Off-day: directory absent entirely.
        let off = NaiveDate::from_ymd_opt(2024, 4, 12).unwrap();
        assert!(provider.schedule_for_date(off).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_game_feed_and_missing_feed() {
        let dir = tempfile::tempdir().unwrap();
        let games = dir.path().join("games");
        std::fs::create_dir_all(&games).unwrap();
        std::fs::write(
            games.join("745001.json"),
            json!({
                "box_scores": [{"player_id": 677951, "player_name": "Bobby Witt Jr.",
                                "team": "KC", "stats": {"hits": 2}}],
                "pitches": []
            })
            .to_string(),
        )
        .unwrap();

        let provider = FileDropGames::new(dir.path(), "statsapi");
        let feed = provider.game_feed("745001").await.unwrap();
        assert_eq!(feed.box_scores.len(), 1);
        assert!(feed.pitches.is_empty());

        let empty = provider.game_feed("999999").await.unwrap();
        assert!(empty.box_scores.is_empty() && empty.pitches.is_empty());
    }

    #[tokio::test]
    async fn test_board_drop() {
        let dir = tempfile::tempdir().unwrap();
        let board = dir.path().join("board");
        std::fs::create_dir_all(&board).unwrap();
        std::fs::write(
            board.join("props.json"),
            json!({
                "props": [{"prop_id": 5836744, "player_name": "Bobby Witt Jr.",
                           "team": "KC", "game_date": "2024-04-11",
                           "stat_type": "Hits", "line": 1.5, "side": "over"}]
            })
            .to_string(),
        )
        .unwrap();

        let provider = FileDropBoard::new(dir.path(), "props");
        let snapshot = provider.board().await.unwrap();
        assert!(snapshot.quotes.is_empty());
        assert_eq!(snapshot.props.len(), 1);
        assert_eq!(snapshot.props[0].source, "props");
    }

    #[tokio::test]
    async fn test_malformed_drop_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2024-04-11");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(day.join("schedule.json"), "not json").unwrap();

        let provider = FileDropGames::new(dir.path(), "statsapi");
        let date = NaiveDate::from_ymd_opt(2024, 4, 11).unwrap();
        assert!(provider.schedule_for_date(date).await.is_err());
    }
}

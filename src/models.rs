use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Entity namespaces the identity resolver knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Team,
    Player,
    Game,
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Team => "team",
            EntityKind::Player => "player",
            EntityKind::Game => "game",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "team" => Some(EntityKind::Team),
            "player" => Some(EntityKind::Player),
            "game" => Some(EntityKind::Game),
            _ => None,
        }
    }
}

/// Game lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    Postponed,
    InProgress,
    Final,
}

impl GameStatus {
    pub fn as_str(&self) -> &str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::Postponed => "postponed",
            GameStatus::InProgress => "in_progress",
            GameStatus::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(GameStatus::Scheduled),
            "postponed" => Some(GameStatus::Postponed),
            "in_progress" => Some(GameStatus::InProgress),
            "final" => Some(GameStatus::Final),
            _ => None,
        }
    }

    /// Freshness order for merge-on-conflict: a lower-ranked incoming status
    /// never overwrites a higher-ranked stored one. Postponed sits below
    /// InProgress so a postponed game that resumes still accepts updates.
    pub fn freshness_rank(&self) -> u8 {
        match self {
            GameStatus::Scheduled => 0,
            GameStatus::Postponed => 1,
            GameStatus::InProgress => 2,
            GameStatus::Final => 3,
        }
    }

    /// Postponed games never block the watermark; Final games are done.
    pub fn is_terminal_for_scheduling(&self) -> bool {
        matches!(self, GameStatus::Final | GameStatus::Postponed)
    }
}

/// Which side of the line a proposition bet takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetSide {
    Over,
    Under,
}

impl BetSide {
    pub fn as_str(&self) -> &str {
        match self {
            BetSide::Over => "over",
            BetSide::Under => "under",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "over" => Some(BetSide::Over),
            "under" => Some(BetSide::Under),
            _ => None,
        }
    }
}

/// Proposition bet lifecycle; everything past Open is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Open,
    Won,
    Lost,
    Push,
    Void,
}

impl BetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BetStatus::Open => "open",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Push => "push",
            BetStatus::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(BetStatus::Open),
            "won" => Some(BetStatus::Won),
            "lost" => Some(BetStatus::Lost),
            "push" => Some(BetStatus::Push),
            "void" => Some(BetStatus::Void),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Open)
    }
}

/// Inclusive date range; `start > end` encodes the empty window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn num_days(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start).num_days() + 1
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.num_days()).map(move |i| start + Duration::days(i))
    }
}

/// One consolidated game, keyed by canonical game id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub status: GameStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub source: String,
}

/// Canonical player row carried alongside box-score facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_id: String,
    pub display_name: String,
    pub team_id: Option<String>,
}

/// One player-metric fact from a box score.
///
/// `carrier_status` is the game status of the feed that produced the row;
/// it is the freshness indicator for stat merges (a Final box score
/// supersedes an InProgress one, a stale retry is skipped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxScoreStat {
    pub game_id: String,
    pub player_id: String,
    pub metric: String,
    pub value: f64,
    pub carrier_status: GameStatus,
}

/// One pitch, keyed by (game_id, pitch_seq)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitchEvent {
    pub game_id: String,
    pub pitch_seq: String,
    pub inning: Option<i64>,
    pub pitcher_id: Option<String>,
    pub batter_id: Option<String>,
    pub pitch_type: Option<String>,
    pub release_speed: Option<f64>,
    pub release_spin: Option<f64>,
    pub outcome: Option<String>,
}

/// One observation of a market price; append-only, never merged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    pub source: String,
    pub market_id: String,
    pub runner_id: String,
    pub line_value: Option<f64>,
    /// Implied probability in (0, 1), converted from the source's odds format.
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// A proposition bet on a player metric crossing a line.
///
/// The referenced game is located at settlement time from (team_id,
/// game_date): prop sources identify games too loosely to carry a canonical
/// game id at ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropBet {
    pub bet_id: String,
    pub source: String,
    pub player_id: String,
    pub team_id: String,
    pub game_date: NaiveDate,
    pub metric: String,
    pub line_value: f64,
    pub side: BetSide,
    pub status: BetStatus,
    pub opened_at: DateTime<Utc>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub worker_count: usize,
    pub season_start: NaiveDate,
    pub fuzzy_max_distance: usize,
    pub max_window_days: Option<i64>,
}

fn default_season_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 27).unwrap_or_default()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./boxline.db".to_string());

        let worker_count = std::env::var("ETL_WORKERS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let season_start = std::env::var("SEASON_START")
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            .unwrap_or_else(default_season_start);

        let fuzzy_max_distance = std::env::var("FUZZY_MAX_DISTANCE")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .unwrap_or(2);

        let max_window_days = std::env::var("MAX_WINDOW_DAYS")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(Self {
            database_path,
            worker_count,
            season_start,
            fuzzy_max_distance,
            max_window_days,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./boxline.db".to_string(),
            worker_count: 10,
            season_start: default_season_start(),
            fuzzy_max_distance: 2,
            max_window_days: None,
        }
    }
}

//! SQLite-backed store for canonical entities, facts, and scheduling state.
//!
//! Write shapes:
//! - WAL mode so batch workers can read while a unit transaction commits
//! - Natural-key tables, WITHOUT ROWID where the key is the clustered index
//! - INSERT OR IGNORE for append-only rows, ON CONFLICT DO UPDATE for merges
//! - Unit transactions via BEGIN IMMEDIATE so either all of a unit's rows
//!   land or none do
//!
//! Freshness policy does not live here: the load and settlement engines read
//! current rows inside their unit transaction and decide what to write.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::identity::{LearnedAlias, ResolutionMethod};
use crate::models::{
    BetSide, BetStatus, BoxScoreStat, EntityKind, GameRecord, GameStatus, MarketQuote, PitchEvent,
    PlayerRecord, PropBet,
};

const SCHEMA_SQL: &str = r#"
-- WAL for concurrent reads while unit transactions commit
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;  -- 32MB cache
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS games (
    game_id TEXT PRIMARY KEY,
    official_date TEXT NOT NULL,
    home_team TEXT NOT NULL,
    away_team TEXT NOT NULL,
    status TEXT NOT NULL,
    home_score INTEGER,
    away_score INTEGER,
    source TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_games_date
    ON games(official_date, status);

CREATE TABLE IF NOT EXISTS teams (
    team_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS players (
    player_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    team_id TEXT,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS aliases (
    source TEXT NOT NULL,
    kind TEXT NOT NULL,
    alias TEXT NOT NULL,
    canonical_id TEXT NOT NULL,
    method TEXT NOT NULL,
    learned_at TEXT NOT NULL,
    PRIMARY KEY (source, kind, alias)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS box_score_stats (
    game_id TEXT NOT NULL,
    player_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    value REAL NOT NULL,
    carrier_status TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (game_id, player_id, metric)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_stats_player
    ON box_score_stats(player_id, game_id);

CREATE TABLE IF NOT EXISTS pitch_events (
    game_id TEXT NOT NULL,
    pitch_seq TEXT NOT NULL,
    inning INTEGER,
    pitcher_id TEXT,
    batter_id TEXT,
    pitch_type TEXT,
    release_speed REAL,
    release_spin REAL,
    outcome TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (game_id, pitch_seq)
) WITHOUT ROWID;

-- Append-only price observations; observed_at is part of the natural key
CREATE TABLE IF NOT EXISTS market_quotes (
    source TEXT NOT NULL,
    market_id TEXT NOT NULL,
    runner_id TEXT NOT NULL,
    line_value REAL,
    price REAL NOT NULL,
    observed_at TEXT NOT NULL,
    PRIMARY KEY (source, market_id, runner_id, observed_at)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_quotes_runner
    ON market_quotes(market_id, runner_id, observed_at);

CREATE TABLE IF NOT EXISTS prop_bets (
    bet_id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    player_id TEXT NOT NULL,
    team_id TEXT NOT NULL,
    game_date TEXT NOT NULL,
    metric TEXT NOT NULL,
    line_value REAL NOT NULL,
    side TEXT NOT NULL,
    status TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

-- Partial index: settlement scans only ever want open bets
CREATE INDEX IF NOT EXISTS idx_bets_open
    ON prop_bets(game_date, bet_id) WHERE status = 'open';

CREATE TABLE IF NOT EXISTS bet_settlements (
    bet_id TEXT PRIMARY KEY,
    outcome TEXT NOT NULL,
    line_value REAL NOT NULL,
    actual_value REAL,
    note TEXT,
    settled_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS job_watermarks (
    job_name TEXT PRIMARY KEY,
    last_completed_date TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;
"#;

const DATE_FMT: &str = "%Y-%m-%d";

/// Row counts for the status command and run summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreCounts {
    pub games: i64,
    pub players: i64,
    pub box_score_stats: i64,
    pub pitch_events: i64,
    pub market_quotes: i64,
    pub prop_bets: i64,
    pub open_bets: i64,
    pub settlements: i64,
    pub aliases: i64,
}

/// Shared handle to the embedded store
pub struct EtlDb {
    conn: Arc<Mutex<Connection>>,
}

impl EtlDb {
    /// Open (or create) the store and apply schema. `":memory:"` works for
    /// tests.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📊 Store initialized at: {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run one logical unit's writes in a single transaction. Rolls back on
    /// error so a failed unit leaves the store as if it was never processed.
    pub fn with_unit_txn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])
            .context("Failed to begin unit transaction")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute("COMMIT", [])
                    .context("Failed to commit unit transaction")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = conn.execute("ROLLBACK", []) {
                    warn!(error = %rollback, "Rollback after failed unit also failed");
                }
                Err(err)
            }
        }
    }

    /// Read-only access on the shared connection, outside any transaction.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    // ------------------------------------------------------------------
    // Scheduling state
    // ------------------------------------------------------------------

    pub fn watermark(&self, job_name: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock();
        let text: Option<String> = conn
            .query_row(
                "SELECT last_completed_date FROM job_watermarks WHERE job_name = ?1",
                params![job_name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read watermark")?;
        match text {
            Some(t) => Ok(Some(parse_date(&t)?)),
            None => Ok(None),
        }
    }

    /// Advance a watermark. Strictly forward: an older date is ignored at
    /// the SQL level, so concurrent job instances cannot roll each other
    /// back.
    pub fn set_watermark(&self, job_name: &str, date: NaiveDate) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO job_watermarks (job_name, last_completed_date, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_name) DO UPDATE SET
                 last_completed_date = excluded.last_completed_date,
                 updated_at = excluded.updated_at
             WHERE excluded.last_completed_date > job_watermarks.last_completed_date",
            params![job_name, fmt_date(date), now_text()],
        )
        .context("Failed to advance watermark")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scoped reads
    // ------------------------------------------------------------------

    pub fn games_on_date(&self, date: NaiveDate) -> Result<Vec<GameRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT game_id, official_date, home_team, away_team, status,
                        home_score, away_score, source
                 FROM games WHERE official_date = ?1 ORDER BY game_id",
            )
            .context("Failed to prepare games_on_date")?;
        let rows = stmt
            .query_map(params![fmt_date(date)], row_to_game)
            .context("Failed to query games_on_date")?;
        collect_rows(rows)
    }

    /// True when every game on the date is Final or Postponed. Zero games
    /// also counts as terminal so off-days never stall the watermark.
    pub fn date_is_terminal(&self, date: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock();
        let blocking: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM games
                 WHERE official_date = ?1 AND status NOT IN ('final', 'postponed')",
                params![fmt_date(date)],
                |row| row.get(0),
            )
            .context("Failed to count non-terminal games")?;
        Ok(blocking == 0)
    }

    pub fn team_games_on_date(&self, team_id: &str, date: NaiveDate) -> Result<Vec<GameRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT game_id, official_date, home_team, away_team, status,
                        home_score, away_score, source
                 FROM games
                 WHERE official_date = ?1 AND (home_team = ?2 OR away_team = ?2)
                 ORDER BY game_id",
            )
            .context("Failed to prepare team_games_on_date")?;
        let rows = stmt
            .query_map(params![fmt_date(date), team_id], row_to_game)
            .context("Failed to query team_games_on_date")?;
        collect_rows(rows)
    }

    /// Per-metric stat totals for one player across the given games
    /// (doubleheaders sum). An empty map means the player has no stat rows
    /// at all in those games.
    pub fn player_stat_totals(
        &self,
        player_id: &str,
        game_ids: &[String],
    ) -> Result<std::collections::HashMap<String, f64>> {
        let mut totals = std::collections::HashMap::new();
        if game_ids.is_empty() {
            return Ok(totals);
        }
        let placeholders = vec!["?"; game_ids.len()].join(", ");
        let sql = format!(
            "SELECT metric, SUM(value) FROM box_score_stats
             WHERE player_id = ? AND game_id IN ({placeholders})
             GROUP BY metric"
        );
        let mut bind: Vec<String> = Vec::with_capacity(game_ids.len() + 1);
        bind.push(player_id.to_string());
        bind.extend(game_ids.iter().cloned());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).context("Failed to prepare stat totals")?;
        let rows = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .context("Failed to query stat totals")?;
        for row in rows {
            let (metric, total) = row.context("Failed to read stat total row")?;
            totals.insert(metric, total);
        }
        Ok(totals)
    }

    pub fn open_bets(&self) -> Result<Vec<PropBet>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT bet_id, source, player_id, team_id, game_date, metric,
                        line_value, side, status, opened_at
                 FROM prop_bets WHERE status = 'open'
                 ORDER BY game_date, bet_id",
            )
            .context("Failed to prepare open_bets")?;
        let rows = stmt
            .query_map([], row_to_prop)
            .context("Failed to query open_bets")?;
        collect_rows(rows)
    }

    /// Full observation history for one runner in one market, oldest first.
    pub fn quote_history(&self, market_id: &str, runner_id: &str) -> Result<Vec<MarketQuote>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT source, market_id, runner_id, line_value, price, observed_at
                 FROM market_quotes
                 WHERE market_id = ?1 AND runner_id = ?2
                 ORDER BY observed_at",
            )
            .context("Failed to prepare quote_history")?;
        let rows = stmt
            .query_map(params![market_id, runner_id], row_to_quote)
            .context("Failed to query quote_history")?;
        collect_rows(rows)
    }

    pub fn settlement_outcome(&self, bet_id: &str) -> Result<Option<(BetStatus, Option<f64>)>> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<f64>)> = conn
            .query_row(
                "SELECT outcome, actual_value FROM bet_settlements WHERE bet_id = ?1",
                params![bet_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read settlement")?;
        match row {
            Some((outcome, actual)) => {
                let status = BetStatus::parse(&outcome)
                    .with_context(|| format!("unknown settlement outcome {outcome:?}"))?;
                Ok(Some((status, actual)))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Identity persistence
    // ------------------------------------------------------------------

    pub fn seed_teams(&self, registry: &[(&str, &str)]) -> Result<()> {
        self.with_unit_txn(|conn| {
            for (team_id, display_name) in registry {
                conn.execute(
                    "INSERT INTO teams (team_id, display_name) VALUES (?1, ?2)
                     ON CONFLICT(team_id) DO UPDATE SET display_name = excluded.display_name",
                    params![team_id, display_name],
                )?;
            }
            Ok(())
        })
    }

    /// Append learned aliases. Alias rows are immutable once written, so
    /// replays are ignored rather than merged.
    pub fn persist_aliases(&self, aliases: &[LearnedAlias]) -> Result<usize> {
        if aliases.is_empty() {
            return Ok(0);
        }
        self.with_unit_txn(|conn| {
            let mut inserted = 0usize;
            for alias in aliases {
                inserted += conn.execute(
                    "INSERT OR IGNORE INTO aliases
                     (source, kind, alias, canonical_id, method, learned_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        alias.source,
                        alias.kind.as_str(),
                        alias.alias,
                        alias.canonical_id,
                        alias.method.as_str(),
                        alias.learned_at.to_rfc3339(),
                    ],
                )?;
            }
            Ok(inserted)
        })
    }

    pub fn all_aliases(&self) -> Result<Vec<LearnedAlias>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT source, kind, alias, canonical_id, method, learned_at FROM aliases",
            )
            .context("Failed to prepare all_aliases")?;
        let rows = stmt
            .query_map([], |row| {
                let kind_text: String = row.get(1)?;
                let method_text: String = row.get(4)?;
                let learned_text: String = row.get(5)?;
                Ok(LearnedAlias {
                    source: row.get(0)?,
                    kind: EntityKind::parse(&kind_text)
                        .ok_or_else(|| bad_text(1, format!("unknown entity kind {kind_text:?}")))?,
                    alias: row.get(2)?,
                    canonical_id: row.get(3)?,
                    method: ResolutionMethod::parse(&method_text).ok_or_else(|| {
                        bad_text(4, format!("unknown resolution method {method_text:?}"))
                    })?,
                    learned_at: parse_datetime_sql(5, &learned_text)?,
                })
            })
            .context("Failed to query all_aliases")?;
        collect_rows(rows)
    }

    pub fn all_players(&self) -> Result<Vec<PlayerRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT player_id, display_name, team_id FROM players")
            .context("Failed to prepare all_players")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PlayerRecord {
                    player_id: row.get(0)?,
                    display_name: row.get(1)?,
                    team_id: row.get(2)?,
                })
            })
            .context("Failed to query all_players")?;
        collect_rows(rows)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("Failed count: {sql}"))
        };
        Ok(StoreCounts {
            games: count("SELECT COUNT(*) FROM games")?,
            players: count("SELECT COUNT(*) FROM players")?,
            box_score_stats: count("SELECT COUNT(*) FROM box_score_stats")?,
            pitch_events: count("SELECT COUNT(*) FROM pitch_events")?,
            market_quotes: count("SELECT COUNT(*) FROM market_quotes")?,
            prop_bets: count("SELECT COUNT(*) FROM prop_bets")?,
            open_bets: count("SELECT COUNT(*) FROM prop_bets WHERE status = 'open'")?,
            settlements: count("SELECT COUNT(*) FROM bet_settlements")?,
            aliases: count("SELECT COUNT(*) FROM aliases")?,
        })
    }

    pub fn watermarks(&self) -> Result<Vec<(String, NaiveDate)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT job_name, last_completed_date FROM job_watermarks ORDER BY job_name",
            )
            .context("Failed to prepare watermarks")?;
        let rows = stmt
            .query_map([], |row| {
                let job: String = row.get(0)?;
                let text: String = row.get(1)?;
                let date = NaiveDate::parse_from_str(&text, DATE_FMT)
                    .map_err(|e| bad_text(1, format!("bad watermark date {text:?}: {e}")))?;
                Ok((job, date))
            })
            .context("Failed to query watermarks")?;
        collect_rows(rows)
    }
}

// ----------------------------------------------------------------------
// Row-level helpers, composable inside a unit transaction
// ----------------------------------------------------------------------

pub fn get_game(conn: &Connection, game_id: &str) -> Result<Option<GameRecord>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT game_id, official_date, home_team, away_team, status,
                    home_score, away_score, source
             FROM games WHERE game_id = ?1",
        )
        .context("Failed to prepare get_game")?;
    stmt.query_row(params![game_id], row_to_game)
        .optional()
        .context("Failed to read game")
}

pub fn put_game(conn: &Connection, game: &GameRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO games
         (game_id, official_date, home_team, away_team, status,
          home_score, away_score, source, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(game_id) DO UPDATE SET
             official_date = excluded.official_date,
             home_team = excluded.home_team,
             away_team = excluded.away_team,
             status = excluded.status,
             home_score = excluded.home_score,
             away_score = excluded.away_score,
             source = excluded.source,
             updated_at = excluded.updated_at",
        params![
            game.game_id,
            fmt_date(game.date),
            game.home_team,
            game.away_team,
            game.status.as_str(),
            game.home_score,
            game.away_score,
            game.source,
            now_text(),
        ],
    )
    .context("Failed to upsert game")?;
    Ok(())
}

pub fn put_player(conn: &Connection, player: &PlayerRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO players (player_id, display_name, team_id, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(player_id) DO UPDATE SET
             display_name = excluded.display_name,
             team_id = COALESCE(excluded.team_id, players.team_id),
             updated_at = excluded.updated_at",
        params![player.player_id, player.display_name, player.team_id, now_text()],
    )
    .context("Failed to upsert player")?;
    Ok(())
}

pub fn get_stat_carrier(
    conn: &Connection,
    game_id: &str,
    player_id: &str,
    metric: &str,
) -> Result<Option<GameStatus>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT carrier_status FROM box_score_stats
             WHERE game_id = ?1 AND player_id = ?2 AND metric = ?3",
        )
        .context("Failed to prepare get_stat_carrier")?;
    let text: Option<String> = stmt
        .query_row(params![game_id, player_id, metric], |row| row.get(0))
        .optional()
        .context("Failed to read stat carrier")?;
    match text {
        Some(t) => Ok(Some(
            GameStatus::parse(&t).with_context(|| format!("unknown carrier status {t:?}"))?,
        )),
        None => Ok(None),
    }
}

/// Returns true when the row was newly inserted (vs. overwritten).
pub fn put_stat(conn: &Connection, stat: &BoxScoreStat) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO box_score_stats
         (game_id, player_id, metric, value, carrier_status, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            stat.game_id,
            stat.player_id,
            stat.metric,
            stat.value,
            stat.carrier_status.as_str(),
            now_text(),
        ],
    )?;
    if inserted > 0 {
        return Ok(true);
    }
    conn.execute(
        "UPDATE box_score_stats
         SET value = ?4, carrier_status = ?5, updated_at = ?6
         WHERE game_id = ?1 AND player_id = ?2 AND metric = ?3",
        params![
            stat.game_id,
            stat.player_id,
            stat.metric,
            stat.value,
            stat.carrier_status.as_str(),
            now_text(),
        ],
    )
    .context("Failed to overwrite stat")?;
    Ok(false)
}

/// Returns true when the row was newly inserted (vs. overwritten).
pub fn put_pitch(conn: &Connection, pitch: &PitchEvent) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pitch_events
         (game_id, pitch_seq, inning, pitcher_id, batter_id, pitch_type,
          release_speed, release_spin, outcome, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            pitch.game_id,
            pitch.pitch_seq,
            pitch.inning,
            pitch.pitcher_id,
            pitch.batter_id,
            pitch.pitch_type,
            pitch.release_speed,
            pitch.release_spin,
            pitch.outcome,
            now_text(),
        ],
    )?;
    if inserted > 0 {
        return Ok(true);
    }
    conn.execute(
        "UPDATE pitch_events
         SET inning = ?3, pitcher_id = ?4, batter_id = ?5, pitch_type = ?6,
             release_speed = ?7, release_spin = ?8, outcome = ?9, updated_at = ?10
         WHERE game_id = ?1 AND pitch_seq = ?2",
        params![
            pitch.game_id,
            pitch.pitch_seq,
            pitch.inning,
            pitch.pitcher_id,
            pitch.batter_id,
            pitch.pitch_type,
            pitch.release_speed,
            pitch.release_spin,
            pitch.outcome,
            now_text(),
        ],
    )
    .context("Failed to overwrite pitch")?;
    Ok(false)
}

/// Append one observation; a repeat of the same natural key is ignored.
/// Returns true when the row is new.
pub fn insert_quote(conn: &Connection, quote: &MarketQuote) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO market_quotes
             (source, market_id, runner_id, line_value, price, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                quote.source,
                quote.market_id,
                quote.runner_id,
                quote.line_value,
                quote.price,
                quote.observed_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert quote")?;
    Ok(inserted > 0)
}

pub fn get_bet_status(conn: &Connection, bet_id: &str) -> Result<Option<BetStatus>> {
    let mut stmt = conn
        .prepare_cached("SELECT status FROM prop_bets WHERE bet_id = ?1")
        .context("Failed to prepare get_bet_status")?;
    let text: Option<String> = stmt
        .query_row(params![bet_id], |row| row.get(0))
        .optional()
        .context("Failed to read bet status")?;
    match text {
        Some(t) => Ok(Some(
            BetStatus::parse(&t).with_context(|| format!("unknown bet status {t:?}"))?,
        )),
        None => Ok(None),
    }
}

/// Insert a new bet, or refresh line/side while it is still Open. A settled
/// bet is immutable to the loader; the WHERE on the conflict arm makes the
/// guard atomic.
pub fn put_prop(conn: &Connection, bet: &PropBet) -> Result<()> {
    conn.execute(
        "INSERT INTO prop_bets
         (bet_id, source, player_id, team_id, game_date, metric,
          line_value, side, status, opened_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(bet_id) DO UPDATE SET
             line_value = excluded.line_value,
             side = excluded.side,
             updated_at = excluded.updated_at
         WHERE prop_bets.status = 'open'",
        params![
            bet.bet_id,
            bet.source,
            bet.player_id,
            bet.team_id,
            fmt_date(bet.game_date),
            bet.metric,
            bet.line_value,
            bet.side.as_str(),
            bet.status.as_str(),
            bet.opened_at.to_rfc3339(),
            now_text(),
        ],
    )
    .context("Failed to upsert prop bet")?;
    Ok(())
}

/// Terminal transition for one bet. Returns false when the bet was not Open
/// (already settled, or missing), in which case nothing was written.
pub fn mark_bet_settled(
    conn: &Connection,
    bet_id: &str,
    outcome: BetStatus,
    line_value: f64,
    actual_value: Option<f64>,
    note: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE prop_bets SET status = ?2, updated_at = ?3
         WHERE bet_id = ?1 AND status = 'open'",
        params![bet_id, outcome.as_str(), now_text()],
    )?;
    if changed == 0 {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO bet_settlements
         (bet_id, outcome, line_value, actual_value, note, settled_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(bet_id) DO UPDATE SET
             outcome = excluded.outcome,
             line_value = excluded.line_value,
             actual_value = excluded.actual_value,
             note = excluded.note,
             settled_at = excluded.settled_at",
        params![
            bet_id,
            outcome.as_str(),
            line_value,
            actual_value,
            note,
            now_text(),
        ],
    )
    .context("Failed to record settlement")?;
    Ok(true)
}

// ----------------------------------------------------------------------
// Converters
// ----------------------------------------------------------------------

fn row_to_game(row: &rusqlite::Row<'_>) -> rusqlite::Result<GameRecord> {
    let date_text: String = row.get(1)?;
    let status_text: String = row.get(4)?;
    Ok(GameRecord {
        game_id: row.get(0)?,
        date: NaiveDate::parse_from_str(&date_text, DATE_FMT)
            .map_err(|e| bad_text(1, format!("bad game date {date_text:?}: {e}")))?,
        home_team: row.get(2)?,
        away_team: row.get(3)?,
        status: GameStatus::parse(&status_text)
            .ok_or_else(|| bad_text(4, format!("unknown game status {status_text:?}")))?,
        home_score: row.get(5)?,
        away_score: row.get(6)?,
        source: row.get(7)?,
    })
}

fn row_to_quote(row: &rusqlite::Row<'_>) -> rusqlite::Result<MarketQuote> {
    let observed_text: String = row.get(5)?;
    Ok(MarketQuote {
        source: row.get(0)?,
        market_id: row.get(1)?,
        runner_id: row.get(2)?,
        line_value: row.get(3)?,
        price: row.get(4)?,
        observed_at: parse_datetime_sql(5, &observed_text)?,
    })
}

fn row_to_prop(row: &rusqlite::Row<'_>) -> rusqlite::Result<PropBet> {
    let date_text: String = row.get(4)?;
    let side_text: String = row.get(7)?;
    let status_text: String = row.get(8)?;
    let opened_text: String = row.get(9)?;
    Ok(PropBet {
        bet_id: row.get(0)?,
        source: row.get(1)?,
        player_id: row.get(2)?,
        team_id: row.get(3)?,
        game_date: NaiveDate::parse_from_str(&date_text, DATE_FMT)
            .map_err(|e| bad_text(4, format!("bad bet date {date_text:?}: {e}")))?,
        metric: row.get(5)?,
        line_value: row.get(6)?,
        side: BetSide::parse(&side_text)
            .ok_or_else(|| bad_text(7, format!("unknown bet side {side_text:?}")))?,
        status: BetStatus::parse(&status_text)
            .ok_or_else(|| bad_text(8, format!("unknown bet status {status_text:?}")))?,
        opened_at: parse_datetime_sql(9, &opened_text)?,
    })
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("Failed to read row")?);
    }
    Ok(out)
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FMT)
        .with_context(|| format!("bad stored date {text:?}"))
}

fn now_text() -> String {
    Utc::now().to_rfc3339()
}

fn parse_datetime_sql(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| bad_text(idx, format!("bad timestamp {text:?}: {e}")))
}

fn bad_text(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

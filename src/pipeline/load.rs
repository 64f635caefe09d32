//! Idempotent Load Engine: merge-on-conflict writes with explicit
//! freshness rules. Re-running any load against unchanged input leaves the
//! store byte-for-byte identical; blind REPLACE is never used.
//!
//! Unit boundaries are transactions: one game's full payload, one market's
//! quote batch, one source's prop batch. A unit either lands whole or not
//! at all.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::models::{BetStatus, BoxScoreStat, GameRecord, GameStatus, MarketQuote, PitchEvent, PlayerRecord, PropBet};
use crate::storage::db;
use crate::storage::EtlDb;

/// Everything one game contributes in one run, loaded atomically.
#[derive(Debug, Clone)]
pub struct GameUnit {
    pub game: GameRecord,
    pub players: Vec<PlayerRecord>,
    pub stats: Vec<BoxScoreStat>,
    pub pitches: Vec<PitchEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl LoadOutcome {
    pub fn merge(&mut self, other: LoadOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

/// A stored Final game is immutable. Below that, an equal-or-fresher
/// status may overwrite, so a same-payload retry converges instead of
/// flapping.
pub fn game_supersedes(incoming: &GameRecord, stored: &GameRecord) -> bool {
    if stored.status == GameStatus::Final {
        return false;
    }
    incoming.status.freshness_rank() >= stored.status.freshness_rank()
}

/// Stat rows carry the game status of the feed that produced them; a row
/// from a fresher carrier wins, a stale retry is skipped.
pub fn stat_supersedes(incoming: GameStatus, stored: GameStatus) -> bool {
    incoming.freshness_rank() >= stored.freshness_rank()
}

#[derive(Clone)]
pub struct LoadEngine {
    store: Arc<EtlDb>,
}

impl LoadEngine {
    pub fn new(store: Arc<EtlDb>) -> Self {
        Self { store }
    }

    /// Load one game's payload in a single transaction.
    pub fn load_game_unit(&self, unit: &GameUnit) -> Result<LoadOutcome> {
        self.store.with_unit_txn(|conn| {
            let mut outcome = LoadOutcome::default();

            match db::get_game(conn, &unit.game.game_id)? {
                None => {
                    db::put_game(conn, &unit.game)?;
                    outcome.inserted += 1;
                }
                Some(stored) if game_supersedes(&unit.game, &stored) => {
                    db::put_game(conn, &unit.game)?;
                    outcome.updated += 1;
                }
                Some(_) => outcome.skipped += 1,
            }

            for player in &unit.players {
                db::put_player(conn, player)?;
            }

            for stat in &unit.stats {
                match db::get_stat_carrier(conn, &stat.game_id, &stat.player_id, &stat.metric)? {
                    None => {
                        db::put_stat(conn, stat)?;
                        outcome.inserted += 1;
                    }
                    Some(stored) if stat_supersedes(stat.carrier_status, stored) => {
                        db::put_stat(conn, stat)?;
                        outcome.updated += 1;
                    }
                    Some(_) => outcome.skipped += 1,
                }
            }

            for pitch in &unit.pitches {
                if db::put_pitch(conn, pitch)? {
                    outcome.inserted += 1;
                } else {
                    outcome.updated += 1;
                }
            }

            Ok(outcome)
        })
    }

    /// Append price observations. The (source, market, runner, observed_at)
    /// key makes replays naturally deduplicate; history is never merged.
    pub fn load_quotes(&self, quotes: &[MarketQuote]) -> Result<LoadOutcome> {
        if quotes.is_empty() {
            return Ok(LoadOutcome::default());
        }
        self.store.with_unit_txn(|conn| {
            let mut outcome = LoadOutcome::default();
            for quote in quotes {
                if db::insert_quote(conn, quote)? {
                    outcome.inserted += 1;
                } else {
                    outcome.skipped += 1;
                }
            }
            Ok(outcome)
        })
    }

    /// Insert new props and refresh still-open ones. Settled bets are
    /// immutable to the loader.
    pub fn upsert_props(&self, props: &[PropBet]) -> Result<LoadOutcome> {
        if props.is_empty() {
            return Ok(LoadOutcome::default());
        }
        self.store.with_unit_txn(|conn| {
            let mut outcome = LoadOutcome::default();
            for bet in props {
                match db::get_bet_status(conn, &bet.bet_id)? {
                    None => {
                        db::put_prop(conn, bet)?;
                        outcome.inserted += 1;
                    }
                    Some(BetStatus::Open) => {
                        db::put_prop(conn, bet)?;
                        outcome.updated += 1;
                    }
                    Some(_) => outcome.skipped += 1,
                }
            }
            Ok(outcome)
        })
    }
}

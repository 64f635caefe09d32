//! Settlement Engine: grades Open prop bets against Final box scores.
//!
//! Terminal states are never re-evaluated: the sweep scans only Open rows
//! and the status transition is guarded in SQL, so concurrent or repeated
//! sweeps converge on the same outcome. A bet whose game has not finished
//! simply stays Open; that is the steady state, not an error.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{BetSide, BetStatus, GameStatus, PropBet};
use crate::settlement::metrics::resolve_actual;
use crate::storage::{db, EtlDb};

/// Actuals within this distance of the line settle as Push. Absorbs float
/// noise from derived metrics; real stat values are far coarser than this.
pub const PUSH_EPSILON: f64 = 1e-3;

/// Grade an actual value against the line.
pub fn evaluate(side: BetSide, line: f64, actual: f64) -> BetStatus {
    if (actual - line).abs() < PUSH_EPSILON {
        return BetStatus::Push;
    }
    let won = match side {
        BetSide::Over => actual > line,
        BetSide::Under => actual < line,
    };
    if won {
        BetStatus::Won
    } else {
        BetStatus::Lost
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SettlementReport {
    pub checked: usize,
    pub won: usize,
    pub lost: usize,
    pub push: usize,
    pub void: usize,
    pub still_open: usize,
    pub unsupported: usize,
    pub errors: usize,
}

impl SettlementReport {
    pub fn settled(&self) -> usize {
        self.won + self.lost + self.push + self.void
    }
}

enum Decision {
    Settled(BetStatus),
    StillOpen,
    Unsupported,
}

pub struct SettlementEngine {
    store: Arc<EtlDb>,
}

impl SettlementEngine {
    pub fn new(store: Arc<EtlDb>) -> Self {
        Self { store }
    }

    /// One settlement sweep over every Open bet. Per-bet failures are
    /// counted and logged; the sweep itself only fails when the store does.
    pub fn settle_all(&self) -> Result<SettlementReport> {
        let open = self.store.open_bets()?;
        let mut report = SettlementReport {
            checked: open.len(),
            ..SettlementReport::default()
        };

        for bet in &open {
            match self.settle_one(bet) {
                Ok(Decision::Settled(outcome)) => match outcome {
                    BetStatus::Won => report.won += 1,
                    BetStatus::Lost => report.lost += 1,
                    BetStatus::Push => report.push += 1,
                    BetStatus::Void => report.void += 1,
                    BetStatus::Open => {}
                },
                Ok(Decision::StillOpen) => report.still_open += 1,
                Ok(Decision::Unsupported) => {
                    report.unsupported += 1;
                    debug!(bet_id = %bet.bet_id, metric = %bet.metric, "No settlement rule for metric");
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(bet_id = %bet.bet_id, error = format!("{e:#}"), "Settlement attempt failed");
                }
            }
        }

        info!(
            checked = report.checked,
            settled = report.settled(),
            won = report.won,
            lost = report.lost,
            push = report.push,
            void = report.void,
            still_open = report.still_open,
            unsupported = report.unsupported,
            "🎯 Settlement sweep complete"
        );
        Ok(report)
    }

    fn settle_one(&self, bet: &PropBet) -> Result<Decision> {
        // The referenced game is whatever the bet's team played on the bet's
        // date; a doubleheader is all of those games, and the actual value
        // sums across them.
        let games = self.store.team_games_on_date(&bet.team_id, bet.game_date)?;
        let covered: Vec<&_> = games
            .iter()
            .filter(|g| g.status != GameStatus::Postponed)
            .collect();

        // Not loaded yet, everything postponed, or still being played: all
        // of these wait for a later sweep.
        if covered.is_empty() || covered.iter().any(|g| g.status != GameStatus::Final) {
            return Ok(Decision::StillOpen);
        }

        let game_ids: Vec<String> = covered.iter().map(|g| g.game_id.clone()).collect();
        let totals = self.store.player_stat_totals(&bet.player_id, &game_ids)?;

        // Final coverage with zero stat rows means the player never took
        // the field. Distinct from a recorded zero, which grades normally.
        if totals.is_empty() {
            self.commit(bet, BetStatus::Void, None, Some("player absent from final box score"))?;
            return Ok(Decision::Settled(BetStatus::Void));
        }

        let Some(actual) = resolve_actual(&bet.metric, &totals) else {
            return Ok(Decision::Unsupported);
        };

        let outcome = evaluate(bet.side, bet.line_value, actual);
        self.commit(bet, outcome, Some(actual), None)?;
        Ok(Decision::Settled(outcome))
    }

    fn commit(
        &self,
        bet: &PropBet,
        outcome: BetStatus,
        actual: Option<f64>,
        note: Option<&str>,
    ) -> Result<()> {
        let applied = self.store.with_unit_txn(|conn| {
            db::mark_bet_settled(conn, &bet.bet_id, outcome, bet.line_value, actual, note)
        })?;
        if applied {
            info!(
                bet_id = %bet.bet_id,
                player = %bet.player_id,
                metric = %bet.metric,
                line = bet.line_value,
                actual = ?actual,
                outcome = outcome.as_str(),
                "Settled bet"
            );
        } else {
            debug!(bet_id = %bet.bet_id, "Bet already settled; leaving as-is");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    use crate::models::{BoxScoreStat, GameRecord, PlayerRecord};
    use crate::pipeline::load::{GameUnit, LoadEngine};

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 11).unwrap()
    }

    fn game(game_id: &str, status: GameStatus) -> GameRecord {
        GameRecord {
            game_id: game_id.to_string(),
            date: d(),
            home_team: "KC".to_string(),
            away_team: "CWS".to_string(),
            status,
            home_score: Some(2),
            away_score: Some(5),
            source: "statsapi".to_string(),
        }
    }

    fn stat(game_id: &str, player_id: &str, metric: &str, value: f64) -> BoxScoreStat {
        BoxScoreStat {
            game_id: game_id.to_string(),
            player_id: player_id.to_string(),
            metric: metric.to_string(),
            value,
            carrier_status: GameStatus::Final,
        }
    }

    fn bet(bet_id: &str, metric: &str, line: f64, side: BetSide) -> PropBet {
        PropBet {
            bet_id: bet_id.to_string(),
            source: "props".to_string(),
            player_id: "mlb-677951".to_string(),
            team_id: "KC".to_string(),
            game_date: d(),
            metric: metric.to_string(),
            line_value: line,
            side,
            status: BetStatus::Open,
            opened_at: Utc::now(),
        }
    }

    /// Store with one Final KC game and a 2-hit, 1-double line for Witt.
    fn loaded_store(status: GameStatus) -> (Arc<EtlDb>, SettlementEngine) {
        let store = Arc::new(EtlDb::open(":memory:").unwrap());
        let loader = LoadEngine::new(Arc::clone(&store));
        let mut unit = GameUnit {
            game: game("745001", status),
            players: vec![PlayerRecord {
                player_id: "mlb-677951".to_string(),
                display_name: "Bobby Witt Jr.".to_string(),
                team_id: Some("KC".to_string()),
            }],
            stats: vec![
                stat("745001", "mlb-677951", "hits", 2.0),
                stat("745001", "mlb-677951", "doubles", 1.0),
                stat("745001", "mlb-677951", "runs", 1.0),
                stat("745001", "mlb-677951", "rbi", 0.0),
            ],
            pitches: Vec::new(),
        };
        for s in &mut unit.stats {
            s.carrier_status = status;
        }
        loader.load_game_unit(&unit).unwrap();
        let engine = SettlementEngine::new(Arc::clone(&store));
        (store, engine)
    }

    #[test]
    fn test_evaluate_grading_rules() {
        assert_eq!(evaluate(BetSide::Over, 1.5, 2.0), BetStatus::Won);
        assert_eq!(evaluate(BetSide::Over, 1.5, 1.0), BetStatus::Lost);
        assert_eq!(evaluate(BetSide::Over, 1.5, 1.5), BetStatus::Push);
        assert_eq!(evaluate(BetSide::Under, 1.5, 1.0), BetStatus::Won);
        assert_eq!(evaluate(BetSide::Under, 1.5, 2.0), BetStatus::Lost);
        // Derived-metric float noise still pushes.
        assert_eq!(evaluate(BetSide::Over, 2.0, 2.0000004), BetStatus::Push);
    }

    #[test]
    fn test_over_settles_won_and_under_lost() {
        let (store, engine) = loaded_store(GameStatus::Final);
        let loader = LoadEngine::new(Arc::clone(&store));
        loader
            .upsert_props(&[
                bet("props-1", "hits", 1.5, BetSide::Over),
                bet("props-2", "hits", 1.5, BetSide::Under),
            ])
            .unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.won, 1);
        assert_eq!(report.lost, 1);

        let (status, actual) = store.settlement_outcome("props-1").unwrap().unwrap();
        assert_eq!(status, BetStatus::Won);
        assert_eq!(actual, Some(2.0));
    }

    #[test]
    fn test_exact_line_is_push() {
        let (_store, engine) = loaded_store(GameStatus::Final);
        let loader = LoadEngine::new(Arc::clone(&engine.store));
        loader
            .upsert_props(&[bet("props-3", "hits", 2.0, BetSide::Over)])
            .unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.push, 1);
    }

    #[test]
    fn test_absent_player_is_void_but_zero_stat_is_not() {
        let (store, engine) = loaded_store(GameStatus::Final);
        let loader = LoadEngine::new(Arc::clone(&store));

        // Scratched player: no stat rows at all in the final game.
        let mut scratched = bet("props-4", "hits", 0.5, BetSide::Over);
        scratched.player_id = "mlb-999999".to_string();
        // Played but recorded a zero: grades Lost, never Void.
        let zero = bet("props-5", "rbi", 0.5, BetSide::Over);
        loader.upsert_props(&[scratched, zero]).unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.void, 1);
        assert_eq!(report.lost, 1);

        let (status, actual) = store.settlement_outcome("props-4").unwrap().unwrap();
        assert_eq!(status, BetStatus::Void);
        assert_eq!(actual, None);
    }

    #[test]
    fn test_unfinished_game_leaves_bet_open() {
        let (store, engine) = loaded_store(GameStatus::InProgress);
        let loader = LoadEngine::new(Arc::clone(&store));
        loader
            .upsert_props(&[bet("props-6", "hits", 1.5, BetSide::Over)])
            .unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.still_open, 1);
        assert_eq!(report.settled(), 0);
        assert_eq!(store.open_bets().unwrap().len(), 1);
    }

    #[test]
    fn test_postponed_game_leaves_bet_open() {
        let (store, engine) = loaded_store(GameStatus::Postponed);
        let loader = LoadEngine::new(Arc::clone(&store));
        loader
            .upsert_props(&[bet("props-7", "hits", 1.5, BetSide::Over)])
            .unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.still_open, 1);
        assert!(store.settlement_outcome("props-7").unwrap().is_none());
    }

    #[test]
    fn test_doubleheader_sums_across_games() {
        let (store, engine) = loaded_store(GameStatus::Final);
        let loader = LoadEngine::new(Arc::clone(&store));
        // Second leg of the doubleheader.
        loader
            .load_game_unit(&GameUnit {
                game: game("745002", GameStatus::Final),
                players: Vec::new(),
                stats: vec![stat("745002", "mlb-677951", "hits", 2.0)],
                pitches: Vec::new(),
            })
            .unwrap();
        loader
            .upsert_props(&[bet("props-8", "hits", 3.5, BetSide::Over)])
            .unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.won, 1);

        let (_, actual) = store.settlement_outcome("props-8").unwrap().unwrap();
        assert_eq!(actual, Some(4.0));
    }

    #[test]
    fn test_derived_metric_settles() {
        let (store, engine) = loaded_store(GameStatus::Final);
        let loader = LoadEngine::new(Arc::clone(&store));
        // 2 hits with 1 double: total bases = 1 + 2 = 3.
        loader
            .upsert_props(&[bet("props-9", "total_bases", 2.5, BetSide::Over)])
            .unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.won, 1);
        let (_, actual) = store.settlement_outcome("props-9").unwrap().unwrap();
        assert_eq!(actual, Some(3.0));
    }

    #[test]
    fn test_unsupported_metric_stays_open() {
        let (store, engine) = loaded_store(GameStatus::Final);
        let loader = LoadEngine::new(Arc::clone(&store));
        loader
            .upsert_props(&[bet("props-10", "fantasy_score", 10.5, BetSide::Over)])
            .unwrap();

        let report = engine.settle_all().unwrap();
        assert_eq!(report.unsupported, 1);
        assert_eq!(store.open_bets().unwrap().len(), 1);
    }

    #[test]
    fn test_resweep_is_idempotent() {
        let (store, engine) = loaded_store(GameStatus::Final);
        let loader = LoadEngine::new(Arc::clone(&store));
        loader
            .upsert_props(&[bet("props-11", "hits", 1.5, BetSide::Over)])
            .unwrap();

        assert_eq!(engine.settle_all().unwrap().won, 1);

        // Terminal bets never re-enter the sweep.
        let second = engine.settle_all().unwrap();
        assert_eq!(second.checked, 0);
        assert_eq!(second.settled(), 0);
        let (status, _) = store.settlement_outcome("props-11").unwrap().unwrap();
        assert_eq!(status, BetStatus::Won);
    }
}

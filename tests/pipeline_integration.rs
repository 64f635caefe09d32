//! End-to-end pipeline tests over a staged payload directory.
//!
//! These drive the same public surface the `boxline` binary uses: the
//! file-drop providers, the daily game ETL, the market-board sync, and
//! the settlement sweep, all against one SQLite store on disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tempfile::TempDir;

use boxline_etl::identity::TEAM_REGISTRY;
use boxline_etl::models::{BetStatus, Config, EntityKind};
use boxline_etl::pipeline::{hydrate_resolver, BoardSync, GameEtl, GAME_ETL_JOB};
use boxline_etl::providers::{FileDropBoard, FileDropGames, GameDataProvider, MarketBoardProvider};
use boxline_etl::settlement::SettlementEngine;
use boxline_etl::storage::EtlDb;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn write_json(path: &Path, value: serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, value.to_string()).unwrap();
}

/// One Final game on 2024-04-11 with two batters and a pitch, plus a
/// board drop carrying one market quote and three props.
fn stage_payloads(root: &Path) {
    write_json(
        &root.join("2024-04-11").join("schedule.json"),
        json!([{
            "game_pk": 745001,
            "official_date": "2024-04-11",
            "status": "Final",
            "home_team": "Kansas City Royals",
            "away_team": "Chicago White Sox",
            "home_score": 2,
            "away_score": 5
        }]),
    );
    write_json(
        &root.join("games").join("745001.json"),
        json!({
            "box_scores": [
                {"player_id": 677951, "player_name": "Bobby Witt Jr.", "team": "KC",
                 "stats": {"hits": 2, "doubles": 1, "homeRuns": 0, "runs": 1, "rbis": 1}},
                {"player_id": 521692, "player_name": "Salvador Perez", "team": "KC",
                 "stats": {"hits": 0, "atBats": 3}}
            ],
            "pitches": [
                {"play_id": "745001-0001", "inning": 1, "pitcher_id": 669022,
                 "batter_id": 677951, "pitch_type": "FF",
                 "release_speed": 96.2, "release_spin": 2412, "outcome": "Ball"}
            ]
        }),
    );
    write_json(
        &root.join("board").join("props.json"),
        json!({
            "quotes": [
                {"market_id": "745001-total", "runner": "Over",
                 "line": 8.5, "american_odds": -110}
            ],
            "props": [
                {"prop_id": 101, "player_name": "Bobby Witt Jr.", "team": "KC",
                 "game_date": "2024-04-11", "stat_type": "Hits", "line": 1.5, "side": "over"},
                {"prop_id": 102, "player_name": "Salvador Perez", "team": "KC",
                 "game_date": "2024-04-11", "stat_type": "Hits", "line": 0.5, "side": "over"},
                {"prop_id": 103, "player_name": "Vinnie Pasquantino", "team": "KC",
                 "game_date": "2024-04-11", "stat_type": "Hits", "line": 0.5, "side": "over"}
            ]
        }),
    );
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        database_path: dir.path().join("etl.db").to_str().unwrap().to_string(),
        worker_count: 4,
        season_start: d(2024, 4, 11),
        fuzzy_max_distance: 2,
        max_window_days: None,
    }
}

#[tokio::test]
async fn test_full_pipeline_load_sync_settle_then_replay() {
    let dir = tempfile::tempdir().unwrap();
    stage_payloads(dir.path());
    let config = test_config(&dir);

    let store = Arc::new(EtlDb::open(&config.database_path).unwrap());
    store.seed_teams(TEAM_REGISTRY).unwrap();
    let resolver = Arc::new(hydrate_resolver(&store, config.fuzzy_max_distance).unwrap());

    // A fresh store runs [season_start, today - 1]; 04-12 has no schedule
    // drop and counts as an off-day, so the watermark clears both dates.
    let games: Arc<dyn GameDataProvider> = Arc::new(FileDropGames::new(dir.path(), "statsapi"));
    let etl = GameEtl::new(Arc::clone(&store), Arc::clone(&resolver), games, &config);
    let report = etl.run_daily(d(2024, 4, 13)).await.unwrap();

    assert_eq!(report.window.start, d(2024, 4, 11));
    assert_eq!(report.window.end, d(2024, 4, 12));
    assert!(report.dates.iter().all(|day| day.clean));
    assert_eq!(report.watermark.advanced_to, Some(d(2024, 4, 12)));
    assert!(report.aliases_persisted > 0);

    let totals = store
        .player_stat_totals("mlb-677951", &["745001".to_string()])
        .unwrap();
    assert_eq!(totals["hits"], 2.0);
    assert_eq!(totals["rbi"], 1.0, "rbis synonym folds to rbi");

    // Board sync. Pasquantino is known from a roster import but sat the
    // game out, so his prop lands and later voids.
    resolver.register_entity(
        EntityKind::Player,
        "mlb-686469",
        "Vinnie Pasquantino",
        Some("KC"),
        None,
    );
    let board: Arc<dyn MarketBoardProvider> = Arc::new(FileDropBoard::new(dir.path(), "props"));
    let sync = BoardSync::new(Arc::clone(&store), Arc::clone(&resolver));
    let snapshot_time = Utc::now();
    let board_report = sync.run(&[Arc::clone(&board)], snapshot_time).await.unwrap();

    assert_eq!(board_report.sources.len(), 1);
    assert_eq!(board_report.sources[0].quotes.inserted, 1);
    assert_eq!(board_report.sources[0].props.inserted, 3);
    assert_eq!(board_report.sources[0].records_skipped, 0);
    assert!(!board_report.sources[0].failed);
    // One team alias plus three player aliases learned for this book.
    assert_eq!(board_report.aliases_persisted, 4);

    // Settlement: 2 hits beats 1.5, 0 hits loses against 0.5, and the
    // absent player's bet voids rather than counting as zero.
    let engine = SettlementEngine::new(Arc::clone(&store));
    let settle = engine.settle_all().unwrap();
    assert_eq!(settle.checked, 3);
    assert_eq!(settle.won, 1);
    assert_eq!(settle.lost, 1);
    assert_eq!(settle.void, 1);
    assert_eq!(settle.still_open, 0);
    assert_eq!(settle.errors, 0);

    assert_eq!(
        store.settlement_outcome("props-101").unwrap(),
        Some((BetStatus::Won, Some(2.0)))
    );
    assert_eq!(
        store.settlement_outcome("props-102").unwrap(),
        Some((BetStatus::Lost, Some(0.0)))
    );
    assert_eq!(
        store.settlement_outcome("props-103").unwrap(),
        Some((BetStatus::Void, None))
    );

    // Replays: the daily window is empty, the same board snapshot lands
    // nothing new, and settled bets are never re-examined.
    let report = etl.run_daily(d(2024, 4, 13)).await.unwrap();
    assert!(report.window.is_empty());
    assert!(report.dates.is_empty());
    assert_eq!(store.watermark(GAME_ETL_JOB).unwrap(), Some(d(2024, 4, 12)));

    let replay = sync.run(&[board], snapshot_time).await.unwrap();
    assert_eq!(replay.sources[0].quotes.inserted, 0);
    assert_eq!(replay.sources[0].quotes.skipped, 1);
    assert_eq!(replay.sources[0].props.skipped, 3);
    assert_eq!(replay.aliases_persisted, 0);
    assert_eq!(store.quote_history("745001-total", "over").unwrap().len(), 1);

    let resweep = engine.settle_all().unwrap();
    assert_eq!(resweep.checked, 0);

    let counts = store.counts().unwrap();
    assert_eq!(counts.games, 1);
    assert_eq!(counts.players, 2);
    assert_eq!(counts.box_score_stats, 7);
    assert_eq!(counts.pitch_events, 1);
    assert_eq!(counts.market_quotes, 1);
    assert_eq!(counts.prop_bets, 3);
    assert_eq!(counts.open_bets, 0);
    assert_eq!(counts.settlements, 3);
}

#[tokio::test]
async fn test_resolver_rehydrates_from_disk_between_processes() {
    let dir = tempfile::tempdir().unwrap();
    stage_payloads(dir.path());
    let config = test_config(&dir);

    // First process: load the window, flushing players and aliases.
    {
        let store = Arc::new(EtlDb::open(&config.database_path).unwrap());
        store.seed_teams(TEAM_REGISTRY).unwrap();
        let resolver = Arc::new(hydrate_resolver(&store, config.fuzzy_max_distance).unwrap());
        let games: Arc<dyn GameDataProvider> = Arc::new(FileDropGames::new(dir.path(), "statsapi"));
        let etl = GameEtl::new(Arc::clone(&store), resolver, games, &config);
        let report = etl.run_daily(d(2024, 4, 13)).await.unwrap();
        assert!(report.aliases_persisted > 0);
    }

    // Second process: a cold resolver rebuilt from the store still knows
    // the players and keeps the watermark where the first run left it.
    let store = Arc::new(EtlDb::open(&config.database_path).unwrap());
    let resolver = hydrate_resolver(&store, config.fuzzy_max_distance).unwrap();

    assert_eq!(resolver.entity_count(EntityKind::Player), 2);
    assert!(resolver.alias_count() > 0);
    assert_eq!(store.watermark(GAME_ETL_JOB).unwrap(), Some(d(2024, 4, 12)));

    // Suffix-insensitive name matching works off the rebuilt table.
    let id = resolver
        .resolve_player("somebook", "bobby witt", None)
        .unwrap();
    assert_eq!(id, "mlb-677951");
}

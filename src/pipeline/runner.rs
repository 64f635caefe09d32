//! Pipeline runners: the daily game ETL and the market-board sync.
//!
//! `GameEtl` walks the pending date window, fans each date's games out to
//! the worker pool, and advances the watermark through whatever prefix
//! completed clean. `BoardSync` pulls market boards and lands quotes and
//! props. Both flush newly learned aliases to the store at the end of a
//! run so later processes start from everything this one figured out.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::identity::IdentityResolver;
use crate::models::{Config, DateRange, EntityKind, GameRecord, GameStatus, MarketQuote};
use crate::providers::{GameDataProvider, MarketBoardProvider};
use crate::storage::EtlDb;

use super::batch::BatchCoordinator;
use super::load::{GameUnit, LoadEngine, LoadOutcome};
use super::normalize::RecordNormalizer;
use super::window::{WatermarkAdvance, WindowSelector};

pub const GAME_ETL_JOB: &str = "game-etl";

/// Rebuild the in-memory resolver from the store: the club registry,
/// every known player, and every persisted alias.
pub fn hydrate_resolver(store: &EtlDb, fuzzy_max_distance: usize) -> Result<IdentityResolver> {
    let resolver = IdentityResolver::with_seeded_teams(fuzzy_max_distance);
    for player in store.all_players()? {
        resolver.register_entity(
            EntityKind::Player,
            &player.player_id,
            &player.display_name,
            player.team_id.as_deref(),
            None,
        );
    }
    for alias in store.all_aliases()? {
        resolver.import_alias(&alias.source, alias.kind, &alias.alias, &alias.canonical_id);
    }
    debug!(
        aliases = resolver.alias_count(),
        players = resolver.entity_count(EntityKind::Player),
        "Resolver hydrated"
    );
    Ok(resolver)
}

/// Outcome of one window date, in window order.
#[derive(Debug, Serialize)]
pub struct DateOutcome {
    pub date: NaiveDate,
    pub units_total: usize,
    pub units_failed: Vec<(String, String)>,
    /// Games already stored Final, whose unit committed in a prior run.
    pub units_skipped: usize,
    /// Individual records dropped by validation or unresolved identity.
    pub records_skipped: usize,
    pub load: LoadOutcome,
    pub clean: bool,
}

impl DateOutcome {
    fn schedule_failed(date: NaiveDate) -> Self {
        Self {
            date,
            units_total: 0,
            units_failed: Vec::new(),
            units_skipped: 0,
            records_skipped: 0,
            load: LoadOutcome::default(),
            clean: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EtlRunReport {
    pub run_id: Uuid,
    pub window: DateRange,
    pub dates: Vec<DateOutcome>,
    pub watermark: WatermarkAdvance,
    pub aliases_persisted: usize,
}

pub struct GameEtl {
    store: Arc<EtlDb>,
    resolver: Arc<IdentityResolver>,
    provider: Arc<dyn GameDataProvider>,
    normalizer: RecordNormalizer,
    loader: LoadEngine,
    window: WindowSelector,
    coordinator: BatchCoordinator,
}

impl GameEtl {
    pub fn new(
        store: Arc<EtlDb>,
        resolver: Arc<IdentityResolver>,
        provider: Arc<dyn GameDataProvider>,
        config: &Config,
    ) -> Self {
        Self {
            normalizer: RecordNormalizer::new(Arc::clone(&resolver)),
            loader: LoadEngine::new(Arc::clone(&store)),
            window: WindowSelector::new(
                Arc::clone(&store),
                config.season_start,
                config.max_window_days,
            ),
            coordinator: BatchCoordinator::new(config.worker_count),
            store,
            resolver,
            provider,
        }
    }

    /// One incremental run: process [watermark + 1, today - 1] date by
    /// date, then advance the watermark through the clean prefix.
    pub async fn run_daily(&self, today: NaiveDate) -> Result<EtlRunReport> {
        let run_id = Uuid::new_v4();
        let window = self.window.next_window(GAME_ETL_JOB, today)?;
        if window.is_empty() {
            info!(run_id = %run_id, "Window is empty; already caught up");
            return Ok(EtlRunReport {
                run_id,
                window,
                dates: Vec::new(),
                watermark: WatermarkAdvance {
                    advanced_to: None,
                    blocked_at: None,
                },
                aliases_persisted: 0,
            });
        }
        info!(
            run_id = %run_id,
            start = %window.start,
            end = %window.end,
            days = window.num_days(),
            "🚀 Game ETL window"
        );

        let mut dates = Vec::with_capacity(window.num_days() as usize);
        for date in window.days() {
            dates.push(self.run_date(date).await?);
        }

        let date_results: Vec<(NaiveDate, bool)> =
            dates.iter().map(|d| (d.date, d.clean)).collect();
        let watermark = self.window.advance_after_run(GAME_ETL_JOB, &date_results)?;
        let aliases_persisted = self.flush_aliases()?;

        info!(
            run_id = %run_id,
            advanced_to = ?watermark.advanced_to,
            blocked_at = ?watermark.blocked_at,
            aliases = aliases_persisted,
            "Game ETL run complete"
        );
        Ok(EtlRunReport {
            run_id,
            window,
            dates,
            watermark,
            aliases_persisted,
        })
    }

    /// Process one date: schedule, then every pending game as an
    /// independent unit on the worker pool. Only store-level failures
    /// propagate; source failures dirty the date and are retried next run.
    async fn run_date(&self, date: NaiveDate) -> Result<DateOutcome> {
        let schedule = match self.provider.schedule_for_date(date).await {
            Ok(records) => records,
            Err(e) => {
                warn!(date = %date, error = format!("{e:#}"), "Schedule fetch failed; date stays pending");
                return Ok(DateOutcome::schedule_failed(date));
            }
        };

        let mut records_skipped = 0usize;
        let mut games = Vec::new();
        for raw in &schedule {
            match self.normalizer.normalize_game(raw) {
                Ok(game) => games.push(game),
                Err(e) => {
                    records_skipped += 1;
                    warn!(date = %date, error = %e, "Skipping malformed schedule record");
                }
            }
        }

        for game in &games {
            self.resolver.register_entity(
                EntityKind::Game,
                &game.game_id,
                &game.game_id,
                None,
                Some((self.provider.source_name(), &game.game_id)),
            );
        }

        // A stored Final game was committed whole (its unit is atomic), so
        // there is nothing left to fetch for it.
        let prior: HashMap<String, GameStatus> = self
            .store
            .games_on_date(date)?
            .into_iter()
            .map(|g| (g.game_id, g.status))
            .collect();

        let mut units: Vec<String> = Vec::new();
        let mut by_id: HashMap<String, GameRecord> = HashMap::new();
        let mut units_skipped = 0usize;
        for game in games {
            if prior.get(&game.game_id) == Some(&GameStatus::Final) {
                units_skipped += 1;
                continue;
            }
            units.push(game.game_id.clone());
            by_id.insert(game.game_id.clone(), game);
        }

        if units.is_empty() {
            debug!(date = %date, skipped = units_skipped, "No pending games on date");
            return Ok(DateOutcome {
                date,
                units_total: 0,
                units_failed: Vec::new(),
                units_skipped,
                records_skipped,
                load: LoadOutcome::default(),
                clean: true,
            });
        }

        let load_totals = Arc::new(Mutex::new(LoadOutcome::default()));
        let skips = Arc::new(AtomicUsize::new(records_skipped));
        let by_id = Arc::new(by_id);

        let provider = Arc::clone(&self.provider);
        let resolver = Arc::clone(&self.resolver);
        let normalizer = self.normalizer.clone();
        let loader = self.loader.clone();
        let totals = Arc::clone(&load_totals);
        let skip_counter = Arc::clone(&skips);

        let report = self
            .coordinator
            .run(units, move |game_id: String| {
                let provider = Arc::clone(&provider);
                let resolver = Arc::clone(&resolver);
                let normalizer = normalizer.clone();
                let loader = loader.clone();
                let by_id = Arc::clone(&by_id);
                let totals = Arc::clone(&totals);
                let skips = Arc::clone(&skip_counter);
                async move {
                    let game = by_id
                        .get(&game_id)
                        .cloned()
                        .context("unit refers to an unknown game")?;
                    let outcome =
                        load_one_game(provider, &resolver, &normalizer, &loader, game, &skips)
                            .await?;
                    totals.lock().merge(outcome);
                    Ok(())
                }
            })
            .await;

        let units_failed: Vec<(String, String)> = report
            .failed
            .iter()
            .map(|(unit, e)| (unit.clone(), format!("{e:#}")))
            .collect();
        let clean = report.is_clean();
        let load = *load_totals.lock();
        let records_skipped = skips.load(Ordering::Relaxed);

        info!(
            date = %date,
            units = report.total(),
            failed = units_failed.len(),
            already_final = units_skipped,
            inserted = load.inserted,
            updated = load.updated,
            skipped_rows = load.skipped,
            elapsed = ?report.elapsed,
            "📦 Date batch done"
        );
        Ok(DateOutcome {
            date,
            units_total: report.total(),
            units_failed,
            units_skipped,
            records_skipped,
            load,
            clean,
        })
    }

    fn flush_aliases(&self) -> Result<usize> {
        let learned = self.resolver.drain_learned();
        if learned.is_empty() {
            return Ok(0);
        }
        self.store.persist_aliases(&learned)
    }
}

/// Fetch, normalize, and atomically load one game's full payload.
async fn load_one_game(
    provider: Arc<dyn GameDataProvider>,
    resolver: &IdentityResolver,
    normalizer: &RecordNormalizer,
    loader: &LoadEngine,
    game: GameRecord,
    skips: &AtomicUsize,
) -> Result<LoadOutcome> {
    let feed = provider
        .game_feed(&game.game_id)
        .await
        .with_context(|| format!("fetching feed for game {}", game.game_id))?;

    // A finished game with no published box score is a feed gap, not an
    // empty game. Fail the unit so the date stays pending and retries.
    if game.status == GameStatus::Final && feed.box_scores.is_empty() {
        anyhow::bail!("no box score payload for final game {}", game.game_id);
    }

    let mut unit = GameUnit {
        game: game.clone(),
        players: Vec::new(),
        stats: Vec::new(),
        pitches: Vec::new(),
    };

    for raw in &feed.box_scores {
        match normalizer.normalize_box_score(raw, &game) {
            Ok(row) => {
                resolver.register_entity(
                    EntityKind::Player,
                    &row.player.player_id,
                    &row.player.display_name,
                    row.player.team_id.as_deref(),
                    Some((raw.source.as_str(), row.player.display_name.as_str())),
                );
                unit.players.push(row.player);
                unit.stats.extend(row.stats);
            }
            Err(e) => {
                skips.fetch_add(1, Ordering::Relaxed);
                warn!(game = %game.game_id, error = %e, "Skipping box score record");
            }
        }
    }

    for raw in &feed.pitches {
        match normalizer.normalize_pitch(raw, &game.game_id) {
            Ok(pitch) => unit.pitches.push(pitch),
            Err(e) => {
                skips.fetch_add(1, Ordering::Relaxed);
                debug!(game = %game.game_id, error = %e, "Skipping pitch record");
            }
        }
    }

    loader.load_game_unit(&unit)
}

/// Outcome of syncing one market source.
#[derive(Debug, Serialize)]
pub struct SourceBoardOutcome {
    pub source: String,
    pub quotes: LoadOutcome,
    pub props: LoadOutcome,
    pub records_skipped: usize,
    pub failed: bool,
}

#[derive(Debug, Serialize)]
pub struct BoardSyncReport {
    pub run_id: Uuid,
    pub sources: Vec<SourceBoardOutcome>,
    pub aliases_persisted: usize,
}

pub struct BoardSync {
    store: Arc<EtlDb>,
    resolver: Arc<IdentityResolver>,
    normalizer: RecordNormalizer,
    loader: LoadEngine,
}

impl BoardSync {
    pub fn new(store: Arc<EtlDb>, resolver: Arc<IdentityResolver>) -> Self {
        Self {
            normalizer: RecordNormalizer::new(Arc::clone(&resolver)),
            loader: LoadEngine::new(Arc::clone(&store)),
            store,
            resolver,
        }
    }

    /// Pull every board once. Source failures are isolated: one dead book
    /// never blocks the others.
    pub async fn run(
        &self,
        providers: &[Arc<dyn MarketBoardProvider>],
        observed_at: DateTime<Utc>,
    ) -> Result<BoardSyncReport> {
        let run_id = Uuid::new_v4();
        let mut sources = Vec::with_capacity(providers.len());
        for provider in providers {
            sources.push(self.sync_source(provider.as_ref(), observed_at).await);
        }

        let learned = self.resolver.drain_learned();
        let aliases_persisted = if learned.is_empty() {
            0
        } else {
            self.store.persist_aliases(&learned)?
        };

        info!(
            run_id = %run_id,
            sources = sources.len(),
            aliases = aliases_persisted,
            "Board sync complete"
        );
        Ok(BoardSyncReport {
            run_id,
            sources,
            aliases_persisted,
        })
    }

    async fn sync_source(
        &self,
        provider: &dyn MarketBoardProvider,
        observed_at: DateTime<Utc>,
    ) -> SourceBoardOutcome {
        let source = provider.source_name().to_string();
        let board = match provider.board().await {
            Ok(board) => board,
            Err(e) => {
                warn!(source = %source, error = format!("{e:#}"), "Board fetch failed");
                return SourceBoardOutcome {
                    source,
                    quotes: LoadOutcome::default(),
                    props: LoadOutcome::default(),
                    records_skipped: 0,
                    failed: true,
                };
            }
        };

        let mut records_skipped = 0usize;
        let mut failed = false;

        // One market's quotes are one atomic unit.
        let mut by_market: BTreeMap<String, Vec<MarketQuote>> = BTreeMap::new();
        for raw in &board.quotes {
            match self.normalizer.normalize_quote(raw, observed_at) {
                Ok(quote) => by_market
                    .entry(quote.market_id.clone())
                    .or_default()
                    .push(quote),
                Err(e) => {
                    records_skipped += 1;
                    debug!(source = %source, error = %e, "Skipping quote record");
                }
            }
        }
        let mut quotes = LoadOutcome::default();
        for (market_id, batch) in by_market {
            match self.loader.load_quotes(&batch) {
                Ok(outcome) => quotes.merge(outcome),
                Err(e) => {
                    failed = true;
                    warn!(source = %source, market = %market_id, error = format!("{e:#}"), "Quote unit failed");
                }
            }
        }

        let mut pending_props = Vec::new();
        for raw in &board.props {
            match self.normalizer.normalize_prop(raw, observed_at) {
                Ok(prop) => pending_props.push(prop),
                Err(e) => {
                    // Usually a player the game feed has not introduced
                    // yet; the offer stays on the board and retries.
                    records_skipped += 1;
                    debug!(source = %source, error = %e, "Skipping prop record");
                }
            }
        }
        let props = match self.loader.upsert_props(&pending_props) {
            Ok(outcome) => outcome,
            Err(e) => {
                failed = true;
                warn!(source = %source, error = format!("{e:#}"), "Prop unit failed");
                LoadOutcome::default()
            }
        };

        info!(
            source = %source,
            quotes_inserted = quotes.inserted,
            props_inserted = props.inserted,
            props_updated = props.updated,
            skipped = records_skipped,
            "📦 Board source done"
        );
        SourceBoardOutcome {
            source,
            quotes,
            props,
            records_skipped,
            failed,
        }
    }
}

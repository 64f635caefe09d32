//! boxline: consolidated game-feed and betting-market ETL.
//!
//! Subcommands map to the pipeline's phases:
//!   daily   ingest the pending window of game data
//!   board   ingest market board snapshots (quotes and props)
//!   settle  grade open prop bets against final box scores
//!   status  show store counts and job watermarks

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxline_etl::identity::TEAM_REGISTRY;
use boxline_etl::models::Config;
use boxline_etl::pipeline::{hydrate_resolver, BoardSync, GameEtl};
use boxline_etl::providers::{FileDropBoard, FileDropGames, GameDataProvider, MarketBoardProvider};
use boxline_etl::settlement::SettlementEngine;
use boxline_etl::storage::EtlDb;

#[derive(Parser, Debug)]
#[command(name = "boxline")]
#[command(about = "Consolidate game feeds and betting markets into one queryable store")]
struct Args {
    /// Root directory for file-drop payloads
    #[arg(long, default_value = "./payloads")]
    data_dir: String,

    /// Primary game-data source name
    #[arg(long, default_value = "statsapi")]
    game_source: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest the pending date window of game data
    Daily {
        /// Override "today" (YYYY-MM-DD) when replaying history
        #[arg(long)]
        today: Option<String>,
    },

    /// Ingest market board snapshots (quotes and props)
    Board {
        /// Comma-separated board source names
        #[arg(long, default_value = "oddsboard,props")]
        sources: String,
    },

    /// Grade open prop bets against final box scores
    Settle,

    /// Show store counts and job watermarks
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let config = Config::from_env()?;

    let store = Arc::new(EtlDb::open(&config.database_path)?);
    store.seed_teams(TEAM_REGISTRY)?;
    let resolver = Arc::new(hydrate_resolver(&store, config.fuzzy_max_distance)?);

    match args.command {
        Commands::Daily { today } => {
            let today = match today {
                Some(text) => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .with_context(|| format!("--today {text:?} is not a YYYY-MM-DD date"))?,
                None => Utc::now().date_naive(),
            };
            info!(source = %args.game_source, %today, "🚀 Daily game ETL");
            let provider: Arc<dyn GameDataProvider> = Arc::new(FileDropGames::new(
                args.data_dir.as_str(),
                args.game_source.as_str(),
            ));
            let etl = GameEtl::new(Arc::clone(&store), resolver, provider, &config);
            let report = etl.run_daily(today).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Board { sources } => {
            let providers: Vec<Arc<dyn MarketBoardProvider>> = sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|name| {
                    Arc::new(FileDropBoard::new(args.data_dir.as_str(), name))
                        as Arc<dyn MarketBoardProvider>
                })
                .collect();
            info!(sources = providers.len(), "🚀 Market board sync");
            let sync = BoardSync::new(Arc::clone(&store), resolver);
            let report = sync.run(&providers, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Settle => {
            info!("🚀 Settlement sweep");
            let engine = SettlementEngine::new(Arc::clone(&store));
            let report = engine.settle_all()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Status => print_status(&store)?,
    }

    Ok(())
}

fn print_status(store: &EtlDb) -> Result<()> {
    let counts = store.counts()?;
    println!("Store status");
    println!("------------");
    println!("  games           : {}", counts.games);
    println!("  players         : {}", counts.players);
    println!("  box score stats : {}", counts.box_score_stats);
    println!("  pitch events    : {}", counts.pitch_events);
    println!("  market quotes   : {}", counts.market_quotes);
    println!(
        "  prop bets       : {} ({} open)",
        counts.prop_bets, counts.open_bets
    );
    println!("  settlements     : {}", counts.settlements);
    println!("  aliases         : {}", counts.aliases);
    println!();

    let watermarks = store.watermarks()?;
    if watermarks.is_empty() {
        println!("No job watermarks yet");
    } else {
        for (job, date) in watermarks {
            println!("  {job} watermark : {date}");
        }
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxline_etl=info,boxline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the manifest dir for
    // runs launched from elsewhere with --manifest-path.
    let _ = dotenv();
    let candidate = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

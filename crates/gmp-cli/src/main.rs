use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use gmp_pipeline::{
    Backtester, ConfigPaths, EngineConfig, OpenMeteoFetcher, RouteCatalog, Scheduler,
    SolarCalculator, SystemClock, ViewpointCatalog,
};
use gmp_scoring::ScoreEngine;
use gmp_storage::{HttpFetcher, SqliteWeatherStore, WeatherCache};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gmp")]
#[command(about = "Golden Mountain Planner: score sunrise, sunset and sky events for mountain viewpoints")]
struct Cli {
    /// Engine config file; defaults to GMP_CONFIG or config/engine_config.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured log level. RUST_LOG wins over both.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Forecast one viewpoint.
    Predict {
        viewpoint: String,
        #[arg(long)]
        days: Option<u32>,
        #[arg(long, value_delimiter = ',')]
        events: Vec<String>,
    },
    /// Forecast every stop of a route.
    Route {
        route: String,
        #[arg(long)]
        days: Option<u32>,
        #[arg(long, value_delimiter = ',')]
        events: Vec<String>,
    },
    /// Score a past date against cached or archived weather.
    Backtest {
        viewpoint: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, value_delimiter = ',')]
        events: Vec<String>,
        /// Record the scores in the prediction history.
        #[arg(long)]
        save: bool,
    },
    /// List configured viewpoints, or routes with --routes.
    List {
        #[arg(long)]
        routes: bool,
    },
}

struct App {
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
    backtester: Backtester,
}

impl App {
    async fn build(paths: &ConfigPaths, config: EngineConfig) -> Result<Self> {
        let offset = config.utc_offset()?;
        let viewpoints = ViewpointCatalog::load_dir(&paths.viewpoints_dir).await?;
        let routes = RouteCatalog::load_dir(&paths.routes_dir).await?;

        if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let store = SqliteWeatherStore::open(&config.db_path)
            .await
            .with_context(|| format!("opening {}", config.db_path.display()))?;
        let cache = WeatherCache::new(Arc::new(store));

        let clock = Arc::new(SystemClock::new(offset));
        let http = Arc::new(HttpFetcher::new(config.open_meteo.http_client_config())?);
        let fetcher = Arc::new(OpenMeteoFetcher::new(
            http,
            cache.clone(),
            clock.clone(),
            config.open_meteo.clone(),
        ));
        let engine = ScoreEngine::with_builtin_plugins(&config.scoring)?;

        let scheduler = Arc::new(
            Scheduler::new(
                Arc::new(viewpoints),
                Arc::new(routes),
                engine,
                fetcher.clone(),
                Arc::new(SolarCalculator::new(offset)),
                clock,
            )
            .with_confidence(config.confidence.clone())
            .with_light_path(config.light_path.clone()),
        );
        let backtester = Backtester::new(
            scheduler.clone(),
            fetcher,
            cache,
            config.backtest_max_history_days,
        );

        Ok(Self {
            config,
            scheduler,
            backtester,
        })
    }

    fn days(&self, days: Option<u32>) -> Result<u32> {
        let days = days.unwrap_or(self.config.forecast_days);
        if !(1..=16).contains(&days) {
            bail!("--days must be within 1..=16, got {days}");
        }
        Ok(days)
    }
}

#[derive(Serialize)]
struct ListEntry<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stops: Option<usize>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn event_filter(events: &[String]) -> Option<&[String]> {
    (!events.is_empty()).then_some(events)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut paths = ConfigPaths::from_env();
    if let Some(config) = cli.config {
        paths.config_file = config;
    }
    let config = EngineConfig::from_paths(&paths).await?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let app = App::build(&paths, config).await?;
    info!(config = %paths.config_file.display(), "engine ready");

    match cli.command {
        Commands::Predict {
            viewpoint,
            days,
            events,
        } => {
            let days = app.days(days)?;
            let result = app
                .scheduler
                .run(&viewpoint, days, event_filter(&events))
                .await?;
            print_json(&result)?;
        }
        Commands::Route {
            route,
            days,
            events,
        } => {
            let days = app.days(days)?;
            let results = app
                .scheduler
                .run_route(&route, days, event_filter(&events))
                .await?;
            print_json(&results)?;
        }
        Commands::Backtest {
            viewpoint,
            date,
            events,
            save,
        } => {
            let report = app
                .backtester
                .run(&viewpoint, date, event_filter(&events), save)
                .await?;
            print_json(&report)?;
        }
        Commands::List { routes } => {
            let entries: Vec<ListEntry<'_>> = if routes {
                app.scheduler
                    .routes()
                    .list()
                    .map(|r| ListEntry {
                        id: &r.id,
                        name: &r.name,
                        stops: Some(r.stops.len()),
                    })
                    .collect()
            } else {
                app.scheduler
                    .viewpoints()
                    .list()
                    .map(|vp| ListEntry {
                        id: &vp.id,
                        name: &vp.name,
                        stops: None,
                    })
                    .collect()
            };
            print_json(&entries)?;
        }
    }

    Ok(())
}

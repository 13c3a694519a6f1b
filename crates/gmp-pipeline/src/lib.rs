//! Forecast pipeline: configuration, weather and astronomy collaborators,
//! the orchestrator and the backtester.

pub mod astro;
pub mod backtest;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod scheduler;

pub use astro::{AstronomyProvider, SolarCalculator};
pub use backtest::{BacktestReport, BacktestSource, Backtester};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigPaths, EngineConfig, RouteCatalog, ViewpointCatalog};
pub use fetch::{OpenMeteoFetcher, WeatherFetcher};
pub use scheduler::{DataPlan, PlannedPath, Scheduler};

pub const CRATE_NAME: &str = "gmp-pipeline";
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

//! Weather cache, persistent weather table and HTTP fetch utilities.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use gmp_core::{CoordKey, WeatherRow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod http;
pub mod store;

pub use http::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
pub use store::{MemoryWeatherStore, SqliteWeatherStore};

pub const CRATE_NAME: &str = "gmp-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("creating database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Where a cached row came from; decides how it ages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Forecast,
    Archive,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Forecast => "forecast",
            DataSource::Archive => "archive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "forecast" => Some(DataSource::Forecast),
            "archive" => Some(DataSource::Archive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRow {
    pub row: WeatherRow,
    pub fetched_at: DateTime<Utc>,
    pub source: DataSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub viewpoint_id: String,
    pub prediction_date: DateTime<FixedOffset>,
    pub target_date: NaiveDate,
    pub event_type: String,
    pub predicted_score: u8,
    pub predicted_status: String,
    pub confidence: String,
    pub is_backtest: bool,
    pub data_source: String,
}

/// `upsert` replaces any existing row with the same four-part key.
#[async_trait]
pub trait WeatherStore: Send + Sync {
    async fn query(&self, key: CoordKey, date: NaiveDate) -> Result<Vec<CachedRow>, StorageError>;

    async fn upsert(&self, key: CoordKey, rows: &[CachedRow]) -> Result<(), StorageError>;

    async fn save_prediction(&self, record: &PredictionRecord) -> Result<(), StorageError>;

    async fn predictions(
        &self,
        viewpoint_id: &str,
        target_date: NaiveDate,
    ) -> Result<Vec<PredictionRecord>, StorageError>;
}

/// Forecast rows are fresh only on the day they were fetched; archive rows never age.
pub fn is_fresh(fetched_at: DateTime<Utc>, source: DataSource, now: DateTime<FixedOffset>) -> bool {
    match source {
        DataSource::Archive => true,
        DataSource::Forecast => {
            fetched_at.with_timezone(now.offset()).date_naive() == now.date_naive()
        }
    }
}

#[derive(Clone)]
pub struct WeatherCache {
    store: Arc<dyn WeatherStore>,
}

impl WeatherCache {
    pub fn new(store: Arc<dyn WeatherStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn WeatherStore> {
        &self.store
    }

    pub async fn get(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
        hours: Option<&[u32]>,
    ) -> Result<Option<Vec<CachedRow>>, StorageError> {
        let mut rows = self.store.query(CoordKey::new(lat, lon), date).await?;
        if let Some(hours) = hours {
            rows.retain(|cached| hours.contains(&cached.row.forecast_hour));
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows))
    }

    pub async fn set(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
        rows: &[WeatherRow],
        source: DataSource,
    ) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        let fetched_at = Utc::now();
        let stamped = rows
            .iter()
            .map(|row| CachedRow {
                row: WeatherRow {
                    forecast_date: date,
                    ..row.clone()
                },
                fetched_at,
                source,
            })
            .collect::<Vec<_>>();
        self.store.upsert(CoordKey::new(lat, lon), &stamped).await
    }

    /// Cache-first read. A failing `fetch` leaves the cache untouched.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
        source: DataSource,
        fetch: F,
    ) -> Result<Vec<WeatherRow>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<WeatherRow>, E>>,
        E: From<StorageError>,
    {
        let key = CoordKey::new(lat, lon);
        if let Some(cached) = self.get(lat, lon, date, None).await? {
            debug!(coord = %key, %date, rows = cached.len(), "weather cache hit");
            return Ok(cached.into_iter().map(|c| c.row).collect());
        }
        debug!(coord = %key, %date, "weather cache miss");
        let rows = fetch().await?;
        self.set(lat, lon, date, &rows, source).await?;
        Ok(rows)
    }
}

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use gmp_core::{CoordKey, WeatherRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::{Mutex, RwLock};

use crate::{CachedRow, DataSource, PredictionRecord, StorageError, WeatherStore};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS weather_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lat_rounded REAL NOT NULL,
        lon_rounded REAL NOT NULL,
        forecast_date TEXT NOT NULL,
        forecast_hour INTEGER NOT NULL,
        fetched_at TEXT NOT NULL,
        api_source TEXT NOT NULL DEFAULT 'forecast',
        temperature_2m REAL NOT NULL,
        cloud_cover_total REAL NOT NULL,
        cloud_cover_low REAL NOT NULL,
        cloud_cover_medium REAL NOT NULL,
        cloud_cover_high REAL NOT NULL,
        cloud_base_altitude REAL NOT NULL,
        precipitation_probability REAL NOT NULL,
        visibility REAL NOT NULL,
        wind_speed_10m REAL NOT NULL,
        snowfall REAL NOT NULL,
        rain REAL NOT NULL,
        showers REAL NOT NULL,
        weather_code INTEGER NOT NULL,
        UNIQUE(lat_rounded, lon_rounded, forecast_date, forecast_hour)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS prediction_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        viewpoint_id TEXT NOT NULL,
        prediction_date TEXT NOT NULL,
        target_date TEXT NOT NULL,
        event_type TEXT NOT NULL,
        predicted_score INTEGER NOT NULL,
        predicted_status TEXT NOT NULL,
        confidence TEXT NOT NULL,
        is_backtest INTEGER NOT NULL DEFAULT 0,
        data_source TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_prediction_lookup ON prediction_history(viewpoint_id, target_date)",
];

#[derive(Debug, Clone)]
pub struct SqliteWeatherStore {
    pool: SqlitePool,
}

impl SqliteWeatherStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Single-connection in-memory database; every connection would otherwise see its own.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn decode_weather(row: &SqliteRow) -> Result<CachedRow, StorageError> {
    let source: String = row.try_get("api_source")?;
    let source = DataSource::parse(&source).ok_or_else(|| StorageError::Corrupt {
        table: "weather_cache",
        reason: format!("unknown api_source {source:?}"),
    })?;
    let forecast_hour: i64 = row.try_get("forecast_hour")?;
    Ok(CachedRow {
        row: WeatherRow {
            forecast_date: row.try_get("forecast_date")?,
            forecast_hour: forecast_hour as u32,
            temperature_2m: row.try_get("temperature_2m")?,
            cloud_cover_total: row.try_get("cloud_cover_total")?,
            cloud_cover_low: row.try_get("cloud_cover_low")?,
            cloud_cover_medium: row.try_get("cloud_cover_medium")?,
            cloud_cover_high: row.try_get("cloud_cover_high")?,
            cloud_base_altitude: row.try_get("cloud_base_altitude")?,
            precipitation_probability: row.try_get("precipitation_probability")?,
            visibility: row.try_get("visibility")?,
            wind_speed_10m: row.try_get("wind_speed_10m")?,
            snowfall: row.try_get("snowfall")?,
            rain: row.try_get("rain")?,
            showers: row.try_get("showers")?,
            weather_code: row.try_get("weather_code")?,
        },
        fetched_at: row.try_get("fetched_at")?,
        source,
    })
}

#[async_trait]
impl WeatherStore for SqliteWeatherStore {
    async fn query(&self, key: CoordKey, date: NaiveDate) -> Result<Vec<CachedRow>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM weather_cache
             WHERE lat_rounded = ? AND lon_rounded = ? AND forecast_date = ?
             ORDER BY forecast_hour",
        )
        .bind(key.lat())
        .bind(key.lon())
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_weather).collect()
    }

    async fn upsert(&self, key: CoordKey, rows: &[CachedRow]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for cached in rows {
            let row = &cached.row;
            sqlx::query(
                "INSERT OR REPLACE INTO weather_cache (
                    lat_rounded, lon_rounded, forecast_date, forecast_hour, fetched_at, api_source,
                    temperature_2m, cloud_cover_total, cloud_cover_low, cloud_cover_medium,
                    cloud_cover_high, cloud_base_altitude, precipitation_probability, visibility,
                    wind_speed_10m, snowfall, rain, showers, weather_code
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(key.lat())
            .bind(key.lon())
            .bind(row.forecast_date)
            .bind(i64::from(row.forecast_hour))
            .bind(cached.fetched_at)
            .bind(cached.source.as_str())
            .bind(row.temperature_2m)
            .bind(row.cloud_cover_total)
            .bind(row.cloud_cover_low)
            .bind(row.cloud_cover_medium)
            .bind(row.cloud_cover_high)
            .bind(row.cloud_base_altitude)
            .bind(row.precipitation_probability)
            .bind(row.visibility)
            .bind(row.wind_speed_10m)
            .bind(row.snowfall)
            .bind(row.rain)
            .bind(row.showers)
            .bind(row.weather_code)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_prediction(&self, record: &PredictionRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO prediction_history (
                viewpoint_id, prediction_date, target_date, event_type, predicted_score,
                predicted_status, confidence, is_backtest, data_source
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.viewpoint_id)
        .bind(record.prediction_date.to_rfc3339())
        .bind(record.target_date)
        .bind(&record.event_type)
        .bind(i64::from(record.predicted_score))
        .bind(&record.predicted_status)
        .bind(&record.confidence)
        .bind(record.is_backtest)
        .bind(&record.data_source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn predictions(
        &self,
        viewpoint_id: &str,
        target_date: NaiveDate,
    ) -> Result<Vec<PredictionRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM prediction_history
             WHERE viewpoint_id = ? AND target_date = ?
             ORDER BY id",
        )
        .bind(viewpoint_id)
        .bind(target_date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let prediction_date: String = row.try_get("prediction_date")?;
                let prediction_date = DateTime::<FixedOffset>::parse_from_rfc3339(&prediction_date)
                    .map_err(|err| StorageError::Corrupt {
                        table: "prediction_history",
                        reason: err.to_string(),
                    })?;
                let score: i64 = row.try_get("predicted_score")?;
                Ok(PredictionRecord {
                    viewpoint_id: row.try_get("viewpoint_id")?,
                    prediction_date,
                    target_date: row.try_get("target_date")?,
                    event_type: row.try_get("event_type")?,
                    predicted_score: score.clamp(0, 100) as u8,
                    predicted_status: row.try_get("predicted_status")?,
                    confidence: row.try_get("confidence")?,
                    is_backtest: row.try_get("is_backtest")?,
                    data_source: row.try_get("data_source")?,
                })
            })
            .collect()
    }
}

/// In-process store for tests and one-shot runs without a database file.
#[derive(Debug, Default)]
pub struct MemoryWeatherStore {
    weather: RwLock<HashMap<(CoordKey, NaiveDate), BTreeMap<u32, CachedRow>>>,
    predictions: Mutex<Vec<PredictionRecord>>,
}

#[async_trait]
impl WeatherStore for MemoryWeatherStore {
    async fn query(&self, key: CoordKey, date: NaiveDate) -> Result<Vec<CachedRow>, StorageError> {
        let weather = self.weather.read().await;
        Ok(weather
            .get(&(key, date))
            .map(|hours| hours.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(&self, key: CoordKey, rows: &[CachedRow]) -> Result<(), StorageError> {
        let mut weather = self.weather.write().await;
        for cached in rows {
            weather
                .entry((key, cached.row.forecast_date))
                .or_default()
                .insert(cached.row.forecast_hour, cached.clone());
        }
        Ok(())
    }

    async fn save_prediction(&self, record: &PredictionRecord) -> Result<(), StorageError> {
        self.predictions.lock().await.push(record.clone());
        Ok(())
    }

    async fn predictions(
        &self,
        viewpoint_id: &str,
        target_date: NaiveDate,
    ) -> Result<Vec<PredictionRecord>, StorageError> {
        let predictions = self.predictions.lock().await;
        Ok(predictions
            .iter()
            .filter(|p| p.viewpoint_id == viewpoint_id && p.target_date == target_date)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(event_type: &str, score: u8) -> PredictionRecord {
        PredictionRecord {
            viewpoint_id: "niubei".to_string(),
            prediction_date: FixedOffset::east_opt(8 * 3600)
                .unwrap()
                .with_ymd_and_hms(2026, 2, 1, 10, 0, 0)
                .single()
                .unwrap(),
            target_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            event_type: event_type.to_string(),
            predicted_score: score,
            predicted_status: "Recommended".to_string(),
            confidence: "Low".to_string(),
            is_backtest: true,
            data_source: "archive".to_string(),
        }
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("gmp.db");
        let key = CoordKey::new(29.75, 102.35);
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let cached = CachedRow {
            row: WeatherRow::clear(date, 7),
            fetched_at: Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).single().unwrap(),
            source: DataSource::Archive,
        };

        {
            let store = SqliteWeatherStore::open(&path).await.expect("open");
            store.upsert(key, &[cached.clone()]).await.expect("upsert");
        }
        let store = SqliteWeatherStore::open(&path).await.expect("reopen");
        let rows = store.query(key, date).await.expect("query");
        assert_eq!(rows, vec![cached]);
    }

    #[tokio::test]
    async fn prediction_history_round_trip() {
        let store = SqliteWeatherStore::in_memory().await.expect("sqlite memory");
        store.save_prediction(&record("cloud_sea", 82)).await.expect("save");
        store.save_prediction(&record("frost", 41)).await.expect("save");

        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let saved = store.predictions("niubei", date).await.expect("query");
        assert_eq!(saved, vec![record("cloud_sea", 82), record("frost", 41)]);
        assert!(store.predictions("other", date).await.expect("query").is_empty());
    }
}

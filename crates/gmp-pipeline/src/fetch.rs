//! Weather acquisition from Open-Meteo, read through the weather cache.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use futures::stream::{self, StreamExt};
use gmp_core::{CoordKey, WeatherRow};
use gmp_storage::{is_fresh, DataSource, FetchError, HttpFetcher, WeatherCache};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::OpenMeteoConfig;

const HOURLY_FIELDS: &str = "temperature_2m,cloud_cover,cloud_cover_low,cloud_cover_mid,\
cloud_cover_high,cloud_base,precipitation_probability,visibility,wind_speed_10m,\
snowfall,rain,showers,weather_code";

const DEFAULT_CLOUD_BASE_M: f64 = 10_000.0;
const PLAUSIBLE_TEMPERATURE: std::ops::RangeInclusive<f64> = -60.0..=60.0;

#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch_local_hourly(
        &self,
        lat: f64,
        lon: f64,
        days: u32,
        past_days: u32,
    ) -> Result<Vec<WeatherRow>, FetchError>;

    /// Forecast rows per rounded coordinate. Coordinates that fail are left
    /// out; the call only fails when every coordinate did.
    async fn fetch_multi_point(
        &self,
        coords: &[CoordKey],
        days: u32,
    ) -> Result<HashMap<CoordKey, Vec<WeatherRow>>, FetchError>;

    async fn fetch_historical(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
    ) -> Result<Vec<WeatherRow>, FetchError>;
}

/// Run `fetch` once per distinct coordinate with at most `concurrency` in flight.
pub async fn fetch_points<F, Fut>(
    coords: &[CoordKey],
    concurrency: usize,
    fetch: F,
) -> Result<HashMap<CoordKey, Vec<WeatherRow>>, FetchError>
where
    F: Fn(CoordKey) -> Fut,
    Fut: Future<Output = Result<Vec<WeatherRow>, FetchError>>,
{
    let unique: BTreeSet<CoordKey> = coords.iter().copied().collect();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let fetch = &fetch;
    let outcomes: Vec<(CoordKey, Result<Vec<WeatherRow>, FetchError>)> = stream::iter(unique)
        .map(|key| async move { (key, fetch(key).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut rows = HashMap::new();
    let mut last_error = None;
    for (key, outcome) in outcomes {
        match outcome {
            Ok(weather) => {
                rows.insert(key, weather);
            }
            Err(err) => {
                warn!(coord = %key, error = %err, "point fetch failed");
                last_error = Some(err);
            }
        }
    }
    match last_error {
        Some(err) if rows.is_empty() => Err(err),
        _ => Ok(rows),
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: HourlyColumns,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HourlyColumns {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    cloud_cover: Vec<Option<f64>>,
    cloud_cover_low: Vec<Option<f64>>,
    cloud_cover_mid: Vec<Option<f64>>,
    cloud_cover_high: Vec<Option<f64>>,
    cloud_base: Vec<Option<f64>>,
    precipitation_probability: Vec<Option<f64>>,
    visibility: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
    snowfall: Vec<Option<f64>>,
    rain: Vec<Option<f64>>,
    showers: Vec<Option<f64>>,
    weather_code: Vec<Option<f64>>,
}

fn at(column: &[Option<f64>], index: usize) -> Option<f64> {
    column.get(index).copied().flatten()
}

fn percent(column: &[Option<f64>], index: usize) -> f64 {
    at(column, index).unwrap_or(0.0).clamp(0.0, 100.0)
}

/// Turn Open-Meteo's column-oriented hourly block into rows.
///
/// Nulls are filled (cloud base 10 km, everything else 0) and percentages
/// clipped to 0-100. Implausible temperatures are kept but logged.
fn parse_hourly(body: OpenMeteoResponse) -> Result<Vec<WeatherRow>, FetchError> {
    let h = body.hourly;
    let mut rows = Vec::with_capacity(h.time.len());
    let mut implausible = 0usize;

    for (i, stamp) in h.time.iter().enumerate() {
        let time = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M")
            .map_err(|err| FetchError::Payload(format!("bad hourly time {stamp:?}: {err}")))?;
        let temperature = at(&h.temperature_2m, i).unwrap_or(0.0);
        if !PLAUSIBLE_TEMPERATURE.contains(&temperature) {
            implausible += 1;
        }
        rows.push(WeatherRow {
            forecast_date: time.date(),
            forecast_hour: time.hour(),
            temperature_2m: temperature,
            cloud_cover_total: percent(&h.cloud_cover, i),
            cloud_cover_low: percent(&h.cloud_cover_low, i),
            cloud_cover_medium: percent(&h.cloud_cover_mid, i),
            cloud_cover_high: percent(&h.cloud_cover_high, i),
            cloud_base_altitude: at(&h.cloud_base, i).unwrap_or(DEFAULT_CLOUD_BASE_M),
            precipitation_probability: percent(&h.precipitation_probability, i),
            visibility: at(&h.visibility, i).unwrap_or(0.0),
            wind_speed_10m: at(&h.wind_speed_10m, i).unwrap_or(0.0),
            snowfall: at(&h.snowfall, i).unwrap_or(0.0),
            rain: at(&h.rain, i).unwrap_or(0.0),
            showers: at(&h.showers, i).unwrap_or(0.0),
            weather_code: at(&h.weather_code, i).unwrap_or(0.0).round() as i32,
        });
    }

    if implausible > 0 {
        warn!(hours = implausible, "temperature outside -60..=60 °C, data degraded");
    }
    Ok(rows)
}

fn group_by_date(rows: &[WeatherRow]) -> Vec<(NaiveDate, Vec<WeatherRow>)> {
    let mut groups: Vec<(NaiveDate, Vec<WeatherRow>)> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some((date, group)) if *date == row.forecast_date => group.push(row.clone()),
            _ => groups.push((row.forecast_date, vec![row.clone()])),
        }
    }
    groups
}

pub struct OpenMeteoFetcher {
    http: Arc<HttpFetcher>,
    cache: WeatherCache,
    clock: Arc<dyn Clock>,
    config: OpenMeteoConfig,
}

impl OpenMeteoFetcher {
    pub fn new(
        http: Arc<HttpFetcher>,
        cache: WeatherCache,
        clock: Arc<dyn Clock>,
        config: OpenMeteoConfig,
    ) -> Self {
        Self {
            http,
            cache,
            clock,
            config,
        }
    }

    /// Every requested date cached and fresh, or `None`.
    async fn cached_range(
        &self,
        lat: f64,
        lon: f64,
        dates: &[NaiveDate],
    ) -> Result<Option<Vec<WeatherRow>>, FetchError> {
        let now = self.clock.now();
        let mut rows = Vec::new();
        for date in dates {
            let Some(cached) = self.cache.get(lat, lon, *date, None).await? else {
                return Ok(None);
            };
            if !cached.iter().all(|c| is_fresh(c.fetched_at, c.source, now)) {
                return Ok(None);
            }
            rows.extend(cached.into_iter().map(|c| c.row));
        }
        Ok(Some(rows))
    }

    async fn request(
        &self,
        url: &str,
        query: Vec<(&str, String)>,
    ) -> Result<Vec<WeatherRow>, FetchError> {
        let body: OpenMeteoResponse = self.http.get_json(url, &query).await?;
        parse_hourly(body)
    }
}

#[async_trait]
impl WeatherFetcher for OpenMeteoFetcher {
    async fn fetch_local_hourly(
        &self,
        lat: f64,
        lon: f64,
        days: u32,
        past_days: u32,
    ) -> Result<Vec<WeatherRow>, FetchError> {
        let today = self.clock.now().date_naive();
        let first = today - Duration::days(i64::from(past_days));
        let dates: Vec<NaiveDate> = first.iter_days().take((past_days + days) as usize).collect();

        let key = CoordKey::new(lat, lon);
        if let Some(rows) = self.cached_range(lat, lon, &dates).await? {
            debug!(coord = %key, days = dates.len(), "forecast served from cache");
            return Ok(rows);
        }

        let mut query = vec![
            ("latitude", format!("{lat:.4}")),
            ("longitude", format!("{lon:.4}")),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("forecast_days", days.to_string()),
            ("timezone", "auto".to_string()),
        ];
        if past_days > 0 {
            query.push(("past_days", past_days.to_string()));
        }
        let rows = self.request(&self.config.forecast_url, query).await?;

        for (date, group) in group_by_date(&rows) {
            self.cache
                .set(lat, lon, date, &group, DataSource::Forecast)
                .await?;
        }
        debug!(coord = %key, rows = rows.len(), "forecast fetched");
        Ok(rows)
    }

    async fn fetch_multi_point(
        &self,
        coords: &[CoordKey],
        days: u32,
    ) -> Result<HashMap<CoordKey, Vec<WeatherRow>>, FetchError> {
        fetch_points(coords, self.config.concurrency, |key| {
            self.fetch_local_hourly(key.lat(), key.lon(), days, 0)
        })
        .await
    }

    async fn fetch_historical(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
    ) -> Result<Vec<WeatherRow>, FetchError> {
        let day = date.format("%Y-%m-%d").to_string();
        let query = vec![
            ("latitude", format!("{lat:.4}")),
            ("longitude", format!("{lon:.4}")),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("start_date", day.clone()),
            ("end_date", day),
            ("timezone", "auto".to_string()),
        ];
        self.request(&self.config.archive_url, query).await
    }
}

//! Core domain model for the scenic phenomenon forecast engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod geo;
pub mod summary;

pub use summary::SummaryGenerator;

pub const CRATE_NAME: &str = "gmp-core";

#[derive(Debug, Error)]
pub enum GmpError {
    #[error("viewpoint not found: {0}")]
    ViewpointNotFound(String),
    #[error("route not found: {0}")]
    RouteNotFound(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("{service} timed out after {timeout_secs}s")]
    ApiTimeout { service: String, timeout_secs: u64 },
    #[error("invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("invalid date {date}: {reason}")]
    InvalidDate { date: NaiveDate, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetWeight {
    Primary,
    #[default]
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
    #[serde(default)]
    pub weight: TargetWeight,
    /// `None` means applicability is decided by direction at scoring time.
    #[serde(default)]
    pub applicable_events: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewpoint {
    pub id: String,
    pub name: String,
    pub location: Location,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub viewpoint_id: String,
    pub order: u32,
    #[serde(default)]
    pub stay_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stops: Vec<RouteStop>,
}

/// Coordinate bucketed to two decimal degrees (about 1 km).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoordKey {
    lat_e2: i32,
    lon_e2: i32,
}

impl CoordKey {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat_e2: (lat * 100.0).round() as i32,
            lon_e2: (lon * 100.0).round() as i32,
        }
    }

    pub fn lat(&self) -> f64 {
        f64::from(self.lat_e2) / 100.0
    }

    pub fn lon(&self) -> f64 {
        f64::from(self.lon_e2) / 100.0
    }
}

impl fmt::Display for CoordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2},{:.2}", self.lat(), self.lon())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRow {
    pub forecast_date: NaiveDate,
    pub forecast_hour: u32,
    pub temperature_2m: f64,
    pub cloud_cover_total: f64,
    pub cloud_cover_low: f64,
    pub cloud_cover_medium: f64,
    pub cloud_cover_high: f64,
    pub cloud_base_altitude: f64,
    pub precipitation_probability: f64,
    pub visibility: f64,
    pub wind_speed_10m: f64,
    pub snowfall: f64,
    pub rain: f64,
    pub showers: f64,
    pub weather_code: i32,
}

impl WeatherRow {
    /// Calm, cloudless, dry hour. Fields are meant to be overwritten.
    pub fn clear(forecast_date: NaiveDate, forecast_hour: u32) -> Self {
        Self {
            forecast_date,
            forecast_hour,
            temperature_2m: 0.0,
            cloud_cover_total: 0.0,
            cloud_cover_low: 0.0,
            cloud_cover_medium: 0.0,
            cloud_cover_high: 0.0,
            cloud_base_altitude: 10_000.0,
            precipitation_probability: 0.0,
            visibility: 30_000.0,
            wind_speed_10m: 0.0,
            snowfall: 0.0,
            rain: 0.0,
            showers: 0.0,
            weather_code: 0,
        }
    }
}

pub fn mean_of(rows: &[WeatherRow], field: impl Fn(&WeatherRow) -> f64) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    Some(rows.iter().map(field).sum::<f64>() / rows.len() as f64)
}

pub fn rows_for_date(rows: &[WeatherRow], date: NaiveDate) -> Vec<WeatherRow> {
    rows.iter()
        .filter(|row| row.forecast_date == date)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunEvents {
    pub sunrise: DateTime<FixedOffset>,
    pub sunset: DateTime<FixedOffset>,
    pub sunrise_azimuth: f64,
    pub sunset_azimuth: f64,
    pub astronomical_dawn: DateTime<FixedOffset>,
    pub astronomical_dusk: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoonStatus {
    /// Illuminated fraction, 0-100.
    pub phase: u8,
    pub elevation: f64,
    pub moonrise: Option<DateTime<FixedOffset>>,
    pub moonset: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowQuality {
    Optimal,
    Good,
    Partial,
    Poor,
}

impl fmt::Display for WindowQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WindowQuality::Optimal => "optimal",
            WindowQuality::Good => "good",
            WindowQuality::Partial => "partial",
            WindowQuality::Poor => "poor",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservingWindow {
    pub optimal_start: Option<DateTime<FixedOffset>>,
    pub optimal_end: Option<DateTime<FixedOffset>>,
    pub good_start: Option<DateTime<FixedOffset>>,
    pub good_end: Option<DateTime<FixedOffset>>,
    pub quality: WindowQuality,
}

pub fn classify_observing_window(sun: &SunEvents, moon: &MoonStatus) -> ObservingWindow {
    let dusk = sun.astronomical_dusk;
    let dawn = sun.astronomical_dawn;
    let in_night = |t: Option<DateTime<FixedOffset>>| t.filter(|t| dusk < *t && *t < dawn);
    let moonrise = in_night(moon.moonrise);
    let moonset = in_night(moon.moonset);
    let low_phase = moon.phase < 50;

    let (dark_start, dark_end) = match (moonset, moonrise) {
        (None, None) => {
            let set_before_dusk = moon.moonset.is_some_and(|t| t <= dusk);
            return if set_before_dusk {
                ObservingWindow {
                    optimal_start: Some(dusk),
                    optimal_end: Some(dawn),
                    good_start: Some(dusk),
                    good_end: Some(dawn),
                    quality: WindowQuality::Optimal,
                }
            } else if low_phase {
                ObservingWindow {
                    optimal_start: None,
                    optimal_end: None,
                    good_start: Some(dusk),
                    good_end: Some(dawn),
                    quality: WindowQuality::Good,
                }
            } else {
                ObservingWindow {
                    optimal_start: None,
                    optimal_end: None,
                    good_start: None,
                    good_end: None,
                    quality: WindowQuality::Poor,
                }
            };
        }
        (Some(set), Some(rise)) if set < rise => (set, rise),
        (Some(set), Some(rise)) => {
            // moon rises then sets inside the night: keep the longer dark segment
            if rise - dusk >= dawn - set {
                (dusk, rise)
            } else {
                (set, dawn)
            }
        }
        (Some(set), None) => (set, dawn),
        (None, Some(rise)) => (dusk, rise),
    };

    if low_phase {
        ObservingWindow {
            optimal_start: Some(dark_start),
            optimal_end: Some(dark_end),
            good_start: Some(dusk),
            good_end: Some(dawn),
            quality: WindowQuality::Optimal,
        }
    } else {
        ObservingWindow {
            optimal_start: None,
            optimal_end: None,
            good_start: Some(dark_start),
            good_end: Some(dark_end),
            quality: WindowQuality::Partial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScoreStatus {
    #[serde(rename = "Not Recommended")]
    NotRecommended,
    Possible,
    Recommended,
    Perfect,
}

impl ScoreStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            95.. => ScoreStatus::Perfect,
            80.. => ScoreStatus::Recommended,
            50.. => ScoreStatus::Possible,
            _ => ScoreStatus::NotRecommended,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::Perfect => "Perfect",
            ScoreStatus::Recommended => "Recommended",
            ScoreStatus::Possible => "Possible",
            ScoreStatus::NotRecommended => "Not Recommended",
        }
    }
}

pub fn clamp_score(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub max: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub event_type: String,
    pub total_score: u8,
    pub status: ScoreStatus,
    pub breakdown: BTreeMap<String, DimensionScore>,
    pub time_window: Option<String>,
    pub confidence: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ScoreResult {
    pub fn new(event_type: impl Into<String>, raw_total: i64) -> Self {
        let total_score = clamp_score(raw_total);
        Self {
            event_type: event_type.into(),
            total_score,
            status: ScoreStatus::from_score(total_score),
            breakdown: BTreeMap::new(),
            time_window: None,
            confidence: String::new(),
            highlights: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_dimension(
        mut self,
        name: &str,
        score: f64,
        max: f64,
        detail: impl Into<String>,
    ) -> Self {
        self.breakdown.insert(
            name.to_string(),
            DimensionScore {
                score,
                max,
                detail: detail.into(),
            },
        );
        self
    }

    pub fn with_time_window(mut self, window: impl Into<String>) -> Self {
        self.time_window = Some(window.into());
        self
    }

    pub fn with_highlight(mut self, text: impl Into<String>) -> Self {
        self.highlights.push(text.into());
        self
    }

    pub fn with_warning(mut self, text: impl Into<String>) -> Self {
        self.warnings.push(text.into());
        self
    }

    pub fn with_confidence(mut self, label: impl Into<String>) -> Self {
        self.confidence = label.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub summary: String,
    pub best_event: Option<ScoreResult>,
    pub events: Vec<ScoreResult>,
    pub confidence: String,
}

impl ForecastDay {
    pub fn empty(date: NaiveDate, summary: impl Into<String>, confidence: impl Into<String>) -> Self {
        Self {
            date,
            summary: summary.into(),
            best_event: None,
            events: Vec::new(),
            confidence: confidence.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFreshness {
    Fresh,
    Archive,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Forecast,
    Backtest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherIcon {
    Clear,
    PartlyCloudy,
    Cloudy,
    Rain,
    Snow,
}

impl WeatherIcon {
    pub fn for_row(row: &WeatherRow) -> Self {
        if row.cloud_cover_total < 20.0 {
            WeatherIcon::Clear
        } else if row.cloud_cover_total < 50.0 {
            WeatherIcon::PartlyCloudy
        } else if row.precipitation_probability >= 50.0 && row.temperature_2m < 0.0 {
            WeatherIcon::Snow
        } else if row.precipitation_probability >= 50.0 {
            WeatherIcon::Rain
        } else {
            WeatherIcon::Cloudy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySnapshot {
    pub hour: u32,
    pub temperature: f64,
    pub cloud_cover: f64,
    pub precipitation_probability: f64,
    pub weather_icon: WeatherIcon,
}

impl From<&WeatherRow> for HourlySnapshot {
    fn from(row: &WeatherRow) -> Self {
        Self {
            hour: row.forecast_hour,
            temperature: row.temperature_2m,
            cloud_cover: row.cloud_cover_total,
            precipitation_probability: row.precipitation_probability,
            weather_icon: WeatherIcon::for_row(row),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub generated_at: DateTime<FixedOffset>,
    pub data_freshness: DataFreshness,
    pub engine_version: String,
    pub mode: RunMode,
    #[serde(default)]
    pub hourly_weather: BTreeMap<NaiveDate, Vec<HourlySnapshot>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub viewpoint: Viewpoint,
    pub forecast_days: Vec<ForecastDay>,
    pub meta: RunMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub label: String,
    pub min_days: u32,
    pub max_days: u32,
}

/// Lead time (days ahead of today, today = 1) to confidence label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceTable {
    pub bands: Vec<ConfidenceBand>,
    pub fallback: String,
}

impl Default for ConfidenceTable {
    fn default() -> Self {
        let band = |label: &str, min_days, max_days| ConfidenceBand {
            label: label.to_string(),
            min_days,
            max_days,
        };
        Self {
            bands: vec![band("High", 1, 2), band("Medium", 3, 4), band("Low", 5, 16)],
            fallback: "Low".to_string(),
        }
    }
}

impl ConfidenceTable {
    pub fn label_for(&self, days_ahead: u32) -> &str {
        self.bands
            .iter()
            .find(|band| band.min_days <= days_ahead && days_ahead <= band.max_days)
            .map(|band| band.label.as_str())
            .unwrap_or(&self.fallback)
    }
}

//! Snow-laden trees after a recent or well-preserved snowfall.
//!
//! Fires on either a recent-snow path or a retention path (enough snow that has
//! stayed frozen since). Base dimensions are then reduced for snow age, thaw,
//! accumulated sunshine and strong wind since the snow stopped.

use gmp_core::{ScoreResult, WeatherRow};

use crate::config::SnowTreeConfig;
use crate::ladder::{deduction_at_most, LadderRule};
use crate::plugins::{safe_rows, trailing_sum, SinceLastInput};
use crate::{DataRequirement, DayContext, ScorerPlugin, ScoringError};

#[derive(Debug)]
struct SnowMetrics {
    snowfall_12h: f64,
    snowfall_24h: f64,
    duration_24h: u32,
    since: SinceLastInput,
    max_wind_since: f64,
    sunshine_since: f64,
}

pub struct SnowTreePlugin {
    config: SnowTreeConfig,
}

impl SnowTreePlugin {
    pub fn new(config: SnowTreeConfig) -> Self {
        Self { config }
    }

    fn measure(&self, rows: &[WeatherRow]) -> SnowMetrics {
        let snowfall: Vec<f64> = rows.iter().map(|r| r.snowfall).collect();
        let since = SinceLastInput::measure(rows, &snowfall);
        let last_day = &snowfall[snowfall.len().saturating_sub(24)..];
        let duration_24h = if since.hours_since.is_finite() {
            last_day.iter().filter(|s| **s > 0.0).count() as u32
        } else {
            0
        };
        let max_wind_since = since
            .after
            .iter()
            .map(|r| r.wind_speed_10m)
            .fold(0.0, f64::max);
        let sunshine_since: f64 = since
            .after
            .iter()
            .map(|r| self.config.sunshine_weights.score(r.cloud_cover_total, LadderRule::Below))
            .sum();

        SnowMetrics {
            snowfall_12h: trailing_sum(&snowfall, 12),
            snowfall_24h: trailing_sum(&snowfall, 24),
            duration_24h,
            since,
            max_wind_since,
            sunshine_since,
        }
    }

    fn triggered(&self, m: &SnowMetrics) -> bool {
        let retention = &self.config.retention;
        let recent = m.snowfall_12h >= self.config.min_snowfall_12h_cm;
        let retained = m.snowfall_24h >= retention.min_snowfall_24h_cm
            && m.duration_24h >= retention.min_duration_h
            && m.since.subzero_hours >= retention.min_subzero_hours
            && m.since.max_temp <= retention.max_temp;
        recent || retained
    }

    fn snow_signal(&self, m: &SnowMetrics) -> i64 {
        self.config
            .snow_signal
            .iter()
            .find(|step| m.snowfall_24h >= step.snowfall && m.duration_24h >= step.duration)
            .map_or(0, |step| step.score)
    }

    fn clear_weather(&self, current: &WeatherRow) -> i64 {
        let steps = &self.config.clear_weather;
        steps
            .iter()
            .find(|step| match (&step.weather_codes, step.max_cloud) {
                (None, None) => true,
                (Some(codes), max_cloud) => {
                    codes.contains(&current.weather_code)
                        && max_cloud.map_or(true, |max| current.cloud_cover_total <= max)
                }
                (None, Some(_)) => false,
            })
            .or_else(|| steps.last())
            .map_or(0, |step| step.score)
    }

    fn sun_deduction(&self, sunshine: f64) -> i64 {
        self.config
            .sun_deductions
            .iter()
            .rev()
            .find(|step| sunshine > step.sun_score)
            .map_or(0, |step| step.deduction)
    }

    fn wind_deduction(&self, max_wind: f64) -> i64 {
        let wind = &self.config.wind_deduction;
        if max_wind > wind.severe_threshold {
            wind.severe_deduction
        } else if max_wind > wind.moderate_threshold {
            wind.moderate_deduction
        } else {
            0
        }
    }
}

impl ScorerPlugin for SnowTreePlugin {
    fn event_type(&self) -> &str {
        "snow_tree"
    }

    fn display_name(&self) -> &str {
        "Snow-Laden Trees"
    }

    fn data_requirement(&self) -> DataRequirement {
        DataRequirement {
            past_hours: self.config.past_hours,
            ..DataRequirement::default()
        }
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["snow_signal", "clear_weather", "stability"]
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
        let rows = ctx.weather_with_history();
        let safe = safe_rows(&rows, &self.config.safety);
        let Some(current) = safe.last() else {
            return Ok(None);
        };

        let m = self.measure(&rows);
        if !self.triggered(&m) {
            return Ok(None);
        }

        let cfg = &self.config;
        let snow = self.snow_signal(&m);
        let clear = self.clear_weather(current);
        let stability = cfg.stability_wind.score(current.wind_speed_10m, LadderRule::Below);

        let age = deduction_at_most(&cfg.age_deductions, m.since.hours_since);
        let thaw = deduction_at_most(&cfg.temp_deductions, m.since.max_temp);
        let sun = self.sun_deduction(m.sunshine_since);
        let wind = self.wind_deduction(m.max_wind_since);

        let total = snow + clear + stability - age - thaw - sun - wind;
        let result = ScoreResult::new("snow_tree", total)
            .with_dimension(
                "snow_signal",
                snow as f64,
                cfg.snow_signal_max as f64,
                format!("24h snowfall {:.1}cm", m.snowfall_24h),
            )
            .with_dimension(
                "clear_weather",
                clear as f64,
                cfg.clear_weather_max as f64,
                format!("weather code {}", current.weather_code),
            )
            .with_dimension(
                "stability",
                stability as f64,
                cfg.stability_wind.max as f64,
                format!("wind now {:.0}km/h", current.wind_speed_10m),
            )
            .with_dimension(
                "age_deduction",
                -(age as f64),
                0.0,
                format!("{:.0}h since snowfall", m.since.hours_since),
            )
            .with_dimension(
                "temp_deduction",
                -(thaw as f64),
                0.0,
                format!("max temp {:.1}°C", m.since.max_temp),
            )
            .with_dimension(
                "sun_deduction",
                -(sun as f64),
                0.0,
                format!("sunshine score {:.0}", m.sunshine_since),
            )
            .with_dimension(
                "wind_deduction",
                -(wind as f64),
                0.0,
                format!("max wind since {:.0}km/h", m.max_wind_since),
            );
        Ok(Some(result))
    }
}

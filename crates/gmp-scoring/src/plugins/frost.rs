//! Rime ice: cold, humid and calm air over safe hours.

use gmp_core::{mean_of, ScoreResult};

use crate::config::FrostConfig;
use crate::ladder::{band_score_half_open, band_score_inclusive, LadderRule};
use crate::plugins::safe_rows;
use crate::{DataRequirement, DayContext, ScorerPlugin, ScoringError};

pub struct FrostPlugin {
    config: FrostConfig,
}

impl FrostPlugin {
    pub fn new(config: FrostConfig) -> Self {
        Self { config }
    }
}

impl ScorerPlugin for FrostPlugin {
    fn event_type(&self) -> &str {
        "frost"
    }

    fn display_name(&self) -> &str {
        "Rime Ice"
    }

    fn data_requirement(&self) -> DataRequirement {
        DataRequirement::default()
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["temperature", "moisture", "wind", "cloud"]
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
        let cfg = &self.config;
        let rows = safe_rows(&ctx.local_weather, &cfg.safety);
        let Some(temp) = mean_of(&rows, |r| r.temperature_2m) else {
            return Ok(None);
        };
        if temp >= cfg.max_temperature {
            return Ok(None);
        }

        // low visibility stands in for humidity
        let visibility_km = mean_of(&rows, |r| r.visibility / 1000.0).unwrap_or(0.0);
        let wind = mean_of(&rows, |r| r.wind_speed_10m).unwrap_or(0.0);
        let low_cloud = mean_of(&rows, |r| r.cloud_cover_low).unwrap_or(0.0);

        let temp_score = band_score_half_open(&cfg.temperature_bands, temp);
        let moisture_score = cfg.visibility_km.score(visibility_km, LadderRule::Below);
        let wind_score = cfg.wind_speed.score(wind, LadderRule::Below);
        let cloud_score = band_score_inclusive(&cfg.low_cloud_bands, low_cloud);

        let total = temp_score + moisture_score + wind_score + cloud_score;
        let result = ScoreResult::new("frost", total)
            .with_dimension(
                "temperature",
                temp_score as f64,
                cfg.temperature_max as f64,
                format!("avg_temp={temp:.1}°C"),
            )
            .with_dimension(
                "moisture",
                moisture_score as f64,
                cfg.visibility_km.max as f64,
                format!("avg_visibility={visibility_km:.1}km"),
            )
            .with_dimension(
                "wind",
                wind_score as f64,
                cfg.wind_speed.max as f64,
                format!("avg_wind={wind:.1}km/h"),
            )
            .with_dimension(
                "cloud",
                cloud_score as f64,
                cfg.cloud_max as f64,
                format!("avg_low_cloud={low_cloud:.0}%"),
            )
            .with_time_window(cfg.time_window.clone());
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::*;

    fn plugin() -> FrostPlugin {
        FrostPlugin::new(FrostConfig::default())
    }

    #[test]
    fn ideal_rime_morning() {
        let vp = viewpoint(Vec::new());
        let rows = day_rows(|r| {
            r.temperature_2m = -3.0;
            r.visibility = 4000.0;
            r.wind_speed_10m = 2.0;
            r.cloud_cover_low = 40.0;
        });
        let result = plugin().score(&DayContext::new(date(), &vp, rows)).unwrap().unwrap();
        assert_eq!(result.total_score, 100);
        assert_eq!(result.breakdown["temperature"].detail, "avg_temp=-3.0°C");
        assert_eq!(result.time_window.as_deref(), Some("06:00 - 12:00"));
    }

    #[test]
    fn band_edges_are_half_open_for_temperature() {
        let vp = viewpoint(Vec::new());
        let rows = day_rows(|r| r.temperature_2m = 0.0);
        let result = plugin().score(&DayContext::new(date(), &vp, rows)).unwrap().unwrap();
        assert_eq!(result.breakdown["temperature"].score, 25.0);
        // 30 km visibility, calm, no low cloud
        assert_eq!(result.breakdown["moisture"].score, 5.0);
        assert_eq!(result.breakdown["wind"].score, 20.0);
        assert_eq!(result.breakdown["cloud"].score, 5.0);
        assert_eq!(result.total_score, 55);
    }

    #[test]
    fn warm_or_unsafe_days_are_absent() {
        let vp = viewpoint(Vec::new());
        let warm = day_rows(|r| r.temperature_2m = 2.0);
        assert!(plugin().score(&DayContext::new(date(), &vp, warm)).unwrap().is_none());

        let wet = day_rows(|r| {
            r.temperature_2m = -5.0;
            r.precipitation_probability = 40.0;
        });
        assert!(plugin().score(&DayContext::new(date(), &vp, wet)).unwrap().is_none());
    }
}

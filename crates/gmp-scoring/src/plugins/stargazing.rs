use gmp_core::{mean_of, ScoreResult, WindowQuality};

use crate::config::StargazingConfig;
use crate::{DataRequirement, DayContext, ScorerPlugin, ScoringError};

pub struct StargazingPlugin {
    config: StargazingConfig,
}

impl StargazingPlugin {
    pub fn new(config: StargazingConfig) -> Self {
        Self { config }
    }

    fn base_score(&self, quality: WindowQuality, moon_phase: u8) -> f64 {
        let cfg = &self.config;
        match quality {
            WindowQuality::Optimal => cfg.base_optimal,
            WindowQuality::Good => cfg.base_good,
            WindowQuality::Partial => cfg.base_partial,
            WindowQuality::Poor => cfg.base_poor - f64::from(moon_phase) * cfg.cloud_penalty_factor,
        }
    }

    fn wind_penalty(&self, wind: f64) -> f64 {
        let cfg = &self.config;
        if wind > cfg.wind_severe.speed {
            cfg.wind_severe.penalty
        } else if wind > cfg.wind_moderate.speed {
            cfg.wind_moderate.penalty
        } else {
            0.0
        }
    }
}

impl ScorerPlugin for StargazingPlugin {
    fn event_type(&self) -> &str {
        "stargazing"
    }

    fn display_name(&self) -> &str {
        "Stargazing"
    }

    fn data_requirement(&self) -> DataRequirement {
        DataRequirement {
            needs_astro: true,
            ..DataRequirement::default()
        }
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["base", "cloud", "wind"]
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
        let Some(window) = &ctx.observing_window else {
            return Ok(None);
        };
        let Some(cloud) = mean_of(&ctx.local_weather, |r| r.cloud_cover_total) else {
            return Ok(None);
        };
        if cloud >= self.config.max_night_cloud_cover {
            return Ok(None);
        }

        let phase = ctx.moon_status.as_ref().map_or(0, |m| m.phase);
        let base = self.base_score(window.quality, phase);
        let cloud_penalty = cloud * self.config.cloud_penalty_factor;
        let wind = mean_of(&ctx.local_weather, |r| r.wind_speed_10m).unwrap_or(0.0);
        let wind_penalty = self.wind_penalty(wind);

        let raw = (base - cloud_penalty - wind_penalty) as i64;
        let mut result = ScoreResult::new("stargazing", raw)
            .with_dimension("base", base.trunc(), 100.0, format!("quality={}", window.quality))
            .with_dimension("cloud", -cloud_penalty.trunc(), 0.0, format!("avg_cloud={cloud:.1}%"))
            .with_dimension("wind", -wind_penalty.trunc(), 0.0, format!("avg_wind={wind:.1}km/h"));

        if let (Some(start), Some(end)) = (window.optimal_start, window.optimal_end) {
            result = result.with_time_window(format!(
                "{} - {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ));
        }
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, FixedOffset, TimeZone};
    use gmp_core::{MoonStatus, ObservingWindow};

    use super::*;
    use crate::plugins::testing::*;

    fn at(hour: u32, day: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, day, hour, 0, 0)
            .single()
            .unwrap()
    }

    fn window(quality: WindowQuality) -> ObservingWindow {
        let optimal = quality == WindowQuality::Optimal;
        ObservingWindow {
            optimal_start: optimal.then(|| at(20, 15)),
            optimal_end: optimal.then(|| at(5, 16)),
            good_start: Some(at(20, 15)),
            good_end: Some(at(5, 16)),
            quality,
        }
    }

    fn plugin() -> StargazingPlugin {
        StargazingPlugin::new(StargazingConfig::default())
    }

    #[test]
    fn optimal_window_with_light_cloud() {
        let vp = viewpoint(Vec::new());
        let mut ctx = DayContext::new(date(), &vp, day_rows(|r| r.cloud_cover_total = 10.0));
        ctx.observing_window = Some(window(WindowQuality::Optimal));
        let result = plugin().score(&ctx).unwrap().expect("applicable");
        assert_eq!(result.total_score, 92);
        assert_eq!(result.time_window.as_deref(), Some("20:00 - 05:00"));
    }

    #[test]
    fn poor_window_is_penalised_by_moon_phase_and_wind() {
        let vp = viewpoint(Vec::new());
        let rows = day_rows(|r| {
            r.cloud_cover_total = 20.0;
            r.wind_speed_10m = 25.0;
        });
        let mut ctx = DayContext::new(date(), &vp, rows);
        ctx.observing_window = Some(window(WindowQuality::Poor));
        ctx.moon_status = Some(MoonStatus {
            phase: 90,
            elevation: 40.0,
            moonrise: None,
            moonset: None,
        });
        let result = plugin().score(&ctx).unwrap().expect("applicable");
        // 100 - 72 - 16 - 10
        assert_eq!(result.total_score, 2);
        assert_eq!(result.time_window, None);
    }

    #[test]
    fn missing_window_or_thick_cloud_is_absent() {
        let vp = viewpoint(Vec::new());
        let ctx = DayContext::new(date(), &vp, day_rows(|_| {}));
        assert!(plugin().score(&ctx).unwrap().is_none());

        let mut cloudy = DayContext::new(date(), &vp, day_rows(|r| r.cloud_cover_total = 70.0));
        cloudy.observing_window = Some(window(WindowQuality::Optimal));
        assert!(plugin().score(&cloudy).unwrap().is_none());
    }

    #[test]
    fn negative_raw_total_clamps_to_zero() {
        let vp = viewpoint(Vec::new());
        let rows = day_rows(|r| {
            r.cloud_cover_total = 65.0;
            r.wind_speed_10m = 50.0;
        });
        let mut ctx = DayContext::new(date(), &vp, rows);
        ctx.observing_window = Some(window(WindowQuality::Partial));
        let result = plugin().score(&ctx).unwrap().expect("applicable");
        assert_eq!(result.total_score, 0);
    }
}

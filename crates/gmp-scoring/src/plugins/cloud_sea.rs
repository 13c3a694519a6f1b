//! Sea of cloud below the viewpoint.

use gmp_core::{mean_of, ScoreResult};

use crate::config::{CloudSeaConfig, SafetyConfig};
use crate::ladder::LadderRule;
use crate::plugins::safe_rows;
use crate::{DataRequirement, DayContext, ScorerPlugin, ScoringError};

pub struct CloudSeaPlugin {
    config: CloudSeaConfig,
    safety: SafetyConfig,
}

impl CloudSeaPlugin {
    pub fn new(config: CloudSeaConfig, safety: SafetyConfig) -> Self {
        Self { config, safety }
    }
}

impl ScorerPlugin for CloudSeaPlugin {
    fn event_type(&self) -> &str {
        "cloud_sea"
    }

    fn display_name(&self) -> &str {
        "Cloud Sea"
    }

    fn data_requirement(&self) -> DataRequirement {
        DataRequirement::default()
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["gap", "density", "mid_structure", "wind"]
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
        let rows = safe_rows(&ctx.local_weather, &self.safety);
        let Some(cloud_base) = mean_of(&rows, |r| r.cloud_base_altitude) else {
            return Ok(None);
        };
        let altitude = ctx.viewpoint.location.altitude;
        if cloud_base >= altitude {
            return Ok(None);
        }

        let gap = altitude - cloud_base;
        let low = mean_of(&rows, |r| r.cloud_cover_low).unwrap_or(0.0);
        let mid = mean_of(&rows, |r| r.cloud_cover_medium).unwrap_or(0.0);
        let wind = mean_of(&rows, |r| r.wind_speed_10m).unwrap_or(0.0);

        let cfg = &self.config;
        let gap_score = cfg.gap_meters.score(gap, LadderRule::Above);
        let density_score = cfg.density_pct.score(low, LadderRule::Above);
        let factor = cfg.mid_cloud_factor.score(mid, LadderRule::AtMost);
        let wind_score = cfg.wind_speed.score(wind, LadderRule::Below);

        let total = ((gap_score + density_score) as f64 * factor + wind_score as f64)
            .round_ties_even() as i64;

        let result = ScoreResult::new("cloud_sea", total)
            .with_dimension(
                "gap",
                gap_score as f64,
                cfg.gap_meters.max as f64,
                format!("gap={gap:.0}m"),
            )
            .with_dimension(
                "density",
                density_score as f64,
                cfg.density_pct.max as f64,
                format!("low_cloud={low:.0}%"),
            )
            .with_dimension(
                "mid_structure",
                factor,
                1.0,
                format!("mid_cloud={mid:.0}%, factor={factor}"),
            )
            .with_dimension(
                "wind",
                wind_score as f64,
                cfg.wind_speed.max as f64,
                format!("wind={wind:.1}km/h"),
            );
        Ok(Some(result))
    }
}

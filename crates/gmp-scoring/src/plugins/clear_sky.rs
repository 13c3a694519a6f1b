use gmp_core::{mean_of, ScoreResult};

use crate::config::ClearSkyConfig;
use crate::ladder::LadderRule;
use crate::{DataRequirement, DayContext, ScorerPlugin, ScoringError};

pub struct ClearSkyPlugin {
    config: ClearSkyConfig,
}

impl ClearSkyPlugin {
    pub fn new(config: ClearSkyConfig) -> Self {
        Self { config }
    }
}

impl ScorerPlugin for ClearSkyPlugin {
    fn event_type(&self) -> &str {
        "clear_sky"
    }

    fn display_name(&self) -> &str {
        "Clear Sky"
    }

    fn data_requirement(&self) -> DataRequirement {
        DataRequirement::default()
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["cloud_cover", "precipitation", "visibility"]
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
        let rows = &ctx.local_weather;
        let Some(cloud) = mean_of(rows, |r| r.cloud_cover_total) else {
            return Ok(None);
        };
        if cloud >= self.config.max_cloud_cover {
            return Ok(None);
        }
        let precip = mean_of(rows, |r| r.precipitation_probability).unwrap_or(0.0);
        let visibility_km = mean_of(rows, |r| r.visibility / 1000.0).unwrap_or(0.0);

        let cfg = &self.config;
        let cloud_score = cfg.cloud_cover.score(cloud, LadderRule::AtMost);
        let precip_score = cfg.precipitation.score(precip, LadderRule::AtMost);
        let vis_score = cfg.visibility_km.score(visibility_km, LadderRule::AtLeast);

        let result = ScoreResult::new("clear_sky", cloud_score + precip_score + vis_score)
            .with_dimension(
                "cloud_cover",
                cloud_score as f64,
                cfg.cloud_cover.max as f64,
                format!("avg_cloud={cloud:.1}%"),
            )
            .with_dimension(
                "precipitation",
                precip_score as f64,
                cfg.precipitation.max as f64,
                format!("avg_precip_probability={precip:.0}%"),
            )
            .with_dimension(
                "visibility",
                vis_score as f64,
                cfg.visibility_km.max as f64,
                format!("avg_visibility={visibility_km:.1}km"),
            )
            .with_time_window(cfg.time_window.clone());
        Ok(Some(result))
    }
}

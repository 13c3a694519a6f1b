//! Alpenglow on distant peaks at sunrise or sunset.
//!
//! The peak must sit roughly opposite the sun, the light path towards the sun
//! must be free of low and mid cloud, and the peak itself must not be capped by
//! mid or high cloud. A single blocked sightline vetoes the whole event.

use gmp_core::{geo, mean_of, ScoreResult, Target, TargetWeight, WeatherRow};

use crate::config::GoldenMountainConfig;
use crate::ladder::LadderRule;
use crate::{DataRequirement, DayContext, ScorerPlugin, ScoringError, SolarOrientation};

const DIMENSIONS: &[&str] = &["light_path", "target_visible", "local_clear"];

pub struct GoldenMountainPlugin {
    orientation: SolarOrientation,
    event_type: &'static str,
    display_name: &'static str,
    config: GoldenMountainConfig,
}

impl GoldenMountainPlugin {
    pub fn sunrise(config: GoldenMountainConfig) -> Self {
        Self {
            orientation: SolarOrientation::Sunrise,
            event_type: "sunrise_golden_mountain",
            display_name: "Sunrise Golden Mountain",
            config,
        }
    }

    pub fn sunset(config: GoldenMountainConfig) -> Self {
        Self {
            orientation: SolarOrientation::Sunset,
            event_type: "sunset_golden_mountain",
            display_name: "Sunset Golden Mountain",
            config,
        }
    }

    fn is_applicable(&self, target: &Target, ctx: &DayContext<'_>, azimuth: f64) -> bool {
        if let Some(events) = &target.applicable_events {
            return events.iter().any(|e| e == self.orientation.as_str());
        }
        let vp = &ctx.viewpoint.location;
        let bearing = geo::bearing(vp.lat, vp.lon, target.lat, target.lon);
        geo::is_opposite_direction(bearing, azimuth)
    }

    /// Mean over sample points of `min(low + mid, 100)`; `None` without samples.
    fn light_path_cloud(&self, ctx: &DayContext<'_>) -> Option<f64> {
        let path = ctx.light_path(self.orientation)?;
        let per_point: Vec<f64> = path
            .samples
            .iter()
            .filter_map(|sample| obstruction(&sample.weather, |r| r.cloud_cover_low))
            .collect();
        if per_point.is_empty() {
            return None;
        }
        Some(per_point.iter().sum::<f64>() / per_point.len() as f64)
    }

    /// `min(high + mid, 100)` at the primary applicable target, else the first.
    fn target_cloud(&self, targets: &[&Target], ctx: &DayContext<'_>) -> Option<f64> {
        let target = targets
            .iter()
            .find(|t| t.weight == TargetWeight::Primary)
            .or_else(|| targets.first())?;
        let rows = ctx.target_weather.as_ref()?.get(&target.name)?;
        obstruction(rows, |r| r.cloud_cover_high)
    }
}

fn obstruction(rows: &[WeatherRow], layer: impl Fn(&WeatherRow) -> f64) -> Option<f64> {
    let layer_mean = mean_of(rows, layer)?;
    let mid_mean = mean_of(rows, |r| r.cloud_cover_medium)?;
    Some((layer_mean + mid_mean).min(100.0))
}

impl ScorerPlugin for GoldenMountainPlugin {
    fn event_type(&self) -> &str {
        self.event_type
    }

    fn display_name(&self) -> &str {
        self.display_name
    }

    fn data_requirement(&self) -> DataRequirement {
        DataRequirement {
            needs_target_weather: true,
            needs_light_path_weather: true,
            needs_astro: true,
            ..DataRequirement::default()
        }
    }

    fn dimensions(&self) -> &'static [&'static str] {
        DIMENSIONS
    }

    fn light_path_orientation(&self) -> Option<SolarOrientation> {
        Some(self.orientation)
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
        let Some(sun) = &ctx.sun_events else {
            return Ok(None);
        };
        let Some(local_cloud) = mean_of(&ctx.local_weather, |r| r.cloud_cover_total) else {
            return Ok(None);
        };
        if local_cloud >= self.config.max_cloud_cover {
            return Ok(None);
        }

        let azimuth = self.orientation.azimuth(sun);
        let targets: Vec<&Target> = ctx
            .viewpoint
            .targets
            .iter()
            .filter(|t| self.is_applicable(t, ctx, azimuth))
            .collect();
        if targets.is_empty() {
            return Ok(None);
        }

        let mut warnings = Vec::new();
        let light_cloud = self.light_path_cloud(ctx).unwrap_or_else(|| {
            warnings.push("light path weather unavailable".to_string());
            0.0
        });
        let target_cloud = self.target_cloud(&targets, ctx).unwrap_or_else(|| {
            warnings.push("target weather unavailable".to_string());
            0.0
        });

        let cfg = &self.config;
        let light = cfg.light_path.score(light_cloud, LadderRule::AtMost);
        let target = cfg.target_visible.score(target_cloud, LadderRule::AtMost);
        let local = cfg.local_clear.score(local_cloud, LadderRule::AtMost);

        let vetoed = [light, target, local]
            .iter()
            .any(|s| *s <= cfg.veto_threshold);
        let total = if vetoed { 0 } else { light + target + local };

        let mut result = ScoreResult::new(self.event_type, total)
            .with_dimension(
                "light_path",
                light as f64,
                cfg.light_path.max as f64,
                format!("cloud={light_cloud:.0}%"),
            )
            .with_dimension(
                "target_visible",
                target as f64,
                cfg.target_visible.max as f64,
                format!("cloud={target_cloud:.0}%"),
            )
            .with_dimension(
                "local_clear",
                local as f64,
                cfg.local_clear.max as f64,
                format!("cloud={local_cloud:.0}%"),
            );

        if i64::from(result.total_score) >= cfg.highlight_score {
            result = result.with_highlight(format!("{} conditions excellent", self.display_name));
        }
        if light_cloud > cfg.warning_cloud {
            result = result.with_warning(format!("light path cloud high ({light_cloud:.0}%)"));
        }
        if target_cloud > cfg.warning_cloud {
            result = result.with_warning(format!("target cloud high ({target_cloud:.0}%)"));
        }
        for warning in warnings {
            result = result.with_warning(warning);
        }
        Ok(Some(result))
    }
}

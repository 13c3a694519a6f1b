//! Icicles formed from recent rain, showers or melt that has since frozen.

use gmp_core::{ScoreResult, WeatherRow};

use crate::config::IceIcicleConfig;
use crate::ladder::{deduction_at_most, LadderRule};
use crate::plugins::{safe_rows, trailing_sum, SinceLastInput};
use crate::{DataRequirement, DayContext, ScorerPlugin, ScoringError};

pub struct IceIciclePlugin {
    config: IceIcicleConfig,
}

impl IceIciclePlugin {
    pub fn new(config: IceIcicleConfig) -> Self {
        Self { config }
    }

    /// Liquid-equivalent water per hour, mm.
    fn effective_water(&self, row: &WeatherRow) -> f64 {
        row.rain + row.showers + row.snowfall * self.config.snow_water_ratio * 10.0
    }

    fn freeze_strength(&self, subzero_hours: u32, temp_now: f64) -> i64 {
        let steps = &self.config.freeze_strength;
        steps
            .iter()
            .find(|step| match (step.subzero_hours, step.temp_now) {
                (None, None) => true,
                (Some(hours), Some(temp)) => subzero_hours >= hours && temp_now <= temp,
                _ => false,
            })
            .or_else(|| steps.last())
            .map_or(0, |step| step.score)
    }

    fn view_quality(&self, current: &WeatherRow) -> i64 {
        let steps = &self.config.view_quality;
        steps
            .iter()
            .find(|step| match (step.max_cloud, step.max_wind) {
                (None, None) => true,
                (Some(cloud), Some(wind)) => {
                    current.cloud_cover_total <= cloud && current.wind_speed_10m <= wind
                }
                _ => false,
            })
            .or_else(|| steps.last())
            .map_or(0, |step| step.score)
    }
}

impl ScorerPlugin for IceIciclePlugin {
    fn event_type(&self) -> &str {
        "ice_icicle"
    }

    fn display_name(&self) -> &str {
        "Icicles"
    }

    fn data_requirement(&self) -> DataRequirement {
        DataRequirement {
            past_hours: self.config.past_hours,
            ..DataRequirement::default()
        }
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["water_input", "freeze_strength", "view_quality"]
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
        let cfg = &self.config;
        let rows = ctx.weather_with_history();
        let safe = safe_rows(&rows, &cfg.safety);
        let Some(current) = safe.last() else {
            return Ok(None);
        };

        let water: Vec<f64> = rows.iter().map(|r| self.effective_water(r)).collect();
        let water_12h = trailing_sum(&water, 12);
        let water_24h = trailing_sum(&water, 24);
        let since = SinceLastInput::measure(&rows, &water);

        let retention = &cfg.retention;
        let recent = water_12h >= cfg.min_water_12h_mm;
        let retained = water_24h >= retention.min_water_24h_mm
            && since.subzero_hours >= retention.min_subzero_hours
            && since.max_temp <= retention.max_temp;
        if !recent && !retained {
            return Ok(None);
        }

        let water_score = cfg.water_input.score(water_24h, LadderRule::AtLeast);
        let freeze = self.freeze_strength(since.subzero_hours, current.temperature_2m);
        let view = self.view_quality(current);
        let age = deduction_at_most(&cfg.age_deductions, since.hours_since);
        let thaw = deduction_at_most(&cfg.temp_deductions, since.max_temp);

        let result = ScoreResult::new("ice_icicle", water_score + freeze + view - age - thaw)
            .with_dimension(
                "water_input",
                water_score as f64,
                cfg.water_input.max as f64,
                format!("24h water {water_24h:.1}mm"),
            )
            .with_dimension(
                "freeze_strength",
                freeze as f64,
                cfg.freeze_strength_max as f64,
                format!("frozen {}h", since.subzero_hours),
            )
            .with_dimension(
                "view_quality",
                view as f64,
                cfg.view_quality_max as f64,
                format!("cloud {:.0}%", current.cloud_cover_total),
            )
            .with_dimension(
                "age_deduction",
                -(age as f64),
                0.0,
                format!("{:.0}h since water input", since.hours_since),
            )
            .with_dimension(
                "temp_deduction",
                -(thaw as f64),
                0.0,
                format!("max temp {:.1}°C", since.max_temp),
            );
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::*;

    fn plugin() -> IceIciclePlugin {
        IceIciclePlugin::new(IceIcicleConfig::default())
    }

    fn day(edit: impl Fn(usize, &mut WeatherRow)) -> Vec<WeatherRow> {
        hours_ending_today(24, |i, r| {
            r.temperature_2m = -5.0;
            r.cloud_cover_total = 10.0;
            r.wind_speed_10m = 5.0;
            edit(i, r);
        })
    }

    #[test]
    fn rain_then_hard_freeze() {
        let vp = viewpoint(Vec::new());
        // 3.5 mm of rain early, then 15 subzero hours
        let rows = day(|i, r| {
            if (6..=8).contains(&i) {
                r.temperature_2m = 1.0;
                r.rain = if i == 8 { 1.5 } else { 1.0 };
            }
        });
        let result = plugin().score(&DayContext::new(date(), &vp, rows)).unwrap().unwrap();
        assert_eq!(result.breakdown["water_input"].score, 50.0);
        assert_eq!(result.breakdown["freeze_strength"].score, 30.0);
        assert_eq!(result.breakdown["view_quality"].score, 20.0);
        assert_eq!(result.breakdown["age_deduction"].score, -8.0);
        assert_eq!(result.breakdown["temp_deduction"].score, 0.0);
        assert_eq!(result.total_score, 92);
    }

    #[test]
    fn snowfall_counts_as_water_equivalent() {
        let vp = viewpoint(Vec::new());
        // 0.5 cm of snow -> 0.5 mm, above the 12 h trigger
        let rows = day(|i, r| {
            if i == 20 {
                r.snowfall = 0.5;
            }
        });
        let result = plugin().score(&DayContext::new(date(), &vp, rows)).unwrap().unwrap();
        assert_eq!(result.breakdown["water_input"].score, 24.0);
        assert_eq!(result.breakdown["water_input"].detail, "24h water 0.5mm");
    }

    #[test]
    fn dry_day_is_absent() {
        let vp = viewpoint(Vec::new());
        let rows = day(|_, _| {});
        assert!(plugin().score(&DayContext::new(date(), &vp, rows)).unwrap().is_none());
    }

    #[test]
    fn thawed_afternoon_is_penalised_but_never_negative() {
        let vp = viewpoint(Vec::new());
        let rows = day(|i, r| {
            if i == 22 {
                r.rain = 0.5;
            }
            if i == 23 {
                r.temperature_2m = 6.0;
                r.cloud_cover_total = 90.0;
                r.wind_speed_10m = 30.0;
            }
        });
        let result = plugin().score(&DayContext::new(date(), &vp, rows)).unwrap().unwrap();
        // 24 + 10 + 8 - 0 - 22
        assert_eq!(result.total_score, 20);
    }
}

//! Built-in plugin families and the measurements they share.

use std::sync::Arc;

use gmp_core::WeatherRow;

use crate::config::SafetyConfig;
use crate::{ScorerPlugin, ScoringConfig};

pub mod clear_sky;
pub mod cloud_sea;
pub mod frost;
pub mod golden_mountain;
pub mod ice_icicle;
pub mod snow_tree;
pub mod stargazing;

pub use clear_sky::ClearSkyPlugin;
pub use cloud_sea::CloudSeaPlugin;
pub use frost::FrostPlugin;
pub use golden_mountain::GoldenMountainPlugin;
pub use ice_icicle::IceIciclePlugin;
pub use snow_tree::SnowTreePlugin;
pub use stargazing::StargazingPlugin;

/// Registration order doubles as the tie-break order for the best event.
pub fn builtin(config: &ScoringConfig) -> Vec<Arc<dyn ScorerPlugin>> {
    vec![
        Arc::new(GoldenMountainPlugin::sunrise(config.golden_mountain.clone())),
        Arc::new(GoldenMountainPlugin::sunset(config.golden_mountain.clone())),
        Arc::new(CloudSeaPlugin::new(config.cloud_sea.clone(), config.safety)),
        Arc::new(ClearSkyPlugin::new(config.clear_sky.clone())),
        Arc::new(StargazingPlugin::new(config.stargazing.clone())),
        Arc::new(FrostPlugin::new(config.frost.clone())),
        Arc::new(SnowTreePlugin::new(config.snow_tree.clone())),
        Arc::new(IceIciclePlugin::new(config.ice_icicle.clone())),
    ]
}

pub(crate) fn safe_rows(rows: &[WeatherRow], safety: &SafetyConfig) -> Vec<WeatherRow> {
    rows.iter().filter(|row| safety.allows(row)).cloned().collect()
}

/// Sum of the last `hours` values, or of all of them when fewer exist.
pub(crate) fn trailing_sum(values: &[f64], hours: usize) -> f64 {
    values[values.len().saturating_sub(hours)..].iter().sum()
}

/// What happened after the most recent hour with a positive input (snow, water).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SinceLastInput {
    pub hours_since: f64,
    pub subzero_hours: u32,
    pub max_temp: f64,
    pub after: Vec<WeatherRow>,
}

impl SinceLastInput {
    pub(crate) fn measure(rows: &[WeatherRow], inputs: &[f64]) -> Self {
        let overall_max = rows
            .iter()
            .map(|r| r.temperature_2m)
            .fold(f64::NEG_INFINITY, f64::max);

        let Some(last) = inputs.iter().rposition(|v| *v > 0.0) else {
            return Self {
                hours_since: f64::INFINITY,
                subzero_hours: 0,
                max_temp: overall_max,
                after: Vec::new(),
            };
        };

        let after = rows[last + 1..].to_vec();
        let subzero_hours = after.iter().filter(|r| r.temperature_2m < 0.0).count() as u32;
        let max_temp = if after.is_empty() {
            rows[last].temperature_2m
        } else {
            after
                .iter()
                .map(|r| r.temperature_2m)
                .fold(f64::NEG_INFINITY, f64::max)
        };

        Self {
            hours_since: (rows.len() - 1 - last) as f64,
            subzero_hours,
            max_temp,
            after,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Duration, NaiveDate, Timelike};
    use gmp_core::{Location, Target, TargetWeight, Viewpoint, WeatherRow};

    pub fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    /// `count` hourly rows ending at 23:00 on `date()`, built by `edit`.
    pub fn hours_ending_today(count: usize, edit: impl Fn(usize, &mut WeatherRow)) -> Vec<WeatherRow> {
        let end = date().and_hms_opt(23, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let at = end - Duration::hours((count - 1 - i) as i64);
                let mut row = WeatherRow::clear(at.date(), at.hour());
                edit(i, &mut row);
                row
            })
            .collect()
    }

    pub fn day_rows(edit: impl Fn(&mut WeatherRow)) -> Vec<WeatherRow> {
        hours_ending_today(24, |_, row| edit(row))
    }

    pub fn viewpoint(targets: Vec<Target>) -> Viewpoint {
        Viewpoint {
            id: "niubei".to_string(),
            name: "Niubei Mountain".to_string(),
            location: Location {
                lat: 29.75,
                lon: 102.35,
                altitude: 3660.0,
            },
            capabilities: vec!["sunrise".to_string(), "sunset".to_string(), "cloud_sea".to_string()],
            targets,
        }
    }

    pub fn gongga() -> Target {
        Target {
            name: "Gongga".to_string(),
            lat: 29.58,
            lon: 101.88,
            altitude: 7556.0,
            weight: TargetWeight::Primary,
            applicable_events: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn trailing_sum_uses_available_rows_when_short() {
        assert_eq!(trailing_sum(&[1.0, 2.0, 3.0], 12), 6.0);
        assert_eq!(trailing_sum(&[1.0, 2.0, 3.0], 2), 5.0);
        assert_eq!(trailing_sum(&[], 12), 0.0);
    }

    #[test]
    fn since_last_input_tracks_post_event_rows() {
        let rows = hours_ending_today(6, |i, row| {
            row.temperature_2m = [1.0, 0.5, -1.0, -2.0, 0.5, -3.0][i];
        });
        let inputs = [0.0, 1.2, 0.0, 0.0, 0.0, 0.0];
        let since = SinceLastInput::measure(&rows, &inputs);
        assert_eq!(since.hours_since, 4.0);
        assert_eq!(since.subzero_hours, 3);
        assert_eq!(since.max_temp, 0.5);
        assert_eq!(since.after.len(), 4);
    }

    #[test]
    fn since_last_input_without_input_is_infinitely_old() {
        let rows = hours_ending_today(3, |i, row| row.temperature_2m = i as f64);
        let since = SinceLastInput::measure(&rows, &[0.0, 0.0, 0.0]);
        assert!(since.hours_since.is_infinite());
        assert_eq!(since.max_temp, 2.0);
        assert_eq!(since.subzero_hours, 0);
    }

    #[test]
    fn input_on_last_hour_uses_its_own_temperature() {
        let rows = hours_ending_today(3, |i, row| row.temperature_2m = [3.0, 2.0, -4.0][i]);
        let since = SinceLastInput::measure(&rows, &[0.0, 0.0, 0.5]);
        assert_eq!(since.hours_since, 0.0);
        assert_eq!(since.max_temp, -4.0);
    }
}

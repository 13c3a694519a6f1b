//! Typed scoring parameters for every plugin family.

use serde::{Deserialize, Serialize};

use crate::ladder::{Band, DeductionStep, Ladder, LadderRule};
use crate::ScoringError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedLadder {
    pub max: i64,
    #[serde(flatten)]
    pub ladder: Ladder,
}

impl WeightedLadder {
    pub fn new(max: i64, breakpoints: Vec<f64>, scores: Vec<i64>) -> Self {
        Self {
            max,
            ladder: Ladder::new(breakpoints, scores),
        }
    }

    pub fn score(&self, value: f64, rule: LadderRule) -> i64 {
        self.ladder.score(value, rule)
    }
}

/// Hours failing either limit are excluded before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub precip_threshold: f64,
    pub visibility_threshold: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            precip_threshold: 50.0,
            visibility_threshold: 1000.0,
        }
    }
}

impl SafetyConfig {
    pub fn allows(&self, row: &gmp_core::WeatherRow) -> bool {
        row.precipitation_probability <= self.precip_threshold
            && row.visibility >= self.visibility_threshold
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldenMountainConfig {
    pub max_cloud_cover: f64,
    pub veto_threshold: i64,
    pub light_path: WeightedLadder,
    pub target_visible: WeightedLadder,
    pub local_clear: WeightedLadder,
    pub highlight_score: i64,
    pub warning_cloud: f64,
}

impl Default for GoldenMountainConfig {
    fn default() -> Self {
        Self {
            max_cloud_cover: 80.0,
            veto_threshold: 0,
            light_path: WeightedLadder::new(35, vec![10.0, 20.0, 30.0, 50.0], vec![35, 30, 20, 10, 0]),
            target_visible: WeightedLadder::new(40, vec![10.0, 20.0, 30.0, 50.0], vec![40, 35, 25, 10, 0]),
            local_clear: WeightedLadder::new(25, vec![15.0, 30.0, 50.0], vec![25, 20, 10, 0]),
            highlight_score: 80,
            warning_cloud: 50.0,
        }
    }
}

impl GoldenMountainConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.light_path.ladder.validate("golden_mountain.light_path", LadderRule::AtMost)?;
        self.target_visible.ladder.validate("golden_mountain.target_visible", LadderRule::AtMost)?;
        self.local_clear.ladder.validate("golden_mountain.local_clear", LadderRule::AtMost)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearSkyConfig {
    pub max_cloud_cover: f64,
    pub cloud_cover: WeightedLadder,
    pub precipitation: WeightedLadder,
    pub visibility_km: WeightedLadder,
    pub time_window: String,
}

impl Default for ClearSkyConfig {
    fn default() -> Self {
        Self {
            max_cloud_cover: 80.0,
            cloud_cover: WeightedLadder::new(50, vec![10.0, 30.0, 50.0, 70.0], vec![50, 40, 25, 10, 0]),
            precipitation: WeightedLadder::new(25, vec![10.0, 30.0, 50.0], vec![25, 20, 10, 0]),
            visibility_km: WeightedLadder::new(25, vec![30.0, 15.0, 5.0], vec![25, 20, 10, 5]),
            time_window: "06:00 - 18:00".to_string(),
        }
    }
}

impl ClearSkyConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.cloud_cover.ladder.validate("clear_sky.cloud_cover", LadderRule::AtMost)?;
        self.precipitation.ladder.validate("clear_sky.precipitation", LadderRule::AtMost)?;
        self.visibility_km.ladder.validate("clear_sky.visibility_km", LadderRule::AtLeast)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSeaConfig {
    pub gap_meters: WeightedLadder,
    pub density_pct: WeightedLadder,
    pub wind_speed: WeightedLadder,
    pub mid_cloud_factor: Ladder<f64>,
}

impl Default for CloudSeaConfig {
    fn default() -> Self {
        Self {
            gap_meters: WeightedLadder::new(50, vec![800.0, 500.0, 200.0], vec![50, 40, 20, 10]),
            density_pct: WeightedLadder::new(30, vec![80.0, 50.0, 30.0], vec![30, 20, 10, 5]),
            wind_speed: WeightedLadder::new(20, vec![3.0, 5.0, 8.0], vec![20, 15, 10, 5]),
            mid_cloud_factor: Ladder::new(vec![30.0, 60.0], vec![1.0, 0.7, 0.3]),
        }
    }
}

impl CloudSeaConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.gap_meters.ladder.validate("cloud_sea.gap_meters", LadderRule::Above)?;
        self.density_pct.ladder.validate("cloud_sea.density_pct", LadderRule::Above)?;
        self.wind_speed.ladder.validate("cloud_sea.wind_speed", LadderRule::Below)?;
        self.mid_cloud_factor.validate("cloud_sea.mid_cloud_factor", LadderRule::AtMost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindPenalty {
    pub speed: f64,
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StargazingConfig {
    pub max_night_cloud_cover: f64,
    pub base_optimal: f64,
    pub base_good: f64,
    pub base_partial: f64,
    pub base_poor: f64,
    pub cloud_penalty_factor: f64,
    pub wind_severe: WindPenalty,
    pub wind_moderate: WindPenalty,
}

impl Default for StargazingConfig {
    fn default() -> Self {
        Self {
            max_night_cloud_cover: 70.0,
            base_optimal: 100.0,
            base_good: 90.0,
            base_partial: 70.0,
            base_poor: 100.0,
            cloud_penalty_factor: 0.8,
            wind_severe: WindPenalty {
                speed: 40.0,
                penalty: 30.0,
            },
            wind_moderate: WindPenalty {
                speed: 20.0,
                penalty: 10.0,
            },
        }
    }
}

impl StargazingConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.wind_severe.speed <= self.wind_moderate.speed {
            return Err(ScoringError::InvalidConfig(
                "stargazing: severe wind speed must exceed moderate".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrostConfig {
    pub safety: SafetyConfig,
    pub max_temperature: f64,
    pub temperature_max: i64,
    /// Half-open `[min, max)` bands, first match wins.
    pub temperature_bands: Vec<Band>,
    pub visibility_km: WeightedLadder,
    pub wind_speed: WeightedLadder,
    pub cloud_max: i64,
    /// Inclusive bands on mean low cloud, first match wins.
    pub low_cloud_bands: Vec<Band>,
    pub time_window: String,
}

impl Default for FrostConfig {
    fn default() -> Self {
        let band = |min, max, score| Band { min, max, score };
        Self {
            safety: SafetyConfig {
                precip_threshold: 30.0,
                visibility_threshold: 1000.0,
            },
            max_temperature: 2.0,
            temperature_max: 40,
            temperature_bands: vec![
                band(-5.0, 0.0, 40),
                band(-10.0, -5.0, 30),
                band(0.0, 2.0, 25),
                band(-999.0, -10.0, 15),
            ],
            visibility_km: WeightedLadder::new(30, vec![5.0, 10.0, 20.0], vec![30, 20, 10, 5]),
            wind_speed: WeightedLadder::new(20, vec![3.0, 5.0, 10.0], vec![20, 15, 10, 0]),
            cloud_max: 10,
            low_cloud_bands: vec![band(30.0, 60.0, 10), band(0.0, 30.0, 5), band(60.0, 100.0, 3)],
            time_window: "06:00 - 12:00".to_string(),
        }
    }
}

impl FrostConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.visibility_km.ladder.validate("frost.visibility_km", LadderRule::Below)?;
        self.wind_speed.ladder.validate("frost.wind_speed", LadderRule::Below)?;
        validate_bands("frost.temperature_bands", &self.temperature_bands)?;
        validate_bands("frost.low_cloud_bands", &self.low_cloud_bands)
    }
}

fn validate_bands(name: &str, bands: &[Band]) -> Result<(), ScoringError> {
    if let Some(bad) = bands.iter().find(|b| b.min > b.max) {
        return Err(ScoringError::InvalidConfig(format!(
            "{name}: band [{}, {}] has min above max",
            bad.min, bad.max
        )));
    }
    Ok(())
}

fn validate_steps(name: &str, steps: &[DeductionStep]) -> Result<(), ScoringError> {
    if steps.is_empty() {
        return Err(ScoringError::InvalidConfig(format!("{name}: needs at least one step")));
    }
    if !steps.windows(2).all(|w| w[0].limit < w[1].limit) {
        return Err(ScoringError::InvalidConfig(format!(
            "{name}: limits must be strictly ascending"
        )));
    }
    Ok(())
}

fn default_age_steps() -> Vec<DeductionStep> {
    [(3.0, 0), (8.0, 2), (12.0, 5), (16.0, 8), (20.0, 12), (999.0, 20)]
        .into_iter()
        .map(|(limit, deduction)| DeductionStep { limit, deduction })
        .collect()
}

fn default_temp_steps() -> Vec<DeductionStep> {
    [(-2.0, 0), (-0.5, 2), (1.0, 6), (2.5, 12), (999.0, 22)]
        .into_iter()
        .map(|(limit, deduction)| DeductionStep { limit, deduction })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowRetention {
    pub min_snowfall_24h_cm: f64,
    pub min_duration_h: u32,
    pub min_subzero_hours: u32,
    pub max_temp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowSignalStep {
    pub snowfall: f64,
    pub duration: u32,
    pub score: i64,
}

/// Matches when the code is listed and cloud is within `max_cloud`; a step
/// with neither condition is the fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearWeatherStep {
    #[serde(default)]
    pub weather_codes: Option<Vec<i32>>,
    #[serde(default)]
    pub max_cloud: Option<f64>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunDeductionStep {
    pub sun_score: f64,
    pub deduction: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindDeduction {
    pub severe_threshold: f64,
    pub severe_deduction: i64,
    pub moderate_threshold: f64,
    pub moderate_deduction: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnowTreeConfig {
    pub past_hours: u32,
    pub safety: SafetyConfig,
    pub min_snowfall_12h_cm: f64,
    pub retention: SnowRetention,
    pub snow_signal_max: i64,
    pub snow_signal: Vec<SnowSignalStep>,
    pub clear_weather_max: i64,
    pub clear_weather: Vec<ClearWeatherStep>,
    pub stability_wind: WeightedLadder,
    pub age_deductions: Vec<DeductionStep>,
    pub temp_deductions: Vec<DeductionStep>,
    pub sunshine_weights: Ladder<f64>,
    pub sun_deductions: Vec<SunDeductionStep>,
    pub wind_deduction: WindDeduction,
}

impl Default for SnowTreeConfig {
    fn default() -> Self {
        Self {
            past_hours: 24,
            safety: SafetyConfig::default(),
            min_snowfall_12h_cm: 0.2,
            retention: SnowRetention {
                min_snowfall_24h_cm: 1.5,
                min_duration_h: 3,
                min_subzero_hours: 8,
                max_temp: 1.5,
            },
            snow_signal_max: 60,
            snow_signal: [(2.5, 4, 60), (1.5, 3, 52), (0.8, 2, 44), (0.2, 0, 32)]
                .into_iter()
                .map(|(snowfall, duration, score)| SnowSignalStep {
                    snowfall,
                    duration,
                    score,
                })
                .collect(),
            clear_weather_max: 20,
            clear_weather: vec![
                ClearWeatherStep {
                    weather_codes: Some(vec![0]),
                    max_cloud: Some(20.0),
                    score: 20,
                },
                ClearWeatherStep {
                    weather_codes: Some(vec![1, 2]),
                    max_cloud: Some(45.0),
                    score: 16,
                },
                ClearWeatherStep {
                    weather_codes: None,
                    max_cloud: None,
                    score: 8,
                },
            ],
            stability_wind: WeightedLadder::new(20, vec![12.0, 20.0], vec![20, 14, 8]),
            age_deductions: default_age_steps(),
            temp_deductions: default_temp_steps(),
            sunshine_weights: Ladder::new(vec![10.0, 30.0], vec![2.0, 1.0, 0.0]),
            sun_deductions: vec![
                SunDeductionStep { sun_score: 2.0, deduction: 0 },
                SunDeductionStep { sun_score: 5.0, deduction: 15 },
                SunDeductionStep { sun_score: 8.0, deduction: 30 },
            ],
            wind_deduction: WindDeduction {
                severe_threshold: 50.0,
                severe_deduction: 50,
                moderate_threshold: 30.0,
                moderate_deduction: 20,
            },
        }
    }
}

impl SnowTreeConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.stability_wind.ladder.validate("snow_tree.stability_wind", LadderRule::Below)?;
        self.sunshine_weights.validate("snow_tree.sunshine_weights", LadderRule::Below)?;
        validate_steps("snow_tree.age_deductions", &self.age_deductions)?;
        validate_steps("snow_tree.temp_deductions", &self.temp_deductions)?;
        if self.clear_weather.is_empty() {
            return Err(ScoringError::InvalidConfig(
                "snow_tree.clear_weather: needs at least one step".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceRetention {
    pub min_water_24h_mm: f64,
    pub min_subzero_hours: u32,
    pub max_temp: f64,
}

/// Matches when both the subzero duration and current temperature qualify; a
/// step with neither condition is the fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeStep {
    #[serde(default)]
    pub subzero_hours: Option<u32>,
    #[serde(default)]
    pub temp_now: Option<f64>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewStep {
    #[serde(default)]
    pub max_cloud: Option<f64>,
    #[serde(default)]
    pub max_wind: Option<f64>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceIcicleConfig {
    pub past_hours: u32,
    pub safety: SafetyConfig,
    /// Water equivalent of snowfall; 0.1 turns 1 cm of snow into 1 mm of water.
    pub snow_water_ratio: f64,
    pub min_water_12h_mm: f64,
    pub retention: IceRetention,
    pub water_input: WeightedLadder,
    pub freeze_strength_max: i64,
    pub freeze_strength: Vec<FreezeStep>,
    pub view_quality_max: i64,
    pub view_quality: Vec<ViewStep>,
    pub age_deductions: Vec<DeductionStep>,
    pub temp_deductions: Vec<DeductionStep>,
}

impl Default for IceIcicleConfig {
    fn default() -> Self {
        Self {
            past_hours: 24,
            safety: SafetyConfig::default(),
            snow_water_ratio: 0.1,
            min_water_12h_mm: 0.4,
            retention: IceRetention {
                min_water_24h_mm: 1.0,
                min_subzero_hours: 6,
                max_temp: 1.5,
            },
            water_input: WeightedLadder::new(50, vec![3.0, 2.0, 1.0, 0.4], vec![50, 42, 34, 24, 0]),
            freeze_strength_max: 30,
            freeze_strength: vec![
                FreezeStep { subzero_hours: Some(14), temp_now: Some(-3.0), score: 30 },
                FreezeStep { subzero_hours: Some(10), temp_now: Some(-1.0), score: 24 },
                FreezeStep { subzero_hours: Some(6), temp_now: Some(0.0), score: 16 },
                FreezeStep { subzero_hours: None, temp_now: None, score: 10 },
            ],
            view_quality_max: 20,
            view_quality: vec![
                ViewStep { max_cloud: Some(20.0), max_wind: Some(12.0), score: 20 },
                ViewStep { max_cloud: Some(45.0), max_wind: Some(20.0), score: 14 },
                ViewStep { max_cloud: None, max_wind: None, score: 8 },
            ],
            age_deductions: default_age_steps(),
            temp_deductions: default_temp_steps(),
        }
    }
}

impl IceIcicleConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.water_input.ladder.validate("ice_icicle.water_input", LadderRule::AtLeast)?;
        validate_steps("ice_icicle.age_deductions", &self.age_deductions)?;
        validate_steps("ice_icicle.temp_deductions", &self.temp_deductions)?;
        if self.freeze_strength.is_empty() || self.view_quality.is_empty() {
            return Err(ScoringError::InvalidConfig(
                "ice_icicle: freeze_strength and view_quality need at least one step".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoringConfig {
    pub safety: SafetyConfig,
    pub golden_mountain: GoldenMountainConfig,
    pub clear_sky: ClearSkyConfig,
    pub cloud_sea: CloudSeaConfig,
    pub stargazing: StargazingConfig,
    pub frost: FrostConfig,
    pub snow_tree: SnowTreeConfig,
    pub ice_icicle: IceIcicleConfig,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        self.golden_mountain.validate()?;
        self.clear_sky.validate()?;
        self.cloud_sea.validate()?;
        self.stargazing.validate()?;
        self.frost.validate()?;
        self.snow_tree.validate()?;
        self.ice_icicle.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ScoringConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let yaml = r#"
golden_mountain:
  max_cloud_cover: 70
  light_path: { max: 35, breakpoints: [15, 25, 40], scores: [35, 25, 10, 0] }
frost:
  max_temperature: 1.0
"#;
        let config: ScoringConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.golden_mountain.max_cloud_cover, 70.0);
        assert_eq!(config.golden_mountain.light_path.ladder.breakpoints, vec![15.0, 25.0, 40.0]);
        assert_eq!(config.golden_mountain.target_visible, GoldenMountainConfig::default().target_visible);
        assert_eq!(config.frost.max_temperature, 1.0);
        assert_eq!(config.frost.temperature_bands.len(), 4);
        config.validate().expect("still valid");
    }

    #[test]
    fn mismatched_ladder_fails_validation() {
        let yaml = r#"
clear_sky:
  cloud_cover: { max: 50, breakpoints: [10, 30], scores: [50, 40, 25, 0] }
"#;
        let config: ScoringConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("clear_sky.cloud_cover"));
    }
}

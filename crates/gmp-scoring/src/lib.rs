//! Scoring plugin contract, plugin registry and the built-in plugin families.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use gmp_core::{
    CoordKey, DataFreshness, MoonStatus, ObservingWindow, ScoreResult, SunEvents, Viewpoint,
    WeatherRow,
};
use thiserror::Error;
use tracing::debug;

pub mod config;
pub mod ladder;
pub mod plugins;

pub use config::ScoringConfig;

pub const CRATE_NAME: &str = "gmp-scoring";

/// Capabilities every viewpoint is evaluated for, configured or not.
pub const UNIVERSAL_CAPABILITIES: &[&str] =
    &["clear_sky", "stargazing", "frost", "snow_tree", "ice_icicle"];

const CAPABILITY_EVENTS: &[(&str, &str)] = &[
    ("clear_sky", "clear_sky"),
    ("sunrise", "sunrise_golden_mountain"),
    ("sunset", "sunset_golden_mountain"),
    ("stargazing", "stargazing"),
    ("cloud_sea", "cloud_sea"),
    ("frost", "frost"),
    ("snow_tree", "snow_tree"),
    ("ice_icicle", "ice_icicle"),
];

pub fn events_for_capability(capability: &str) -> Vec<&str> {
    let mapped: Vec<&str> = CAPABILITY_EVENTS
        .iter()
        .filter(|(cap, _)| *cap == capability)
        .map(|(_, event)| *event)
        .collect();
    if mapped.is_empty() {
        vec![capability]
    } else {
        mapped
    }
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("missing data: {0}")]
    MissingData(String),
    #[error("invalid scoring config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataRequirement {
    pub needs_target_weather: bool,
    pub needs_light_path_weather: bool,
    pub needs_astro: bool,
    pub past_hours: u32,
    /// Calendar months (1-12) the plugin is active in; `None` is all year.
    pub season_months: Option<BTreeSet<u32>>,
}

impl DataRequirement {
    pub fn in_season(&self, date: NaiveDate) -> bool {
        self.season_months
            .as_ref()
            .map_or(true, |months| months.contains(&date.month()))
    }

    pub fn past_days(&self) -> u32 {
        self.past_hours.div_ceil(24)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolarOrientation {
    Sunrise,
    Sunset,
}

impl SolarOrientation {
    pub fn azimuth(&self, sun: &SunEvents) -> f64 {
        match self {
            SolarOrientation::Sunrise => sun.sunrise_azimuth,
            SolarOrientation::Sunset => sun.sunset_azimuth,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolarOrientation::Sunrise => "sunrise",
            SolarOrientation::Sunset => "sunset",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightPathSample {
    pub coord: CoordKey,
    pub weather: Vec<WeatherRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightPath {
    pub orientation: SolarOrientation,
    pub azimuth: f64,
    pub samples: Vec<LightPathSample>,
}

#[derive(Debug, Clone)]
pub struct DayContext<'a> {
    pub date: NaiveDate,
    pub viewpoint: &'a Viewpoint,
    pub local_weather: Vec<WeatherRow>,
    pub history: Vec<WeatherRow>,
    pub sun_events: Option<SunEvents>,
    pub moon_status: Option<MoonStatus>,
    pub observing_window: Option<ObservingWindow>,
    pub target_weather: Option<HashMap<String, Vec<WeatherRow>>>,
    pub light_paths: Option<Vec<LightPath>>,
    pub freshness: DataFreshness,
}

impl<'a> DayContext<'a> {
    pub fn new(date: NaiveDate, viewpoint: &'a Viewpoint, local_weather: Vec<WeatherRow>) -> Self {
        Self {
            date,
            viewpoint,
            local_weather,
            history: Vec::new(),
            sun_events: None,
            moon_status: None,
            observing_window: None,
            target_weather: None,
            light_paths: None,
            freshness: DataFreshness::Fresh,
        }
    }

    pub fn weather_with_history(&self) -> Vec<WeatherRow> {
        self.history
            .iter()
            .chain(&self.local_weather)
            .cloned()
            .collect()
    }

    pub fn light_path(&self, orientation: SolarOrientation) -> Option<&LightPath> {
        self.light_paths
            .as_ref()?
            .iter()
            .find(|path| path.orientation == orientation)
    }
}

/// `score` returns `Ok(None)` when the phenomenon does not apply today, which
/// is distinct from a zero score.
pub trait ScorerPlugin: Send + Sync {
    fn event_type(&self) -> &str;
    fn display_name(&self) -> &str;
    fn data_requirement(&self) -> DataRequirement;
    fn dimensions(&self) -> &'static [&'static str];

    fn light_path_orientation(&self) -> Option<SolarOrientation> {
        None
    }

    fn score(&self, ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError>;
}

#[derive(Default, Clone)]
pub struct ScoreEngine {
    plugins: Vec<Arc<dyn ScorerPlugin>>,
    index: HashMap<String, usize>,
}

impl ScoreEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_plugins(config: &ScoringConfig) -> Result<Self, ScoringError> {
        config.validate()?;
        let mut engine = Self::new();
        for plugin in plugins::builtin(config) {
            engine.register(plugin);
        }
        debug!(count = engine.len(), "registered built-in plugins");
        Ok(engine)
    }

    /// A later plugin with the same event type replaces the earlier one in place.
    pub fn register(&mut self, plugin: Arc<dyn ScorerPlugin>) {
        let event_type = plugin.event_type().to_string();
        match self.index.get(&event_type) {
            Some(&slot) => {
                debug!(event_type = %event_type, "replacing registered plugin");
                self.plugins[slot] = plugin;
            }
            None => {
                self.index.insert(event_type, self.plugins.len());
                self.plugins.push(plugin);
            }
        }
    }

    pub fn get(&self, event_type: &str) -> Option<Arc<dyn ScorerPlugin>> {
        self.index.get(event_type).map(|&slot| self.plugins[slot].clone())
    }

    pub fn plugins(&self) -> &[Arc<dyn ScorerPlugin>] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn display_names(&self) -> HashMap<String, String> {
        self.plugins
            .iter()
            .map(|p| (p.event_type().to_string(), p.display_name().to_string()))
            .collect()
    }

    pub fn filter_active_plugins(
        &self,
        capabilities: &[String],
        date: NaiveDate,
        events: Option<&[String]>,
    ) -> Vec<Arc<dyn ScorerPlugin>> {
        let allowed: HashSet<&str> = capabilities
            .iter()
            .map(String::as_str)
            .chain(UNIVERSAL_CAPABILITIES.iter().copied())
            .flat_map(events_for_capability)
            .collect();
        let filter = events.filter(|list| !list.is_empty());

        self.plugins
            .iter()
            .filter(|p| allowed.contains(p.event_type()))
            .filter(|p| filter.map_or(true, |list| list.iter().any(|e| e == p.event_type())))
            .filter(|p| p.data_requirement().in_season(date))
            .cloned()
            .collect()
    }

    pub fn collect_requirements(plugins: &[Arc<dyn ScorerPlugin>]) -> DataRequirement {
        plugins
            .iter()
            .map(|p| p.data_requirement())
            .fold(DataRequirement::default(), |acc, req| DataRequirement {
                needs_target_weather: acc.needs_target_weather || req.needs_target_weather,
                needs_light_path_weather: acc.needs_light_path_weather
                    || req.needs_light_path_weather,
                needs_astro: acc.needs_astro || req.needs_astro,
                past_hours: acc.past_hours.max(req.past_hours),
                season_months: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        event_type: &'static str,
        display_name: &'static str,
        requirement: DataRequirement,
    }

    impl Stub {
        fn new(event_type: &'static str) -> Self {
            Self {
                event_type,
                display_name: event_type,
                requirement: DataRequirement::default(),
            }
        }
    }

    impl ScorerPlugin for Stub {
        fn event_type(&self) -> &str {
            self.event_type
        }

        fn display_name(&self) -> &str {
            self.display_name
        }

        fn data_requirement(&self) -> DataRequirement {
            self.requirement.clone()
        }

        fn dimensions(&self) -> &'static [&'static str] {
            &[]
        }

        fn score(&self, _ctx: &DayContext<'_>) -> Result<Option<ScoreResult>, ScoringError> {
            Ok(Some(ScoreResult::new(self.event_type, 50)))
        }
    }

    fn date(month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, month, 15).unwrap()
    }

    fn event_types(plugins: &[Arc<dyn ScorerPlugin>]) -> Vec<String> {
        plugins.iter().map(|p| p.event_type().to_string()).collect()
    }

    fn builtin() -> ScoreEngine {
        ScoreEngine::with_builtin_plugins(&ScoringConfig::default()).expect("defaults valid")
    }

    #[test]
    fn builtin_registry_has_every_family() {
        let engine = builtin();
        assert_eq!(
            event_types(engine.plugins()),
            vec![
                "sunrise_golden_mountain",
                "sunset_golden_mountain",
                "cloud_sea",
                "clear_sky",
                "stargazing",
                "frost",
                "snow_tree",
                "ice_icicle",
            ]
        );
    }

    #[test]
    fn last_registration_wins_and_keeps_position() {
        let mut engine = ScoreEngine::new();
        engine.register(Arc::new(Stub::new("frost")));
        engine.register(Arc::new(Stub::new("cloud_sea")));
        engine.register(Arc::new(Stub {
            display_name: "Rime v2",
            ..Stub::new("frost")
        }));

        assert_eq!(engine.len(), 2);
        assert_eq!(event_types(engine.plugins()), vec!["frost", "cloud_sea"]);
        assert_eq!(engine.get("frost").unwrap().display_name(), "Rime v2");
    }

    #[test]
    fn universal_capabilities_are_always_included() {
        let engine = builtin();
        let active = engine.filter_active_plugins(&[], date(1), None);
        let types = event_types(&active);
        for universal in UNIVERSAL_CAPABILITIES {
            assert!(types.iter().any(|t| t == universal), "missing {universal}");
        }
        assert!(!types.iter().any(|t| t == "cloud_sea"));
        assert!(!types.iter().any(|t| t == "sunrise_golden_mountain"));
    }

    #[test]
    fn capabilities_expand_and_filter_is_idempotent() {
        let engine = builtin();
        let caps = vec!["sunrise".to_string(), "cloud_sea".to_string()];
        let first = event_types(&engine.filter_active_plugins(&caps, date(1), None));
        let second = event_types(&engine.filter_active_plugins(&caps, date(1), None));
        assert_eq!(first, second);
        assert!(first.contains(&"sunrise_golden_mountain".to_string()));
        assert!(first.contains(&"cloud_sea".to_string()));
        assert!(!first.contains(&"sunset_golden_mountain".to_string()));
    }

    #[test]
    fn event_filter_narrows_and_empty_filter_is_ignored() {
        let engine = builtin();
        let caps = vec!["cloud_sea".to_string()];
        let only = vec!["cloud_sea".to_string(), "sunset_golden_mountain".to_string()];
        let narrowed = engine.filter_active_plugins(&caps, date(1), Some(&only));
        assert_eq!(event_types(&narrowed), vec!["cloud_sea"]);

        let all = engine.filter_active_plugins(&caps, date(1), None);
        let empty = engine.filter_active_plugins(&caps, date(1), Some(&[]));
        assert_eq!(event_types(&all), event_types(&empty));
    }

    #[test]
    fn season_gating_applies_after_explicit_filter() {
        let mut engine = ScoreEngine::new();
        engine.register(Arc::new(Stub {
            requirement: DataRequirement {
                season_months: Some(BTreeSet::from([12, 1, 2])),
                ..DataRequirement::default()
            },
            ..Stub::new("frost")
        }));
        let filter = vec!["frost".to_string()];
        assert_eq!(engine.filter_active_plugins(&[], date(1), Some(&filter)).len(), 1);
        assert!(engine.filter_active_plugins(&[], date(7), Some(&filter)).is_empty());
    }

    #[test]
    fn unknown_capability_maps_to_itself() {
        let mut engine = ScoreEngine::new();
        engine.register(Arc::new(Stub::new("aurora")));
        let caps = vec!["aurora".to_string()];
        assert_eq!(engine.filter_active_plugins(&caps, date(3), None).len(), 1);
        assert!(engine.filter_active_plugins(&[], date(3), None).is_empty());
    }

    #[test]
    fn collect_requirements_is_or_and_max() {
        assert_eq!(ScoreEngine::collect_requirements(&[]), DataRequirement::default());

        let plugins: Vec<Arc<dyn ScorerPlugin>> = vec![
            Arc::new(Stub {
                requirement: DataRequirement {
                    needs_target_weather: true,
                    past_hours: 12,
                    ..DataRequirement::default()
                },
                ..Stub::new("a")
            }),
            Arc::new(Stub {
                requirement: DataRequirement {
                    needs_astro: true,
                    past_hours: 24,
                    season_months: Some(BTreeSet::from([1])),
                    ..DataRequirement::default()
                },
                ..Stub::new("b")
            }),
        ];
        let merged = ScoreEngine::collect_requirements(&plugins);
        assert!(merged.needs_target_weather);
        assert!(merged.needs_astro);
        assert!(!merged.needs_light_path_weather);
        assert_eq!(merged.past_hours, 24);
        assert_eq!(merged.past_days(), 1);
        assert_eq!(merged.season_months, None);
    }
}

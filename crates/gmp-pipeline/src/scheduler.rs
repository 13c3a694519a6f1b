//! Forecast orchestration: plan data needs, acquire weather once, score day by day.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::NaiveDate;
use gmp_core::{
    geo, rows_for_date, ConfidenceTable, CoordKey, DataFreshness, ForecastDay, GmpError,
    HourlySnapshot, PipelineResult, RunMeta, RunMode, ScoreResult, SummaryGenerator, Viewpoint,
    WeatherRow,
};
use gmp_scoring::{
    DataRequirement, DayContext, LightPath, LightPathSample, ScoreEngine, ScorerPlugin,
    SolarOrientation,
};
use gmp_storage::FetchError;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::astro::AstronomyProvider;
use crate::clock::Clock;
use crate::config::{LightPathConfig, RouteCatalog, ViewpointCatalog};
use crate::fetch::WeatherFetcher;
use crate::ENGINE_VERSION;

const WEATHER_SERVICE: &str = "open-meteo";
pub const NO_WEATHER_SUMMARY: &str = "No weather data available";
pub const NO_EVENTS_SUMMARY: &str = "No applicable scoring events";

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPath {
    pub orientation: SolarOrientation,
    pub azimuth: f64,
    pub points: Vec<CoordKey>,
}

pub struct DataPlan {
    pub plugins: Vec<Arc<dyn ScorerPlugin>>,
    pub requirement: DataRequirement,
    pub local: CoordKey,
    /// Empty unless some active plugin needs target weather.
    pub targets: Vec<CoordKey>,
    /// Empty unless some active plugin needs light path weather.
    pub light_paths: Vec<PlannedPath>,
}

impl DataPlan {
    pub fn light_path_points(&self) -> Vec<CoordKey> {
        let mut points = Vec::new();
        for point in self.light_paths.iter().flat_map(|p| &p.points) {
            if !points.contains(point) {
                points.push(*point);
            }
        }
        points
    }

    pub fn coordinates(&self) -> Vec<CoordKey> {
        let mut coords = vec![self.local];
        for key in self.targets.iter().chain(&self.light_path_points()) {
            if !coords.contains(key) {
                coords.push(*key);
            }
        }
        coords
    }
}

struct Acquired {
    /// Sorted by date and hour.
    local: Vec<WeatherRow>,
    targets: Option<HashMap<CoordKey, Vec<WeatherRow>>>,
    light: Option<HashMap<CoordKey, Vec<WeatherRow>>>,
}

impl Acquired {
    fn new(
        mut local: Vec<WeatherRow>,
        targets: Option<HashMap<CoordKey, Vec<WeatherRow>>>,
        light: Option<HashMap<CoordKey, Vec<WeatherRow>>>,
    ) -> Self {
        local.sort_by_key(|r| (r.forecast_date, r.forecast_hour));
        Self {
            local,
            targets,
            light,
        }
    }

    /// The last `hours` local rows before `date`, oldest first.
    fn history_before(&self, date: NaiveDate, hours: u32) -> Vec<WeatherRow> {
        let earlier = self.local.partition_point(|r| r.forecast_date < date);
        let start = earlier.saturating_sub(hours as usize);
        self.local[start..earlier].to_vec()
    }

    fn hourly_snapshots(&self, dates: &[NaiveDate]) -> BTreeMap<NaiveDate, Vec<HourlySnapshot>> {
        dates
            .iter()
            .map(|date| {
                let hours = self
                    .local
                    .iter()
                    .filter(|r| r.forecast_date == *date)
                    .map(HourlySnapshot::from)
                    .collect();
                (*date, hours)
            })
            .collect()
    }
}

fn local_tier_error(err: FetchError) -> GmpError {
    match err {
        FetchError::Timeout { timeout_secs, .. } => GmpError::ApiTimeout {
            service: WEATHER_SERVICE.to_string(),
            timeout_secs,
        },
        other => GmpError::ServiceUnavailable(format!("{WEATHER_SERVICE}: {other}")),
    }
}

/// Score one plugin, treating both errors and panics as "no result today".
fn score_plugin(plugin: &dyn ScorerPlugin, ctx: &DayContext<'_>) -> Option<ScoreResult> {
    match catch_unwind(AssertUnwindSafe(|| plugin.score(ctx))) {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(
                viewpoint = %ctx.viewpoint.id,
                date = %ctx.date,
                event_type = plugin.event_type(),
                error = %err,
                "plugin scoring failed"
            );
            None
        }
        Err(_) => {
            warn!(
                viewpoint = %ctx.viewpoint.id,
                date = %ctx.date,
                event_type = plugin.event_type(),
                "plugin panicked while scoring"
            );
            None
        }
    }
}

fn target_weather_for(
    viewpoint: &Viewpoint,
    weather: &HashMap<CoordKey, Vec<WeatherRow>>,
    date: NaiveDate,
) -> HashMap<String, Vec<WeatherRow>> {
    viewpoint
        .targets
        .iter()
        .filter_map(|target| {
            let rows = weather.get(&CoordKey::new(target.lat, target.lon))?;
            Some((target.name.clone(), rows_for_date(rows, date)))
        })
        .collect()
}

fn light_paths_for(
    planned: &[PlannedPath],
    weather: &HashMap<CoordKey, Vec<WeatherRow>>,
    date: NaiveDate,
) -> Vec<LightPath> {
    planned
        .iter()
        .map(|path| LightPath {
            orientation: path.orientation,
            azimuth: path.azimuth,
            samples: path
                .points
                .iter()
                .map(|coord| LightPathSample {
                    coord: *coord,
                    weather: weather
                        .get(coord)
                        .map(|rows| rows_for_date(rows, date))
                        .unwrap_or_default(),
                })
                .collect(),
        })
        .collect()
}

pub struct Scheduler {
    viewpoints: Arc<ViewpointCatalog>,
    routes: Arc<RouteCatalog>,
    engine: ScoreEngine,
    fetcher: Arc<dyn WeatherFetcher>,
    astro: Arc<dyn AstronomyProvider>,
    clock: Arc<dyn Clock>,
    confidence: ConfidenceTable,
    light_path: LightPathConfig,
    summaries: SummaryGenerator,
}

impl Scheduler {
    pub fn new(
        viewpoints: Arc<ViewpointCatalog>,
        routes: Arc<RouteCatalog>,
        engine: ScoreEngine,
        fetcher: Arc<dyn WeatherFetcher>,
        astro: Arc<dyn AstronomyProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let summaries = SummaryGenerator::new(engine.display_names());
        Self {
            viewpoints,
            routes,
            engine,
            fetcher,
            astro,
            clock,
            confidence: ConfidenceTable::default(),
            light_path: LightPathConfig::default(),
            summaries,
        }
    }

    pub fn with_confidence(mut self, confidence: ConfidenceTable) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_light_path(mut self, light_path: LightPathConfig) -> Self {
        self.light_path = light_path;
        self
    }

    pub fn viewpoints(&self) -> &ViewpointCatalog {
        &self.viewpoints
    }

    pub fn routes(&self) -> &RouteCatalog {
        &self.routes
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Light paths use the sun's azimuths on `date`; drift over the following
    /// days of a multi-day run is ignored.
    pub fn plan(&self, viewpoint: &Viewpoint, date: NaiveDate, events: Option<&[String]>) -> DataPlan {
        let plugins = self
            .engine
            .filter_active_plugins(&viewpoint.capabilities, date, events);
        let requirement = ScoreEngine::collect_requirements(&plugins);

        let targets = if requirement.needs_target_weather {
            viewpoint
                .targets
                .iter()
                .map(|t| CoordKey::new(t.lat, t.lon))
                .collect()
        } else {
            Vec::new()
        };
        let light_paths = if requirement.needs_light_path_weather {
            self.plan_light_paths(viewpoint, &plugins, date)
        } else {
            Vec::new()
        };

        DataPlan {
            local: CoordKey::new(viewpoint.location.lat, viewpoint.location.lon),
            plugins,
            requirement,
            targets,
            light_paths,
        }
    }

    fn plan_light_paths(
        &self,
        viewpoint: &Viewpoint,
        plugins: &[Arc<dyn ScorerPlugin>],
        date: NaiveDate,
    ) -> Vec<PlannedPath> {
        let mut orientations = Vec::new();
        for plugin in plugins {
            if !plugin.data_requirement().needs_light_path_weather {
                continue;
            }
            if let Some(orientation) = plugin.light_path_orientation() {
                if !orientations.contains(&orientation) {
                    orientations.push(orientation);
                }
            }
        }
        if orientations.is_empty() {
            return Vec::new();
        }

        let loc = viewpoint.location;
        let Some(sun) = self.astro.sun_events(loc.lat, loc.lon, date) else {
            debug!(viewpoint = %viewpoint.id, %date, "no sunrise or sunset, light paths skipped");
            return Vec::new();
        };
        orientations
            .into_iter()
            .map(|orientation| {
                let azimuth = orientation.azimuth(&sun);
                PlannedPath {
                    orientation,
                    azimuth,
                    points: geo::light_path_points(
                        loc.lat,
                        loc.lon,
                        azimuth,
                        self.light_path.count,
                        self.light_path.interval_km,
                    ),
                }
            })
            .collect()
    }

    pub async fn run(
        &self,
        viewpoint_id: &str,
        days: u32,
        events: Option<&[String]>,
    ) -> Result<PipelineResult, GmpError> {
        let viewpoint = self.viewpoints.get(viewpoint_id)?;
        let span = info_span!("forecast_run", viewpoint = %viewpoint.id, days);
        self.forecast(viewpoint, days, events).instrument(span).await
    }

    async fn forecast(
        &self,
        viewpoint: &Viewpoint,
        days: u32,
        events: Option<&[String]>,
    ) -> Result<PipelineResult, GmpError> {
        let today = self.clock.now().date_naive();
        let dates: Vec<NaiveDate> = today.iter_days().take(days as usize).collect();
        let plan = self.plan(viewpoint, today, events);

        if plan.plugins.is_empty() {
            info!("no applicable plugins");
            let forecast_days = dates
                .iter()
                .zip(1..)
                .map(|(date, lead)| {
                    ForecastDay::empty(*date, NO_EVENTS_SUMMARY, self.confidence.label_for(lead))
                })
                .collect();
            return Ok(self.result(
                viewpoint,
                forecast_days,
                DataFreshness::Fresh,
                RunMode::Forecast,
                BTreeMap::new(),
            ));
        }

        let loc = viewpoint.location;
        let local = self
            .fetcher
            .fetch_local_hourly(loc.lat, loc.lon, days, plan.requirement.past_days())
            .await
            .map_err(local_tier_error)?;

        let mut degraded = false;
        let targets = self
            .optional_tier("target", &plan.targets, days, &mut degraded)
            .await;
        let light = self
            .optional_tier("light_path", &plan.light_path_points(), days, &mut degraded)
            .await;
        let data = Acquired::new(local, targets, light);
        let freshness = if degraded {
            DataFreshness::Degraded
        } else {
            DataFreshness::Fresh
        };

        let forecast_days: Vec<ForecastDay> = dates
            .iter()
            .zip(1..)
            .map(|(date, lead)| {
                let confidence = self.confidence.label_for(lead);
                self.score_day(
                    viewpoint,
                    *date,
                    events,
                    &data,
                    &plan.light_paths,
                    freshness,
                    confidence,
                )
            })
            .collect();

        info!(
            scored_days = forecast_days.iter().filter(|d| !d.events.is_empty()).count(),
            ?freshness,
            "forecast run complete"
        );
        let hourly = data.hourly_snapshots(&dates);
        Ok(self.result(viewpoint, forecast_days, freshness, RunMode::Forecast, hourly))
    }

    async fn optional_tier(
        &self,
        tier: &'static str,
        coords: &[CoordKey],
        days: u32,
        degraded: &mut bool,
    ) -> Option<HashMap<CoordKey, Vec<WeatherRow>>> {
        if coords.is_empty() {
            return None;
        }
        match self.fetcher.fetch_multi_point(coords, days).await {
            Ok(weather) => {
                let missing = coords.iter().filter(|c| !weather.contains_key(c)).count();
                if missing > 0 {
                    warn!(tier, missing, points = coords.len(), "optional weather tier incomplete");
                    *degraded = true;
                }
                Some(weather)
            }
            Err(err) => {
                warn!(tier, points = coords.len(), error = %err, "optional weather tier unavailable");
                *degraded = true;
                None
            }
        }
    }

    /// Coordinates missing from `weather` count as having no rows.
    pub async fn run_with_data(
        &self,
        viewpoint_id: &str,
        weather: &HashMap<CoordKey, Vec<WeatherRow>>,
        date: NaiveDate,
        events: Option<&[String]>,
    ) -> Result<PipelineResult, GmpError> {
        let viewpoint = self.viewpoints.get(viewpoint_id)?;
        let span = info_span!("injected_run", viewpoint = %viewpoint.id, %date);
        Ok(span.in_scope(|| self.score_injected(viewpoint, weather, date, events)))
    }

    fn score_injected(
        &self,
        viewpoint: &Viewpoint,
        weather: &HashMap<CoordKey, Vec<WeatherRow>>,
        date: NaiveDate,
        events: Option<&[String]>,
    ) -> PipelineResult {
        let plan = self.plan(viewpoint, date, events);
        let confidence = self.confidence.label_for(0);

        if plan.plugins.is_empty() {
            let day = ForecastDay::empty(date, NO_EVENTS_SUMMARY, confidence);
            return self.result(
                viewpoint,
                vec![day],
                DataFreshness::Archive,
                RunMode::Backtest,
                BTreeMap::new(),
            );
        }

        let pick = |coords: &[CoordKey]| -> HashMap<CoordKey, Vec<WeatherRow>> {
            coords
                .iter()
                .map(|key| (*key, weather.get(key).cloned().unwrap_or_default()))
                .collect()
        };
        let local = weather.get(&plan.local).cloned().unwrap_or_default();
        let targets = (!plan.targets.is_empty()).then(|| pick(&plan.targets));
        let light_points = plan.light_path_points();
        let light = (!light_points.is_empty()).then(|| pick(&light_points));
        let data = Acquired::new(local, targets, light);

        let day = self.score_day(
            viewpoint,
            date,
            events,
            &data,
            &plan.light_paths,
            DataFreshness::Archive,
            confidence,
        );
        let hourly = data.hourly_snapshots(&[date]);
        self.result(viewpoint, vec![day], DataFreshness::Archive, RunMode::Backtest, hourly)
    }

    /// Forecast every stop of a route in order. Failing stops are logged and left out.
    pub async fn run_route(
        &self,
        route_id: &str,
        days: u32,
        events: Option<&[String]>,
    ) -> Result<Vec<PipelineResult>, GmpError> {
        let route = self.routes.get(route_id)?;
        let mut results = Vec::with_capacity(route.stops.len());
        for stop in &route.stops {
            match self.run(&stop.viewpoint_id, days, events).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(route = %route.id, viewpoint = %stop.viewpoint_id, error = %err, "route stop skipped")
                }
            }
        }
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn score_day(
        &self,
        viewpoint: &Viewpoint,
        date: NaiveDate,
        events: Option<&[String]>,
        data: &Acquired,
        light_paths: &[PlannedPath],
        freshness: DataFreshness,
        confidence: &str,
    ) -> ForecastDay {
        let local = rows_for_date(&data.local, date);
        if local.is_empty() {
            return ForecastDay::empty(date, NO_WEATHER_SUMMARY, confidence);
        }
        let active = self
            .engine
            .filter_active_plugins(&viewpoint.capabilities, date, events);
        if active.is_empty() {
            return ForecastDay::empty(date, NO_EVENTS_SUMMARY, confidence);
        }
        let requirement = ScoreEngine::collect_requirements(&active);

        let mut ctx = DayContext::new(date, viewpoint, local);
        ctx.freshness = freshness;
        ctx.history = data.history_before(date, requirement.past_hours);
        if requirement.needs_astro {
            self.attach_astronomy(&mut ctx);
        }
        ctx.target_weather = data
            .targets
            .as_ref()
            .map(|weather| target_weather_for(viewpoint, weather, date));
        ctx.light_paths = data
            .light
            .as_ref()
            .map(|weather| light_paths_for(light_paths, weather, date));

        let mut scored: Vec<ScoreResult> = active
            .iter()
            .filter_map(|plugin| score_plugin(plugin.as_ref(), &ctx))
            .map(|result| result.with_confidence(confidence))
            .collect();
        // stable: equal scores keep registration order
        scored.sort_by(|a, b| b.total_score.cmp(&a.total_score));

        ForecastDay {
            date,
            summary: self.summaries.generate(&scored),
            best_event: scored.first().cloned(),
            events: scored,
            confidence: confidence.to_string(),
        }
    }

    fn attach_astronomy(&self, ctx: &mut DayContext<'_>) {
        let loc = ctx.viewpoint.location;
        let sun = self.astro.sun_events(loc.lat, loc.lon, ctx.date);
        let offset = *self.clock.now().offset();
        let moon_at = sun.as_ref().map(|s| s.astronomical_dusk).or_else(|| {
            ctx.date
                .and_hms_opt(12, 0, 0)
                .and_then(|noon| noon.and_local_timezone(offset).single())
        });
        let moon = moon_at.map(|at| self.astro.moon_status(loc.lat, loc.lon, at));

        ctx.observing_window = match (&sun, &moon) {
            (Some(sun), Some(moon)) => Some(self.astro.observing_window(sun, moon)),
            _ => None,
        };
        ctx.sun_events = sun;
        ctx.moon_status = moon;
    }

    fn result(
        &self,
        viewpoint: &Viewpoint,
        forecast_days: Vec<ForecastDay>,
        data_freshness: DataFreshness,
        mode: RunMode,
        hourly_weather: BTreeMap<NaiveDate, Vec<HourlySnapshot>>,
    ) -> PipelineResult {
        PipelineResult {
            viewpoint: viewpoint.clone(),
            forecast_days,
            meta: RunMeta {
                generated_at: self.clock.now(),
                data_freshness,
                engine_version: ENGINE_VERSION.to_string(),
                mode,
                hourly_weather,
            },
        }
    }
}

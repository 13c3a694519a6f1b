//! Engine configuration and the viewpoint/route catalogs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use gmp_core::{ConfidenceTable, GmpError, Route, Viewpoint};
use gmp_scoring::ScoringConfig;
use gmp_storage::{BackoffPolicy, HttpClientConfig};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Where configuration and data live, overridable from the environment.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
    pub db_path: Option<PathBuf>,
    pub viewpoints_dir: PathBuf,
    pub routes_dir: PathBuf,
}

impl ConfigPaths {
    pub fn from_env() -> Self {
        Self {
            config_file: std::env::var("GMP_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/engine_config.yaml")),
            db_path: std::env::var("GMP_DB_PATH").ok().map(PathBuf::from),
            viewpoints_dir: std::env::var("GMP_VIEWPOINTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/viewpoints")),
            routes_dir: std::env::var("GMP_ROUTES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/routes")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightPathConfig {
    pub count: usize,
    pub interval_km: f64,
}

impl Default for LightPathConfig {
    fn default() -> Self {
        Self {
            count: 10,
            interval_km: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenMeteoConfig {
    pub forecast_url: String,
    pub archive_url: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub concurrency: usize,
    pub user_agent: String,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            archive_url: "https://archive-api.open-meteo.com/v1/archive".to_string(),
            connect_timeout_secs: 5,
            timeout_secs: 15,
            max_retries: 2,
            concurrency: 4,
            user_agent: "gmp-engine/0.1".to_string(),
        }
    }
}

impl OpenMeteoConfig {
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            global_concurrency: self.concurrency,
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    pub forecast_days: u32,
    pub utc_offset_hours: i32,
    pub light_path: LightPathConfig,
    pub confidence: ConfidenceTable,
    pub backtest_max_history_days: i64,
    pub open_meteo: OpenMeteoConfig,
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/gmp_cache.db"),
            log_level: "info".to_string(),
            forecast_days: 7,
            utc_offset_hours: 8,
            light_path: LightPathConfig::default(),
            confidence: ConfidenceTable::default(),
            backtest_max_history_days: 365,
            open_meteo: OpenMeteoConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate `path`; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        Ok(config)
    }

    /// `GMP_DB_PATH` wins over the file.
    pub async fn from_paths(paths: &ConfigPaths) -> Result<Self> {
        let mut config = Self::load(&paths.config_file).await?;
        if let Some(db_path) = &paths.db_path {
            config.db_path = db_path.clone();
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GmpError> {
        if !(1..=16).contains(&self.forecast_days) {
            return Err(GmpError::Config(format!(
                "forecast_days must be within 1..=16, got {}",
                self.forecast_days
            )));
        }
        if self.light_path.count == 0 || self.light_path.interval_km <= 0.0 {
            return Err(GmpError::Config(
                "light_path needs a positive count and interval".to_string(),
            ));
        }
        self.utc_offset()?;
        self.scoring
            .validate()
            .map_err(|err| GmpError::Config(err.to_string()))
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, GmpError> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            GmpError::Config(format!("utc_offset_hours out of range: {}", self.utc_offset_hours))
        })
    }
}

async fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("listing {}", dir.display()))?
    {
        let path = entry.path();
        if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn check_coordinate(lat: f64, lon: f64) -> Result<(), GmpError> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(GmpError::InvalidCoordinate { lat, lon })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewpointCatalog {
    viewpoints: BTreeMap<String, Viewpoint>,
}

impl ViewpointCatalog {
    pub async fn load_dir(dir: &Path) -> Result<Self> {
        let mut viewpoints = Vec::new();
        for path in yaml_files(dir).await? {
            viewpoints.push(read_yaml::<Viewpoint>(&path).await?);
        }
        Self::from_viewpoints(viewpoints)
    }

    pub fn from_viewpoints(viewpoints: impl IntoIterator<Item = Viewpoint>) -> Result<Self> {
        let mut catalog = BTreeMap::new();
        for vp in viewpoints {
            check_coordinate(vp.location.lat, vp.location.lon)
                .with_context(|| format!("viewpoint {}", vp.id))?;
            for target in &vp.targets {
                check_coordinate(target.lat, target.lon)
                    .with_context(|| format!("viewpoint {} target {}", vp.id, target.name))?;
            }
            let id = vp.id.clone();
            if catalog.insert(id.clone(), vp).is_some() {
                anyhow::bail!("duplicate viewpoint id {id}");
            }
        }
        Ok(Self {
            viewpoints: catalog,
        })
    }

    pub fn get(&self, id: &str) -> Result<&Viewpoint, GmpError> {
        self.viewpoints
            .get(id)
            .ok_or_else(|| GmpError::ViewpointNotFound(id.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &Viewpoint> {
        self.viewpoints.values()
    }
}

/// Read-only set of routes; stops are kept sorted by `order`.
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    routes: BTreeMap<String, Route>,
}

impl RouteCatalog {
    /// A missing directory is an empty catalog.
    pub async fn load_dir(dir: &Path) -> Result<Self> {
        if !fs::try_exists(dir)
            .await
            .with_context(|| format!("checking {}", dir.display()))?
        {
            return Ok(Self::default());
        }
        let mut routes = Vec::new();
        for path in yaml_files(dir).await? {
            routes.push(read_yaml::<Route>(&path).await?);
        }
        Ok(Self::from_routes(routes))
    }

    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let routes = routes
            .into_iter()
            .map(|mut route| {
                route.stops.sort_by_key(|stop| stop.order);
                (route.id.clone(), route)
            })
            .collect();
        Self { routes }
    }

    pub fn get(&self, id: &str) -> Result<&Route, GmpError> {
        self.routes
            .get(id)
            .ok_or_else(|| GmpError::RouteNotFound(id.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NIUBEI: &str = r#"
id: niubei
name: Niubei Mountain
location: { lat: 29.75, lon: 102.35, altitude: 3660 }
capabilities: [sunrise, sunset, cloud_sea]
targets:
  - { name: Gongga, lat: 29.58, lon: 101.88, altitude: 7556, weight: primary }
"#;

    const ZHEDUO: &str = r#"
id: zheduo
name: Zheduo Pass
location: { lat: 30.07, lon: 101.8, altitude: 4298 }
"#;

    #[tokio::test]
    async fn missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.utc_offset().unwrap().local_minus_utc(), 8 * 3600);
    }

    #[tokio::test]
    async fn partial_config_overrides_and_env_db_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("engine_config.yaml");
        std::fs::write(
            &file,
            "forecast_days: 3\nscoring:\n  golden_mountain:\n    max_cloud_cover: 70\n",
        )
        .unwrap();

        let paths = ConfigPaths {
            config_file: file,
            db_path: Some(dir.path().join("cache.db")),
            viewpoints_dir: dir.path().join("viewpoints"),
            routes_dir: dir.path().join("routes"),
        };
        let config = EngineConfig::from_paths(&paths).await.unwrap();
        assert_eq!(config.forecast_days, 3);
        assert_eq!(config.scoring.golden_mountain.max_cloud_cover, 70.0);
        assert_eq!(config.scoring.clear_sky, ScoringConfig::default().clear_sky);
        assert_eq!(config.db_path, dir.path().join("cache.db"));
    }

    #[tokio::test]
    async fn invalid_ladder_is_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("engine_config.yaml");
        std::fs::write(
            &file,
            "scoring:\n  cloud_sea:\n    wind_speed: { max: 20, breakpoints: [3, 5], scores: [20] }\n",
        )
        .unwrap();
        let err = EngineConfig::load(&file).await.unwrap_err();
        assert!(format!("{err:#}").contains("cloud_sea.wind_speed"));
    }

    #[tokio::test]
    async fn catalogs_load_sorted_and_report_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vps = dir.path().join("viewpoints");
        let routes = dir.path().join("routes");
        std::fs::create_dir_all(&vps).unwrap();
        std::fs::create_dir_all(&routes).unwrap();
        std::fs::write(vps.join("zheduo.yaml"), ZHEDUO).unwrap();
        std::fs::write(vps.join("niubei.yaml"), NIUBEI).unwrap();
        std::fs::write(vps.join("notes.txt"), "ignored").unwrap();
        std::fs::write(
            routes.join("lixiao.yaml"),
            "id: lixiao\nname: Lixiao Line\nstops:\n  - { viewpoint_id: zheduo, order: 2 }\n  - { viewpoint_id: niubei, order: 1 }\n",
        )
        .unwrap();

        let catalog = ViewpointCatalog::load_dir(&vps).await.unwrap();
        let ids: Vec<_> = catalog.list().map(|vp| vp.id.as_str()).collect();
        assert_eq!(ids, vec!["niubei", "zheduo"]);
        assert_eq!(catalog.get("niubei").unwrap().targets.len(), 1);
        assert!(matches!(
            catalog.get("nowhere"),
            Err(GmpError::ViewpointNotFound(id)) if id == "nowhere"
        ));

        let routes = RouteCatalog::load_dir(&routes).await.unwrap();
        let stops: Vec<_> = routes
            .get("lixiao")
            .unwrap()
            .stops
            .iter()
            .map(|s| s.viewpoint_id.as_str())
            .collect();
        assert_eq!(stops, vec!["niubei", "zheduo"]);
        assert!(matches!(routes.get("x"), Err(GmpError::RouteNotFound(_))));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let mut vp: Viewpoint = serde_yaml::from_str(ZHEDUO).unwrap();
        vp.location.lat = 95.0;
        let err = ViewpointCatalog::from_viewpoints([vp]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GmpError>(),
            Some(GmpError::InvalidCoordinate { .. })
        ));
    }
}

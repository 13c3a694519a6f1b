//! Replay the scorers against archived weather for a past date.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use gmp_core::{CoordKey, GmpError, ScoreResult, WeatherRow};
use gmp_storage::{DataSource, FetchError, PredictionRecord, WeatherCache};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fetch::WeatherFetcher;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacktestSource {
    Cache,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub viewpoint_id: String,
    pub target_date: NaiveDate,
    pub data_source: BacktestSource,
    /// Newest cache timestamp; only set when everything came from cache.
    pub data_fetched_at: Option<DateTime<Utc>>,
    pub summary: String,
    pub events: Vec<ScoreResult>,
    pub backtest_run_at: DateTime<FixedOffset>,
}

struct Resolved {
    rows: Vec<WeatherRow>,
    cached_at: Option<DateTime<Utc>>,
}

pub struct Backtester {
    scheduler: Arc<Scheduler>,
    fetcher: Arc<dyn WeatherFetcher>,
    cache: WeatherCache,
    max_history_days: i64,
}

impl Backtester {
    pub fn new(
        scheduler: Arc<Scheduler>,
        fetcher: Arc<dyn WeatherFetcher>,
        cache: WeatherCache,
        max_history_days: i64,
    ) -> Self {
        Self {
            scheduler,
            fetcher,
            cache,
            max_history_days,
        }
    }

    fn validate_date(&self, date: NaiveDate, today: NaiveDate) -> Result<(), GmpError> {
        if date >= today {
            return Err(GmpError::InvalidDate {
                date,
                reason: "backtests need a date before today".to_string(),
            });
        }
        if date < today - Duration::days(self.max_history_days) {
            return Err(GmpError::InvalidDate {
                date,
                reason: format!("older than {} days", self.max_history_days),
            });
        }
        Ok(())
    }

    /// Cache first, then the archive API; archive rows are cached on the way back.
    async fn resolve(&self, key: CoordKey, date: NaiveDate) -> Result<Resolved, FetchError> {
        let (lat, lon) = (key.lat(), key.lon());
        let mut archived = false;
        let rows = self
            .cache
            .get_or_fetch(lat, lon, date, DataSource::Archive, || {
                archived = true;
                self.fetcher.fetch_historical(lat, lon, date)
            })
            .await?;
        if archived {
            return Ok(Resolved {
                rows,
                cached_at: None,
            });
        }
        let cached_at = self
            .cache
            .get(lat, lon, date, None)
            .await?
            .and_then(|cached| cached.iter().map(|c| c.fetched_at).max());
        Ok(Resolved { rows, cached_at })
    }

    pub async fn run(
        &self,
        viewpoint_id: &str,
        date: NaiveDate,
        events: Option<&[String]>,
        save: bool,
    ) -> Result<BacktestReport, GmpError> {
        let now = self.scheduler.clock().now();
        self.validate_date(date, now.date_naive())?;

        let viewpoint = self.scheduler.viewpoints().get(viewpoint_id)?;
        let plan = self.scheduler.plan(viewpoint, date, events);

        let mut weather: HashMap<CoordKey, Vec<WeatherRow>> = HashMap::new();
        let mut all_cached = true;
        let mut latest: Option<DateTime<Utc>> = None;
        let mut record = |key: CoordKey, resolved: Resolved| {
            match resolved.cached_at {
                Some(at) => latest = latest.max(Some(at)),
                None => all_cached = false,
            }
            weather.entry(key).or_default().extend(resolved.rows);
        };

        let local = self.resolve(plan.local, date).await.map_err(|err| {
            GmpError::ServiceUnavailable(format!("archive weather for {viewpoint_id}: {err}"))
        })?;
        record(plan.local, local);

        for key in plan.coordinates().into_iter().skip(1) {
            match self.resolve(key, date).await {
                Ok(resolved) => record(key, resolved),
                Err(err) => warn!(coord = %key, error = %err, "backtest point weather unavailable"),
            }
        }

        // history for plugins that look back past midnight; does not decide the source
        for back in 1..=i64::from(plan.requirement.past_days()) {
            let day = date - Duration::days(back);
            match self.resolve(plan.local, day).await {
                Ok(resolved) => weather.entry(plan.local).or_default().extend(resolved.rows),
                Err(err) => {
                    warn!(viewpoint = %viewpoint_id, date = %day, error = %err, "history unavailable")
                }
            }
        }

        let result = self
            .scheduler
            .run_with_data(viewpoint_id, &weather, date, events)
            .await?;
        let day = result.forecast_days.into_iter().next();
        let (summary, scored) = day.map_or_else(
            || (String::new(), Vec::new()),
            |day| (day.summary, day.events),
        );

        let report = BacktestReport {
            viewpoint_id: viewpoint_id.to_string(),
            target_date: date,
            data_source: if all_cached {
                BacktestSource::Cache
            } else {
                BacktestSource::Archive
            },
            data_fetched_at: if all_cached { latest } else { None },
            summary,
            events: scored,
            backtest_run_at: self.scheduler.clock().now(),
        };

        if save {
            self.save(&report).await?;
        }
        info!(
            viewpoint = %viewpoint_id,
            %date,
            events = report.events.len(),
            source = ?report.data_source,
            "backtest complete"
        );
        Ok(report)
    }

    async fn save(&self, report: &BacktestReport) -> Result<(), GmpError> {
        let source = match report.data_source {
            BacktestSource::Cache => "cache",
            BacktestSource::Archive => "archive",
        };
        for event in &report.events {
            let record = PredictionRecord {
                viewpoint_id: report.viewpoint_id.clone(),
                prediction_date: report.backtest_run_at,
                target_date: report.target_date,
                event_type: event.event_type.clone(),
                predicted_score: event.total_score,
                predicted_status: event.status.as_str().to_string(),
                confidence: event.confidence.clone(),
                is_backtest: true,
                data_source: source.to_string(),
            };
            self.cache
                .store()
                .save_prediction(&record)
                .await
                .map_err(|err| GmpError::ServiceUnavailable(format!("saving prediction: {err}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::*;
    use gmp_core::rows_for_date;
    use gmp_storage::MemoryWeatherStore;
    use std::sync::atomic::Ordering;

    fn setup(fetcher: Arc<FakeFetcher>) -> (Backtester, WeatherCache) {
        let cache = WeatherCache::new(Arc::new(MemoryWeatherStore::default()));
        let scheduler = Arc::new(scheduler_with(
            vec![viewpoint("niubei", vec![gongga()])],
            builtin_engine(),
            fetcher.clone(),
        ));
        (Backtester::new(scheduler, fetcher, cache.clone(), 365), cache)
    }

    fn yesterday() -> NaiveDate {
        today() - Duration::days(1)
    }

    #[tokio::test]
    async fn rejects_today_future_and_ancient_dates() {
        let (backtester, _) = setup(Arc::new(FakeFetcher::new(clear_week())));
        for date in [
            today(),
            today() + Duration::days(3),
            today() - Duration::days(366),
        ] {
            let err = backtester.run("niubei", date, None, false).await.unwrap_err();
            assert!(matches!(err, GmpError::InvalidDate { .. }), "{date}");
        }
        assert!(backtester
            .run("niubei", today() - Duration::days(365), None, false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn archive_fetch_populates_cache_and_second_run_reads_it() {
        let fetcher = Arc::new(FakeFetcher::new(clear_week()));
        let (backtester, cache) = setup(fetcher.clone());

        let first = backtester.run("niubei", yesterday(), None, false).await.unwrap();
        assert_eq!(first.data_source, BacktestSource::Archive);
        assert!(first.data_fetched_at.is_none());
        assert!(first.events.iter().any(|e| e.event_type == "clear_sky"));
        assert!(cache.get(29.75, 102.35, yesterday(), None).await.unwrap().is_some());

        let archive_calls = fetcher.historical_calls.load(Ordering::SeqCst);
        assert!(archive_calls > 0);

        let second = backtester.run("niubei", yesterday(), None, false).await.unwrap();
        assert_eq!(fetcher.historical_calls.load(Ordering::SeqCst), archive_calls);
        assert_eq!(second.data_source, BacktestSource::Cache);
        assert!(second.data_fetched_at.is_some());
        assert_eq!(first.events, second.events);
    }

    #[tokio::test]
    async fn backtest_matches_injected_scoring() {
        let fetcher = Arc::new(FakeFetcher::new(clear_week()));
        let (backtester, _) = setup(fetcher.clone());
        let report = backtester.run("niubei", yesterday(), None, false).await.unwrap();

        let scheduler = scheduler_with(
            vec![viewpoint("niubei", vec![gongga()])],
            builtin_engine(),
            fetcher.clone(),
        );
        let vp = scheduler.viewpoints().get("niubei").unwrap();
        let plan = scheduler.plan(vp, yesterday(), None);
        let weather: HashMap<CoordKey, Vec<WeatherRow>> = plan
            .coordinates()
            .into_iter()
            .map(|key| (key, rows_for_date(&fetcher.rows, yesterday())))
            .collect();
        let direct = scheduler
            .run_with_data("niubei", &weather, yesterday(), None)
            .await
            .unwrap();
        assert_eq!(report.events, direct.forecast_days[0].events);
    }

    #[tokio::test]
    async fn save_records_every_event() {
        let (backtester, cache) = setup(Arc::new(FakeFetcher::new(clear_week())));
        let report = backtester.run("niubei", yesterday(), None, true).await.unwrap();

        let saved = cache.store().predictions("niubei", yesterday()).await.unwrap();
        assert_eq!(saved.len(), report.events.len());
        assert!(saved.iter().all(|r| r.is_backtest && r.data_source == "archive"));
    }

    #[tokio::test]
    async fn unknown_viewpoint_is_not_found() {
        let (backtester, _) = setup(Arc::new(FakeFetcher::new(clear_week())));
        let err = backtester.run("nowhere", yesterday(), None, false).await.unwrap_err();
        assert!(matches!(err, GmpError::ViewpointNotFound(_)));
    }
}

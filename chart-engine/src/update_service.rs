use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio_util::sync::CancellationToken;

use crate::{
    resolution::Resolution,
    rollup::{ChartStore, RollupError, RollupReport, RollupSource, RollupUpdater},
    settings::Settings,
};

/// Result of one rollup pass of a `(source, resolution)` pair.
#[derive(Debug)]
pub struct PairOutcome {
    pub source: String,
    pub resolution: Resolution,
    pub result: Result<RollupReport, RollupError>,
}

/// Periodically rolls up every configured source.
pub struct UpdateService<S> {
    updater: Arc<RollupUpdater<S>>,
    sources: Vec<RollupSource>,
    schedule: Schedule,
    concurrent_updates: usize,
    force_update_on_start: bool,
}

fn time_till_next_call(schedule: &Schedule) -> std::time::Duration {
    let default = std::time::Duration::from_millis(500);
    let now = Utc::now();

    schedule
        .upcoming(Utc)
        .next()
        .map_or(default, |t| (t - now).to_std().unwrap_or(default))
}

impl<S> UpdateService<S>
where
    S: ChartStore + Send + Sync + 'static,
{
    pub fn new(updater: Arc<RollupUpdater<S>>, settings: &Settings) -> Self {
        Self {
            updater,
            sources: settings.sources.clone(),
            schedule: settings.update_schedule.clone(),
            concurrent_updates: settings.concurrent_updates.max(1),
            force_update_on_start: settings.force_update_on_start,
        }
    }

    /// Run passes on schedule until `cancel` is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if self.force_update_on_start {
            self.update_all(&cancel).await;
            tracing::info!("initial update is done");
        }
        loop {
            let sleep_duration = time_till_next_call(&self.schedule);
            tracing::info!("scheduled next rollup in {:?}", sleep_duration);
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("update service stopped");
                    return;
                }
                _ = tokio::time::sleep(sleep_duration) => {}
            }
            self.update_all(&cancel).await;
        }
    }

    /// One pass for every `(source, resolution)` pair.
    ///
    /// Pairs run concurrently, at most `concurrent_updates` at a time. A
    /// failing pair is logged and does not affect the others.
    pub async fn update_all(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<PairOutcome> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrent_updates));
        let tasks = self
            .sources
            .iter()
            .flat_map(|source| {
                Resolution::AGGREGATED.map(|resolution| (source.clone(), resolution))
            })
            .map(|(source, resolution)| {
                let this = self.clone();
                let sema = semaphore.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let _permit = sema.acquire_owned().await;
                    let result = this.updater.update(&source, resolution, &cancel).await;
                    PairOutcome {
                        source: source.name,
                        resolution,
                        result,
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(outcome) => {
                    if let Err(err) = &outcome.result {
                        tracing::warn!(
                            source = %outcome.source,
                            resolution = outcome.resolution.as_str(),
                            "pair will be retried on the next run: {}",
                            err
                        );
                    }
                    outcomes.push(outcome);
                }
                Err(err) => tracing::error!("rollup task panicked: {}", err),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        column::{MetricKind, MetricValue},
        rollup::{MetricSpec, RawRow, RollupStatus},
        tests::{
            in_memory_store::InMemoryStore,
            point_construction::{at, rows_every},
        },
    };
    use pretty_assertions::assert_eq;
    use std::{str::FromStr, time::Duration};

    fn settings(sources: Vec<RollupSource>) -> Settings {
        let mut settings = Settings::default();
        settings.sources = sources;
        settings.concurrent_updates = 2;
        settings
    }

    fn service(store: InMemoryStore, settings: Settings) -> Arc<UpdateService<InMemoryStore>> {
        let updater = Arc::new(RollupUpdater::new(
            Arc::new(store),
            settings.rollup_windows(),
        ));
        Arc::new(UpdateService::new(updater, &settings))
    }

    fn float_source(name: &str) -> RollupSource {
        RollupSource::new(name, vec![MetricSpec::new("value", MetricKind::Float)])
    }

    fn good_store(count: usize) -> InMemoryStore {
        let store = InMemoryStore::default();
        store.insert_raw_rows(
            "good",
            rows_every(at("2024-03-01T00:00:00"), count, 1800, |i| {
                vec![MetricValue::Float(i as f64)]
            }),
        );
        store
    }

    async fn wait_for_commit(service: &UpdateService<InMemoryStore>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while service
                .updater
                .store()
                .committed("good", Resolution::Hour)
                .is_empty()
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failing_pair_does_not_stop_others() {
        let start = at("2024-03-01T00:00:00");
        let store = good_store(48);
        // two values for a single metric
        store.insert_raw_rows(
            "broken",
            vec![RawRow::new(
                start,
                vec![MetricValue::Float(1.0), MetricValue::Float(2.0)],
            )],
        );
        let service = service(
            store,
            settings(vec![float_source("broken"), float_source("good")]),
        );

        let outcomes = service.update_all(&CancellationToken::new()).await;
        assert_eq!(outcomes.len(), 4);
        for outcome in &outcomes {
            match outcome.source.as_str() {
                "broken" => assert!(matches!(
                    outcome.result,
                    Err(RollupError::MalformedRows(_))
                )),
                _ => assert_eq!(
                    outcome.result.as_ref().unwrap().status,
                    RollupStatus::Completed
                ),
            }
        }
        let store = service.updater.store();
        assert_eq!(store.committed("good", Resolution::Hour).len(), 23);
        assert!(store.committed("broken", Resolution::Hour).is_empty());
        assert_eq!(
            store.committed("good", Resolution::Hour)[0].start_timestamp,
            start
        );
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let service = service(good_store(10), settings(vec![float_source("good")]));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(service.clone().run(cancel.clone()));
        // the initial update commits before the loop starts waiting
        wait_for_commit(&service).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_pass_runs_when_the_schedule_fires() {
        let mut settings = settings(vec![float_source("good")]);
        settings.force_update_on_start = false;
        settings.update_schedule = Schedule::from_str("* * * * * * *").unwrap();
        let service = service(good_store(10), settings);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(service.clone().run(cancel.clone()));
        tokio::task::yield_now().await;
        assert_eq!(service.updater.store().calls().last_committed_bucket, 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        wait_for_commit(&service).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

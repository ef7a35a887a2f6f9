//! Training Orchestrator
//!
//! Trains every (farm, horizon) pair in a bounded worker pool. Each task
//! fetches its own observations, builds its own features and persists its
//! own artifact; the only shared state is the task queue. A task ends as
//! trained, skipped or failed and never aborts the batch.

use chrono::{DateTime, TimeDelta, Utc};
use itertools::iproduct;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{HorizonModel, HorizonTrainer};
use crate::error::{as_pipeline_error, PipelineError};
use crate::forecast::features::FeatureBuilder;
use crate::repo::{ModelStore, ObservationStore};

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_workers: usize,
    /// Minimum in-sample R^2 for a deployable model
    pub min_r2: f64,
    /// Maximum in-sample MAE as percent of mean generation
    pub max_relative_error_pct: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            min_r2: 0.5,
            max_relative_error_pct: 25.0,
        }
    }
}

impl OrchestratorConfig {
    pub fn worker_count(&self, tasks: usize) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(self.max_workers).min(tasks).max(1)
    }
}

/// Half-open observation window `[start, end)` used for training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrainingWindow {
    pub fn trailing(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - TimeDelta::days(days),
            end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrainingTask {
    pub farm: String,
    pub horizon_hours: u32,
}

impl fmt::Display for TrainingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}h", self.farm, self.horizon_hours)
    }
}

/// Cartesian product of farms and horizons, deduplicated
pub fn plan<S: AsRef<str>>(farms: &[S], horizons: &[u32]) -> BTreeSet<TrainingTask> {
    iproduct!(farms, horizons)
        .map(|(farm, &horizon_hours)| TrainingTask {
            farm: farm.as_ref().to_string(),
            horizon_hours,
        })
        .collect()
}

/// One line of the training summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummaryRow {
    pub farm: String,
    pub horizon_hours: u32,
    pub model_id: String,
    pub samples: usize,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    pub cv_mae: Option<f64>,
    /// In-sample MAE as percent of mean observed generation
    pub relative_error_pct: Option<f64>,
    pub deployable: bool,
}

impl TrainingSummaryRow {
    fn from_model(model: &HorizonModel, config: &OrchestratorConfig) -> Self {
        let metrics = &model.metadata.metrics;
        let relative_error_pct = metrics.in_sample.relative_error_pct();
        let deployable = metrics.in_sample.r2 >= config.min_r2
            && relative_error_pct.is_some_and(|pct| pct <= config.max_relative_error_pct);
        Self {
            farm: model.key().farm.clone(),
            horizon_hours: model.key().horizon_hours,
            model_id: model.metadata.model_id.clone(),
            samples: model.metadata.training_samples,
            mae: metrics.in_sample.mae,
            rmse: metrics.in_sample.rmse,
            r2: metrics.in_sample.r2,
            cv_mae: metrics.cv_mae,
            relative_error_pct,
            deployable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Trained(TrainingSummaryRow),
    Skipped { reason: String },
    Failed { error: String },
}

/// A task that did not produce a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskIssue {
    pub farm: String,
    pub horizon_hours: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows: Vec<TrainingSummaryRow>,
    pub skipped: Vec<TaskIssue>,
    pub failed: Vec<TaskIssue>,
}

impl TrainingReport {
    fn assemble(started_at: DateTime<Utc>, mut results: Vec<(TrainingTask, TaskOutcome)>) -> Self {
        results.sort_by(|a, b| a.0.cmp(&b.0));
        let mut report = Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            rows: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        };
        for (task, outcome) in results {
            let issue = |detail: String| TaskIssue {
                farm: task.farm.clone(),
                horizon_hours: task.horizon_hours,
                detail,
            };
            match outcome {
                TaskOutcome::Trained(row) => report.rows.push(row),
                TaskOutcome::Skipped { reason } => report.skipped.push(issue(reason)),
                TaskOutcome::Failed { error } => report.failed.push(issue(error)),
            }
        }
        report
    }

    pub fn trained(&self) -> usize {
        self.rows.len()
    }

    pub fn deployable(&self) -> usize {
        self.rows.iter().filter(|r| r.deployable).count()
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Training run {}: {} trained ({} deployable), {} skipped, {} failed",
            self.run_id,
            self.rows.len(),
            self.deployable(),
            self.skipped.len(),
            self.failed.len()
        )?;
        if !self.rows.is_empty() {
            writeln!(
                f,
                "{:<24} {:>7} {:>8} {:>9} {:>9} {:>7} {:>9} {:>7} {:>4}",
                "farm", "horizon", "samples", "mae", "rmse", "r2", "cv_mae", "rel%", "go"
            )?;
        }
        for row in &self.rows {
            writeln!(
                f,
                "{:<24} {:>6}h {:>8} {:>9.2} {:>9.2} {:>7.3} {:>9} {:>7} {:>4}",
                row.farm,
                row.horizon_hours,
                row.samples,
                row.mae,
                row.rmse,
                row.r2,
                fmt_opt(row.cv_mae),
                fmt_opt(row.relative_error_pct),
                if row.deployable { "yes" } else { "no" }
            )?;
        }
        for issue in &self.skipped {
            writeln!(f, "skipped {}@{}h: {}", issue.farm, issue.horizon_hours, issue.detail)?;
        }
        for issue in &self.failed {
            writeln!(f, "FAILED {}@{}h: {}", issue.farm, issue.horizon_hours, issue.detail)?;
        }
        Ok(())
    }
}

struct Workers {
    observations: Arc<dyn ObservationStore>,
    models: Arc<dyn ModelStore>,
    builder: FeatureBuilder,
    trainer: HorizonTrainer,
    config: OrchestratorConfig,
}

/// Runs a batch of training tasks through N workers
#[derive(Clone)]
pub struct TrainingOrchestrator {
    inner: Arc<Workers>,
}

impl TrainingOrchestrator {
    pub fn new(
        observations: Arc<dyn ObservationStore>,
        models: Arc<dyn ModelStore>,
        builder: FeatureBuilder,
        trainer: HorizonTrainer,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Workers {
                observations,
                models,
                builder,
                trainer,
                config,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub async fn run(&self, tasks: BTreeSet<TrainingTask>, window: TrainingWindow) -> TrainingReport {
        let started_at = Utc::now();
        let total = tasks.len();
        let workers = self.inner.config.worker_count(total);
        info!(tasks = total, workers, start = %window.start, end = %window.end, "training batch started");

        let queue = Arc::new(Mutex::new(tasks.iter().cloned().collect::<VecDeque<_>>()));
        let finished = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let finished = Arc::clone(&finished);
            let inner = Arc::clone(&self.inner);
            pool.spawn(async move {
                let mut count = 0usize;
                loop {
                    let next = queue.lock().pop_front();
                    let Some(task) = next else { break };
                    let outcome = run_task(&inner, &task, window).await;
                    finished.lock().push((task, outcome));
                    count += 1;
                }
                tracing::debug!(worker, tasks = count, "worker finished");
            });
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "training worker aborted");
            }
        }

        // Outcomes are recorded per task; anything unrecorded was lost with its worker
        let mut results = std::mem::take(&mut *finished.lock());
        let recorded: BTreeSet<TrainingTask> = results.iter().map(|(task, _)| task.clone()).collect();
        for task in tasks.difference(&recorded) {
            error!(task = %task, "training task lost with its worker");
            results.push((
                task.clone(),
                TaskOutcome::Failed {
                    error: "training worker aborted before the task completed".to_string(),
                },
            ));
        }

        let report = TrainingReport::assemble(started_at, results);
        info!(
            trained = report.rows.len(),
            deployable = report.deployable(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "training batch finished"
        );
        report
    }
}

async fn run_task(inner: &Arc<Workers>, task: &TrainingTask, window: TrainingWindow) -> TaskOutcome {
    let observations = match inner
        .observations
        .observations(&task.farm, window.start, window.end)
        .await
    {
        Ok(observations) => observations,
        Err(e) => {
            error!(task = %task, error = %format!("{e:#}"), "failed to load observations");
            return TaskOutcome::Failed {
                error: format!("{e:#}"),
            };
        }
    };

    let worker = Arc::clone(inner);
    let farm = task.farm.clone();
    let horizon = task.horizon_hours;
    let fitted = tokio::task::spawn_blocking(move || -> anyhow::Result<TrainingSummaryRow> {
        let table = worker.builder.build(&farm, &observations, horizon);
        if table.aligned_records < worker.builder.min_records() {
            return Err(PipelineError::InsufficientData {
                farm,
                available: table.aligned_records,
                required: worker.builder.min_records(),
            }
            .into());
        }
        let model = worker.trainer.train(&table)?;
        worker.models.save(&model)?;
        Ok(TrainingSummaryRow::from_model(&model, &worker.config))
    })
    .await;

    match fitted {
        Ok(Ok(row)) => TaskOutcome::Trained(row),
        Ok(Err(e)) => match as_pipeline_error(&e) {
            Some(err) if err.is_insufficient_data() => {
                warn!(task = %task, reason = %err, "training skipped");
                TaskOutcome::Skipped {
                    reason: err.to_string(),
                }
            }
            _ => {
                error!(task = %task, error = %format!("{e:#}"), "training failed");
                TaskOutcome::Failed {
                    error: format!("{e:#}"),
                }
            }
        },
        Err(join) => {
            error!(task = %task, error = %join, "training task panicked");
            TaskOutcome::Failed {
                error: format!("training task panicked: {join}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observation, WindFarm};
    use crate::ml::{BoostingParams, ModelKey, TrainerConfig};
    use crate::repo::{InMemoryModelStore, InMemoryObservationStore};
    use crate::simulation::{SyntheticFarm, SyntheticFarmConfig};
    use async_trait::async_trait;

    fn fast_trainer(min_rows: usize) -> HorizonTrainer {
        HorizonTrainer::new(TrainerConfig {
            min_rows,
            cv_folds: 3,
            params: BoostingParams {
                n_estimators: 15,
                learning_rate: 0.3,
                max_depth: 3,
                min_samples_leaf: 5,
                subsample: 0.8,
                seed: 42,
            },
        })
    }

    fn synthetic(seed: u64, hours: usize) -> Vec<Observation> {
        SyntheticFarm::new(SyntheticFarmConfig {
            seed,
            ..Default::default()
        })
        .generate(hours)
    }

    fn window() -> TrainingWindow {
        TrainingWindow::trailing(SyntheticFarmConfig::default().start + TimeDelta::days(365), 730)
    }

    /// Store that fails for one farm and delegates otherwise
    struct FlakyStore {
        inner: InMemoryObservationStore,
        broken: String,
    }

    #[async_trait]
    impl ObservationStore for FlakyStore {
        async fn farms(&self) -> anyhow::Result<Vec<WindFarm>> {
            self.inner.farms().await
        }

        async fn observations(
            &self,
            farm: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Observation>> {
            if farm == self.broken {
                anyhow::bail!("warehouse timeout");
            }
            self.inner.observations(farm, start, end).await
        }
    }

    /// Store whose future panics for one farm, taking its worker down
    struct PanickingStore {
        inner: InMemoryObservationStore,
        poison: String,
    }

    #[async_trait]
    impl ObservationStore for PanickingStore {
        async fn farms(&self) -> anyhow::Result<Vec<WindFarm>> {
            self.inner.farms().await
        }

        async fn observations(
            &self,
            farm: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Observation>> {
            if farm == self.poison {
                panic!("driver crashed reading {farm}");
            }
            self.inner.observations(farm, start, end).await
        }
    }

    #[test]
    fn test_plan_deduplicates() {
        let tasks = plan(&["A", "B", "A"], &[1, 24, 1]);
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks.iter().next().unwrap().to_string(), "A@1h");
    }

    #[test]
    fn test_worker_count_bounds() {
        let config = OrchestratorConfig {
            max_workers: 2,
            ..Default::default()
        };
        assert!(config.worker_count(10) <= 2);
        assert_eq!(config.worker_count(0), 1);
        assert_eq!(config.worker_count(1), 1);
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let observations = InMemoryObservationStore::new();
        observations.insert(WindFarm::new("Good"), synthetic(1, 600));
        observations.insert(WindFarm::new("Short"), synthetic(2, 100));
        observations.insert(WindFarm::new("Broken"), synthetic(3, 600));
        let store = Arc::new(FlakyStore {
            inner: observations,
            broken: "Broken".to_string(),
        });
        let models = Arc::new(InMemoryModelStore::new());

        let orchestrator = TrainingOrchestrator::new(
            store,
            models.clone(),
            FeatureBuilder::new(300),
            fast_trainer(300),
            OrchestratorConfig::default(),
        );
        let report = orchestrator
            .run(plan(&["Good", "Short", "Broken"], &[1]), window())
            .await;

        assert_eq!(report.trained(), 1);
        assert_eq!(report.rows[0].farm, "Good");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].farm, "Short");
        assert!(report.skipped[0].detail.contains("insufficient data"));
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].detail.contains("warehouse timeout"));

        assert_eq!(models.keys(), vec![ModelKey::new("Good", 1)]);
        let text = report.to_string();
        assert!(text.contains("1 trained"));
        assert!(text.contains("skipped Short@1h"));
    }

    #[tokio::test]
    async fn test_aborted_worker_reports_every_task() {
        let observations = InMemoryObservationStore::new();
        observations.insert(WindFarm::new("Alpha"), synthetic(1, 600));
        observations.insert(WindFarm::new("Boom"), synthetic(2, 600));
        observations.insert(WindFarm::new("Zulu"), synthetic(3, 600));
        let store = Arc::new(PanickingStore {
            inner: observations,
            poison: "Boom".to_string(),
        });

        let orchestrator = TrainingOrchestrator::new(
            store,
            Arc::new(InMemoryModelStore::new()),
            FeatureBuilder::new(300),
            fast_trainer(300),
            OrchestratorConfig {
                max_workers: 1,
                ..Default::default()
            },
        );
        let report = orchestrator
            .run(plan(&["Alpha", "Boom", "Zulu"], &[1]), window())
            .await;

        // The single worker trains Alpha, dies on Boom and never reaches Zulu
        assert_eq!(report.trained(), 1);
        assert_eq!(report.rows[0].farm, "Alpha");
        let failed: Vec<&str> = report.failed.iter().map(|i| i.farm.as_str()).collect();
        assert_eq!(failed, vec!["Boom", "Zulu"]);
        assert!(report.failed.iter().all(|i| i.detail.contains("worker aborted")));
    }
}

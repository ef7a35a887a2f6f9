use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

use super::psi::{classify, compute_psi, DEFAULT_BINS, DEFAULT_FLOOR};
use crate::domain::{
    AlertedFarm, DriftAction, DriftAlert, DriftReport, DriftStatus, FeatureDrift, MonitoredFeature,
    Observation,
};
use crate::ml::TrainingWindow;
use crate::repo::{AlertChannel, ObservationStore, ResultSink};

/// Drift check settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DriftConfig {
    /// Trailing days of the training window checked against the rest of it
    #[validate(range(min = 1))]
    pub current_days: i64,
    #[validate(range(min = 1))]
    pub min_baseline_samples: usize,
    #[validate(range(min = 1))]
    pub min_current_samples: usize,
    /// Share substituted for empty buckets
    #[validate(range(min = 0.0, max = 0.1))]
    pub psi_floor: f64,
    #[validate(range(min = 2, max = 100))]
    pub bins: usize,
    pub alert_recipient: String,
    pub alert_subject: String,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            current_days: 7,
            min_baseline_samples: 100,
            min_current_samples: 10,
            psi_floor: DEFAULT_FLOOR,
            bins: DEFAULT_BINS,
            alert_recipient: "trading-desk@localhost".to_string(),
            alert_subject: "Wind forecast model drift detected".to_string(),
        }
    }
}

impl DriftConfig {
    /// Split a training window into the baseline and the trailing current window
    pub fn windows(&self, training: TrainingWindow) -> DriftWindows {
        let current_start = training.end - TimeDelta::days(self.current_days);
        DriftWindows {
            baseline: TrainingWindow {
                start: training.start.min(current_start),
                end: current_start,
            },
            current: TrainingWindow {
                start: current_start,
                end: training.end,
            },
        }
    }
}

/// Non-overlapping halves of a training window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftWindows {
    pub baseline: TrainingWindow,
    pub current: TrainingWindow,
}

fn feature_values(observations: &[Observation], feature: MonitoredFeature) -> Vec<f64> {
    observations
        .iter()
        .map(|o| match feature {
            MonitoredFeature::WindSpeed => o.wind_speed,
            MonitoredFeature::WindDirection => o.wind_direction,
            MonitoredFeature::WindGusts => o.wind_gusts,
        })
        .filter(|v| v.is_finite())
        .collect()
}

/// Outcome of one drift run across farms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRun {
    pub checked_at: DateTime<Utc>,
    pub reports: Vec<DriftReport>,
    pub alert: Option<DriftAlert>,
}

impl DriftRun {
    pub fn count(&self, action: DriftAction) -> usize {
        self.reports
            .iter()
            .filter(|r| r.recommended_action == Some(action))
            .count()
    }

    pub fn could_not_calculate(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.status == DriftStatus::CouldNotCalculate)
            .map(|r| r.farm.as_str())
            .collect()
    }
}

impl fmt::Display for DriftRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Drift check at {}: {} farms, {} NONE, {} MONITOR, {} RETRAIN, {} could not calculate",
            self.checked_at.format("%Y-%m-%d %H:%M UTC"),
            self.reports.len(),
            self.count(DriftAction::None),
            self.count(DriftAction::Monitor),
            self.count(DriftAction::Retrain),
            self.could_not_calculate().len()
        )?;
        for report in &self.reports {
            match (report.max_psi, report.recommended_action) {
                (Some(max), Some(action)) => writeln!(
                    f,
                    "  {:<24} max PSI {:.4}  mean PSI {:.4}  {}",
                    report.farm,
                    max,
                    report.mean_psi.unwrap_or(max),
                    action
                )?,
                _ => writeln!(
                    f,
                    "  {:<24} could not calculate: {}",
                    report.farm,
                    report.note.as_deref().unwrap_or("no computable feature")
                )?,
            }
        }
        if let Some(alert) = &self.alert {
            writeln!(f, "Alert sent to {} for {} farm(s)", alert.recipient, alert.farms.len())?;
        }
        Ok(())
    }
}

/// Compares each farm's last week of weather inputs against the rest of
/// the training window
pub struct DriftMonitor {
    observations: Arc<dyn ObservationStore>,
    sink: Arc<dyn ResultSink>,
    alerts: Arc<dyn AlertChannel>,
    config: DriftConfig,
}

impl DriftMonitor {
    pub fn new(
        observations: Arc<dyn ObservationStore>,
        sink: Arc<dyn ResultSink>,
        alerts: Arc<dyn AlertChannel>,
        config: DriftConfig,
    ) -> Self {
        Self {
            observations,
            sink,
            alerts,
            config,
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Check one farm over `training`. Store errors become a `CouldNotCalculate` report.
    pub async fn check_farm(&self, farm: &str, training: TrainingWindow) -> DriftReport {
        let now = training.end;
        let windows = self.config.windows(training);

        let observations = match self
            .observations
            .observations(farm, windows.baseline.start, windows.current.end)
            .await
        {
            Ok(observations) => observations,
            Err(e) => {
                error!(farm, error = %format!("{e:#}"), "drift check could not load observations");
                return self.unavailable_report(farm, now, Vec::new(), format!("store error: {e:#}"));
            }
        };
        let split = observations.partition_point(|o| o.timestamp < windows.current.start);
        let (baseline, current) = observations.split_at(split);

        let features: Vec<FeatureDrift> = MonitoredFeature::ALL
            .iter()
            .map(|&feature| self.feature_drift(farm, feature, baseline, current))
            .collect();

        let psis: Vec<f64> = features.iter().filter_map(FeatureDrift::psi).collect();
        if psis.is_empty() {
            warn!(farm, baseline = baseline.len(), current = current.len(), "no feature had enough data for PSI");
            return self.unavailable_report(
                farm,
                now,
                features,
                format!(
                    "insufficient observations: {} baseline, {} current",
                    baseline.len(),
                    current.len()
                ),
            );
        }

        let max_psi = psis.iter().copied().fold(f64::MIN, f64::max);
        let mean_psi = psis.iter().sum::<f64>() / psis.len() as f64;
        let action = classify(max_psi).action();
        info!(farm, max_psi, mean_psi, action = %action, "drift computed");

        DriftReport {
            farm: farm.to_string(),
            check_date: now.date_naive(),
            checked_at: now,
            status: DriftStatus::Computed,
            features,
            max_psi: Some(max_psi),
            mean_psi: Some(mean_psi),
            recommended_action: Some(action),
            note: None,
        }
    }

    fn feature_drift(
        &self,
        farm: &str,
        feature: MonitoredFeature,
        baseline: &[Observation],
        current: &[Observation],
    ) -> FeatureDrift {
        let base = feature_values(baseline, feature);
        let cur = feature_values(current, feature);

        if base.len() < self.config.min_baseline_samples || cur.len() < self.config.min_current_samples {
            let reason = format!(
                "{} baseline / {} current observations, need {} / {}",
                base.len(),
                cur.len(),
                self.config.min_baseline_samples,
                self.config.min_current_samples
            );
            warn!(farm, feature = %feature, %reason, "PSI unavailable");
            return FeatureDrift::Unavailable { feature, reason };
        }

        match compute_psi(&base, &cur, self.config.psi_floor, self.config.bins) {
            Some(result) => {
                if result.is_degenerate() {
                    warn!(
                        farm,
                        feature = %feature,
                        floored = result.floored_buckets,
                        buckets = result.buckets,
                        "PSI computed on degenerate buckets"
                    );
                }
                FeatureDrift::Computed {
                    feature,
                    psi: result.psi,
                    severity: classify(result.psi),
                    baseline_count: base.len(),
                    current_count: cur.len(),
                    floored_buckets: result.floored_buckets,
                    degenerate: result.is_degenerate(),
                }
            }
            None => FeatureDrift::Unavailable {
                feature,
                reason: "no finite values".to_string(),
            },
        }
    }

    fn unavailable_report(
        &self,
        farm: &str,
        now: DateTime<Utc>,
        features: Vec<FeatureDrift>,
        note: String,
    ) -> DriftReport {
        DriftReport {
            farm: farm.to_string(),
            check_date: now.date_naive(),
            checked_at: now,
            status: DriftStatus::CouldNotCalculate,
            features,
            max_psi: None,
            mean_psi: None,
            recommended_action: None,
            note: Some(note),
        }
    }

    /// Check every farm, persist the reports and raise an alert if any
    /// farm needs retraining.
    pub async fn run(&self, farms: &[String], training: TrainingWindow) -> Result<DriftRun> {
        let now = training.end;
        let mut reports = Vec::with_capacity(farms.len());
        for farm in farms {
            reports.push(self.check_farm(farm, training).await);
        }

        self.sink
            .write_drift_reports(&reports)
            .context("Failed to write drift reports")?;

        let flagged: Vec<AlertedFarm> = reports
            .iter()
            .filter(|r| r.needs_retrain())
            .filter_map(|r| {
                r.max_psi.map(|max_psi| AlertedFarm {
                    farm: r.farm.clone(),
                    max_psi,
                })
            })
            .collect();

        let alert = (!flagged.is_empty()).then(|| DriftAlert {
            recipient: self.config.alert_recipient.clone(),
            subject: self.config.alert_subject.clone(),
            farms: flagged,
        });
        if let Some(alert) = &alert {
            if let Err(e) = self.alerts.send(alert) {
                error!(error = %format!("{e:#}"), "failed to send drift alert");
            }
        }

        Ok(DriftRun {
            checked_at: now,
            reports,
            alert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WindFarm;
    use crate::repo::{InMemoryObservationStore, InMemorySink, RecordingAlertChannel};
    use crate::simulation::{gaussian_sample, stratified_gaussian};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn training() -> TrainingWindow {
        TrainingWindow::trailing(now(), 730)
    }

    /// Hourly observations ending at `end` with wind speed drawn from `speeds`
    fn series(end: DateTime<Utc>, speeds: &[f64]) -> Vec<Observation> {
        let n = speeds.len() as i64;
        speeds
            .iter()
            .enumerate()
            .map(|(i, &ws)| {
                let ts = end - TimeDelta::hours(n - i as i64);
                Observation::weather(ts, ws, 180.0 + (i % 90) as f64, ws * 1.3)
            })
            .collect()
    }

    fn farm_data(baseline_mean: f64, current_mean: f64, baseline_hours: usize) -> Vec<Observation> {
        let split = now() - TimeDelta::days(7);
        let mut obs = series(split, &gaussian_sample(baseline_mean, 2.0, baseline_hours, 1));
        obs.extend(series(now(), &stratified_gaussian(current_mean, 2.0, 168, 2)));
        obs
    }

    fn monitor(store: InMemoryObservationStore) -> (DriftMonitor, Arc<InMemorySink>, Arc<RecordingAlertChannel>) {
        let sink = Arc::new(InMemorySink::new());
        let alerts = Arc::new(RecordingAlertChannel::new());
        let monitor = DriftMonitor::new(Arc::new(store), sink.clone(), alerts.clone(), DriftConfig::default());
        (monitor, sink, alerts)
    }

    #[tokio::test]
    async fn test_stable_and_shifted_farms() {
        let store = InMemoryObservationStore::new();
        store.insert(WindFarm::new("Stable"), farm_data(8.0, 8.0, 5000));
        store.insert(WindFarm::new("Shifted"), farm_data(8.0, 14.0, 5000));
        let (monitor, sink, alerts) = monitor(store);

        let run = monitor
            .run(&["Stable".to_string(), "Shifted".to_string()], training())
            .await
            .unwrap();

        let stable = &run.reports[0];
        assert_eq!(stable.status, DriftStatus::Computed);
        let speed_psi = stable.features[0].psi().unwrap();
        assert!(speed_psi < 0.1, "stable wind speed psi {speed_psi}");

        let shifted = &run.reports[1];
        assert!(shifted.features[0].psi().unwrap() >= 0.2);
        assert_eq!(shifted.recommended_action, Some(DriftAction::Retrain));

        assert_eq!(sink.drift_reports().len(), 2);
        let sent = alerts.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].farms[0].farm, "Shifted");
        assert!(run.to_string().contains("1 RETRAIN"));
    }

    #[tokio::test]
    async fn test_short_baseline_is_unavailable_not_zero() {
        let store = InMemoryObservationStore::new();
        store.insert(WindFarm::new("New"), farm_data(8.0, 8.0, 50));
        let (monitor, _, alerts) = monitor(store);

        let report = monitor.check_farm("New", training()).await;
        assert_eq!(report.status, DriftStatus::CouldNotCalculate);
        assert_eq!(report.recommended_action, None);
        assert!(report
            .features
            .iter()
            .all(|f| matches!(f, FeatureDrift::Unavailable { .. })));
        assert!(alerts.sent().is_empty());
    }

    #[tokio::test]
    async fn test_store_error_continues_run() {
        let store = InMemoryObservationStore::new();
        store.insert(WindFarm::new("Known"), farm_data(8.0, 8.0, 500));
        let (monitor, _, _) = monitor(store);

        let run = monitor
            .run(&["Missing".to_string(), "Known".to_string()], training())
            .await
            .unwrap();
        assert_eq!(run.could_not_calculate(), vec!["Missing"]);
        assert_eq!(run.reports[1].status, DriftStatus::Computed);
        assert!(run.alert.is_none());
    }

    #[test]
    fn test_windows_follow_training_window() {
        let training = training();
        let windows = DriftConfig::default().windows(training);

        assert_eq!(windows.baseline.start, training.start);
        assert_eq!(windows.baseline.end, now() - TimeDelta::days(7));
        assert_eq!(windows.current.start, windows.baseline.end);
        assert_eq!(windows.current.end, training.end);
    }

    #[tokio::test]
    async fn test_history_before_training_window_is_ignored() {
        // Baseline rows sit more than a year before the current week
        let store = InMemoryObservationStore::new();
        let old_end = now() - TimeDelta::days(400);
        let mut obs = series(old_end, &gaussian_sample(8.0, 2.0, 2000, 1));
        obs.extend(series(now(), &stratified_gaussian(8.0, 2.0, 168, 2)));
        store.insert(WindFarm::new("Repowered"), obs);
        let (monitor, _, _) = monitor(store);

        let short = monitor
            .check_farm("Repowered", TrainingWindow::trailing(now(), 365))
            .await;
        assert_eq!(short.status, DriftStatus::CouldNotCalculate);

        let long = monitor.check_farm("Repowered", training()).await;
        assert_eq!(long.status, DriftStatus::Computed);
    }
}

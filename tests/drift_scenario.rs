//! Drift detection on known distributions, persisted through the JSON-lines sink.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use windcast::domain::{DriftAction, DriftReport, DriftSeverity, DriftStatus, Observation, WindFarm};
use windcast::drift::{classify, compute_psi, DriftConfig, DriftMonitor};
use windcast::ml::TrainingWindow;
use windcast::repo::{InMemoryObservationStore, JsonLinesSink, RecordingAlertChannel};
use windcast::simulation::{gaussian_sample, stratified_gaussian};

const FLOOR: f64 = 0.0001;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
}

// Current weeks are stratified draws: independent 168-sample draws from
// N(8.1, 2) cross PSI 0.1 roughly one time in nine.
#[test]
fn test_small_mean_shift_is_stable() {
    let baseline = gaussian_sample(8.0, 2.0, 5000, 7);
    let current = stratified_gaussian(8.1, 2.0, 168, 8);

    let result = compute_psi(&baseline, &current, FLOOR, 10).unwrap();
    assert!(result.psi < 0.1, "psi {}", result.psi);
    assert_eq!(classify(result.psi), DriftSeverity::Stable);
    assert!(!result.is_degenerate());
}

#[test]
fn test_large_mean_shift_needs_retraining() {
    let baseline = gaussian_sample(8.0, 2.0, 5000, 7);
    let current = stratified_gaussian(14.0, 2.0, 168, 8);

    let result = compute_psi(&baseline, &current, FLOOR, 10).unwrap();
    assert!(result.psi >= 0.2, "psi {}", result.psi);
    assert_eq!(classify(result.psi).action(), DriftAction::Retrain);
}

/// Every monitored feature follows the same wind speed draw
fn hourly(end: DateTime<Utc>, speeds: &[f64]) -> Vec<Observation> {
    let n = speeds.len() as i64;
    speeds
        .iter()
        .enumerate()
        .map(|(i, &ws)| Observation::weather(end - TimeDelta::hours(n - i as i64), ws, ws * 20.0, ws * 1.3))
        .collect()
}

fn farm(baseline_mean: f64, current_mean: f64, seed: u64) -> Vec<Observation> {
    let split = now() - TimeDelta::days(7);
    let mut obs = hourly(split, &gaussian_sample(baseline_mean, 2.0, 4000, seed));
    obs.extend(hourly(now(), &stratified_gaussian(current_mean, 2.0, 168, seed + 1)));
    obs
}

#[tokio::test]
async fn test_monitor_run_persists_reports_and_alerts_once() {
    let store = InMemoryObservationStore::new();
    store.insert(WindFarm::new("Calm Sands"), farm(8.0, 8.1, 1));
    store.insert(WindFarm::new("Storm Ridge"), farm(8.0, 14.0, 3));
    store.insert(WindFarm::new("Fresh Start"), farm(8.0, 8.0, 5).split_off(3950));

    let dir = std::env::temp_dir().join(format!("windcast-drift-{}", uuid::Uuid::new_v4()));
    let alerts = Arc::new(RecordingAlertChannel::new());
    let monitor = DriftMonitor::new(
        Arc::new(store),
        Arc::new(JsonLinesSink::new(&dir)),
        alerts.clone(),
        DriftConfig::default(),
    );

    let farms = ["Calm Sands", "Fresh Start", "Storm Ridge"].map(String::from);
    let run = monitor.run(&farms, TrainingWindow::trailing(now(), 730)).await.unwrap();

    assert_eq!(run.count(DriftAction::None), 1);
    assert_eq!(run.count(DriftAction::Retrain), 1);
    assert_eq!(run.could_not_calculate(), vec!["Fresh Start"]);

    let sent = alerts.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].farms.len(), 1);
    assert_eq!(sent[0].farms[0].farm, "Storm Ridge");
    assert!(sent[0].farms[0].max_psi >= 0.2);

    let persisted: Vec<DriftReport> = std::fs::read_to_string(dir.join(JsonLinesSink::DRIFT_REPORTS))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let farms: Vec<&str> = persisted.iter().map(|r| r.farm.as_str()).collect();
    assert_eq!(farms, vec!["Calm Sands", "Fresh Start", "Storm Ridge"]);
    assert_eq!(persisted[1].status, DriftStatus::CouldNotCalculate);
    assert!(persisted[1].max_psi.is_none());

    std::fs::remove_dir_all(&dir).ok();
}

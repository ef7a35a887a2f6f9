//! Result sink: drift reports, trading signals, per-farm forecasts and
//! training summaries.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::domain::{DriftReport, FarmForecast, ForecastSignal};
use crate::ml::TrainingReport;

pub trait ResultSink: Send + Sync {
    fn write_drift_reports(&self, reports: &[DriftReport]) -> Result<()>;

    fn write_signals(&self, signals: &[ForecastSignal], forecasts: &[FarmForecast]) -> Result<()>;

    fn write_training_report(&self, report: &TrainingReport) -> Result<()>;
}

/// Appends one JSON document per line to files under `dir`
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    pub const DRIFT_REPORTS: &'static str = "drift_reports.jsonl";
    pub const SIGNALS: &'static str = "signals.jsonl";
    pub const FARM_FORECASTS: &'static str = "farm_forecasts.jsonl";
    pub const TRAINING_REPORTS: &'static str = "training_reports.jsonl";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn encode_lines<T: Serialize>(records: &[T]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

impl JsonLinesSink {
    fn append<T: Serialize>(&self, file: &str, records: &[T]) -> Result<()> {
        self.append_all(&[(file, encode_lines(records)?)])
    }

    /// Append pre-serialized batches as one unit. Files appended before a
    /// failing one are truncated back to their previous length.
    fn append_all(&self, batches: &[(&str, Vec<u8>)]) -> Result<()> {
        if batches.iter().all(|(_, bytes)| bytes.is_empty()) {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create sink dir {}", self.dir.display()))?;

        let mut written: Vec<(PathBuf, u64)> = Vec::with_capacity(batches.len());
        for (file, bytes) in batches.iter().filter(|(_, bytes)| !bytes.is_empty()) {
            let path = self.dir.join(file);
            match append_bytes(&path, bytes) {
                Ok(previous_len) => written.push((path, previous_len)),
                Err(e) => {
                    for (path, len) in &written {
                        let rolled_back = OpenOptions::new()
                            .write(true)
                            .open(path)
                            .and_then(|f| f.set_len(*len));
                        if let Err(rollback) = rolled_back {
                            error!(
                                path = %path.display(),
                                error = %rollback,
                                "failed to roll back partial append"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Append `bytes` to `path`, returning the file length before the append
fn append_bytes(path: &Path, bytes: &[u8]) -> Result<u64> {
    let mut handle = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let previous_len = handle
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    handle
        .write_all(bytes)
        .and_then(|_| handle.flush())
        .with_context(|| format!("append to {}", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "results appended");
    Ok(previous_len)
}

impl ResultSink for JsonLinesSink {
    fn write_drift_reports(&self, reports: &[DriftReport]) -> Result<()> {
        self.append(Self::DRIFT_REPORTS, reports)
    }

    fn write_signals(&self, signals: &[ForecastSignal], forecasts: &[FarmForecast]) -> Result<()> {
        let batches = [
            (Self::SIGNALS, encode_lines(signals)?),
            (Self::FARM_FORECASTS, encode_lines(forecasts)?),
        ];
        self.append_all(&batches)
    }

    fn write_training_report(&self, report: &TrainingReport) -> Result<()> {
        self.append(Self::TRAINING_REPORTS, std::slice::from_ref(report))
    }
}

/// Collects everything written, for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemorySink {
    drift_reports: Mutex<Vec<DriftReport>>,
    signals: Mutex<Vec<ForecastSignal>>,
    farm_forecasts: Mutex<Vec<FarmForecast>>,
    training_reports: Mutex<Vec<TrainingReport>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drift_reports(&self) -> Vec<DriftReport> {
        self.drift_reports.lock().clone()
    }

    pub fn signals(&self) -> Vec<ForecastSignal> {
        self.signals.lock().clone()
    }

    pub fn farm_forecasts(&self) -> Vec<FarmForecast> {
        self.farm_forecasts.lock().clone()
    }

    pub fn training_reports(&self) -> Vec<TrainingReport> {
        self.training_reports.lock().clone()
    }
}

impl ResultSink for InMemorySink {
    fn write_drift_reports(&self, reports: &[DriftReport]) -> Result<()> {
        self.drift_reports.lock().extend_from_slice(reports);
        Ok(())
    }

    fn write_signals(&self, signals: &[ForecastSignal], forecasts: &[FarmForecast]) -> Result<()> {
        self.signals.lock().extend_from_slice(signals);
        self.farm_forecasts.lock().extend_from_slice(forecasts);
        Ok(())
    }

    fn write_training_report(&self, report: &TrainingReport) -> Result<()> {
        self.training_reports.lock().push(report.clone());
        Ok(())
    }
}

//! Feature engineering for wind generation models
//!
//! Turns a farm's hourly weather/generation series into a supervised table:
//! current conditions, lagged generation, trailing rolling statistics,
//! calendar fields, and a target shifted forward by the horizon.
//!
//! Lags, windows and the target are keyed by timestamp, so a gap in the
//! series yields an undefined value instead of pairing records that are
//! further apart than the declared distance.

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::Observation;

/// Generation lags (hours)
pub const LAG_HOURS: [u32; 5] = [1, 6, 12, 24, 48];
/// Trailing rolling windows (hours)
pub const ROLLING_WINDOWS: [u32; 3] = [3, 6, 12];
/// Minimum aligned weather+generation records before a farm is usable
pub const MIN_ALIGNED_RECORDS: usize = 1000;

const REQUIRED_LAG: &str = "gen_lag_1h";

/// Ordered feature column names. Models record this list and inference must
/// reproduce it exactly.
pub fn feature_names() -> Vec<String> {
    let mut names = vec![
        "wind_speed".to_string(),
        "wind_direction".to_string(),
        "wind_gusts".to_string(),
    ];
    names.extend(LAG_HOURS.iter().map(|lag| format!("gen_lag_{lag}h")));
    for window in ROLLING_WINDOWS {
        names.push(format!("wind_speed_roll_mean_{window}h"));
        names.push(format!("wind_speed_roll_std_{window}h"));
        names.push(format!("gen_roll_mean_{window}h"));
        names.push(format!("gen_roll_std_{window}h"));
    }
    names.extend(
        ["hour", "day_of_week", "month", "season"]
            .iter()
            .map(|s| s.to_string()),
    );
    names
}

/// One hour of a farm's series
#[derive(Debug, Clone, Copy, PartialEq)]
struct HourlyRecord {
    wind_speed: f64,
    wind_direction: f64,
    wind_gusts: f64,
    generation_mw: Option<f64>,
}

impl HourlyRecord {
    fn generation(&self) -> Option<f64> {
        self.generation_mw.filter(|g| g.is_finite())
    }

    fn has_weather(&self) -> bool {
        self.wind_speed.is_finite() && self.wind_direction.is_finite() && self.wind_gusts.is_finite()
    }
}

/// Hour-indexed series for one farm (last write wins per hour)
#[derive(Debug, Clone, Default)]
pub struct HourlySeries {
    records: BTreeMap<DateTime<Utc>, HourlyRecord>,
}

impl HourlySeries {
    pub fn from_observations(observations: &[Observation]) -> Self {
        let mut series = Self::default();
        for obs in observations {
            series.records.insert(obs.hour(), record_of(obs));
        }
        series
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.keys().next_back().copied()
    }

    /// Records carrying both weather and metered generation
    pub fn aligned_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.has_weather() && r.generation().is_some())
            .count()
    }

    /// Append weather-only rows strictly after the last known hour.
    /// Returns the number of rows appended.
    pub fn extend_weather(&mut self, live: &[Observation]) -> usize {
        let cutoff = self.last_timestamp();
        let mut appended = 0;
        for obs in live {
            let hour = obs.hour();
            if cutoff.is_some_and(|c| hour <= c) {
                continue;
            }
            let mut record = record_of(obs);
            record.generation_mw = None;
            self.records.insert(hour, record);
            appended += 1;
        }
        appended
    }

    fn get(&self, ts: DateTime<Utc>) -> Option<&HourlyRecord> {
        self.records.get(&ts)
    }

    fn generation_at(&self, ts: DateTime<Utc>) -> Option<f64> {
        self.get(ts).and_then(HourlyRecord::generation)
    }

    fn window(&self, end: DateTime<Utc>, hours: u32) -> impl Iterator<Item = &HourlyRecord> {
        let start = end - TimeDelta::hours(i64::from(hours) - 1);
        self.records.range(start..=end).map(|(_, r)| r)
    }
}

fn record_of(obs: &Observation) -> HourlyRecord {
    HourlyRecord {
        wind_speed: obs.wind_speed,
        wind_direction: obs.wind_direction,
        wind_gusts: obs.wind_gusts,
        generation_mw: obs.generation_mw,
    }
}

/// Feature values at one timestamp, in `feature_names()` order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl FeatureRow {
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Supervised table for one (farm, horizon)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    pub farm: String,
    pub horizon_hours: u32,
    pub columns: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub rows: Vec<Vec<f64>>,
    pub target: Vec<f64>,
    /// Weather+generation records the table was built from
    pub aligned_records: usize,
}

impl FeatureTable {
    fn empty(farm: &str, horizon_hours: u32, aligned_records: usize) -> Self {
        Self {
            farm: farm.to_string(),
            horizon_hours,
            columns: feature_names(),
            timestamps: Vec::new(),
            rows: Vec::new(),
            target: Vec::new(),
            aligned_records,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep only rows whose features and target are all finite
    pub fn finite_rows(&self) -> FeatureTable {
        let mut out = Self::empty(&self.farm, self.horizon_hours, self.aligned_records);
        out.columns = self.columns.clone();
        for ((ts, row), target) in self.timestamps.iter().zip(&self.rows).zip(&self.target) {
            if target.is_finite() && row.iter().all(|v| v.is_finite()) {
                out.timestamps.push(*ts);
                out.rows.push(row.clone());
                out.target.push(*target);
            }
        }
        out
    }
}

/// Builds feature tables and single inference rows
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    min_records: usize,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(MIN_ALIGNED_RECORDS)
    }
}

impl FeatureBuilder {
    pub fn new(min_records: usize) -> Self {
        Self { min_records }
    }

    pub fn min_records(&self) -> usize {
        self.min_records
    }

    /// Build the training table for `farm` at `horizon_hours`.
    ///
    /// Returns an empty table when the farm has fewer than `min_records`
    /// aligned records; callers skip such farms.
    pub fn build(&self, farm: &str, observations: &[Observation], horizon_hours: u32) -> FeatureTable {
        let series = HourlySeries::from_observations(observations);
        self.build_from_series(farm, &series, horizon_hours)
    }

    pub fn build_from_series(
        &self,
        farm: &str,
        series: &HourlySeries,
        horizon_hours: u32,
    ) -> FeatureTable {
        let aligned = series.aligned_count();
        let mut table = FeatureTable::empty(farm, horizon_hours, aligned);
        if aligned < self.min_records || horizon_hours == 0 {
            return table;
        }

        let lag_idx = table
            .columns
            .iter()
            .position(|c| c == REQUIRED_LAG)
            .unwrap_or(3);
        let shift = TimeDelta::hours(i64::from(horizon_hours));

        for (&ts, record) in &series.records {
            if !record.has_weather() || record.generation().is_none() {
                continue;
            }
            let Some(target) = series.generation_at(ts + shift) else {
                continue;
            };
            let values = compute_values(series, ts, record);
            if !values[lag_idx].is_finite() {
                continue;
            }
            table.timestamps.push(ts);
            table.rows.push(values);
            table.target.push(target);
        }
        table
    }

    /// Feature row at `ts` using only data at or before `ts`.
    pub fn row_at(&self, series: &HourlySeries, ts: DateTime<Utc>) -> Option<FeatureRow> {
        let record = series.get(ts)?;
        Some(FeatureRow {
            timestamp: ts,
            values: compute_values(series, ts, record),
        })
    }

    /// Latest row at or before `at` whose features are all defined
    pub fn latest_finite_row(&self, series: &HourlySeries, at: DateTime<Utc>) -> Option<FeatureRow> {
        series
            .records
            .range(..=at)
            .rev()
            .filter(|(_, r)| r.has_weather())
            .map(|(&ts, record)| FeatureRow {
                timestamp: ts,
                values: compute_values(series, ts, record),
            })
            .find(FeatureRow::is_finite)
    }
}

fn compute_values(series: &HourlySeries, ts: DateTime<Utc>, record: &HourlyRecord) -> Vec<f64> {
    let mut values = Vec::with_capacity(24);
    values.push(record.wind_speed);
    values.push(record.wind_direction);
    values.push(record.wind_gusts);

    for lag in LAG_HOURS {
        let at = ts - TimeDelta::hours(i64::from(lag));
        values.push(series.generation_at(at).unwrap_or(f64::NAN));
    }

    for window in ROLLING_WINDOWS {
        let speeds: Vec<f64> = series
            .window(ts, window)
            .map(|r| r.wind_speed)
            .filter(|v| v.is_finite())
            .collect();
        let generation: Vec<f64> = series
            .window(ts, window)
            .filter_map(HourlyRecord::generation)
            .collect();
        let (speed_mean, speed_std) = mean_and_std(&speeds);
        let (gen_mean, gen_std) = mean_and_std(&generation);
        values.extend([speed_mean, speed_std, gen_mean, gen_std]);
    }

    values.push(f64::from(ts.hour()));
    values.push(f64::from(ts.weekday().num_days_from_monday()));
    values.push(f64::from(ts.month()));
    values.push(f64::from(season(ts.month())));
    values
}

/// Mean and sample standard deviation with min-periods 1.
/// Std is NaN for fewer than two values; both are NaN for none.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, f64::NAN);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Season from month (0=winter, 1=spring, 2=summer, 3=autumn)
pub fn season(month: u32) -> u32 {
    match month {
        12 | 1 | 2 => 0,
        3..=5 => 1,
        6..=8 => 2,
        _ => 3,
    }
}

//! Real-time signal engine
//!
//! Predicts each farm's generation for the official forecast's settlement
//! periods, sums the farms into a system forecast and compares it with the
//! official one period by period.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

use super::features::{feature_names, FeatureBuilder, FeatureRow, HourlySeries};
use super::official::{latest_publication, OfficialForecastFeed, OfficialForecastPoint};
use super::weather::{resolve_weather, WeatherFeed, WeatherSource};
use crate::domain::{FarmForecast, ForecastSignal, SettlementPeriod, SignalThresholds, WindFarm};
use crate::error::PipelineError;
use crate::ml::{HorizonModel, ModelSet};
use crate::repo::{ObservationStore, ResultSink};

/// Signal engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SignalConfig {
    #[validate(range(min = 1, max = 240))]
    pub lookahead_hours: i64,
    /// Recent history fetched per farm; must cover the longest lag
    #[validate(range(min = 49))]
    pub history_hours: i64,
    #[validate(range(min = 1))]
    pub max_weather_staleness_hours: i64,
    #[validate(range(min = 0.0))]
    pub opportunity_pct: f64,
    #[validate(range(min = 0.0))]
    pub opportunity_mw: f64,
    #[validate(range(min = 0.0))]
    pub signal_mw: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        let thresholds = SignalThresholds::default();
        Self {
            lookahead_hours: 24,
            history_hours: 72,
            max_weather_staleness_hours: 6,
            opportunity_pct: thresholds.opportunity_pct,
            opportunity_mw: thresholds.opportunity_mw,
            signal_mw: thresholds.signal_mw,
        }
    }
}

impl SignalConfig {
    pub fn thresholds(&self) -> SignalThresholds {
        SignalThresholds {
            opportunity_pct: self.opportunity_pct,
            opportunity_mw: self.opportunity_mw,
            signal_mw: self.signal_mw,
        }
    }
}

/// A farm left out of the system aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedFarm {
    pub farm: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRun {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub signals: Vec<ForecastSignal>,
    pub farm_forecasts: Vec<FarmForecast>,
    /// Opportunity signals, largest absolute divergence first
    pub opportunities: Vec<ForecastSignal>,
    pub weather_sources: BTreeMap<String, WeatherSource>,
    pub included_farms: Vec<String>,
    pub excluded_farms: Vec<ExcludedFarm>,
}

impl fmt::Display for SignalRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Signal run {} at {}: {} periods, {} opportunities, {} farms included, {} excluded",
            self.run_id,
            self.generated_at.format("%Y-%m-%d %H:%M UTC"),
            self.signals.len(),
            self.opportunities.len(),
            self.included_farms.len(),
            self.excluded_farms.len()
        )?;
        for s in &self.opportunities {
            writeln!(
                f,
                "  {}  own {:>9.1} MW  official {:>9.1} MW  diff {:>+8.1} MW ({})  {}",
                s.settlement,
                s.own_forecast_mw,
                s.official_forecast_mw,
                s.difference_mw,
                s.difference_pct
                    .map_or_else(|| "n/a".to_string(), |p| format!("{p:+.1}%")),
                s.signal
            )?;
        }
        for (farm, source) in &self.weather_sources {
            writeln!(f, "  weather {farm}: {source}")?;
        }
        for excluded in &self.excluded_farms {
            writeln!(f, "  excluded {}: {}", excluded.farm, excluded.reason)?;
        }
        Ok(())
    }
}

/// Inference anchor for one farm
#[derive(Debug, Clone, PartialEq)]
pub struct FarmAnchor {
    pub weather: WeatherSource,
    pub row: FeatureRow,
}

pub struct SignalEngine {
    observations: Arc<dyn ObservationStore>,
    weather: Arc<dyn WeatherFeed>,
    official: Arc<dyn OfficialForecastFeed>,
    sink: Arc<dyn ResultSink>,
    builder: FeatureBuilder,
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(
        observations: Arc<dyn ObservationStore>,
        weather: Arc<dyn WeatherFeed>,
        official: Arc<dyn OfficialForecastFeed>,
        sink: Arc<dyn ResultSink>,
        config: SignalConfig,
    ) -> Self {
        Self {
            observations,
            weather,
            official,
            sink,
            builder: FeatureBuilder::default(),
            config,
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Run one signal batch at `now` with the given models.
    ///
    /// Fails on an empty model set or an unavailable official forecast.
    /// Individual farms that cannot be predicted are excluded, not fatal.
    pub async fn run(&self, models: &ModelSet, now: DateTime<Utc>) -> Result<SignalRun> {
        if models.is_empty() {
            return Err(PipelineError::NoModels.into());
        }

        let official = self.official_forecast(now).await?;
        let known: HashMap<String, WindFarm> = match self.observations.farms().await {
            Ok(farms) => farms.into_iter().map(|f| (f.name.clone(), f)).collect(),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "farm list unavailable, using model farm names");
                HashMap::new()
            }
        };

        let mut farm_forecasts = Vec::new();
        let mut weather_sources = BTreeMap::new();
        let mut excluded_farms = Vec::new();
        let mut included_farms = Vec::new();

        for name in models.farms() {
            let farm = known
                .get(&name)
                .cloned()
                .unwrap_or_else(|| WindFarm::new(name.clone()));
            match self.predict_farm(models, &farm, &official, now, &mut weather_sources).await {
                Ok(forecasts) => {
                    included_farms.push(name);
                    farm_forecasts.extend(forecasts);
                }
                Err(reason) => excluded_farms.push(ExcludedFarm {
                    farm: name,
                    reason,
                }),
            }
        }

        let mut system: BTreeMap<SettlementPeriod, f64> = BTreeMap::new();
        for forecast in &farm_forecasts {
            *system.entry(forecast.settlement).or_default() += forecast.predicted_mw;
        }

        let thresholds = self.config.thresholds();
        let signals: Vec<ForecastSignal> = if included_farms.is_empty() {
            warn!("every farm was excluded; no system signals produced");
            Vec::new()
        } else {
            official
                .iter()
                .filter_map(|point| {
                    let own = system.get(&point.settlement).copied()?;
                    Some(ForecastSignal::evaluate(
                        point.settlement,
                        point.start_time,
                        own,
                        point.generation_mw,
                        &thresholds,
                    ))
                })
                .collect()
        };

        let mut opportunities: Vec<ForecastSignal> =
            signals.iter().filter(|s| s.is_opportunity).cloned().collect();
        opportunities.sort_by(|a, b| b.difference_mw.abs().total_cmp(&a.difference_mw.abs()));

        self.sink
            .write_signals(&signals, &farm_forecasts)
            .context("Failed to write signals")?;

        info!(
            periods = signals.len(),
            opportunities = opportunities.len(),
            included = included_farms.len(),
            excluded = excluded_farms.len(),
            "signal run complete"
        );

        Ok(SignalRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: now,
            signals,
            farm_forecasts,
            opportunities,
            weather_sources,
            included_farms,
            excluded_farms,
        })
    }

    async fn official_forecast(&self, now: DateTime<Utc>) -> Result<Vec<OfficialForecastPoint>> {
        let until = now + TimeDelta::hours(self.config.lookahead_hours);
        let points = self
            .official
            .fetch(now, until)
            .await
            .map_err(|e| PipelineError::OfficialForecastUnavailable(format!("{e:#}")))?;
        let points = latest_publication(points);
        if points.is_empty() {
            return Err(PipelineError::OfficialForecastUnavailable(format!(
                "no forecast points between {now} and {until}"
            ))
            .into());
        }
        Ok(points)
    }

    /// Latest complete feature row at or before `now` for one farm, built
    /// from recent history plus live weather when it is fresh. Errors carry
    /// the reason the farm is excluded.
    pub async fn anchor(&self, farm: &WindFarm, now: DateTime<Utc>) -> Result<FarmAnchor, String> {
        let name = farm.name.as_str();
        let history_start = now - TimeDelta::hours(self.config.history_hours);
        let history = self
            .observations
            .observations(name, history_start, now + TimeDelta::hours(1))
            .await
            .map_err(|e| {
                warn!(farm = name, error = %format!("{e:#}"), "excluding farm: history unavailable");
                format!("history unavailable: {e:#}")
            })?;

        let weather = resolve_weather(
            self.weather.as_ref(),
            farm,
            now,
            self.config.lookahead_hours,
            self.config.max_weather_staleness_hours,
        )
        .await;

        let mut series = HourlySeries::from_observations(&history);
        series.extend_weather(&weather.live);
        if series.is_empty() {
            let err = PipelineError::NoWeatherData(name.to_string());
            warn!(farm = name, "excluding farm: {err}");
            return Err(err.to_string());
        }

        let Some(row) = self.builder.latest_finite_row(&series, now) else {
            warn!(farm = name, "excluding farm: no complete feature row at or before now");
            return Err("no complete feature row at or before now".to_string());
        };
        Ok(FarmAnchor {
            weather: weather.source,
            row,
        })
    }

    /// Forecasts for one farm, or the reason it is excluded
    async fn predict_farm(
        &self,
        models: &ModelSet,
        farm: &WindFarm,
        official: &[OfficialForecastPoint],
        now: DateTime<Utc>,
        weather_sources: &mut BTreeMap<String, WeatherSource>,
    ) -> Result<Vec<FarmForecast>, String> {
        let name = farm.name.as_str();
        let FarmAnchor { weather, row: anchor } = self.anchor(farm, now).await?;
        weather_sources.insert(name.to_string(), weather);

        let columns = feature_names();
        let mut by_horizon: HashMap<u32, f64> = HashMap::new();
        let mut forecasts = Vec::with_capacity(official.len());
        for point in official {
            let lead = lead_hours(anchor.timestamp, point.start_time);
            let Some(model) = models.select(name, lead) else {
                return Err(format!("no model for lead {lead}h"));
            };
            let horizon = model.key().horizon_hours;
            let predicted = match by_horizon.get(&horizon) {
                Some(p) => *p,
                None => {
                    let p = self.predict(models, model, &columns, &anchor)?;
                    by_horizon.insert(horizon, p);
                    p
                }
            };
            forecasts.push(FarmForecast {
                farm: name.to_string(),
                settlement: point.settlement,
                start_time: point.start_time,
                horizon_hours: horizon,
                predicted_mw: predicted,
            });
        }
        Ok(forecasts)
    }

    fn predict(
        &self,
        models: &ModelSet,
        model: &HorizonModel,
        columns: &[String],
        anchor: &FeatureRow,
    ) -> Result<f64, String> {
        models
            .predict_row(model, columns, anchor)
            .map(|mw| mw.max(0.0))
            .map_err(|e| {
                error!(model = %model.key(), error = %e, "excluding farm: prediction failed");
                e.to_string()
            })
    }
}

/// Whole hours from the anchor row to a period start, rounded up
pub fn lead_hours(anchor: DateTime<Utc>, start: DateTime<Utc>) -> u32 {
    let minutes = (start - anchor).num_minutes().max(0);
    u32::try_from((minutes + 59) / 60).unwrap_or(u32::MAX)
}

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::drift::DriftConfig;
use crate::forecast::features::MIN_ALIGNED_RECORDS;
use crate::forecast::SignalConfig;
use crate::ml::{BoostingParams, OrchestratorConfig, TrainerConfig};

pub const DEFAULT_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "WINDCAST__";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub training: TrainingConfig,
    #[validate(nested)]
    pub features: FeaturesConfig,
    #[validate(nested)]
    pub drift: DriftConfig,
    #[validate(nested)]
    pub signal: SignalConfig,
    #[validate(nested)]
    pub feeds: FeedsConfig,
    pub store: StoreConfig,
    #[validate(nested)]
    pub db: DbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TrainingConfig {
    #[validate(length(min = 1), custom(function = "positive_horizons"))]
    pub horizons: Vec<u32>,
    /// Observation window ending now
    #[validate(range(min = 1))]
    pub lookback_days: i64,
    #[validate(range(min = 1))]
    pub min_rows: usize,
    #[validate(range(min = 3))]
    pub cv_folds: usize,
    #[validate(range(min = 1))]
    pub max_workers: usize,
    pub min_r2: f64,
    #[validate(range(min = 0.0))]
    pub max_relative_error_pct: f64,
    pub boosting: BoostingParams,
}

fn positive_horizons(horizons: &Vec<u32>) -> Result<(), ValidationError> {
    if horizons.iter().any(|h| *h == 0) {
        return Err(ValidationError::new("horizon_must_be_positive"));
    }
    Ok(())
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let trainer = TrainerConfig::default();
        let orchestrator = OrchestratorConfig::default();
        Self {
            horizons: vec![1, 6, 12, 24, 48],
            lookback_days: 730,
            min_rows: trainer.min_rows,
            cv_folds: trainer.cv_folds,
            max_workers: orchestrator.max_workers,
            min_r2: orchestrator.min_r2,
            max_relative_error_pct: orchestrator.max_relative_error_pct,
            boosting: trainer.params,
        }
    }
}

impl TrainingConfig {
    pub fn trainer(&self) -> TrainerConfig {
        TrainerConfig {
            min_rows: self.min_rows,
            cv_folds: self.cv_folds,
            params: self.boosting,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_workers: self.max_workers,
            min_r2: self.min_r2,
            max_relative_error_pct: self.max_relative_error_pct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FeaturesConfig {
    #[validate(range(min = 1))]
    pub min_aligned_records: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            min_aligned_records: MIN_ALIGNED_RECORDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FeedsConfig {
    #[validate(url)]
    pub official_base_url: String,
    /// Live weather endpoint; historical fallback only when unset
    pub weather_base_url: Option<String>,
    pub weather_model: String,
    #[validate(range(min = 1, max = 300))]
    pub http_timeout_seconds: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            official_base_url: crate::forecast::BmrsWindForecastClient::DEFAULT_BASE_URL.to_string(),
            weather_base_url: Some(crate::forecast::OpenMeteoClient::DEFAULT_BASE_URL.to_string()),
            weather_model: crate::forecast::OpenMeteoClient::DEFAULT_MODEL.to_string(),
            http_timeout_seconds: 10,
        }
    }
}

impl FeedsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationBackend {
    File,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: ObservationBackend,
    /// Root of the file observation store
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    /// Where JSON-lines results are appended
    pub output_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: ObservationBackend::File,
            data_dir: PathBuf::from("data"),
            model_dir: PathBuf::from("models"),
            output_dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/windcast".to_string(),
            max_connections: 5,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if present), then `WINDCAST__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_PATH));
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("Failed to load configuration")?;
        cfg.validate().context("Invalid configuration")?;
        Ok(cfg)
    }
}

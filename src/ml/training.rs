//! ML Model Training Pipeline
//!
//! Fits one (farm, horizon) model: time-ordered cross-validation for an
//! out-of-sample estimate, then a final fit on all rows for deployment.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BoostingParams, GradientBoostedRegressor, HorizonModel, ModelKey, ModelMetadata, ModelMetrics};
use crate::error::PipelineError;
use crate::forecast::features::{FeatureTable, MIN_ALIGNED_RECORDS};
use crate::forecast::{ForecastMetrics, TimeSeriesCrossValidation};

/// Training Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Rows required after NaN masking
    pub min_rows: usize,
    pub cv_folds: usize,
    pub params: BoostingParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_rows: MIN_ALIGNED_RECORDS,
            cv_folds: 3,
            params: BoostingParams::default(),
        }
    }
}

/// Horizon Model Trainer
#[derive(Debug, Clone)]
pub struct HorizonTrainer {
    config: TrainerConfig,
}

impl HorizonTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn train(&self, table: &FeatureTable) -> Result<HorizonModel, PipelineError> {
        let key = ModelKey::new(&table.farm, table.horizon_hours);
        let data = table.finite_rows();

        if data.len() < self.config.min_rows {
            warn!(
                model = %key,
                rows = data.len(),
                required = self.config.min_rows,
                "skipping training: not enough rows after masking"
            );
            return Err(PipelineError::InsufficientData {
                farm: table.farm.clone(),
                available: data.len(),
                required: self.config.min_rows,
            });
        }

        let params = self.config.params;
        let cv = TimeSeriesCrossValidation::new(self.config.cv_folds);
        let mut cv_fold_mae = Vec::with_capacity(cv.n_folds());
        for fold in cv.split(data.len()) {
            let model = GradientBoostedRegressor::fit(
                &data.rows[fold.train.clone()],
                &data.target[fold.train.clone()],
                params,
            )?;
            let predicted = model.predict(&data.rows[fold.test.clone()])?;
            let metrics = ForecastMetrics::calculate(&data.target[fold.test.clone()], &predicted)
                .map_err(|e| PipelineError::Training(e.to_string()))?;
            cv_fold_mae.push(metrics.mae);
        }
        let cv_mae = (!cv_fold_mae.is_empty())
            .then(|| cv_fold_mae.iter().sum::<f64>() / cv_fold_mae.len() as f64);

        let regressor = GradientBoostedRegressor::fit(&data.rows, &data.target, params)?;
        let fitted = regressor.predict(&data.rows)?;
        let in_sample = ForecastMetrics::calculate(&data.target, &fitted)
            .map_err(|e| PipelineError::Training(e.to_string()))?;

        info!(
            model = %key,
            samples = data.len(),
            cv_mae = cv_mae.unwrap_or(f64::NAN),
            mae = in_sample.mae,
            r2 = in_sample.r2,
            "trained horizon model"
        );

        let metadata = ModelMetadata {
            model_id: format!("gbr_{}", uuid::Uuid::new_v4()),
            key,
            trained_at: chrono::Utc::now(),
            training_samples: data.len(),
            feature_names: data.columns.clone(),
            params,
            metrics: ModelMetrics {
                in_sample,
                cv_mae,
                cv_fold_mae,
            },
        };

        Ok(HorizonModel::new(metadata, regressor))
    }
}

//! Machine Learning Module
//!
//! One gradient-boosted regression model per (wind farm, forecast horizon):
//! - `boosting`: the regressor
//! - `training`: cross-validated fit of a single (farm, horizon) pair
//! - `orchestrator`: worker pool training every pair
//! - `inference`: the model collection used by the signal engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;
use crate::forecast::ForecastMetrics;

pub mod boosting;
pub mod inference;
pub mod orchestrator;
pub mod training;

pub use boosting::{BoostingParams, GradientBoostedRegressor};
pub use inference::ModelSet;
pub use orchestrator::{
    plan, OrchestratorConfig, TaskOutcome, TrainingOrchestrator, TrainingReport, TrainingTask,
    TrainingWindow,
};
pub use training::{HorizonTrainer, TrainerConfig};

/// Identity of a model: exactly one (farm, horizon) pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub farm: String,
    pub horizon_hours: u32,
}

impl ModelKey {
    pub fn new(farm: impl Into<String>, horizon_hours: u32) -> Self {
        Self {
            farm: farm.into(),
            horizon_hours,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}h", self.farm, self.horizon_hours)
    }
}

/// Cross-validated and in-sample error of a fitted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Metrics of the deployed model on its own training data
    pub in_sample: ForecastMetrics,
    /// Mean held-out MAE over the time-ordered folds
    pub cv_mae: Option<f64>,
    pub cv_fold_mae: Vec<f64>,
}

/// ML Model Metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub key: ModelKey,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
    /// Ordered inputs the regressor expects
    pub feature_names: Vec<String>,
    pub params: BoostingParams,
    pub metrics: ModelMetrics,
}

/// Feature Vector for ML models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub features: Vec<f64>,
    pub feature_names: Vec<String>,
}

impl FeatureVector {
    pub fn new(features: Vec<f64>, feature_names: Vec<String>) -> anyhow::Result<Self> {
        if features.len() != feature_names.len() {
            anyhow::bail!(
                "Feature count mismatch: {} features, {} names",
                features.len(),
                feature_names.len()
            );
        }
        Ok(Self {
            features,
            feature_names,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A trained model bound to one (farm, horizon). Immutable once persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct HorizonModel {
    pub metadata: ModelMetadata,
    regressor: GradientBoostedRegressor,
}

impl HorizonModel {
    pub fn new(metadata: ModelMetadata, regressor: GradientBoostedRegressor) -> Self {
        Self {
            metadata,
            regressor,
        }
    }

    pub fn key(&self) -> &ModelKey {
        &self.metadata.key
    }

    pub fn feature_names(&self) -> &[String] {
        &self.metadata.feature_names
    }

    /// Verify that `features` carries exactly this model's columns, in order.
    pub fn check_contract(&self, features: &FeatureVector) -> Result<(), PipelineError> {
        let expected = self.feature_names();
        if features.feature_names == expected {
            if features.features.iter().all(|v| v.is_finite()) {
                return Ok(());
            }
            return Err(self.mismatch("input contains undefined values".to_string()));
        }

        let missing: Vec<&str> = expected
            .iter()
            .filter(|n| !features.feature_names.contains(n))
            .map(String::as_str)
            .collect();
        let extra: Vec<&str> = features
            .feature_names
            .iter()
            .filter(|n| !expected.contains(n))
            .map(String::as_str)
            .collect();
        let detail = if missing.is_empty() && extra.is_empty() {
            "columns present but in a different order".to_string()
        } else {
            format!("missing {missing:?}, unexpected {extra:?}")
        };
        Err(self.mismatch(detail))
    }

    fn mismatch(&self, detail: String) -> PipelineError {
        PipelineError::FeatureMismatch {
            model: self.key().to_string(),
            detail,
        }
    }

    /// Predict generation (MW). Fails fast on any feature-contract violation.
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
        self.check_contract(features)?;
        let out = self.regressor.predict(std::slice::from_ref(&features.features))?;
        out.first()
            .copied()
            .ok_or_else(|| PipelineError::Training("model returned no prediction".into()))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::toy_model;
    use super::*;

    #[test]
    fn test_feature_vector_creation() {
        let fv = FeatureVector::new(vec![1.0, 2.0], vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(fv.len(), 2);
        assert!(!fv.is_empty());
        assert!(FeatureVector::new(vec![1.0], vec!["a".into(), "b".into()]).is_err());
    }

    #[test]
    fn test_model_key_display() {
        assert_eq!(ModelKey::new("Walney", 24).to_string(), "Walney@24h");
    }

    #[test]
    fn test_predict_with_matching_columns() {
        let model = toy_model("A", 1);
        let names = model.feature_names().to_vec();
        let fv = FeatureVector::new(vec![1.0; names.len()], names).unwrap();
        assert!(model.predict(&fv).unwrap().is_finite());
    }

    #[test]
    fn test_reordered_columns_fail_fast() {
        let model = toy_model("A", 1);
        let mut names = model.feature_names().to_vec();
        names.swap(0, 1);
        let fv = FeatureVector::new(vec![1.0; names.len()], names).unwrap();
        let err = model.predict(&fv).unwrap_err();
        match err {
            PipelineError::FeatureMismatch { model, detail } => {
                assert_eq!(model, "A@1h");
                assert!(detail.contains("different order"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_column_is_not_padded() {
        let model = toy_model("A", 1);
        let mut names = model.feature_names().to_vec();
        names.pop();
        let fv = FeatureVector::new(vec![1.0; names.len()], names).unwrap();
        let err = model.predict(&fv).unwrap_err();
        assert!(matches!(err, PipelineError::FeatureMismatch { ref detail, .. } if detail.contains("season")));
    }

    #[test]
    fn test_nan_input_rejected() {
        let model = toy_model("A", 1);
        let names = model.feature_names().to_vec();
        let mut values = vec![1.0; names.len()];
        values[5] = f64::NAN;
        let fv = FeatureVector::new(values, names).unwrap();
        assert!(matches!(
            model.predict(&fv),
            Err(PipelineError::FeatureMismatch { .. })
        ));
    }
}

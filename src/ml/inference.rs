//! ML Model Inference
//!
//! The collection of deployed (farm, horizon) models the signal engine
//! predicts with.

use std::collections::BTreeMap;

use super::{FeatureVector, HorizonModel, ModelKey};
use crate::error::PipelineError;
use crate::forecast::features::FeatureRow;

/// Loaded models keyed by (farm, horizon)
#[derive(Debug, Default)]
pub struct ModelSet {
    models: BTreeMap<ModelKey, HorizonModel>,
}

impl ModelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model, replacing any previous one for the same key
    pub fn insert(&mut self, model: HorizonModel) {
        self.models.insert(model.key().clone(), model);
    }

    pub fn get(&self, key: &ModelKey) -> Option<&HorizonModel> {
        self.models.get(key)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Farms with at least one model, sorted
    pub fn farms(&self) -> Vec<String> {
        let mut farms: Vec<String> = self.models.keys().map(|k| k.farm.clone()).collect();
        farms.dedup();
        farms
    }

    /// Trained horizons for `farm`, ascending
    pub fn horizons_for(&self, farm: &str) -> Vec<u32> {
        self.models
            .keys()
            .filter(|k| k.farm == farm)
            .map(|k| k.horizon_hours)
            .collect()
    }

    /// Model serving a `lead_hours` look-ahead: the shortest horizon that
    /// reaches it, or the longest available when none does.
    pub fn select(&self, farm: &str, lead_hours: u32) -> Option<&HorizonModel> {
        let horizons = self.horizons_for(farm);
        let horizon = horizons
            .iter()
            .copied()
            .find(|h| *h >= lead_hours)
            .or_else(|| horizons.last().copied())?;
        self.models.get(&ModelKey::new(farm, horizon))
    }

    /// Predict from a feature row whose columns are `columns`
    pub fn predict_row(
        &self,
        model: &HorizonModel,
        columns: &[String],
        row: &FeatureRow,
    ) -> Result<f64, PipelineError> {
        let features = FeatureVector::new(row.values.clone(), columns.to_vec()).map_err(|e| {
            PipelineError::FeatureMismatch {
                model: model.key().to_string(),
                detail: e.to_string(),
            }
        })?;
        model.predict(&features)
    }
}

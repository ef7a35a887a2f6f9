//! Pipeline error taxonomy
//!
//! I/O-facing code returns `anyhow::Result`; these variants are the failures
//! callers need to tell apart (skip vs. abort vs. exclude).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Not enough history for a farm/horizon or a drift window
    #[error("insufficient data for {farm}: {available} rows available, {required} required")]
    InsufficientData {
        farm: String,
        available: usize,
        required: usize,
    },

    /// Inference-time feature set does not match the model's recorded list
    #[error("feature contract violated for {model}: {detail}")]
    FeatureMismatch { model: String, detail: String },

    #[error("no models available")]
    NoModels,

    #[error("official forecast unavailable: {0}")]
    OfficialForecastUnavailable(String),

    #[error("no weather data for farm {0}")]
    NoWeatherData(String),

    #[error("model store error: {0}")]
    ModelStore(String),

    #[error("training failed: {0}")]
    Training(String),
}

impl PipelineError {
    /// Data-insufficiency errors are recovered locally by skipping the unit of work
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

/// Classify an `anyhow` error coming back from a unit of work.
pub fn as_pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.downcast_ref::<PipelineError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = PipelineError::InsufficientData {
            farm: "FarmX".to_string(),
            available: 200,
            required: 1000,
        };
        assert!(err.is_insufficient_data());
        assert_eq!(
            err.to_string(),
            "insufficient data for FarmX: 200 rows available, 1000 required"
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = PipelineError::NoModels.into();
        let err = err.context("signal run");
        assert!(matches!(as_pipeline_error(&err), Some(PipelineError::NoModels)));
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Weather features watched for distribution drift
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MonitoredFeature {
    WindSpeed,
    WindDirection,
    WindGusts,
}

impl MonitoredFeature {
    pub const ALL: [MonitoredFeature; 3] = [Self::WindSpeed, Self::WindDirection, Self::WindGusts];
}

/// PSI severity bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftSeverity {
    Stable,
    Warning,
    Significant,
    Critical,
}

impl DriftSeverity {
    pub fn action(self) -> DriftAction {
        match self {
            Self::Stable => DriftAction::None,
            Self::Warning => DriftAction::Monitor,
            Self::Significant | Self::Critical => DriftAction::Retrain,
        }
    }
}

/// Recommended follow-up for a farm
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftAction {
    None,
    Monitor,
    Retrain,
}

/// PSI outcome for one monitored feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeatureDrift {
    Computed {
        feature: MonitoredFeature,
        psi: f64,
        severity: DriftSeverity,
        baseline_count: usize,
        current_count: usize,
        /// Buckets whose zero share was replaced by the floor
        floored_buckets: usize,
        /// True when bucket counts are too degenerate to trust the value
        degenerate: bool,
    },
    Unavailable {
        feature: MonitoredFeature,
        reason: String,
    },
}

impl FeatureDrift {
    pub fn feature(&self) -> MonitoredFeature {
        match self {
            Self::Computed { feature, .. } | Self::Unavailable { feature, .. } => *feature,
        }
    }

    pub fn psi(&self) -> Option<f64> {
        match self {
            Self::Computed { psi, .. } => Some(*psi),
            Self::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    Computed,
    CouldNotCalculate,
}

/// Drift report for one farm and check date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub farm: String,
    pub check_date: NaiveDate,
    pub checked_at: DateTime<Utc>,
    pub status: DriftStatus,
    pub features: Vec<FeatureDrift>,
    pub max_psi: Option<f64>,
    pub mean_psi: Option<f64>,
    /// Absent when the status is `CouldNotCalculate`
    pub recommended_action: Option<DriftAction>,
    /// Explanation when nothing could be computed
    pub note: Option<String>,
}

impl DriftReport {
    pub fn needs_retrain(&self) -> bool {
        self.recommended_action == Some(DriftAction::Retrain)
    }
}

/// Advisory payload emitted when at least one farm needs retraining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub recipient: String,
    pub subject: String,
    pub farms: Vec<AlertedFarm>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertedFarm {
    pub farm: String,
    pub max_psi: f64,
}

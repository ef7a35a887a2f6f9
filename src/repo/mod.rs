//! Data access: observation warehouse, model store, result sink, alerts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Observation, WindFarm};

pub mod alerts;
pub mod file;
pub mod memory;
pub mod models;
pub mod sink;

#[cfg(feature = "db")]
pub mod pg;

pub use alerts::{AlertChannel, LogAlertChannel, RecordingAlertChannel};
pub use file::FileObservationStore;
pub use memory::InMemoryObservationStore;
pub use models::{FileModelStore, InMemoryModelStore, ModelStore};
pub use sink::{InMemorySink, JsonLinesSink, ResultSink};

/// Read-only access to per-farm historical observations
#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn farms(&self) -> Result<Vec<WindFarm>>;

    /// Observations for `farm` with `start <= timestamp < end`, ordered by time
    async fn observations(
        &self,
        farm: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>>;
}

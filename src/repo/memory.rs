use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::ObservationStore;
use crate::domain::{Observation, WindFarm};

/// Observation store held in memory (tests, simulations)
#[derive(Debug, Default)]
pub struct InMemoryObservationStore {
    farms: RwLock<BTreeMap<String, (WindFarm, Vec<Observation>)>>,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a farm and append its observations
    pub fn insert(&self, farm: WindFarm, observations: Vec<Observation>) {
        let mut farms = self.farms.write();
        let entry = farms
            .entry(farm.name.clone())
            .or_insert_with(|| (farm, Vec::new()));
        entry.1.extend(observations);
        entry.1.sort_by_key(|o| o.timestamp);
    }
}

#[async_trait]
impl ObservationStore for InMemoryObservationStore {
    async fn farms(&self) -> Result<Vec<WindFarm>> {
        Ok(self.farms.read().values().map(|(f, _)| f.clone()).collect())
    }

    async fn observations(
        &self,
        farm: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        let farms = self.farms.read();
        let (_, observations) = farms
            .get(farm)
            .ok_or_else(|| anyhow::anyhow!("unknown farm {farm}"))?;
        Ok(observations
            .iter()
            .filter(|o| o.timestamp >= start && o.timestamp < end)
            .cloned()
            .collect())
    }
}

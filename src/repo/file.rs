//! JSON file observation store
//!
//! Layout under the data directory:
//! - `farms.json`: list of farms
//! - `observations/<farm>.json`: the farm's observations

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::PathBuf;
use tracing::debug;

use super::ObservationStore;
use crate::domain::{Observation, WindFarm};

#[derive(Debug, Clone)]
pub struct FileObservationStore {
    root: PathBuf,
}

impl FileObservationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn farms_path(&self) -> PathBuf {
        self.root.join("farms.json")
    }

    fn observations_path(&self, farm: &str) -> PathBuf {
        self.root
            .join("observations")
            .join(format!("{}.json", file_stem(farm)))
    }

    /// Write farm list and observations (used by `windcast simulate`)
    pub async fn write(&self, data: &[(WindFarm, Vec<Observation>)]) -> Result<()> {
        tokio::fs::create_dir_all(self.root.join("observations"))
            .await
            .with_context(|| format!("create {}", self.root.display()))?;

        let farms: Vec<&WindFarm> = data.iter().map(|(f, _)| f).collect();
        tokio::fs::write(self.farms_path(), serde_json::to_vec_pretty(&farms)?)
            .await
            .context("write farms.json")?;

        for (farm, observations) in data {
            let path = self.observations_path(&farm.name);
            tokio::fs::write(&path, serde_json::to_vec(observations)?)
                .await
                .with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }
}

/// Farm name as a file name. Bytes outside [A-Za-z0-9_-] are written as
/// `%XX`, so distinct names never share a file.
pub fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}

#[async_trait]
impl ObservationStore for FileObservationStore {
    async fn farms(&self) -> Result<Vec<WindFarm>> {
        let path = self.farms_path();
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }

    async fn observations(
        &self,
        farm: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        let path = self.observations_path(farm);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let mut observations: Vec<Observation> =
            serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
        observations.retain(|o| o.timestamp >= start && o.timestamp < end);
        observations.sort_by_key(|o| o.timestamp);
        debug!(farm, rows = observations.len(), "loaded observations from file");
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    #[test]
    fn test_file_stem_is_injective() {
        assert_eq!(file_stem("Walney Extension/2"), "Walney%20Extension%2F2");
        assert_eq!(file_stem("HOWAO-1"), "HOWAO-1");
        assert_ne!(file_stem("Farm A"), file_stem("Farm_A"));
        assert_ne!(file_stem("Farm%20A"), file_stem("Farm A"));
        assert_eq!(file_stem("Gwynt y Môr"), "Gwynt%20y%20M%C3%B4r");
    }

    #[tokio::test]
    async fn test_similar_names_keep_separate_files() {
        let dir = std::env::temp_dir().join(format!("windcast-file-{}", uuid::Uuid::new_v4()));
        let store = FileObservationStore::new(&dir);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let spaced = vec![Observation::weather(t0, 5.0, 90.0, 6.0)];
        let underscored = vec![
            Observation::weather(t0, 9.0, 270.0, 11.0),
            Observation::weather(t0 + TimeDelta::hours(1), 9.5, 270.0, 11.5),
        ];
        store
            .write(&[(WindFarm::new("Farm A"), spaced), (WindFarm::new("Farm_A"), underscored)])
            .await
            .unwrap();

        let end = t0 + TimeDelta::days(1);
        assert_eq!(store.observations("Farm A", t0, end).await.unwrap().len(), 1);
        assert_eq!(store.observations("Farm_A", t0, end).await.unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_write_then_query() {
        let dir = std::env::temp_dir().join(format!("windcast-file-{}", uuid::Uuid::new_v4()));
        let store = FileObservationStore::new(&dir);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let obs: Vec<_> = (0..5)
            .map(|h| {
                Observation::weather(t0 + TimeDelta::hours(h), 7.0, 180.0, 9.0).with_generation(50.0)
            })
            .collect();
        store
            .write(&[(WindFarm::new("Gwynt y Mor"), obs)])
            .await
            .unwrap();

        let farms = store.farms().await.unwrap();
        assert_eq!(farms[0].name, "Gwynt y Mor");
        let out = store
            .observations("Gwynt y Mor", t0 + TimeDelta::hours(1), t0 + TimeDelta::hours(3))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }
}

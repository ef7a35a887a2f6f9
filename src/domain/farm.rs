use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Geographic location of a farm (used by the live weather feed)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Wind farm reference data. Partition key for every per-farm series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindFarm {
    pub name: String,
    /// Balancing mechanism units metered for this farm
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default)]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub capacity_mw: Option<f64>,
}

impl WindFarm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            location: None,
            capacity_mw: None,
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoLocation {
            latitude,
            longitude,
        });
        self
    }

    pub fn with_units(mut self, units: Vec<String>) -> Self {
        self.units = units;
        self
    }

    pub fn with_capacity(mut self, capacity_mw: f64) -> Self {
        self.capacity_mw = Some(capacity_mw);
        self
    }
}

/// One hourly weather (+ optional metered generation) record for a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    /// Wind speed (m/s)
    pub wind_speed: f64,
    /// Wind direction (degrees)
    pub wind_direction: f64,
    /// Wind gusts (m/s)
    pub wind_gusts: f64,
    /// Metered generation (MW); absent in weather-only feeds
    #[serde(default)]
    pub generation_mw: Option<f64>,
}

impl Observation {
    pub fn weather(
        timestamp: DateTime<Utc>,
        wind_speed: f64,
        wind_direction: f64,
        wind_gusts: f64,
    ) -> Self {
        Self {
            timestamp,
            wind_speed,
            wind_direction,
            wind_gusts,
            generation_mw: None,
        }
    }

    pub fn with_generation(mut self, generation_mw: f64) -> Self {
        self.generation_mw = Some(generation_mw);
        self
    }

    /// Hour bucket this record belongs to
    pub fn hour(&self) -> DateTime<Utc> {
        truncate_to_hour(self.timestamp)
    }
}

pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_observation_hour_truncation() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 42, 7).unwrap();
        let obs = Observation::weather(ts, 8.0, 270.0, 11.0).with_generation(120.0);
        assert_eq!(obs.hour(), Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(obs.generation_mw, Some(120.0));
    }

    #[test]
    fn test_farm_deserializes_with_defaults() {
        let farm: WindFarm = serde_json::from_str(r#"{"name":"Hornsea"}"#).unwrap();
        assert_eq!(farm, WindFarm::new("Hornsea"));

        let farm = WindFarm::new("Hornsea").with_units(vec!["T_HOWAO-1".to_string()]);
        let json = serde_json::to_string(&farm).unwrap();
        assert_eq!(serde_json::from_str::<WindFarm>(&json).unwrap().units, vec!["T_HOWAO-1"]);
    }
}

#![cfg(feature = "db")]
//! Postgres-backed observation store
//!
//! Expected tables:
//! - `wind_farms(name text, units text[], latitude float8, longitude float8, capacity_mw float8)`
//! - `wind_observations(farm text, ts timestamptz, wind_speed float8, wind_direction float8,
//!    wind_gusts float8, generation_mw float8 null)`

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::debug;

use super::ObservationStore;
use crate::domain::{GeoLocation, Observation, WindFarm};

#[derive(Debug, FromRow)]
struct FarmRow {
    name: String,
    units: Option<Vec<String>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    capacity_mw: Option<f64>,
}

impl From<FarmRow> for WindFarm {
    fn from(row: FarmRow) -> Self {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoLocation {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self {
            name: row.name,
            units: row.units.unwrap_or_default(),
            location,
            capacity_mw: row.capacity_mw,
        }
    }
}

#[derive(Debug, FromRow)]
struct ObservationRow {
    ts: DateTime<Utc>,
    wind_speed: f64,
    wind_direction: f64,
    wind_gusts: f64,
    generation_mw: Option<f64>,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Self {
            timestamp: row.ts,
            wind_speed: row.wind_speed,
            wind_direction: row.wind_direction,
            wind_gusts: row.wind_gusts,
            generation_mw: row.generation_mw,
        }
    }
}

pub struct PgObservationStore {
    pool: PgPool,
}

impl PgObservationStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("connect to observation warehouse")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ObservationStore for PgObservationStore {
    async fn farms(&self) -> Result<Vec<WindFarm>> {
        let rows: Vec<FarmRow> = sqlx::query_as(
            r#"
            SELECT name, units, latitude, longitude, capacity_mw
            FROM wind_farms
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load wind farms")?;

        Ok(rows.into_iter().map(WindFarm::from).collect())
    }

    async fn observations(
        &self,
        farm: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        let rows: Vec<ObservationRow> = sqlx::query_as(
            r#"
            SELECT ts, wind_speed, wind_direction, wind_gusts, generation_mw
            FROM wind_observations
            WHERE farm = $1 AND ts >= $2 AND ts < $3
            ORDER BY ts ASC
            "#,
        )
        .bind(farm)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load observations for {farm}"))?;

        debug!(farm, rows = rows.len(), "loaded observations from warehouse");
        Ok(rows.into_iter().map(Observation::from).collect())
    }
}

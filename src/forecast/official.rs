//! Official system wind-generation forecast (Elexon BMRS-style feed)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::SettlementPeriod;

/// One published value for one settlement period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficialForecastPoint {
    pub settlement: SettlementPeriod,
    pub start_time: DateTime<Utc>,
    pub publish_time: DateTime<Utc>,
    pub generation_mw: f64,
}

#[async_trait]
pub trait OfficialForecastFeed: Send + Sync {
    /// Every published point starting in `[from, to)`. May contain several
    /// publications per settlement period.
    async fn fetch(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<OfficialForecastPoint>>;
}

/// Keep the latest publication per settlement period, ordered by period
pub fn latest_publication(points: Vec<OfficialForecastPoint>) -> Vec<OfficialForecastPoint> {
    let mut latest: BTreeMap<SettlementPeriod, OfficialForecastPoint> = BTreeMap::new();
    for point in points {
        match latest.get(&point.settlement) {
            Some(existing) if existing.publish_time >= point.publish_time => {}
            _ => {
                latest.insert(point.settlement, point);
            }
        }
    }
    latest.into_values().collect()
}

/// HTTP client for the BMRS wind generation forecast
pub struct BmrsWindForecastClient {
    client: Client,
    base_url: String,
}

impl BmrsWindForecastClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://data.elexon.co.uk/bmrs/api/v1";
    pub const PATH: &'static str = "/forecast/generation/wind/latest";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build official forecast HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OfficialForecastFeed for BmrsWindForecastClient {
    async fn fetch(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<OfficialForecastPoint>> {
        let url = format!("{}{}", self.base_url, Self::PATH);
        debug!(%url, %from, %to, "fetching official wind forecast");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("from", from.to_rfc3339()),
                ("to", to.to_rfc3339()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to official forecast API")?;

        if !response.status().is_success() {
            error!(status = %response.status(), "official forecast API returned error status");
            anyhow::bail!("official forecast API error: {}", response.status());
        }

        let body: BmrsResponse = response
            .json()
            .await
            .context("Failed to parse official forecast response")?;

        let points: Vec<OfficialForecastPoint> = body
            .data
            .into_iter()
            .filter(|r| r.start_time >= from && r.start_time < to)
            .map(|r| OfficialForecastPoint {
                settlement: SettlementPeriod::new(r.settlement_date, r.settlement_period),
                start_time: r.start_time,
                publish_time: r.publish_time,
                generation_mw: r.generation,
            })
            .collect();
        info!(points = points.len(), "fetched official wind forecast");
        Ok(points)
    }
}

#[derive(Debug, Deserialize)]
struct BmrsResponse {
    data: Vec<BmrsRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BmrsRecord {
    publish_time: DateTime<Utc>,
    start_time: DateTime<Utc>,
    settlement_date: NaiveDate,
    settlement_period: u8,
    generation: f64,
}

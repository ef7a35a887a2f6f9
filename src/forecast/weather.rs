//! Live weather for wind farms (Open-Meteo, ECMWF model)
//!
//! The signal engine prefers live forecast rows and falls back to the most
//! recent historical observations whenever the feed errors, times out,
//! returns nothing or returns only stale rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::Display;
use tracing::{debug, error, info, warn};

use crate::domain::{Observation, WindFarm};

/// Source of hourly weather rows for a farm
#[async_trait]
pub trait WeatherFeed: Send + Sync {
    /// Hourly rows for `farm` in `[from, to)`, ordered by time
    async fn latest(
        &self,
        farm: &WindFarm,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Observation>>;
}

/// Open-Meteo forecast API client
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OpenMeteoClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.open-meteo.com";
    pub const DEFAULT_MODEL: &'static str = "ecmwf_ifs025";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build weather HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn parse(response: OpenMeteoResponse, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Observation> {
        let hourly = response.hourly;
        let mut rows: Vec<Observation> = hourly
            .time
            .iter()
            .enumerate()
            .filter_map(|(i, time)| {
                let ts = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M")
                    .ok()?
                    .and_utc();
                let speed = hourly.wind_speed_100m.get(i).copied().flatten()?;
                let direction = hourly.wind_direction_100m.get(i).copied().flatten()?;
                let gusts = hourly.wind_gusts_10m.get(i).copied().flatten()?;
                Some(Observation::weather(ts, speed, direction, gusts))
            })
            .filter(|o| o.timestamp >= from && o.timestamp < to)
            .collect();
        rows.sort_by_key(|o| o.timestamp);
        rows
    }
}

#[async_trait]
impl WeatherFeed for OpenMeteoClient {
    async fn latest(
        &self,
        farm: &WindFarm,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        let location = farm
            .location
            .as_ref()
            .with_context(|| format!("farm {} has no location", farm.name))?;

        let url = format!("{}/v1/forecast", self.base_url);
        let start_hour = from.format("%Y-%m-%dT%H:%M").to_string();
        let end_hour = to.format("%Y-%m-%dT%H:%M").to_string();
        debug!(farm = %farm.name, %url, "fetching live weather");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", format!("{:.4}", location.latitude)),
                ("longitude", format!("{:.4}", location.longitude)),
                (
                    "hourly",
                    "wind_speed_100m,wind_direction_100m,wind_gusts_10m".to_string(),
                ),
                ("wind_speed_unit", "ms".to_string()),
                ("timezone", "UTC".to_string()),
                ("models", self.model.clone()),
                ("start_hour", start_hour),
                ("end_hour", end_hour),
            ])
            .send()
            .await
            .context("Failed to send request to weather API")?;

        if !response.status().is_success() {
            error!(farm = %farm.name, status = %response.status(), "weather API returned error status");
            anyhow::bail!("weather API error: {}", response.status());
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .context("Failed to parse weather response")?;
        let rows = Self::parse(body, from, to);
        info!(farm = %farm.name, rows = rows.len(), "fetched live weather");
        Ok(rows)
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: OpenMeteoHourly,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    #[serde(default)]
    wind_speed_100m: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_100m: Vec<Option<f64>>,
    #[serde(default)]
    wind_gusts_10m: Vec<Option<f64>>,
}

/// Feed used when no live weather endpoint is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLiveWeather;

#[async_trait]
impl WeatherFeed for NoLiveWeather {
    async fn latest(
        &self,
        _farm: &WindFarm,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WeatherSource {
    LiveForecast,
    HistoricalFallback,
}

/// Weather chosen for one farm in a signal run
#[derive(Debug, Clone)]
pub struct ResolvedWeather {
    pub source: WeatherSource,
    /// Live rows; empty on fallback
    pub live: Vec<Observation>,
    /// Why the live feed was not used
    pub fallback_reason: Option<String>,
}

impl ResolvedWeather {
    fn fallback(farm: &str, reason: String) -> Self {
        warn!(farm, %reason, "falling back to historical weather");
        Self {
            source: WeatherSource::HistoricalFallback,
            live: Vec::new(),
            fallback_reason: Some(reason),
        }
    }
}

/// Pick live weather for `farm` when it is fresh enough, else fall back.
pub async fn resolve_weather(
    feed: &dyn WeatherFeed,
    farm: &WindFarm,
    now: DateTime<Utc>,
    lookahead_hours: i64,
    max_staleness_hours: i64,
) -> ResolvedWeather {
    let oldest_fresh = now - TimeDelta::hours(max_staleness_hours);
    let until = now + TimeDelta::hours(lookahead_hours);

    match feed.latest(farm, oldest_fresh, until).await {
        Err(e) => ResolvedWeather::fallback(&farm.name, format!("live feed failed: {e:#}")),
        Ok(rows) => match rows.iter().map(|o| o.timestamp).max() {
            None => ResolvedWeather::fallback(&farm.name, "live feed returned no rows".to_string()),
            Some(newest) if newest < oldest_fresh => ResolvedWeather::fallback(
                &farm.name,
                format!("live feed is stale: newest row {newest}"),
            ),
            Some(_) => ResolvedWeather {
                source: WeatherSource::LiveForecast,
                live: rows,
                fallback_reason: None,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn farm() -> WindFarm {
        WindFarm::new("Walney").with_location(54.04, -3.52)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()
    }

    fn body() -> serde_json::Value {
        json!({
            "latitude": 54.0,
            "longitude": -3.5,
            "hourly": {
                "time": ["2024-02-01T09:00", "2024-02-01T10:00", "2024-02-01T11:00", "2024-02-01T12:00"],
                "wind_speed_100m": [9.1, 9.8, null, 11.0],
                "wind_direction_100m": [240.0, 245.0, 250.0, 255.0],
                "wind_gusts_10m": [12.0, 13.5, 14.0, 15.2]
            }
        })
    }

    async fn client(server: &MockServer) -> OpenMeteoClient {
        OpenMeteoClient::new(server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_live_rows_are_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("wind_speed_unit", "ms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .mount(&server)
            .await;

        let resolved = resolve_weather(&client(&server).await, &farm(), now(), 24, 6).await;
        assert_eq!(resolved.source, WeatherSource::LiveForecast);
        // null speed at 11:00 is dropped
        assert_eq!(resolved.live.len(), 3);
        assert_eq!(resolved.live[1].wind_speed, 9.8);
        assert!(resolved.live.iter().all(|o| o.generation_mw.is_none()));
    }

    #[tokio::test]
    async fn test_server_error_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolved = resolve_weather(&client(&server).await, &farm(), now(), 24, 6).await;
        assert_eq!(resolved.source, WeatherSource::HistoricalFallback);
        assert!(resolved.fallback_reason.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = OpenMeteoClient::new(server.uri(), Duration::from_millis(200)).unwrap();
        let resolved = resolve_weather(&client, &farm(), now(), 24, 6).await;
        assert_eq!(resolved.source, WeatherSource::HistoricalFallback);
    }

    #[tokio::test]
    async fn test_missing_location_and_empty_feed_fall_back() {
        let server = MockServer::start().await;
        let resolved =
            resolve_weather(&client(&server).await, &WindFarm::new("Nowhere"), now(), 24, 6).await;
        assert!(resolved.fallback_reason.unwrap().contains("no location"));

        let resolved = resolve_weather(&NoLiveWeather, &farm(), now(), 24, 6).await;
        assert_eq!(resolved.source, WeatherSource::HistoricalFallback);
    }

    struct StaleFeed;

    #[async_trait]
    impl WeatherFeed for StaleFeed {
        async fn latest(
            &self,
            _farm: &WindFarm,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Observation>> {
            Ok(vec![Observation::weather(now() - TimeDelta::hours(30), 8.0, 200.0, 10.0)])
        }
    }

    #[tokio::test]
    async fn test_stale_rows_fall_back() {
        let resolved = resolve_weather(&StaleFeed, &farm(), now(), 24, 6).await;
        assert_eq!(resolved.source, WeatherSource::HistoricalFallback);
        assert!(resolved.fallback_reason.unwrap().contains("stale"));
    }
}

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Panel tilt and orientation sent with every request, the provider's defaults
const SITE_TILT: f64 = 35.0;
const SITE_ORIENTATION: f64 = 180.0;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Record at {0} has neither power_kw nor power_gw")]
    MissingPower(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// What the collector asks the provider for, one per country
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRequest {
    pub name: String,
    pub capacity_gw: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// One forecast record as returned by the provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderRecord {
    pub timestamp: String,
    #[serde(default)]
    pub power_kw: Option<f64>,
    #[serde(default)]
    pub power_gw: Option<f64>,
}

/// A forecast source. [`QuartzClient`] talks to the real service; tests use stubs.
pub trait ForecastProvider {
    fn forecast(
        &self,
        site: &SiteRequest,
    ) -> impl Future<Output = Result<Vec<ProviderRecord>, ProviderError>> + Send;
}

#[derive(Debug, Serialize)]
struct ForecastRequest {
    site: SitePayload,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct SitePayload {
    latitude: f64,
    longitude: f64,
    capacity_kwp: f64,
    tilt: f64,
    orientation: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    predictions: Predictions,
}

/// The provider has served both row- and column-oriented predictions
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Predictions {
    Records(Vec<ProviderRecord>),
    /// field name -> (timestamp -> value)
    Columns(HashMap<String, BTreeMap<String, Option<f64>>>),
}

impl Predictions {
    fn into_records(self) -> Vec<ProviderRecord> {
        match self {
            Predictions::Records(records) => records,
            Predictions::Columns(columns) => {
                let mut rows: BTreeMap<String, ProviderRecord> = BTreeMap::new();
                for (field, values) in columns {
                    for (timestamp, value) in values {
                        let row = rows.entry(timestamp.clone()).or_insert(ProviderRecord {
                            timestamp,
                            power_kw: None,
                            power_gw: None,
                        });
                        match field.as_str() {
                            "power_kw" => row.power_kw = value,
                            "power_gw" => row.power_gw = value,
                            _ => {}
                        }
                    }
                }
                rows.into_values().collect()
            }
        }
    }
}

pub struct QuartzClient {
    client: Client,
    base_url: String,
}

impl QuartzClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into(),
        })
    }

    async fn fetch_and_parse(&self, body: &ForecastRequest) -> Result<Vec<ProviderRecord>, ProviderError> {
        let url = format!("{}/forecast/", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(serde_json::to_string(body)?)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::InvalidResponse(format!("{}: {}", status, text)));
        }

        parse_forecast_response(&text)
    }
}

impl ForecastProvider for QuartzClient {
    async fn forecast(&self, site: &SiteRequest) -> Result<Vec<ProviderRecord>, ProviderError> {
        // Capacity goes out unscaled in the kWp field, the returned power_kw is
        // therefore already on the GW scale.
        let body = ForecastRequest {
            site: SitePayload {
                latitude: site.latitude,
                longitude: site.longitude,
                capacity_kwp: site.capacity_gw,
                tilt: SITE_TILT,
                orientation: SITE_ORIENTATION,
            },
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        };

        debug!("Requesting forecast for {} ({:.2} GW)", site.name, site.capacity_gw);
        self.fetch_and_parse(&body).await
    }
}

pub(crate) fn parse_forecast_response(text: &str) -> Result<Vec<ProviderRecord>, ProviderError> {
    let response: ForecastResponse = serde_json::from_str(text)?;
    Ok(response.predictions.into_records())
}

/// Parse a provider timestamp into UTC. Naive timestamps are taken as UTC.
pub fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>, ProviderError> {
    let trimmed = timestamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let naive_input = trimmed.trim_end_matches('Z');
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive_input, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ProviderError::InvalidTimestamp(timestamp.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2025-06-01T12:00:00+02:00").unwrap();
        assert_eq!(ts.hour(), 10);

        let ts = parse_timestamp("2025-06-01 12:15:00").unwrap();
        assert_eq!(ts.day(), 1);
        assert_eq!(ts.minute(), 15);

        let ts = parse_timestamp("2025-06-01T12:00Z").unwrap();
        assert_eq!(ts.hour(), 12);

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_record_predictions() {
        let json = r#"{"timestamp":"2025-06-01T00:00:00Z","predictions":[
            {"timestamp":"2025-06-01T10:00:00Z","power_kw":1.5},
            {"timestamp":"2025-06-01T10:15:00Z","power_kw":1.75}
        ]}"#;

        let records = parse_forecast_response(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].power_kw, Some(1.75));
        assert_eq!(records[1].power_gw, None);
    }

    #[test]
    fn test_parse_column_predictions() {
        let json = r#"{"predictions":{"power_kw":{
            "2025-06-01 10:15:00":2.0,
            "2025-06-01 10:00:00":1.0
        }}}"#;

        let records = parse_forecast_response(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, "2025-06-01 10:00:00");
        assert_eq!(records[0].power_kw, Some(1.0));
    }

    #[test]
    fn test_parse_unexpected_shape() {
        assert!(parse_forecast_response(r#"{"detail":"Not Found"}"#).is_err());
    }
}

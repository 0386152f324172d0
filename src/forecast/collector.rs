use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::forecast::ForecastPoint;
use crate::quartz::{ForecastProvider, ProviderError, ProviderRecord, SiteRequest, parse_timestamp};
use crate::reference::capacity::CapacityTable;
use crate::reference::geo_index::GeoIndex;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);
/// Backoff stops doubling after this many attempts (32 s)
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Delay before retry number `attempt + 1`
pub fn backoff_delay(attempt: u32) -> Duration {
    RETRY_BACKOFF * 2u32.saturating_pow(attempt.min(MAX_BACKOFF_DOUBLINGS))
}

/// Why a country contributed no rows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    NoCapacity,
    NoCentroid,
    ZeroCapacity,
    EmptySeries,
    Provider(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoCapacity => write!(f, "no known capacity"),
            SkipReason::NoCentroid => write!(f, "no resolvable centroid"),
            SkipReason::ZeroCapacity => write!(f, "zero capacity"),
            SkipReason::EmptySeries => write!(f, "provider returned no data"),
            SkipReason::Provider(e) => write!(f, "provider error: {}", e),
        }
    }
}

/// Result of collecting one country
#[derive(Debug, Clone, PartialEq)]
pub enum CountryOutcome {
    Collected(Vec<ForecastPoint>),
    Skipped(SkipReason),
}

/// Everything one collection run produced, keyed by country code
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    pub series: BTreeMap<String, Vec<ForecastPoint>>,
    pub skipped: BTreeMap<String, SkipReason>,
}

impl CollectionReport {
    fn record(&mut self, code: String, outcome: CountryOutcome) {
        match outcome {
            CountryOutcome::Collected(points) => {
                self.series.insert(code, points);
            }
            CountryOutcome::Skipped(reason) => {
                self.skipped.insert(code, reason);
            }
        }
    }
}

pub struct ForecastCollector<'a, P> {
    provider: &'a P,
    concurrency: usize,
    timeout: Duration,
    retries: u32,
}

impl<'a, P: ForecastProvider + Sync> ForecastCollector<'a, P> {
    pub fn new(provider: &'a P, concurrency: usize, timeout: Duration, retries: u32) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
            timeout,
            retries,
        }
    }

    /// Fetch a forecast for every eligible country. Individual failures are
    /// recorded in the report and never abort the run.
    pub async fn collect<'c>(
        &self,
        countries: impl IntoIterator<Item = &'c str>,
        capacities: &CapacityTable,
        geo_index: &GeoIndex,
    ) -> CollectionReport {
        let mut report = CollectionReport::default();
        let mut requests = Vec::new();

        for code in countries {
            match plan_request(code, capacities, geo_index) {
                Ok(site) => requests.push((code.to_string(), site)),
                Err(reason) => {
                    debug!("Skipping {}: {}", code, reason);
                    report.record(code.to_string(), CountryOutcome::Skipped(reason));
                }
            }
        }

        info!("Requesting forecasts for {} countries", requests.len());

        let pending = requests
            .into_iter()
            .map(|(code, site)| self.collect_one(code, site));
        let outcomes: Vec<(String, CountryOutcome)> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (code, outcome) in outcomes {
            if let CountryOutcome::Skipped(reason) = &outcome {
                warn!("No forecast for {}: {}", code, reason);
            }
            report.record(code, outcome);
        }

        info!(
            "Collected {} country forecasts, skipped {}",
            report.series.len(),
            report.skipped.len()
        );
        report
    }

    async fn collect_one(&self, code: String, site: SiteRequest) -> (String, CountryOutcome) {
        let records = match self.fetch_with_retry(&site).await {
            Ok(records) => records,
            Err(e) => return (code, CountryOutcome::Skipped(SkipReason::Provider(e.to_string()))),
        };

        let outcome = match normalize_records(&code, site.capacity_gw, &records) {
            Ok(points) if points.is_empty() => CountryOutcome::Skipped(SkipReason::EmptySeries),
            Ok(points) => CountryOutcome::Collected(points),
            Err(e) => CountryOutcome::Skipped(SkipReason::Provider(e.to_string())),
        };
        (code, outcome)
    }

    async fn fetch_with_retry(&self, site: &SiteRequest) -> Result<Vec<ProviderRecord>, ProviderError> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, self.provider.forecast(site)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };

            match result {
                Ok(records) => return Ok(records),
                Err(e) if attempt < self.retries => {
                    let backoff = backoff_delay(attempt);
                    debug!("Forecast for {} failed ({}), retrying in {:?}", site.name, e, backoff);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decide whether a country can be queried, and with what
pub fn plan_request(
    code: &str,
    capacities: &CapacityTable,
    geo_index: &GeoIndex,
) -> Result<SiteRequest, SkipReason> {
    let entry = capacities.get(code).ok_or(SkipReason::NoCapacity)?;
    let capacity_gw = capacities.capacity(code).ok_or(SkipReason::NoCapacity)?;
    let centroid = geo_index.centroid(code).ok_or(SkipReason::NoCentroid)?;
    if capacity_gw == 0.0 {
        return Err(SkipReason::ZeroCapacity);
    }

    let name = entry
        .name
        .clone()
        .or_else(|| geo_index.get(code).and_then(|s| s.name.clone()))
        .unwrap_or_else(|| code.to_string());

    Ok(SiteRequest {
        name,
        capacity_gw,
        latitude: centroid.lat,
        longitude: centroid.lon,
    })
}

/// Turn provider records into a timestamp-sorted series of points.
///
/// The power field is chosen once per response: if any record carries
/// `power_kw`, that field is used for every record and `power_gw` is ignored.
/// `power_kw` is taken as-is as the GW value (capacity is sent unscaled).
/// Records without a value in the chosen field are dropped; if none has one
/// the response is rejected.
pub fn normalize_records(
    code: &str,
    capacity_gw: f64,
    records: &[ProviderRecord],
) -> Result<Vec<ForecastPoint>, ProviderError> {
    let use_kw = records.iter().any(|r| r.power_kw.is_some());
    let mut by_time: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    let mut missing_power = None;

    for record in records {
        let power = if use_kw { record.power_kw } else { record.power_gw };
        let Some(power_gw) = power.filter(|p| p.is_finite()) else {
            missing_power.get_or_insert_with(|| record.timestamp.clone());
            continue;
        };
        let timestamp = parse_timestamp(&record.timestamp)?;
        by_time.insert(timestamp, power_gw);
    }

    if by_time.is_empty() {
        if let Some(timestamp) = missing_power {
            return Err(ProviderError::MissingPower(timestamp));
        }
    }

    Ok(by_time
        .into_iter()
        .map(|(timestamp, power_gw)| ForecastPoint::new(code, timestamp, power_gw, capacity_gw))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reference::capacity::CapacityEntry;
    use crate::reference::geo_index::tests::{code_aliases, name_aliases, world_fixture};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    pub(crate) enum StubResponse {
        Records(Vec<ProviderRecord>),
        Fail,
        Hang,
    }

    /// Provider answering from a fixed table keyed by site name
    pub(crate) struct StubProvider {
        pub(crate) responses: HashMap<String, StubResponse>,
        pub(crate) calls: AtomicUsize,
    }

    impl StubProvider {
        pub(crate) fn new(responses: impl IntoIterator<Item = (&'static str, StubResponse)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(name, r)| (name.to_string(), r))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ForecastProvider for StubProvider {
        async fn forecast(&self, site: &SiteRequest) -> Result<Vec<ProviderRecord>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(&site.name) {
                Some(StubResponse::Records(records)) => Ok(records.clone()),
                Some(StubResponse::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
                Some(StubResponse::Fail) | None => {
                    Err(ProviderError::InvalidResponse("stub failure".to_string()))
                }
            }
        }
    }

    pub(crate) fn kw(timestamp: &str, power_kw: f64) -> ProviderRecord {
        ProviderRecord {
            timestamp: timestamp.to_string(),
            power_kw: Some(power_kw),
            power_gw: None,
        }
    }

    pub(crate) fn capacity(code: &str, name: &str, capacity_gw: f64) -> CapacityEntry {
        CapacityEntry {
            code: code.to_string(),
            name: Some(name.to_string()),
            capacity_gw: Some(capacity_gw),
        }
    }

    pub(crate) fn example_inputs() -> (CapacityTable, GeoIndex) {
        let capacities = CapacityTable::from_entries([
            capacity("USA", "United States", 100.0),
            capacity("DEU", "Germany", 50.0),
            capacity("SSD", "South Sudan", 0.0),
        ]);
        let geo = GeoIndex::from_geojson(world_fixture(), &code_aliases(), &name_aliases()).unwrap();
        (capacities, geo)
    }

    fn collector(provider: &StubProvider) -> ForecastCollector<'_, StubProvider> {
        ForecastCollector::new(provider, 4, Duration::from_secs(5), 0)
    }

    #[tokio::test]
    async fn test_collect_example() {
        let (capacities, geo) = example_inputs();
        let provider = StubProvider::new([
            ("United States", StubResponse::Records(vec![kw("2025-06-01T12:00:00Z", 10.0)])),
            ("Germany", StubResponse::Records(vec![kw("2025-06-01T12:00:00Z", 25.0)])),
        ]);

        let report = collector(&provider)
            .collect(["USA", "DEU", "SSD", "FRA"], &capacities, &geo)
            .await;

        assert_eq!(report.series.len(), 2);
        assert_eq!(report.series["USA"][0].power_percentage, Some(10.0));
        assert_eq!(report.series["DEU"][0].power_percentage, Some(50.0));
        assert_eq!(report.skipped["SSD"], SkipReason::ZeroCapacity);
        assert_eq!(report.skipped["FRA"], SkipReason::NoCapacity);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let (capacities, geo) = example_inputs();
        let provider = StubProvider::new([
            ("United States", StubResponse::Fail),
            ("Germany", StubResponse::Records(vec![kw("2025-06-01T12:00:00Z", 25.0)])),
        ]);

        let report = collector(&provider)
            .collect(["USA", "DEU"], &capacities, &geo)
            .await;

        assert!(report.series.contains_key("DEU"));
        assert!(matches!(report.skipped["USA"], SkipReason::Provider(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_a_skip() {
        let (capacities, geo) = example_inputs();
        let provider = StubProvider::new([
            ("United States", StubResponse::Hang),
            ("Germany", StubResponse::Records(vec![kw("2025-06-01T12:00:00Z", 25.0)])),
        ]);

        let report = ForecastCollector::new(&provider, 2, Duration::from_millis(50), 0)
            .collect(["USA", "DEU"], &capacities, &geo)
            .await;

        assert_eq!(report.series.len(), 1);
        assert!(matches!(&report.skipped["USA"], SkipReason::Provider(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_retry_until_exhausted() {
        let (capacities, geo) = example_inputs();
        let provider = StubProvider::new([("Germany", StubResponse::Fail)]);

        let report = ForecastCollector::new(&provider, 1, Duration::from_secs(1), 2)
            .collect(["DEU"], &capacities, &geo)
            .await;

        assert!(report.series.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_centroid_is_a_skip() {
        let capacities = CapacityTable::from_entries([capacity("ATA", "Antarctica", 1.0)]);
        let geo = GeoIndex::from_geojson(world_fixture(), &code_aliases(), &name_aliases()).unwrap();
        let provider = StubProvider::new([]);

        let report = collector(&provider).collect(["ATA"], &capacities, &geo).await;
        assert_eq!(report.skipped["ATA"], SkipReason::NoCentroid);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    fn gw(timestamp: &str, power_gw: f64) -> ProviderRecord {
        ProviderRecord {
            timestamp: timestamp.to_string(),
            power_kw: None,
            power_gw: Some(power_gw),
        }
    }

    #[test]
    fn test_normalize_sorts_by_timestamp() {
        let records = vec![
            kw("2025-06-01T14:00:00Z", 3.0),
            kw("2025-06-01T12:00:00Z", 1.0),
            kw("2025-06-01T13:00:00Z", 2.0),
        ];

        let points = normalize_records("DEU", 4.0, &records).unwrap();
        let powers: Vec<f64> = points.iter().map(|p| p.power_gw).collect();
        assert_eq!(powers, vec![1.0, 2.0, 3.0]);
        assert_eq!(points[2].power_percentage, Some(75.0));
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_normalize_kw_field_wins_for_whole_response() {
        let records = vec![
            kw("2025-06-01T13:00:00Z", 2.0),
            gw("2025-06-01T12:00:00Z", 1.0),
            ProviderRecord {
                timestamp: "2025-06-01T14:00:00Z".to_string(),
                power_kw: Some(3.0),
                power_gw: Some(3000.0),
            },
        ];

        let points = normalize_records("DEU", 4.0, &records).unwrap();
        let powers: Vec<f64> = points.iter().map(|p| p.power_gw).collect();
        assert_eq!(powers, vec![2.0, 3.0]);
    }

    #[test]
    fn test_normalize_gw_only_response() {
        let records = vec![gw("2025-06-01T12:00:00Z", 1.5)];
        let points = normalize_records("DEU", 3.0, &records).unwrap();
        assert_eq!(points[0].power_gw, 1.5);
        assert_eq!(points[0].power_percentage, Some(50.0));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(40), Duration::from_secs(32));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(32));
    }

    #[test]
    fn test_normalize_rejects_missing_power() {
        let records = vec![ProviderRecord {
            timestamp: "2025-06-01T12:00:00Z".to_string(),
            power_kw: None,
            power_gw: None,
        }];

        let err = normalize_records("DEU", 4.0, &records).unwrap_err();
        assert!(matches!(err, ProviderError::MissingPower(_)));
    }

    #[test]
    fn test_normalize_rejects_bad_timestamp() {
        let records = vec![kw("not a time", 1.0)];
        assert!(normalize_records("DEU", 4.0, &records).is_err());
    }
}

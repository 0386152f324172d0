use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::PipelineError;
use crate::forecast::ForecastPoint;
use crate::forecast::aggregate::{ForecastTable, GlobalSeries, StackedSeries};
use crate::forecast::collector::{CollectionReport, ForecastCollector, SkipReason};
use crate::forecast::map::{self, MapFrame, Selection};
use crate::forecast::time_select::{self, SliderRange, TimeSelection};
use crate::quartz::ForecastProvider;
use crate::reference::capacity::CapacityTable;
use crate::reference::geo_index::GeoIndex;

/// Result of one full pipeline run. Immutable; a refresh builds a new one.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub capacities: CapacityTable,
    pub geo_index: GeoIndex,
    pub table: ForecastTable,
    pub skipped: BTreeMap<String, SkipReason>,
    pub generated_at: DateTime<Utc>,
}

/// Everything the country page shows
#[derive(Debug, Clone, Serialize)]
pub struct CountryView {
    pub country_code: String,
    pub name: String,
    pub capacity_gw: Option<f64>,
    pub series: Vec<ForecastPoint>,
    pub skip_reason: Option<SkipReason>,
}

pub fn load_reference(config: &Config) -> Result<(CapacityTable, GeoIndex), PipelineError> {
    let capacities = CapacityTable::load(&config.capacity_path(), &config.capacity_aliases)?;
    let geo_index = GeoIndex::load(
        &config.boundary_path(),
        &config.iso_code_aliases,
        &config.name_aliases,
    )?;
    Ok((capacities, geo_index))
}

impl Snapshot {
    /// Load reference data, collect every country's forecast and aggregate.
    pub async fn build<P: ForecastProvider + Sync>(
        config: &Config,
        provider: &P,
    ) -> Result<Self, PipelineError> {
        let (capacities, geo_index) = load_reference(config)?;
        Ok(Self::collect(config, provider, capacities, geo_index).await)
    }

    pub async fn collect<P: ForecastProvider + Sync>(
        config: &Config,
        provider: &P,
        capacities: CapacityTable,
        geo_index: GeoIndex,
    ) -> Self {
        let report = {
            let countries: BTreeSet<&str> = capacities
                .entries()
                .map(|e| e.code.as_str())
                .chain(geo_index.shapes().iter().filter_map(|s| s.code.as_deref()))
                .collect();
            info!(
                "{} of {} candidate countries have a known capacity",
                capacities.capacities().len(),
                countries.len()
            );

            ForecastCollector::new(
                provider,
                config.concurrency,
                config.provider_timeout,
                config.provider_retries,
            )
            .collect(countries.iter().copied(), &capacities, &geo_index)
            .await
        };

        Self::from_report(capacities, geo_index, report, Utc::now())
    }

    pub fn from_report(
        capacities: CapacityTable,
        geo_index: GeoIndex,
        report: CollectionReport,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let table = ForecastTable::aggregate(report.series);
        info!(
            "Forecast table holds {} rows across {} timestamps",
            table.len(),
            table.timestamps().len()
        );
        Self {
            capacities,
            geo_index,
            table,
            skipped: report.skipped,
            generated_at,
        }
    }

    /// `EmptyDataset` when no country produced usable data
    pub fn require_data(&self) -> Result<(), PipelineError> {
        if self.table.is_empty() {
            Err(PipelineError::EmptyDataset)
        } else {
            Ok(())
        }
    }

    pub fn global_series(&self) -> GlobalSeries {
        self.table.global_series()
    }

    pub fn stacked_series(&self, top_n: usize) -> StackedSeries {
        self.table.stacked_series(top_n)
    }

    pub fn slider_range(&self, reference: DateTime<Utc>) -> Option<SliderRange> {
        time_select::slider_range(&self.table.timestamps(), reference)
    }

    pub fn select_time(
        &self,
        reference: DateTime<Utc>,
        requested_hours: f64,
    ) -> Result<TimeSelection, PipelineError> {
        time_select::nearest(&self.table.timestamps(), reference, requested_hours)
    }

    /// Map data for the forecast instant closest to `requested_hours` ahead
    pub fn map_frame(
        &self,
        reference: DateTime<Utc>,
        requested_hours: f64,
        normalized: bool,
    ) -> Result<(TimeSelection, MapFrame), PipelineError> {
        let selection = self.select_time(reference, requested_hours)?;
        let frame = map::project(&self.geo_index, &self.table, selection.timestamp, normalized);
        Ok((selection, frame))
    }

    pub fn selection_for_code(&self, code: &str) -> Selection {
        if self.capacities.contains(code) {
            Selection::Country(code.to_string())
        } else {
            Selection::NoForecast(code.to_string())
        }
    }

    /// Data for the country page. Only a [`Selection::Country`] has one.
    pub fn country_view(&self, selection: &Selection) -> Option<CountryView> {
        let Selection::Country(code) = selection else {
            return None;
        };
        let entry = self.capacities.get(code)?;
        let name = entry
            .name
            .clone()
            .or_else(|| self.geo_index.get(code).and_then(|s| s.name.clone()))
            .unwrap_or_else(|| code.clone());

        Some(CountryView {
            country_code: code.clone(),
            name,
            capacity_gw: entry.capacity_gw,
            series: self.table.country_series(code),
            skip_reason: self.skipped.get(code).cloned(),
        })
    }
}

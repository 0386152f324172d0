use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::forecast::ForecastPoint;

pub const OTHER_LABEL: &str = "Other";

/// All forecast rows of a session, across countries
#[derive(Debug, Clone, Default)]
pub struct ForecastTable {
    rows: Vec<ForecastPoint>,
}

impl ForecastTable {
    /// Concatenate per-country series, tagging every row with its country code.
    /// An empty input gives an empty table.
    pub fn aggregate(per_country: BTreeMap<String, Vec<ForecastPoint>>) -> Self {
        let rows = per_country
            .into_iter()
            .flat_map(|(code, series)| {
                series.into_iter().map(move |mut point| {
                    point.country_code = code.clone();
                    point
                })
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of countries with at least one row
    pub fn country_count(&self) -> usize {
        self.rows
            .iter()
            .map(|p| p.country_code.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Distinct timestamps, ascending
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.rows
            .iter()
            .map(|p| p.timestamp)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows at exactly `timestamp`, keyed by country code
    pub fn at(&self, timestamp: DateTime<Utc>) -> HashMap<&str, &ForecastPoint> {
        self.rows
            .iter()
            .filter(|p| p.timestamp == timestamp)
            .map(|p| (p.country_code.as_str(), p))
            .collect()
    }

    /// One country's series, ascending by timestamp
    pub fn country_series(&self, code: &str) -> Vec<ForecastPoint> {
        let mut series: Vec<ForecastPoint> = self
            .rows
            .iter()
            .filter(|p| p.country_code == code)
            .cloned()
            .collect();
        series.sort_by_key(|p| p.timestamp);
        series
    }

    /// Total power per timestamp
    pub fn global_series(&self) -> GlobalSeries {
        let mut totals: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for point in &self.rows {
            *totals.entry(point.timestamp).or_insert(0.0) += point.power_gw;
        }
        GlobalSeries {
            points: totals
                .into_iter()
                .map(|(timestamp, power_gw)| GlobalPoint { timestamp, power_gw })
                .collect(),
        }
    }

    /// Timestamp x country grid of the `top_n` largest contributors plus an
    /// "Other" column holding the rest. Missing cells are 0.
    pub fn stacked_series(&self, top_n: usize) -> StackedSeries {
        let timestamps = self.timestamps();
        let slot: HashMap<DateTime<Utc>, usize> = timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| (*ts, i))
            .collect();

        let mut grid: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for point in &self.rows {
            let values = grid
                .entry(point.country_code.as_str())
                .or_insert_with(|| vec![0.0; timestamps.len()]);
            values[slot[&point.timestamp]] += point.power_gw;
        }

        let mut ranked: Vec<(&str, f64)> = grid
            .iter()
            .map(|(code, values)| (*code, values.iter().sum::<f64>()))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let mut other = vec![0.0; timestamps.len()];
        let mut columns = Vec::with_capacity(top_n.min(ranked.len()) + 1);
        for (rank, (code, _)) in ranked.into_iter().enumerate() {
            let values = grid.remove(code).unwrap_or_default();
            if rank < top_n {
                columns.push(StackedColumn {
                    label: code.to_string(),
                    values,
                });
            } else {
                for (acc, value) in other.iter_mut().zip(values) {
                    *acc += value;
                }
            }
        }
        columns.push(StackedColumn {
            label: OTHER_LABEL.to_string(),
            values: other,
        });

        StackedSeries { timestamps, columns }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GlobalPoint {
    pub timestamp: DateTime<Utc>,
    pub power_gw: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalSeries {
    pub points: Vec<GlobalPoint>,
}

impl GlobalSeries {
    pub fn get(&self, timestamp: DateTime<Utc>) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.timestamp == timestamp)
            .map(|p| p.power_gw)
    }

    pub fn peak(&self) -> Option<GlobalPoint> {
        self.points.iter().copied().max_by(|a, b| {
            a.power_gw
                .partial_cmp(&b.power_gw)
                .unwrap_or(Ordering::Equal)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackedColumn {
    pub label: String,
    /// One value per entry of [`StackedSeries::timestamps`]
    pub values: Vec<f64>,
}

impl StackedColumn {
    pub fn is_all_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }
}

/// Rectangular grid: every column has one value per timestamp
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StackedSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub columns: Vec<StackedColumn>,
}

impl StackedSeries {
    /// Columns worth drawing (all-zero ones are dropped)
    pub fn visible_columns(&self) -> impl Iterator<Item = &StackedColumn> {
        self.columns.iter().filter(|c| !c.is_all_zero())
    }
}

#[cfg(test)]
impl StackedSeries {
    pub fn column(&self, label: &str) -> Option<&StackedColumn> {
        self.columns.iter().find(|c| c.label == label)
    }

    pub fn total_at(&self, index: usize) -> f64 {
        self.columns.iter().filter_map(|c| c.values.get(index)).sum()
    }
}

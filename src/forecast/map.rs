use chrono::{DateTime, Utc};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection};
use serde::Serialize;
use serde_json::json;

use crate::forecast::aggregate::ForecastTable;
use crate::reference::capacity::CapacityTable;
use crate::reference::geo_index::GeoIndex;

/// One boundary feature with the forecast values at the selected timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapRow {
    /// Position in the boundary source, stable across projections
    pub index: usize,
    pub country_code: Option<String>,
    pub name: String,
    /// `None` means no forecast, which is not the same as zero
    pub power_gw: Option<f64>,
    pub power_percentage: Option<f64>,
}

/// Choropleth data for a single timestamp
#[derive(Debug, Clone)]
pub struct MapFrame {
    pub timestamp: DateTime<Utc>,
    pub normalized: bool,
    pub rows: Vec<MapRow>,
    geometries: Vec<Option<geojson::Geometry>>,
}

/// Outcome of picking a point on the map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "country_code", rename_all = "snake_case")]
pub enum Selection {
    /// A country with a capacity entry, ready for the country view
    Country(String),
    /// A known polygon without forecast data
    NoForecast(String),
}

/// Left-join every boundary feature with the rows of `table` at `timestamp`
pub fn project(
    geo_index: &GeoIndex,
    table: &ForecastTable,
    timestamp: DateTime<Utc>,
    normalized: bool,
) -> MapFrame {
    let at_time = table.at(timestamp);

    let (rows, geometries) = geo_index
        .shapes()
        .iter()
        .enumerate()
        .map(|(index, shape)| {
            let point = shape
                .code
                .as_deref()
                .and_then(|code| at_time.get(code));
            let row = MapRow {
                index,
                country_code: shape.code.clone(),
                name: shape.display_name().to_string(),
                power_gw: point.map(|p| p.power_gw),
                power_percentage: point.and_then(|p| p.power_percentage),
            };
            (row, shape.geometry.clone())
        })
        .unzip();

    MapFrame {
        timestamp,
        normalized,
        rows,
        geometries,
    }
}

impl MapFrame {
    pub fn unit(&self) -> &'static str {
        if self.normalized { "%" } else { "GW" }
    }

    pub fn colorbar_title(&self) -> String {
        format!("Power [{}]", self.unit())
    }

    /// The value used for colouring
    pub fn value(&self, row: &MapRow) -> Option<f64> {
        if self.normalized {
            row.power_percentage
        } else {
            row.power_gw
        }
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.rows.iter().map(|row| self.value(row)).collect()
    }

    /// Map a picked row index back to a country
    pub fn select(&self, index: usize, capacities: &CapacityTable) -> Option<Selection> {
        let code = self.rows.get(index)?.country_code.clone()?;
        if capacities.contains(&code) {
            Some(Selection::Country(code))
        } else {
            Some(Selection::NoForecast(code))
        }
    }

    /// GeoJSON with the row index as feature id and the values as properties
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .rows
            .iter()
            .zip(&self.geometries)
            .map(|(row, geometry)| {
                let properties = json!({
                    "country_code": row.country_code,
                    "name": row.name,
                    "power_gw": row.power_gw,
                    "power_percentage": row.power_percentage,
                });
                Feature {
                    bbox: None,
                    geometry: geometry.clone(),
                    id: Some(Id::Number(serde_json::Number::from(row.index as u64))),
                    properties: properties.as_object().cloned(),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

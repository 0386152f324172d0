use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use geo::Centroid;
use geojson::{Feature, GeoJson};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::reference::{normalize_code, resolve_alias};

/// Boundary files still carrying superseded codes, mapped to the current ones
static CODE_CORRECTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // South Sudan (legacy Natural Earth code)
        ("SDS", "SSD"),
    ])
});

pub fn correct_code(code: String) -> String {
    match CODE_CORRECTIONS.get(code.as_str()) {
        Some(fixed) => fixed.to_string(),
        None => code,
    }
}

/// Representative point of a country, in degrees (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One feature of the boundary source
#[derive(Debug, Clone)]
pub struct CountryShape {
    pub code: Option<String>,
    pub name: Option<String>,
    pub geometry: Option<geojson::Geometry>,
    pub centroid: Option<GeoPoint>,
}

impl CountryShape {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or("Unknown")
    }
}

/// Country boundaries in source order, plus a lookup by alpha-3 code
#[derive(Debug, Clone, Default)]
pub struct GeoIndex {
    shapes: Vec<CountryShape>,
    by_code: HashMap<String, usize>,
}

impl GeoIndex {
    pub fn load(
        path: &Path,
        code_aliases: &[String],
        name_aliases: &[String],
    ) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| PipelineError::data_load(path, e))?;
        let geojson: GeoJson = raw
            .parse()
            .map_err(|e: geojson::Error| PipelineError::data_load(path, e))?;

        let index = Self::from_geojson(geojson, code_aliases, name_aliases).map_err(|e| match e {
            PipelineError::DataLoad { reason, .. } => PipelineError::data_load(path, reason),
            PipelineError::Schema {
                aliases, available, ..
            } => PipelineError::Schema {
                source_name: path.display().to_string(),
                aliases,
                available,
            },
            other => other,
        })?;

        info!(
            "Loaded {} boundary features ({} countries) from {}",
            index.shapes.len(),
            index.by_code.len(),
            path.display()
        );
        Ok(index)
    }

    pub fn from_geojson(
        geojson: GeoJson,
        code_aliases: &[String],
        name_aliases: &[String],
    ) -> Result<Self, PipelineError> {
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(PipelineError::data_load(
                "<geojson>",
                "expected a FeatureCollection",
            ));
        };

        let columns: Vec<String> = collection
            .features
            .iter()
            .filter_map(|f| f.properties.as_ref())
            .flat_map(|props| props.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let code_column = resolve_alias(code_aliases, &columns).ok_or_else(|| {
            PipelineError::Schema {
                source_name: "<geojson>".to_string(),
                aliases: code_aliases.to_vec(),
                available: columns.clone(),
            }
        })?;
        let name_column = resolve_alias(name_aliases, &columns);

        let shapes: Vec<CountryShape> = collection
            .features
            .into_iter()
            .map(|feature| shape_from_feature(feature, code_column, name_column))
            .collect();

        let mut by_code = HashMap::new();
        for (idx, shape) in shapes.iter().enumerate() {
            if let Some(code) = &shape.code {
                by_code.entry(code.clone()).or_insert(idx);
            }
        }

        Ok(Self { shapes, by_code })
    }

    /// All features in source order
    pub fn shapes(&self) -> &[CountryShape] {
        &self.shapes
    }

    pub fn get(&self, code: &str) -> Option<&CountryShape> {
        self.by_code.get(code).map(|&idx| &self.shapes[idx])
    }

    pub fn centroid(&self, code: &str) -> Option<GeoPoint> {
        self.get(code).and_then(|shape| shape.centroid)
    }
}

#[cfg(test)]
impl GeoIndex {
    pub fn len(&self) -> usize {
        self.shapes.len()
    }
}

fn shape_from_feature(feature: Feature, code_column: &str, name_column: Option<&str>) -> CountryShape {
    let code = feature
        .property(code_column)
        .and_then(|v| v.as_str())
        .and_then(normalize_code)
        .map(correct_code);
    let name = name_column
        .and_then(|col| feature.property(col))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let centroid = feature.geometry.as_ref().and_then(|geometry| {
        match geo::Geometry::<f64>::try_from(geometry.value.clone()) {
            Ok(geom) => geom.centroid().map(|p| GeoPoint {
                lat: p.y(),
                lon: p.x(),
            }),
            Err(e) => {
                debug!("Skipping centroid for {:?}: {}", code, e);
                None
            }
        }
    });

    CountryShape {
        code,
        name,
        geometry: feature.geometry,
        centroid,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn code_aliases() -> Vec<String> {
        ["adm0_a3", "ADM0_A3", "iso_a3", "ISO_A3", "sov_a3", "gu_a3"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub(crate) fn name_aliases() -> Vec<String> {
        vec!["name".to_string(), "ADMIN".to_string()]
    }

    fn square(code_key: &str, code: &str, name: &str, x0: f64, y0: f64) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{"{code_key}":"{code}","ADMIN":"{name}"}},
            "geometry":{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}}}"#,
            x1 = x0 + 2.0,
            y1 = y0 + 2.0,
        )
    }

    /// Three squares (USA, DEU, SDS) and one feature without geometry (ATA)
    pub(crate) fn world_fixture() -> GeoJson {
        let features = [
            square("ISO_A3", "USA", "United States", -100.0, 40.0),
            square("ISO_A3", "DEU", "Germany", 10.0, 50.0),
            square("ISO_A3", "SDS", "South Sudan", 30.0, 6.0),
            r#"{"type":"Feature","properties":{"ISO_A3":"ATA","ADMIN":"Antarctica"},"geometry":null}"#
                .to_string(),
        ];
        format!(
            r#"{{"type":"FeatureCollection","features":[{}]}}"#,
            features.join(",")
        )
        .parse()
        .unwrap()
    }

    #[test]
    fn test_centroid_and_alias() {
        let index = GeoIndex::from_geojson(world_fixture(), &code_aliases(), &name_aliases()).unwrap();

        assert_eq!(index.len(), 4);
        let usa = index.centroid("USA").unwrap();
        assert!((usa.lon - -99.0).abs() < 1e-9);
        assert!((usa.lat - 41.0).abs() < 1e-9);
        assert_eq!(index.get("DEU").unwrap().display_name(), "Germany");
    }

    #[test]
    fn test_code_correction() {
        let index = GeoIndex::from_geojson(world_fixture(), &code_aliases(), &name_aliases()).unwrap();
        assert!(index.get("SDS").is_none());
        assert!(index.centroid("SSD").is_some());
    }

    #[test]
    fn test_missing_geometry_has_no_centroid() {
        let index = GeoIndex::from_geojson(world_fixture(), &code_aliases(), &name_aliases()).unwrap();
        assert!(index.get("ATA").is_some());
        assert!(index.centroid("ATA").is_none());
        assert!(index.centroid("FRA").is_none());
    }

    #[test]
    fn test_schema_error_without_code_column() {
        let geojson: GeoJson = format!(
            r#"{{"type":"FeatureCollection","features":[{}]}}"#,
            square("country", "USA", "United States", 0.0, 0.0)
        )
        .parse()
        .unwrap();

        let err = GeoIndex::from_geojson(geojson, &code_aliases(), &name_aliases()).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = GeoIndex::load(
            Path::new("/nonexistent/countries.geojson"),
            &code_aliases(),
            &name_aliases(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DataLoad { .. }));
    }
}

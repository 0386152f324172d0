use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::reference::{normalize_code, resolve_alias};

const NAME_COLUMN: &str = "country_name";

/// One row of the capacity reference table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityEntry {
    pub code: String,
    pub name: Option<String>,
    /// Installed solar capacity in GW, `None` when the source has no usable value
    pub capacity_gw: Option<f64>,
}

impl CapacityEntry {
    /// "CODE - Name" label used by listings
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} - {}", self.code, name),
            None => self.code.clone(),
        }
    }
}

/// Installed capacity per country, keyed by alpha-3 code
#[derive(Debug, Clone, Default)]
pub struct CapacityTable {
    entries: BTreeMap<String, CapacityEntry>,
}

impl CapacityTable {
    pub fn load(path: &Path, capacity_aliases: &[String]) -> Result<Self, PipelineError> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::data_load(path, e))?;
        let table = Self::from_reader(file, capacity_aliases)
            .map_err(|reason| PipelineError::data_load(path, reason))?;
        info!(
            "Loaded {} capacity entries from {} ({:.2} GW total)",
            table.entries.len(),
            path.display(),
            table.total()
        );
        Ok(table)
    }

    /// Parse a capacity CSV. The first column holds the country code.
    pub fn from_reader<R: Read>(reader: R, capacity_aliases: &[String]) -> Result<Self, String> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let capacity_column = resolve_alias(capacity_aliases, &headers).ok_or_else(|| {
            format!(
                "no capacity column among {:?} (columns: {:?})",
                capacity_aliases, headers
            )
        })?;
        let capacity_idx = headers.iter().position(|h| h == capacity_column);
        let name_idx = headers.iter().position(|h| h == NAME_COLUMN);

        let mut entries = BTreeMap::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| e.to_string())?;

            let Some(code) = record.get(0).and_then(normalize_code) else {
                debug!("Dropping capacity row {} without a country code", line + 1);
                continue;
            };

            let capacity_gw = capacity_idx
                .and_then(|idx| record.get(idx))
                .and_then(|raw| parse_capacity(&code, raw));
            let name = name_idx
                .and_then(|idx| record.get(idx))
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);

            entries.insert(
                code.clone(),
                CapacityEntry {
                    code,
                    name,
                    capacity_gw,
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn get(&self, code: &str) -> Option<&CapacityEntry> {
        self.entries.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn capacity(&self, code: &str) -> Option<f64> {
        self.entries.get(code).and_then(|e| e.capacity_gw)
    }

    /// code -> capacity for every country with a known capacity
    pub fn capacities(&self) -> BTreeMap<String, f64> {
        self.entries
            .values()
            .filter_map(|e| e.capacity_gw.map(|c| (e.code.clone(), c)))
            .collect()
    }

    /// Entries ordered by country code
    pub fn entries(&self) -> impl Iterator<Item = &CapacityEntry> {
        self.entries.values()
    }

    /// Global installed capacity in GW
    pub fn total(&self) -> f64 {
        self.entries.values().filter_map(|e| e.capacity_gw).sum()
    }
}

#[cfg(test)]
impl CapacityTable {
    pub fn from_entries(entries: impl IntoIterator<Item = CapacityEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.code.clone(), e)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn parse_capacity(code: &str, raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Some(value),
        _ => {
            warn!("Ignoring invalid capacity {:?} for {}", raw, code);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn aliases() -> Vec<String> {
        vec!["capacity_gw".to_string(), "capacity".to_string()]
    }

    const CSV: &str = "country_code,capacity_gw,country_name
USA,100.5,United States
deu,50,Germany
,3.0,Nowhere
ZZZ,0,Zeroland
FRA,,France
";

    #[test]
    fn test_parse_capacity_csv() {
        let table = CapacityTable::from_reader(CSV.as_bytes(), &aliases()).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.capacity("USA"), Some(100.5));
        assert_eq!(table.capacity("DEU"), Some(50.0));
        assert_eq!(table.capacity("ZZZ"), Some(0.0));
        assert_eq!(table.capacity("FRA"), None);
        assert!(table.contains("FRA"));
        assert_eq!(table.get("DEU").unwrap().label(), "DEU - Germany");
    }

    #[test]
    fn test_total_ignores_missing() {
        let table = CapacityTable::from_reader(CSV.as_bytes(), &aliases()).unwrap();
        assert!((table.total() - 150.5).abs() < 1e-9);
        assert_eq!(table.capacities().len(), 3);
    }

    #[test]
    fn test_capacity_alias() {
        let csv = "code,capacity\nJPN,90\n";
        let table = CapacityTable::from_reader(csv.as_bytes(), &aliases()).unwrap();
        assert_eq!(table.capacity("JPN"), Some(90.0));
        assert_eq!(table.get("JPN").unwrap().label(), "JPN");
    }

    #[test]
    fn test_negative_capacity_is_absent() {
        let csv = "code,capacity_gw\nESP,-4\n";
        let table = CapacityTable::from_reader(csv.as_bytes(), &aliases()).unwrap();
        assert_eq!(table.capacity("ESP"), None);
    }

    #[test]
    fn test_missing_capacity_column() {
        let csv = "code,power\nUSA,1\n";
        assert!(CapacityTable::from_reader(csv.as_bytes(), &aliases()).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();

        let table = CapacityTable::load(file.path(), &aliases()).unwrap();
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CapacityTable::load(Path::new("/nonexistent/capacities.csv"), &aliases())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DataLoad { .. }));
    }
}

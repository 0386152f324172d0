use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_PROVIDER_URL: &str = "https://open.quartz.solar";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3044";

/// Accepted names of the ISO alpha-3 column in the boundary file, in priority order.
const ISO_CODE_ALIASES: [&str; 6] = ["adm0_a3", "ADM0_A3", "iso_a3", "ISO_A3", "sov_a3", "gu_a3"];
const NAME_ALIASES: [&str; 5] = ["name", "NAME", "ADMIN", "admin", "country_name"];
const CAPACITY_ALIASES: [&str; 2] = ["capacity_gw", "capacity"];

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub capacity_file: String,
    pub boundary_file: String,
    pub provider_url: String,
    pub top_n: usize,
    pub concurrency: usize,
    pub provider_timeout: Duration,
    pub provider_retries: u32,
    pub bind_addr: String,
    pub iso_code_aliases: Vec<String>,
    pub name_aliases: Vec<String>,
    pub capacity_aliases: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            capacity_file: "solar_capacities.csv".to_string(),
            boundary_file: "countries.geojson".to_string(),
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            top_n: 10,
            concurrency: 8,
            provider_timeout: Duration::from_secs(30),
            provider_retries: 1,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            iso_code_aliases: ISO_CODE_ALIASES.iter().map(|s| s.to_string()).collect(),
            name_aliases: NAME_ALIASES.iter().map(|s| s.to_string()).collect(),
            capacity_aliases: CAPACITY_ALIASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Build the configuration from `SOLAR_*` / `QUARTZ_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup("SOLAR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("SOLAR_CAPACITY_FILE") {
            config.capacity_file = file;
        }
        if let Some(file) = lookup("SOLAR_BOUNDARY_FILE") {
            config.boundary_file = file;
        }
        if let Some(url) = lookup("QUARTZ_API_URL") {
            config.provider_url = url.trim_end_matches('/').to_string();
        }
        if let Some(addr) = lookup("SOLAR_BIND_ADDR") {
            config.bind_addr = addr;
        }

        config.top_n = parse_var(&lookup, "SOLAR_TOP_N", config.top_n)?;
        config.concurrency = parse_var(&lookup, "SOLAR_CONCURRENCY", config.concurrency)?.max(1);
        config.provider_retries =
            parse_var(&lookup, "SOLAR_PROVIDER_RETRIES", config.provider_retries)?;
        let timeout_secs = parse_var(
            &lookup,
            "SOLAR_PROVIDER_TIMEOUT_SECS",
            config.provider_timeout.as_secs(),
        )?;
        config.provider_timeout = Duration::from_secs(timeout_secs);

        Ok(config)
    }

    pub fn capacity_path(&self) -> PathBuf {
        self.data_dir.join(&self.capacity_file)
    }

    pub fn boundary_path(&self) -> PathBuf {
        self.data_dir.join(&self.boundary_file)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

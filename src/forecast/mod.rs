pub(crate) mod aggregate;
pub(crate) mod collector;
pub(crate) mod map;
pub(crate) mod time_select;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single forecast value for one country at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub country_code: String,
    pub timestamp: DateTime<Utc>,
    pub power_gw: f64,
    /// Share of installed capacity, `None` when the capacity is zero
    pub power_percentage: Option<f64>,
}

impl ForecastPoint {
    pub fn new(country_code: &str, timestamp: DateTime<Utc>, power_gw: f64, capacity_gw: f64) -> Self {
        Self {
            country_code: country_code.to_string(),
            timestamp,
            power_gw,
            power_percentage: percentage_of_capacity(power_gw, capacity_gw),
        }
    }
}

pub fn percentage_of_capacity(power_gw: f64, capacity_gw: f64) -> Option<f64> {
    if capacity_gw > 0.0 {
        Some(power_gw / capacity_gw * 100.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_of_capacity() {
        assert_eq!(percentage_of_capacity(10.0, 100.0), Some(10.0));
        assert_eq!(percentage_of_capacity(25.0, 50.0), Some(50.0));
        assert_eq!(percentage_of_capacity(1.0, 0.0), None);
    }
}

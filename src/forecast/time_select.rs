use std::cmp::Ordering;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;

use crate::error::PipelineError;

/// Slider granularity in hours
pub const SLIDER_STEP_HOURS: f64 = 0.25;

/// The forecast instant picked for a requested horizon
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSelection {
    pub timestamp: DateTime<Utc>,
    /// Offset of `timestamp` from the reference time, in hours
    pub offset_hours: f64,
}

impl TimeSelection {
    pub fn label(&self) -> String {
        format_time_label(self.offset_hours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliderRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Current instant truncated to the hour
pub fn floor_to_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::hours(1)).unwrap_or(now)
}

pub fn offset_hours(timestamp: DateTime<Utc>, reference: DateTime<Utc>) -> f64 {
    (timestamp - reference).num_milliseconds() as f64 / 3_600_000.0
}

/// Pick the available timestamp whose offset from `reference` is closest to
/// `requested_hours`. Ties go to the earliest timestamp.
pub fn nearest(
    available: &[DateTime<Utc>],
    reference: DateTime<Utc>,
    requested_hours: f64,
) -> Result<TimeSelection, PipelineError> {
    let requested = if requested_hours.is_finite() { requested_hours } else { 0.0 };

    let mut sorted = available.to_vec();
    sorted.sort();

    let mut best: Option<(TimeSelection, f64)> = None;
    for timestamp in sorted {
        let offset = offset_hours(timestamp, reference);
        let distance = (offset - requested).abs();
        let closer = match &best {
            Some((_, best_distance)) => {
                distance.partial_cmp(best_distance) == Some(Ordering::Less)
            }
            None => true,
        };
        if closer {
            best = Some((
                TimeSelection {
                    timestamp,
                    offset_hours: offset,
                },
                distance,
            ));
        }
    }

    best.map(|(selection, _)| selection)
        .ok_or(PipelineError::EmptyDataset)
}

/// Slider bounds for the available horizon, `None` without data
pub fn slider_range(available: &[DateTime<Utc>], reference: DateTime<Utc>) -> Option<SliderRange> {
    let max = available
        .iter()
        .map(|ts| offset_hours(*ts, reference))
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))?;
    Some(SliderRange {
        min: 0.0,
        max: max.max(0.0),
        step: SLIDER_STEP_HOURS,
    })
}

/// "Now", "+N hours" or "+N day(s)", truncating toward zero
pub fn format_time_label(hours: f64) -> String {
    if hours <= 0.0 {
        "Now".to_string()
    } else if hours < 24.0 {
        format!("+{} hours", hours.trunc() as i64)
    } else {
        format!("+{} day(s)", (hours / 24.0).trunc() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_floor_to_hour() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 47, 13).unwrap();
        assert_eq!(floor_to_hour(now), t0());
    }

    #[test]
    fn test_nearest_tie_goes_to_earliest() {
        let available = [t0() + Duration::hours(3), t0(), t0() + Duration::hours(1)];
        let selection = nearest(&available, t0(), 2.0).unwrap();
        assert_eq!(selection.timestamp, t0() + Duration::hours(1));
        assert_eq!(selection.offset_hours, 1.0);
    }

    #[test]
    fn test_nearest_exact_match_and_idempotent() {
        let available = [t0(), t0() + Duration::minutes(15), t0() + Duration::minutes(30)];
        let first = nearest(&available, t0(), 0.25).unwrap();
        let second = nearest(&available, t0(), 0.25).unwrap();
        assert_eq!(first.timestamp, t0() + Duration::minutes(15));
        assert_eq!(first, second);
    }

    #[test]
    fn test_nearest_beyond_span() {
        let available = [t0(), t0() + Duration::hours(1)];
        let selection = nearest(&available, t0(), 48.0).unwrap();
        assert_eq!(selection.timestamp, t0() + Duration::hours(1));
    }

    #[test]
    fn test_nearest_empty() {
        let err = nearest(&[], t0(), 1.0).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDataset));
    }

    #[test]
    fn test_format_time_label() {
        assert_eq!(format_time_label(-0.5), "Now");
        assert_eq!(format_time_label(0.0), "Now");
        assert_eq!(format_time_label(0.75), "+0 hours");
        assert_eq!(format_time_label(5.9), "+5 hours");
        assert_eq!(format_time_label(24.0), "+1 day(s)");
        assert_eq!(format_time_label(47.9), "+1 day(s)");
    }

    #[test]
    fn test_slider_range() {
        let available = [t0() - Duration::hours(1), t0() + Duration::hours(36)];
        let range = slider_range(&available, t0()).unwrap();
        assert_eq!(range.min, 0.0);
        assert_eq!(range.max, 36.0);
        assert!(slider_range(&[], t0()).is_none());
    }
}

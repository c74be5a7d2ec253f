use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

pub const DEFAULT_WINDOW_DAYS: i64 = 180;
/// Longest accepted trailing window, one century.
pub const MAX_WINDOW_DAYS: i64 = 36_500;
pub const DEFAULT_ACTUAL_THRESHOLD: f64 = 85.0;
pub const DEFAULT_PREDICTED_THRESHOLD: f64 = 95.0;

/// Reported occupancy for actual records never exceeds capacity.
pub const MAX_ACTUAL_RATIO: f64 = 100.0;

pub const HOSPITAL_INDICATOR_PREFIX: &str = "hospital_";
pub const UNKNOWN_HOSPITAL: &str = "unknown";

const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Clone, PartialEq)]
pub struct AlertPolicy {
    pub window_days: i64,
    pub actual_threshold: f64,
    pub predicted_threshold: f64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            actual_threshold: DEFAULT_ACTUAL_THRESHOLD,
            predicted_threshold: DEFAULT_PREDICTED_THRESHOLD,
        }
    }
}

impl AlertPolicy {
    /// Oldest timestamp still eligible for alerting. The window is clamped to
    /// `1..=MAX_WINDOW_DAYS`, so the subtraction cannot overflow.
    pub fn cutoff(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() - Duration::days(self.window_days.clamp(1, MAX_WINDOW_DAYS))
    }
}

/// Rounds to two decimals, halves to even.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Percentage of `enabled` beds that are `occupied`, rounded to two decimals.
///
/// Returns `None` when capacity is not positive or either input is not finite, so
/// a zero-bed row can never produce an infinite ratio that trips a threshold.
pub fn occupancy_ratio(occupied: f64, enabled: f64) -> Option<f64> {
    if !occupied.is_finite() || !enabled.is_finite() || enabled <= 0.0 {
        return None;
    }
    Some(round2(occupied / enabled * 100.0))
}

pub fn actual_ratio(occupied: f64, enabled: f64) -> Option<f64> {
    occupancy_ratio(occupied, enabled).map(|ratio| ratio.min(MAX_ACTUAL_RATIO))
}

/// Resolves a one-hot hospital encoding to a single name.
///
/// Scans `(column, value)` pairs in the order given and returns the suffix of the
/// first `hospital_*` column whose value is 1. Falls back to [`UNKNOWN_HOSPITAL`].
pub fn hospital_from_indicators<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    fields
        .into_iter()
        .filter_map(|(column, value)| {
            column
                .strip_prefix(HOSPITAL_INDICATOR_PREFIX)
                .map(|name| (name, value))
        })
        .find(|(_, value)| is_set(value))
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| UNKNOWN_HOSPITAL.to_string())
}

/// Whether an indicator cell holds 1 (`1`, `1.0`, `TRUE`).
pub fn is_set(value: &str) -> bool {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        return true;
    }
    parse_number(value) == Some(1.0)
}

pub fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

/// Parses a record date. Date-only values resolve to midnight.
pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

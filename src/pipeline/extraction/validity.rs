//! Calendar validity checks for extracted dates.
//!
//! OCR frequently turns `2024.03.15` into `2024.03.45` or `2O24.03.15`. Such
//! mentions are still reported as blocks, but never normalized to a date.

use chrono::{Duration, NaiveDate};

/// Earliest year accepted as a plausible record date.
pub const MIN_PLAUSIBLE_YEAR: i32 = 1950;

/// Latest year accepted as a plausible record date.
pub const MAX_PLAUSIBLE_YEAR: i32 = 2100;

/// Build a date from components, rejecting impossible or implausible values.
pub fn normalize_ymd(
    year: i32,
    month: u32,
    day: u32,
    min_year: i32,
    max_year: i32,
) -> Option<NaiveDate> {
    if year < min_year || year > max_year {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// True when an ISO-shaped string names a day that does not exist
/// (`2025-03-45`, `2023-02-29`, `2024-13-01`) or cannot be read at all.
pub fn is_impossible_date(iso: &str) -> bool {
    let mut parts = iso.trim().splitn(3, '-');
    let parsed = (
        parts.next().and_then(|p| p.parse::<i32>().ok()),
        parts.next().and_then(|p| p.parse::<u32>().ok()),
        parts.next().and_then(|p| p.parse::<u32>().ok()),
    );
    match parsed {
        (Some(year), Some(month), Some(day)) => NaiveDate::from_ymd_opt(year, month, day).is_none(),
        _ => true,
    }
}

/// True when `date` lies more than `tolerance_days` after `reference`.
pub fn is_future_date(date: NaiveDate, reference: NaiveDate, tolerance_days: i64) -> bool {
    date > reference + Duration::days(tolerance_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_date_normalizes() {
        let d = normalize_ymd(2024, 3, 1, MIN_PLAUSIBLE_YEAR, MAX_PLAUSIBLE_YEAR);
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn implausible_year_rejected() {
        assert!(normalize_ymd(1890, 1, 1, MIN_PLAUSIBLE_YEAR, MAX_PLAUSIBLE_YEAR).is_none());
        assert!(normalize_ymd(2203, 1, 1, MIN_PLAUSIBLE_YEAR, MAX_PLAUSIBLE_YEAR).is_none());
    }

    #[test]
    fn impossible_day_rejected() {
        assert!(normalize_ymd(2025, 3, 45, MIN_PLAUSIBLE_YEAR, MAX_PLAUSIBLE_YEAR).is_none());
        assert!(normalize_ymd(2023, 2, 29, MIN_PLAUSIBLE_YEAR, MAX_PLAUSIBLE_YEAR).is_none());
        assert!(normalize_ymd(2024, 2, 29, MIN_PLAUSIBLE_YEAR, MAX_PLAUSIBLE_YEAR).is_some());
    }

    #[test]
    fn impossible_iso_strings() {
        assert!(is_impossible_date("2025-03-45"));
        assert!(is_impossible_date("2024-13-01"));
        assert!(is_impossible_date("2023-02-29"));
        assert!(is_impossible_date("2024-00-10"));
        assert!(is_impossible_date("garbage"));
        assert!(!is_impossible_date("2024-02-29"));
        assert!(!is_impossible_date("2000-02-29"));
        assert!(is_impossible_date("1900-02-29"));
        assert!(is_impossible_date("2024-04-31"));
        assert!(is_impossible_date("2024-03-1x"));
        assert!(!is_impossible_date(" 2024-12-31 "));
    }

    #[test]
    fn future_with_tolerance() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let soon = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        let later = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(!is_future_date(soon, today, 30));
        assert!(is_future_date(later, today, 30));
    }
}

//! Date coverage audit: compares the dates of a human-written reference
//! report with the dates the pipeline produced.
//!
//! Reference dates are read leniently (no calendar validation) so that a
//! date the pipeline rightly refused to normalize, such as `2025-03-45`,
//! still shows up as missing and can be flagged as impossible.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::extraction::validity::{is_future_date, is_impossible_date};

static AUDIT_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{4})\s*(?:-|\.|/|년)\s*([0-9]{1,2})\s*(?:-|\.|/|월)\s*([0-9]{1,2})").unwrap()
});

pub mod grade_thresholds {
    /// Coverage percentage at or above which the audit grades High.
    pub const HIGH: f32 = 80.0;
    /// Coverage percentage at or above which the audit grades Medium.
    pub const MEDIUM: f32 = 60.0;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditGrade {
    High,
    Medium,
    Low,
}

impl AuditGrade {
    pub fn from_coverage(coverage_pct: f32) -> Self {
        if coverage_pct >= grade_thresholds::HIGH {
            Self::High
        } else if coverage_pct >= grade_thresholds::MEDIUM {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for AuditGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingDate {
    pub date: String,
    /// The reference itself names a day that does not exist.
    pub impossible: bool,
    /// Later than the audit's reference day.
    pub future: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateAudit {
    pub matched: Vec<String>,
    pub missing: Vec<MissingDate>,
    pub extra: Vec<String>,
    /// matched / reference dates, in percent. A reference without dates is
    /// 100 only when nothing was produced either, 0 otherwise.
    pub coverage_pct: f32,
    /// matched / produced dates, in percent. 100 when nothing was produced.
    pub precision_pct: f32,
    pub grade: AuditGrade,
}

/// Zero-padded `YYYY-MM-DD` keys for every date-shaped mention, valid or not.
pub fn extract_audit_dates(text: &str) -> BTreeSet<String> {
    AUDIT_DATE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let year: u32 = caps.get(1)?.as_str().parse().ok()?;
            let month: u32 = caps.get(2)?.as_str().parse().ok()?;
            let day: u32 = caps.get(3)?.as_str().parse().ok()?;
            Some(format!("{year:04}-{month:02}-{day:02}"))
        })
        .collect()
}

/// Audit `produced` ISO dates against the dates found in `reference_text`.
/// `reference_day` is the "today" used for future flags; without it no
/// missing date is flagged as future.
pub fn audit_dates<'a, I>(reference_text: &str, produced: I, reference_day: Option<NaiveDate>) -> DateAudit
where
    I: IntoIterator<Item = &'a str>,
{
    let expected = extract_audit_dates(reference_text);
    let produced: BTreeSet<String> = produced.into_iter().map(|d| d.trim().to_string()).collect();

    let matched: Vec<String> = expected.intersection(&produced).cloned().collect();
    let extra: Vec<String> = produced.difference(&expected).cloned().collect();
    let missing: Vec<MissingDate> = expected
        .difference(&produced)
        .map(|date| {
            let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok();
            MissingDate {
                date: date.clone(),
                impossible: is_impossible_date(date),
                future: match (parsed, reference_day) {
                    (Some(d), Some(today)) => is_future_date(d, today, 0),
                    _ => false,
                },
            }
        })
        .collect();

    let coverage_pct = if expected.is_empty() && !produced.is_empty() {
        0.0
    } else {
        percent(matched.len(), expected.len())
    };
    let precision_pct = percent(matched.len(), produced.len());
    let grade = AuditGrade::from_coverage(coverage_pct);

    tracing::info!(
        expected = expected.len(),
        produced = produced.len(),
        matched = matched.len(),
        coverage_pct,
        grade = grade.as_str(),
        "Date audit complete"
    );

    DateAudit {
        matched,
        missing,
        extra,
        coverage_pct,
        precision_pct,
        grade,
    }
}

fn percent(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        100.0
    } else {
        part as f32 * 100.0 / whole as f32
    }
}

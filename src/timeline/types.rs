use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::merge::MergedEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Disclosure window looked back from the enrollment date.
/// Serialized as its label: `3m`, `1y`, `2y`, `5y`, `all`, or a day count (`400d`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeriodType {
    ThreeMonths,
    OneYear,
    TwoYears,
    FiveYears,
    #[default]
    All,
    Days(u32),
}

impl PeriodType {
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        let period = match label.as_str() {
            "3m" | "3months" => Self::ThreeMonths,
            "1y" | "1year" => Self::OneYear,
            "2y" | "2years" => Self::TwoYears,
            "5y" | "5years" => Self::FiveYears,
            "all" => Self::All,
            other => Self::Days(other.trim_end_matches('d').parse().ok()?),
        };
        Some(period)
    }

    pub fn label(&self) -> String {
        match self {
            Self::ThreeMonths => "3m".into(),
            Self::OneYear => "1y".into(),
            Self::TwoYears => "2y".into(),
            Self::FiveYears => "5y".into(),
            Self::All => "all".into(),
            Self::Days(n) => format!("{n}d"),
        }
    }

    /// Window length in days; `None` means unbounded.
    pub fn days(&self) -> Option<i64> {
        match self {
            Self::ThreeMonths => Some(90),
            Self::OneYear => Some(365),
            Self::TwoYears => Some(730),
            Self::FiveYears => Some(1825),
            Self::All => None,
            Self::Days(n) => Some(i64::from(*n)),
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl TryFrom<String> for PeriodType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown period type '{value}'"))
    }
}

impl From<PeriodType> for String {
    fn from(value: PeriodType) -> Self {
        value.label()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrganizeOptions {
    pub enrollment_date: Option<NaiveDate>,
    pub period_type: PeriodType,
    pub sort_direction: SortDirection,
    pub group_by_date: bool,
}

/// Same-day bucket. `date` is `None` for the trailing bucket of unparseable dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateGroup {
    pub date: Option<NaiveDate>,
    pub events: Vec<MergedEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeStatistics {
    pub processed_groups: usize,
    /// Mean confidence of kept events, 0 when none are kept.
    pub confidence: f32,
    /// Filtered / input, 0 for empty input.
    pub filtering_rate: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizedData {
    pub events: Vec<MergedEvent>,
    pub groups: Option<Vec<DateGroup>>,
    pub filtered_count: usize,
    pub statistics: OrganizeStatistics,
}

/// A member event highlighted in an episode summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub event_id: Uuid,
    pub date: NaiveDate,
    pub label: String,
}

/// A temporally and contextually coherent run of events, e.g. one hospitalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: Uuid,
    pub category: String,
    pub hospital: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Distinct visit days.
    pub visit_count: usize,
    pub key_events: Vec<KeyEvent>,
    pub member_event_ids: Vec<Uuid>,
    pub summary: String,
}

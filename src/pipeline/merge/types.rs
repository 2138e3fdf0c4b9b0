use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::extraction::types::ExtractionMode;
use crate::provenance::SourceSpan;

/// Namespace for deterministic event and episode ids.
pub const MEDCHRON_NAMESPACE: Uuid = Uuid::from_u128(0x6d65_6463_6872_6f6e_8a1e_4c3b_9f20_d7a5);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub name: String,
    pub code: Option<String>,
}

/// A reconciled, deduplicated event. Created only by the merger; afterwards
/// only `source_span` is ever filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedEvent {
    pub id: Uuid,
    /// ISO-8601 date.
    pub date: String,
    pub hospital: Option<String>,
    pub diagnosis: Option<Diagnosis>,
    pub procedures: Vec<String>,
    pub confidence: f32,
    pub contributing_modes: Vec<ExtractionMode>,
    /// Byte offset of the first mention in the document text.
    pub source_offset: usize,
    pub source_span: Option<SourceSpan>,
}

impl MergedEvent {
    /// `None` when `date` is not a valid ISO date.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").ok()
    }

    pub fn diagnosis_name(&self) -> Option<&str> {
        self.diagnosis.as_ref().map(|d| d.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Duplicates are fused by a confidence-weighted average.
    #[default]
    ConfidenceWeighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeOptions {
    pub strategy: MergeStrategy,
    /// Fields further than this many bytes from a date are not associated with it.
    pub association_window: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::ConfidenceWeighted,
            association_window: 200,
        }
    }
}

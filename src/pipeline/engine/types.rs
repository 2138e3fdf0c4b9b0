use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::types::{DateBlock, ExtractionMode, NormalizedField};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Extraction failed: {0}")]
    Failed(String),

    #[error("Extraction panicked: {0}")]
    Panicked(String),

    #[error("Extraction timed out after {0} ms")]
    TimedOut(u64),
}

/// What a single engine produced before timing and bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub date_blocks: Vec<DateBlock>,
    pub normalized_fields: Vec<NormalizedField>,
}

/// Extraction strategy run by the orchestrator.
/// Implementations must be pure over `text`: no shared mutable state.
pub trait ExtractionEngine: Send + Sync {
    fn mode(&self) -> ExtractionMode;

    fn extract(&self, text: &str) -> Result<EngineOutput, EngineError>;
}

/// Outcome of one orchestrator run of one mode. Failed runs keep their errors
/// for diagnostics and are skipped by scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResult {
    pub mode: ExtractionMode,
    pub date_blocks: Vec<DateBlock>,
    pub normalized_fields: Vec<NormalizedField>,
    pub errors: Vec<String>,
    pub processing_time_ms: u64,
    pub success: bool,
    /// Self-reported: mean date-block confidence, 0 without blocks.
    pub confidence: f32,
}

impl EngineResult {
    pub fn succeeded(mode: ExtractionMode, output: EngineOutput, processing_time_ms: u64) -> Self {
        let confidence =
            crate::pipeline::extraction::confidence::mean_block_confidence(&output.date_blocks);
        Self {
            mode,
            date_blocks: output.date_blocks,
            normalized_fields: output.normalized_fields,
            errors: Vec::new(),
            processing_time_ms,
            success: true,
            confidence,
        }
    }

    pub fn failed(mode: ExtractionMode, error: &EngineError, processing_time_ms: u64) -> Self {
        Self {
            mode,
            date_blocks: Vec::new(),
            normalized_fields: Vec::new(),
            errors: vec![error.to_string()],
            processing_time_ms,
            success: false,
            confidence: 0.0,
        }
    }
}

/// Per-mode diagnostic line in the pipeline output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRunSummary {
    pub mode: ExtractionMode,
    pub success: bool,
    pub errors: Vec<String>,
    pub date_blocks: usize,
    pub normalized_fields: usize,
    pub processing_time_ms: u64,
    pub confidence: f32,
}

impl From<&EngineResult> for EngineRunSummary {
    fn from(result: &EngineResult) -> Self {
        Self {
            mode: result.mode,
            success: result.success,
            errors: result.errors.clone(),
            date_blocks: result.date_blocks.len(),
            normalized_fields: result.normalized_fields.len(),
            processing_time_ms: result.processing_time_ms,
            confidence: result.confidence,
        }
    }
}

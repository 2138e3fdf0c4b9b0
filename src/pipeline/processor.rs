//! Reconciliation pipeline: single entry point for one document.
//!
//! extract (all modes, concurrently) → select best per family → merge →
//! attach source spans → organize → cluster → coverage/audit.
//!
//! Engines are injected through the `ExtractionEngine` trait so the whole
//! pipeline stays testable with failing or scripted engines. All state is
//! scoped to one `ProcessingContext`; concurrent calls never interfere.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::audit::{audit_dates, DateAudit};
use super::engine::{EngineOrchestrator, EngineResult, EngineRunSummary, ExtractionEngine};
use super::extraction::types::ExtractionMode;
use super::merge::{credit_corroborating_modes, merge_results, select_best, MergedEvent, ResultFamily};
use crate::pipeline_config::{ConfigError, ReconcileConfig};
use crate::provenance::{attach_all, coverage_report, Coverage, OcrBlock};
use crate::timeline::{
    cluster_events, sort_and_filter, validate_episodes, DateGroup, Episode, OrganizeOptions,
    OrganizeStatistics, PeriodType, SortDirection,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Document text is empty")]
    MissingText,

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Input / output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInput {
    pub text: String,
    #[serde(default)]
    pub blocks: Option<Vec<OcrBlock>>,
    #[serde(default)]
    pub page_count: Option<u32>,
}

/// Caller-supplied facts about the document. Nothing here is read from the
/// clock: `reference_date` is the "today" used by the audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub enrollment_date: Option<NaiveDate>,
    /// Disclosure windows the insurer asks about; the widest one is applied.
    pub disclosure_windows: Option<Vec<PeriodType>>,
    pub sort_direction: Option<SortDirection>,
    pub group_by_date: Option<bool>,
    /// Human-written reference report to audit date coverage against.
    pub reference_report: Option<String>,
    pub reference_date: Option<NaiveDate>,
}

impl DocumentMetadata {
    /// Widest requested window; unbounded (`all`) beats any day count.
    pub fn widest_window(&self) -> PeriodType {
        let Some(windows) = self.disclosure_windows.as_deref() else {
            return PeriodType::All;
        };
        windows
            .iter()
            .copied()
            .max_by_key(|w| w.days().unwrap_or(i64::MAX))
            .unwrap_or(PeriodType::All)
    }
}

/// Organizer statistics at the top level, pipeline diagnostics beside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatistics {
    #[serde(flatten)]
    pub organize: OrganizeStatistics,
    pub text_length: usize,
    pub page_count: Option<u32>,
    pub blocks_total: usize,
    pub date_mode: Option<ExtractionMode>,
    pub medical_mode: Option<ExtractionMode>,
    pub merged_events: usize,
    pub filtered_events: usize,
    pub episodes: usize,
    pub applied_window: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub document_id: Uuid,
    /// Kept events, ordered and filtered.
    pub organized_data: Vec<MergedEvent>,
    /// Same-day groups of `organized_data`, when grouping was requested.
    pub groups: Option<Vec<DateGroup>>,
    pub episodes: Vec<Episode>,
    pub coverage: Coverage,
    pub audit: Option<DateAudit>,
    pub statistics: PipelineStatistics,
    pub engine_runs: Vec<EngineRunSummary>,
}

/// Per-invocation state. Built fresh for every document.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub document_id: Uuid,
    pub config: Arc<ReconcileConfig>,
}

impl ProcessingContext {
    pub fn new(config: Arc<ReconcileConfig>) -> Self {
        Self {
            document_id: Uuid::new_v4(),
            config,
        }
    }

    pub fn with_document_id(mut self, document_id: Uuid) -> Self {
        self.document_id = document_id;
        self
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Reconciler {
    orchestrator: EngineOrchestrator,
    config: Arc<ReconcileConfig>,
}

impl Reconciler {
    /// Built-in mode engines as configured.
    pub fn new(config: ReconcileConfig) -> Result<Self, ProcessingError> {
        config.validate()?;
        let orchestrator = EngineOrchestrator::from_config(
            &config.orchestrator,
            &config.extraction,
            &config.resolver,
        );
        Ok(Self {
            orchestrator,
            config: Arc::new(config),
        })
    }

    /// Caller-supplied engines; the configured mode list is ignored.
    pub fn with_engines(
        config: ReconcileConfig,
        engines: Vec<Arc<dyn ExtractionEngine>>,
    ) -> Result<Self, ProcessingError> {
        config.validate()?;
        let timeout = config.orchestrator.timeout_ms.map(Duration::from_millis);
        Ok(Self {
            orchestrator: EngineOrchestrator::new(engines, timeout),
            config: Arc::new(config),
        })
    }

    pub fn context(&self) -> ProcessingContext {
        ProcessingContext::new(Arc::clone(&self.config))
    }

    /// Process with a fresh context.
    pub async fn process(
        &self,
        input: &DocumentInput,
        metadata: &DocumentMetadata,
    ) -> Result<PipelineOutput, ProcessingError> {
        self.process_with(&self.context(), input, metadata).await
    }

    pub async fn process_with(
        &self,
        ctx: &ProcessingContext,
        input: &DocumentInput,
        metadata: &DocumentMetadata,
    ) -> Result<PipelineOutput, ProcessingError> {
        if input.text.trim().is_empty() {
            return Err(ProcessingError::MissingText);
        }
        let config = &ctx.config;
        let blocks: &[OcrBlock] = input.blocks.as_deref().unwrap_or(&[]);

        tracing::info!(
            document_id = %ctx.document_id,
            text_length = input.text.len(),
            blocks = blocks.len(),
            modes = self.orchestrator.modes().len(),
            "Processing: starting extraction"
        );

        // Stage 1: concurrent extraction
        let text: Arc<str> = Arc::from(input.text.as_str());
        let results = self.orchestrator.run(Arc::clone(&text)).await;
        for failed in results.iter().filter(|r| !r.success) {
            tracing::warn!(
                document_id = %ctx.document_id,
                mode = failed.mode.as_str(),
                errors = ?failed.errors,
                "Engine failed, continuing with the rest"
            );
        }

        // Stage 2: select and merge
        let date_result = best_of(&results, ResultFamily::Dates, config);
        let medical_result = best_of(&results, ResultFamily::Medical, config);
        let mut merged = merge_results(date_result, medical_result, &config.merge);
        credit_corroborating_modes(&mut merged, &results);
        check_confidence_bounds(&merged)?;
        let merged_count = merged.len();

        // Stage 3: provenance
        let merged = if blocks.is_empty() {
            merged
        } else {
            attach_all(merged, &text, blocks, &config.provenance)
        };

        // Stage 4: organize
        let window = metadata.widest_window();
        let options = OrganizeOptions {
            enrollment_date: metadata.enrollment_date,
            period_type: window,
            sort_direction: metadata
                .sort_direction
                .unwrap_or(config.organize.sort_direction),
            group_by_date: metadata.group_by_date.unwrap_or(config.organize.group_by_date),
        };
        let organized = sort_and_filter(merged, &options);

        // Stage 5: cluster
        let episodes = cluster_events(&organized.events, &config.clustering);
        debug_assert!(validate_episodes(&episodes, &organized.events).is_ok());
        validate_episodes(&episodes, &organized.events).map_err(ProcessingError::InvariantViolation)?;

        // Stage 6: coverage and audit
        let coverage = coverage_report(&organized.events, &episodes, blocks);
        let audit = metadata.reference_report.as_deref().map(|report| {
            audit_dates(
                report,
                organized.events.iter().map(|e| e.date.as_str()),
                metadata.reference_date,
            )
        });

        let statistics = PipelineStatistics {
            organize: organized.statistics,
            text_length: input.text.len(),
            page_count: input.page_count,
            blocks_total: blocks.len(),
            date_mode: date_result.map(|r| r.mode),
            medical_mode: medical_result.map(|r| r.mode),
            merged_events: merged_count,
            filtered_events: organized.filtered_count,
            episodes: episodes.len(),
            applied_window: window.label(),
        };

        tracing::info!(
            document_id = %ctx.document_id,
            events = organized.events.len(),
            filtered = organized.filtered_count,
            episodes = episodes.len(),
            attachment_rate = coverage.source_span.rate,
            "Processing complete"
        );

        Ok(PipelineOutput {
            document_id: ctx.document_id,
            engine_runs: results.iter().map(EngineRunSummary::from).collect(),
            organized_data: organized.events,
            groups: organized.groups,
            episodes,
            coverage,
            audit,
            statistics,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn best_of<'a>(
    results: &'a [EngineResult],
    family: ResultFamily,
    config: &ReconcileConfig,
) -> Option<&'a EngineResult> {
    let best = select_best(results.iter().map(Some), family, &config.scoring);
    match best {
        Some(r) => tracing::debug!(family = family.as_str(), mode = r.mode.as_str(), "Selected result"),
        None => tracing::warn!(family = family.as_str(), "No successful result to select"),
    }
    best
}

fn check_confidence_bounds(events: &[MergedEvent]) -> Result<(), ProcessingError> {
    match events.iter().find(|e| !(0.0..=1.0).contains(&e.confidence)) {
        Some(bad) => {
            debug_assert!(
                (0.0..=1.0).contains(&bad.confidence),
                "merged confidence out of bounds: {}",
                bad.confidence
            );
            Err(ProcessingError::InvariantViolation(format!(
                "event {} has confidence {} outside [0, 1]",
                bad.id, bad.confidence
            )))
        }
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::{EngineError, EngineOutput, ModeEngine};
    use crate::pipeline::extraction::{PatternConfig, ResolverConfig};
    use crate::pipeline::merge::ScoreWeights;
    use crate::provenance::BoundingBox;

    const HISTORY: &str = "2024-04-09 Asan Hospital gastric cancer\n\
        2024-04-20 Asan Hospital gastric cancer\n\
        2024-05-02 Asan Hospital gastric cancer\n\
        2024-05-15 Asan Hospital gastric cancer\n\
        2025-01-10 Severance Hospital hypertension";

    struct FailingEngine(ExtractionMode);

    impl ExtractionEngine for FailingEngine {
        fn mode(&self) -> ExtractionMode {
            self.0
        }

        fn extract(&self, _text: &str) -> Result<EngineOutput, EngineError> {
            Err(EngineError::Failed("scripted failure".into()))
        }
    }

    /// Latency carries no weight so selection does not depend on timing.
    fn test_config() -> ReconcileConfig {
        ReconcileConfig {
            scoring: ScoreWeights {
                confidence: 0.6,
                latency: 0.0,
                ..ScoreWeights::default()
            },
            ..ReconcileConfig::default()
        }
    }

    fn mode_engine(mode: ExtractionMode) -> Arc<dyn ExtractionEngine> {
        Arc::new(ModeEngine::new(mode, PatternConfig::default(), ResolverConfig::default()))
    }

    fn input(text: &str) -> DocumentInput {
        DocumentInput {
            text: text.into(),
            blocks: None,
            page_count: Some(1),
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn history_clusters_into_two_episodes() {
        let reconciler = Reconciler::new(test_config()).unwrap();
        let out = reconciler
            .process(&input(HISTORY), &DocumentMetadata::default())
            .await
            .unwrap();

        assert_eq!(out.organized_data.len(), 5);
        assert_eq!(out.episodes.len(), 2);
        assert_eq!(out.episodes[0].category, "oncology");
        assert_eq!(out.episodes[0].member_event_ids.len(), 4);
        assert_eq!(out.episodes[0].start_date, ymd(2024, 4, 9));
        assert_eq!(out.episodes[0].end_date, ymd(2024, 5, 15));
        assert_eq!(out.episodes[1].category, "hypertension");
        assert_eq!(out.engine_runs.len(), 3);
    }

    #[tokio::test]
    async fn same_date_in_two_scripts_is_one_event() {
        let reconciler = Reconciler::new(test_config()).unwrap();
        let out = reconciler
            .process(
                &input("2024-03-01 서울병원 외래\n2024년 3월 1일 서울병원 외래"),
                &DocumentMetadata::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.organized_data.len(), 1);
        assert_eq!(out.organized_data[0].date, "2024-03-01");
    }

    fn korean_record(lines: usize) -> String {
        (0..lines)
            .map(|i| {
                format!(
                    "{}년 {}월 {}일 서울병원 위암 진단, 익일 위내시경",
                    2020 + i / 12,
                    i % 12 + 1,
                    i % 27 + 1
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn reprocessing_is_idempotent() {
        let reconciler = Reconciler::new(ReconcileConfig::default()).unwrap();
        let ctx = reconciler.context().with_document_id(Uuid::nil());
        let metadata = DocumentMetadata::default();

        for text in [HISTORY.to_string(), korean_record(60)] {
            let doc = input(&text);
            let render = |out: PipelineOutput| {
                (
                    serde_json::to_string(&out.organized_data).unwrap(),
                    serde_json::to_string(&out.episodes).unwrap(),
                    out.statistics,
                )
            };
            let first = render(reconciler.process_with(&ctx, &doc, &metadata).await.unwrap());
            assert_ne!(first.0, "[]");

            for _ in 0..8 {
                let (a, b, c) = tokio::join!(
                    reconciler.process_with(&ctx, &doc, &metadata),
                    reconciler.process_with(&ctx, &doc, &metadata),
                    reconciler.process_with(&ctx, &doc, &metadata),
                );
                for out in [a, b, c] {
                    assert_eq!(render(out.unwrap()), first);
                }
            }
        }
    }

    #[tokio::test]
    async fn agreeing_engines_all_contribute() {
        let reconciler = Reconciler::new(ReconcileConfig::default()).unwrap();
        let out = reconciler
            .process(&input(&korean_record(3)), &DocumentMetadata::default())
            .await
            .unwrap();
        assert!(!out.organized_data.is_empty());
        for event in &out.organized_data {
            assert!(event.contributing_modes.contains(&ExtractionMode::Enhanced));
            assert!(event.contributing_modes.contains(&ExtractionMode::AdaptiveHybrid));
            assert!(event.contributing_modes.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn one_failing_engine_matches_survivors_only() {
        let with_failure = Reconciler::with_engines(
            test_config(),
            vec![
                mode_engine(ExtractionMode::Baseline),
                Arc::new(FailingEngine(ExtractionMode::Enhanced)),
                mode_engine(ExtractionMode::AdaptiveHybrid),
            ],
        )
        .unwrap();
        let survivors = Reconciler::with_engines(
            test_config(),
            vec![
                mode_engine(ExtractionMode::Baseline),
                mode_engine(ExtractionMode::AdaptiveHybrid),
            ],
        )
        .unwrap();

        let metadata = DocumentMetadata::default();
        let a = with_failure.process(&input(HISTORY), &metadata).await.unwrap();
        let b = survivors.process(&input(HISTORY), &metadata).await.unwrap();

        assert_eq!(a.organized_data, b.organized_data);
        assert_eq!(a.episodes, b.episodes);
        let failed = &a.engine_runs[1];
        assert!(!failed.success);
        assert_eq!(failed.errors, vec!["Extraction failed: scripted failure".to_string()]);
    }

    #[tokio::test]
    async fn all_engines_failing_yields_empty_output() {
        let reconciler = Reconciler::with_engines(
            test_config(),
            vec![Arc::new(FailingEngine(ExtractionMode::Baseline))],
        )
        .unwrap();
        let out = reconciler
            .process(&input(HISTORY), &DocumentMetadata::default())
            .await
            .unwrap();
        assert!(out.organized_data.is_empty());
        assert!(out.episodes.is_empty());
        assert_eq!(out.statistics.date_mode, None);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let reconciler = Reconciler::new(test_config()).unwrap();
        let err = reconciler
            .process(&input("  \n "), &DocumentMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::MissingText));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ReconcileConfig::default();
        config.scoring.confidence = 0.9;
        assert!(matches!(Reconciler::new(config), Err(ProcessingError::Config(_))));
    }

    #[tokio::test]
    async fn disclosure_window_filters_and_groups_are_lifted() {
        let reconciler = Reconciler::new(test_config()).unwrap();
        let metadata = DocumentMetadata {
            enrollment_date: Some(ymd(2025, 2, 1)),
            disclosure_windows: Some(vec![PeriodType::ThreeMonths, PeriodType::Days(30)]),
            ..DocumentMetadata::default()
        };
        let out = reconciler.process(&input(HISTORY), &metadata).await.unwrap();

        assert_eq!(out.statistics.applied_window, "3m");
        assert_eq!(out.organized_data.len(), 1);
        assert_eq!(out.statistics.filtered_events, 4);
        assert!((out.statistics.organize.filtering_rate - 0.8).abs() < 1e-6);
        assert_eq!(out.groups.as_ref().map(Vec::len), Some(1));
        assert_eq!(out.episodes.len(), 1);
    }

    #[tokio::test]
    async fn spans_coverage_and_audit() {
        let reconciler = Reconciler::new(test_config()).unwrap();
        let text = "2024-03-01 서울병원 외래\n2024-06-10 부산의원 외래";
        let doc = DocumentInput {
            text: text.into(),
            blocks: Some(vec![OcrBlock {
                page: 1,
                block_index: 0,
                text: "2024-03-01 서울병원 외래".into(),
                bbox: BoundingBox { x_min: 0.0, y_min: 0.0, x_max: 200.0, y_max: 20.0 },
                confidence: Some(0.97),
            }]),
            page_count: Some(1),
        };
        let metadata = DocumentMetadata {
            reference_report: Some("2024.03.01 외래\n2024.06.10 외래\n2024.09.31 재진".into()),
            reference_date: Some(ymd(2025, 1, 1)),
            ..DocumentMetadata::default()
        };
        let out = reconciler.process(&doc, &metadata).await.unwrap();

        assert_eq!(out.organized_data.len(), 2);
        assert!((out.coverage.source_span.rate - 0.5).abs() < 1e-6);
        assert_eq!(out.coverage.coordinates.blocks_total, 1);
        assert!(out.coverage.coordinates.matched_items >= 2);

        let audit = out.audit.unwrap();
        assert_eq!(audit.matched.len(), 2);
        assert_eq!(audit.missing.len(), 1);
        assert!(audit.missing[0].impossible);
    }

    #[test]
    fn widest_window_prefers_unbounded() {
        let metadata = DocumentMetadata {
            disclosure_windows: Some(vec![PeriodType::OneYear, PeriodType::All, PeriodType::FiveYears]),
            ..DocumentMetadata::default()
        };
        assert_eq!(metadata.widest_window(), PeriodType::All);
        assert_eq!(DocumentMetadata::default().widest_window(), PeriodType::All);
    }

    #[tokio::test]
    async fn output_record_shape() {
        let reconciler = Reconciler::new(test_config()).unwrap();
        let out = reconciler
            .process(&input(HISTORY), &DocumentMetadata::default())
            .await
            .unwrap();
        let json = serde_json::to_value(&out).unwrap();

        let events = json["organizedData"].as_array().unwrap();
        assert_eq!(events.len(), 5);
        assert!(events[0].get("contributingModes").is_some());
        assert!(json["episodes"].is_array());

        assert!(json["coverage"]["sourceSpan"]["rate"].is_number());
        for key in ["matchRate", "matchedItems", "blocksTotal"] {
            assert!(json["coverage"]["coordinates"][key].is_number(), "coverage.coordinates.{key}");
        }

        let statistics = &json["statistics"];
        for key in ["processedGroups", "confidence", "filteringRate"] {
            assert!(statistics[key].is_number(), "statistics.{key}");
        }
        assert!(statistics.get("organize").is_none());
        assert_eq!(statistics["appliedWindow"], "all");
    }
}

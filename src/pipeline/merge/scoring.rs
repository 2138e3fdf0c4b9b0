//! Composite scoring of engine results and best-result selection.

use serde::{Deserialize, Serialize};

use crate::pipeline::engine::types::EngineResult;

/// Which part of an engine result is being judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFamily {
    Dates,
    Medical,
}

impl ResultFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dates => "dates",
            Self::Medical => "medical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoreWeights {
    pub confidence: f32,
    pub latency: f32,
    #[serde(rename = "yield")]
    pub yield_weight: f32,
    pub cleanliness: f32,
    /// Latency at which the latency component reaches zero.
    pub latency_ceiling_ms: u64,
    /// Date-block count at which the date yield component saturates.
    pub date_yield_saturation: usize,
    /// Field count at which the medical yield component saturates.
    pub medical_yield_saturation: usize,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            latency: 0.2,
            yield_weight: 0.2,
            cleanliness: 0.2,
            latency_ceiling_ms: 10_000,
            date_yield_saturation: 20,
            medical_yield_saturation: 10,
        }
    }
}

impl ScoreWeights {
    pub fn total_weight(&self) -> f32 {
        self.confidence + self.latency + self.yield_weight + self.cleanliness
    }
}

/// Weighted composite score of one result for one family.
pub fn score_result(result: &EngineResult, family: ResultFamily, weights: &ScoreWeights) -> f32 {
    let ceiling = weights.latency_ceiling_ms.max(1) as f32;
    let latency = (1.0 - result.processing_time_ms as f32 / ceiling).max(0.0);
    quality_score(result, family, weights) + weights.latency * latency
}

/// The composite score without its latency component. Depends only on what
/// the engine produced, never on how long it took.
pub fn quality_score(result: &EngineResult, family: ResultFamily, weights: &ScoreWeights) -> f32 {
    let (count, saturation) = match family {
        ResultFamily::Dates => (result.date_blocks.len(), weights.date_yield_saturation),
        ResultFamily::Medical => (result.normalized_fields.len(), weights.medical_yield_saturation),
    };
    let yield_score = (count as f32 / saturation.max(1) as f32).min(1.0);

    let clean = if result.errors.is_empty() { 1.0 } else { 0.0 };

    weights.confidence * result.confidence
        + weights.yield_weight * yield_score
        + weights.cleanliness * clean
}

/// Highest-scoring successful result. Missing and failed entries are
/// skipped; ties keep the first seen. `None` when nothing qualifies.
///
/// Results whose quality scores are exactly equal also keep the first seen:
/// latency only separates results that differ in what they produced, so
/// timing jitter cannot change the pick between equivalent engines.
pub fn select_best<'a, I>(results: I, family: ResultFamily, weights: &ScoreWeights) -> Option<&'a EngineResult>
where
    I: IntoIterator<Item = Option<&'a EngineResult>>,
{
    let mut best: Option<(&'a EngineResult, f32, f32)> = None;
    for result in results.into_iter().flatten() {
        if !result.success {
            continue;
        }
        let quality = quality_score(result, family, weights);
        let score = score_result(result, family, weights);
        tracing::debug!(
            mode = result.mode.as_str(),
            family = family.as_str(),
            score,
            quality,
            "Scored engine result"
        );
        match best {
            Some((_, best_score, best_quality)) if quality == best_quality || score <= best_score => {}
            _ => best = Some((result, score, quality)),
        }
    }
    best.map(|(result, _, _)| result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::types::{EngineOutput, EngineResult};
    use crate::pipeline::extraction::types::ExtractionMode;

    fn make_result(mode: ExtractionMode, confidence: f32, ms: u64, errors: &[&str]) -> EngineResult {
        let mut r = EngineResult::succeeded(mode, EngineOutput::default(), ms);
        r.confidence = confidence;
        r.errors = errors.iter().map(|e| e.to_string()).collect();
        r
    }

    #[test]
    fn picks_clean_fast_confident_result() {
        let results = [
            make_result(ExtractionMode::Baseline, 0.9, 500, &[]),
            make_result(ExtractionMode::Enhanced, 0.7, 9000, &["partial dictionary"]),
            make_result(ExtractionMode::AdaptiveHybrid, 0.95, 100, &[]),
        ];
        let weights = ScoreWeights::default();
        let best = select_best(results.iter().map(Some), ResultFamily::Dates, &weights).unwrap();
        assert_eq!(best.mode, ExtractionMode::AdaptiveHybrid);

        // 0.4·0.95 + 0.2·0.99 + 0 + 0.2
        let expected = 0.4 * 0.95 + 0.2 * (1.0 - 100.0 / 10_000.0) + 0.2;
        assert!((score_result(best, ResultFamily::Dates, &weights) - expected).abs() < 1e-5);
    }

    #[test]
    fn ties_keep_first_seen() {
        let results = [
            make_result(ExtractionMode::Enhanced, 0.8, 100, &[]),
            make_result(ExtractionMode::Baseline, 0.8, 100, &[]),
        ];
        let best =
            select_best(results.iter().map(Some), ResultFamily::Dates, &ScoreWeights::default()).unwrap();
        assert_eq!(best.mode, ExtractionMode::Enhanced);
    }

    #[test]
    fn equal_quality_ignores_latency() {
        let slow_first = [
            make_result(ExtractionMode::Enhanced, 0.8, 900, &[]),
            make_result(ExtractionMode::AdaptiveHybrid, 0.8, 20, &[]),
        ];
        let weights = ScoreWeights::default();
        let best = select_best(slow_first.iter().map(Some), ResultFamily::Dates, &weights).unwrap();
        assert_eq!(best.mode, ExtractionMode::Enhanced);

        // Same outputs, timings swapped: the pick does not move.
        let fast_first = [
            make_result(ExtractionMode::Enhanced, 0.8, 20, &[]),
            make_result(ExtractionMode::AdaptiveHybrid, 0.8, 900, &[]),
        ];
        let best = select_best(fast_first.iter().map(Some), ResultFamily::Dates, &weights).unwrap();
        assert_eq!(best.mode, ExtractionMode::Enhanced);
    }

    #[test]
    fn latency_still_separates_different_results() {
        let results = [
            make_result(ExtractionMode::Enhanced, 0.80, 9_000, &[]),
            make_result(ExtractionMode::AdaptiveHybrid, 0.79, 10, &[]),
        ];
        let best =
            select_best(results.iter().map(Some), ResultFamily::Dates, &ScoreWeights::default()).unwrap();
        assert_eq!(best.mode, ExtractionMode::AdaptiveHybrid);
    }

    #[test]
    fn failed_and_missing_skipped() {
        let mut failed = make_result(ExtractionMode::Enhanced, 1.0, 0, &[]);
        failed.success = false;
        let ok = make_result(ExtractionMode::Baseline, 0.1, 9_999, &[]);
        let best = select_best(
            [None, Some(&failed), Some(&ok)],
            ResultFamily::Medical,
            &ScoreWeights::default(),
        )
        .unwrap();
        assert_eq!(best.mode, ExtractionMode::Baseline);
    }

    #[test]
    fn empty_or_all_missing_is_none() {
        let weights = ScoreWeights::default();
        assert!(select_best(Vec::<Option<&EngineResult>>::new(), ResultFamily::Dates, &weights).is_none());
        assert!(select_best([None, None], ResultFamily::Dates, &weights).is_none());
    }

    #[test]
    fn latency_component_floors_at_zero() {
        let slow = make_result(ExtractionMode::Baseline, 0.0, 50_000, &["x"]);
        assert_eq!(score_result(&slow, ResultFamily::Dates, &ScoreWeights::default()), 0.0);
    }

    #[test]
    fn yield_is_family_specific() {
        let weights = ScoreWeights {
            date_yield_saturation: 1,
            medical_yield_saturation: 1,
            ..ScoreWeights::default()
        };
        let mut r = make_result(ExtractionMode::Baseline, 0.0, 10_000, &["x"]);
        r.normalized_fields.push(crate::pipeline::extraction::types::NormalizedField::Hospital {
            name: "서울병원".into(),
            span: crate::pipeline::extraction::types::TextSpan { start: 0, end: 12, confidence: 0.85 },
        });
        assert_eq!(score_result(&r, ResultFamily::Dates, &weights), 0.0);
        assert!((score_result(&r, ResultFamily::Medical, &weights) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((ScoreWeights::default().total_weight() - 1.0).abs() < 1e-6);
    }
}

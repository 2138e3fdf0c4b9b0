use super::types::{ContextScope, DateBlock, PatternFamily};

/// Confidence thresholds shared by the extraction and merge stages
pub mod thresholds {
    /// Below this: the mention is almost certainly noise.
    pub const VERY_LOW: f32 = 0.30;

    /// Below this: significant uncertainty. Resolver default cut-off.
    pub const LOW: f32 = 0.50;

    /// Below this: some uncertainty. Flag in reports.
    pub const MODERATE: f32 = 0.70;

    /// Above this: high confidence. No special flagging.
    pub const HIGH: f32 = 0.85;

    /// Above this: unambiguous machine-format date.
    pub const VERY_HIGH: f32 = 0.95;
}

/// Baseline confidence for a pattern family before context adjustments.
/// Machine formats rank above long-form text, which ranks above relative phrases.
pub fn family_base_confidence(family: PatternFamily) -> f32 {
    match family {
        PatternFamily::Iso => 0.95,
        PatternFamily::Dotted => 0.90,
        PatternFamily::Slashed => 0.85,
        PatternFamily::KoreanLong => 0.90,
        PatternFamily::EnglishLong => 0.85,
        PatternFamily::Compound => 0.70,
        PatternFamily::Relative => 0.60,
    }
}

/// Words that mark a line as describing a clinical or insurance event.
const MEDICAL_KEYWORDS: &[&str] = &[
    "admission", "admitted", "biopsy", "diagnosed", "diagnosis", "discharge",
    "discharged", "exam", "hospital", "outpatient", "inpatient", "operation",
    "surgery", "treatment", "visit", "clinic", "prescribed", "enrollment",
    "진료", "진단", "입원", "퇴원", "수술", "외래", "검사", "처방", "치료",
    "내원", "통원", "가입", "청구",
];

/// True when the text mentions a clinical/insurance event keyword.
pub fn has_medical_context(text: &str) -> bool {
    let lower = text.to_lowercase();
    MEDICAL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Clamp into `[0, 1]`; NaN collapses to 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Local confidence for a freshly matched mention.
pub fn score_mention(
    family: PatternFamily,
    context: ContextScope,
    context_text: &str,
    keyword_bonus: f32,
    large_context_penalty: f32,
) -> f32 {
    let mut score = family_base_confidence(family);
    if context == ContextScope::Large {
        score -= large_context_penalty;
    }
    if has_medical_context(context_text) {
        score += keyword_bonus;
    }
    clamp_confidence(score)
}

/// Mean confidence of a set of blocks, 0 when empty.
pub fn mean_block_confidence(blocks: &[DateBlock]) -> f32 {
    if blocks.is_empty() {
        return 0.0;
    }
    let sum: f32 = blocks.iter().map(|b| b.confidence).sum();
    clamp_confidence(sum / blocks.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::types::ExtractionMode;

    #[test]
    fn iso_ranks_above_relative() {
        assert!(
            family_base_confidence(PatternFamily::Iso)
                > family_base_confidence(PatternFamily::Relative)
        );
        assert!(
            family_base_confidence(PatternFamily::Compound)
                > family_base_confidence(PatternFamily::Relative)
        );
    }

    #[test]
    fn all_family_bases_in_bounds() {
        for family in PatternFamily::all() {
            let c = family_base_confidence(*family);
            assert!((0.0..=1.0).contains(&c), "{family:?} base {c}");
        }
    }

    #[test]
    fn keyword_bonus_is_clamped() {
        let c = score_mention(PatternFamily::Iso, ContextScope::Small, "입원 2024-03-01", 0.2, 0.0);
        assert!((c - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn large_context_penalized() {
        let small = score_mention(PatternFamily::Dotted, ContextScope::Small, "x", 0.05, 0.05);
        let large = score_mention(PatternFamily::Dotted, ContextScope::Large, "x", 0.05, 0.05);
        assert!(large < small);
    }

    #[test]
    fn medical_context_detection() {
        assert!(has_medical_context("Admitted to the ward"));
        assert!(has_medical_context("위 내시경 검사 시행"));
        assert!(!has_medical_context("page 3 of 7"));
    }

    #[test]
    fn clamp_handles_nan_and_overflow() {
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean_block_confidence(&[]), 0.0);
    }

    #[test]
    fn mean_of_blocks() {
        let make = |c: f32| DateBlock {
            raw_text: "2024-01-01".into(),
            normalized_date: None,
            offset_start: 0,
            offset_end: 10,
            confidence: c,
            pattern_family: PatternFamily::Iso,
            source_mode: ExtractionMode::Baseline,
            context: ContextScope::Small,
        };
        let mean = mean_block_confidence(&[make(0.8), make(0.6)]);
        assert!((mean - 0.7).abs() < 1e-6);
    }

    #[test]
    fn threshold_constants_are_ordered() {
        assert!(thresholds::VERY_LOW < thresholds::LOW);
        assert!(thresholds::LOW < thresholds::MODERATE);
        assert!(thresholds::MODERATE < thresholds::HIGH);
        assert!(thresholds::HIGH < thresholds::VERY_HIGH);
    }
}

//! The three built-in extraction modes.
//!
//! - `baseline`: numeric date formats on line contexts, ICD codes and
//!   hospital names only. No reference resolution.
//! - `enhanced`: every pattern family on both scopes, nested reference
//!   resolution, full diagnosis/procedure dictionaries.
//! - `adaptive_hybrid`: picks families and scopes from the document's
//!   shape, resolves references, and corrects OCR-damaged vocabulary before
//!   dictionary matching.

use std::sync::Arc;

use super::types::{EngineError, EngineOutput, ExtractionEngine};
use crate::pipeline::extraction::medical_fields::{FieldOptions, MedicalFieldNormalizer};
use crate::pipeline::extraction::nested::{NestedReferenceResolver, ResolverConfig};
use crate::pipeline::extraction::patterns::{split_paragraphs, PatternConfig, PatternExtractor};
use crate::pipeline::extraction::types::{ContextScope, DateBlock, ExtractionMode, PatternFamily};

/// Paragraphs with at least this many lines make a document "narrative".
const NARRATIVE_PARAGRAPH_LINES: usize = 3;

/// What the adaptive mode learned about a document before extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentShape {
    pub has_hangul: bool,
    pub has_latin_words: bool,
    pub narrative: bool,
}

impl DocumentShape {
    pub fn analyze(text: &str) -> Self {
        let has_hangul = text.chars().any(|c| ('가'..='힣').contains(&c));
        let has_latin_words = text
            .split(|c: char| !c.is_ascii_alphabetic())
            .any(|w| w.len() >= 3);
        let narrative = split_paragraphs(text)
            .into_iter()
            .any(|(_, para)| para.lines().filter(|l| !l.trim().is_empty()).count() >= NARRATIVE_PARAGRAPH_LINES);
        Self {
            has_hangul,
            has_latin_words,
            narrative,
        }
    }

    fn families(&self) -> Vec<PatternFamily> {
        let mut families = vec![PatternFamily::Iso, PatternFamily::Dotted, PatternFamily::Slashed];
        if self.has_hangul {
            families.push(PatternFamily::KoreanLong);
        }
        if self.has_latin_words {
            families.push(PatternFamily::EnglishLong);
        }
        families.push(PatternFamily::Relative);
        families.push(PatternFamily::Compound);
        families
    }

    fn scopes(&self) -> Vec<ContextScope> {
        if self.narrative {
            vec![ContextScope::Small, ContextScope::Large]
        } else {
            vec![ContextScope::Small]
        }
    }
}

/// Engine for one of the built-in modes.
pub struct ModeEngine {
    mode: ExtractionMode,
    patterns: PatternConfig,
    resolver: Option<NestedReferenceResolver>,
    fields: MedicalFieldNormalizer,
}

impl ModeEngine {
    pub fn new(mode: ExtractionMode, patterns: PatternConfig, resolver: ResolverConfig) -> Self {
        let (resolver, fields) = match mode {
            ExtractionMode::Baseline => (None, FieldOptions::codes_only()),
            ExtractionMode::Enhanced => (
                Some(NestedReferenceResolver::new(resolver)),
                FieldOptions::full(),
            ),
            ExtractionMode::AdaptiveHybrid => (
                Some(NestedReferenceResolver::new(resolver)),
                FieldOptions::corrected(),
            ),
        };
        Self {
            mode,
            patterns,
            resolver,
            fields: MedicalFieldNormalizer::new(fields),
        }
    }

    fn extractor_for(&self, text: &str) -> PatternExtractor {
        let base = PatternExtractor::new(self.mode, self.patterns.clone());
        match self.mode {
            ExtractionMode::Baseline => base
                .with_families(&[PatternFamily::Iso, PatternFamily::Dotted, PatternFamily::Slashed])
                .with_scopes(&[ContextScope::Small]),
            ExtractionMode::Enhanced => base,
            ExtractionMode::AdaptiveHybrid => {
                let shape = DocumentShape::analyze(text);
                tracing::debug!(
                    hangul = shape.has_hangul,
                    latin = shape.has_latin_words,
                    narrative = shape.narrative,
                    "Adaptive document shape"
                );
                base.with_families(&shape.families()).with_scopes(&shape.scopes())
            }
        }
    }

    /// Absolute blocks plus resolved references; unresolved references are dropped.
    fn resolve_blocks(&self, text: &str, blocks: Vec<DateBlock>) -> Vec<DateBlock> {
        let Some(resolver) = &self.resolver else {
            return blocks
                .into_iter()
                .filter(|b| !b.pattern_family.is_relative())
                .collect();
        };

        let resolved = resolver.resolve(text, &blocks);
        let mut out: Vec<DateBlock> = blocks
            .into_iter()
            .filter(|b| !b.pattern_family.is_relative())
            .collect();
        out.extend(resolved.into_iter().map(|r| r.block));
        out.sort_by_key(|b| (b.offset_start, b.offset_end));
        out
    }
}

impl ExtractionEngine for ModeEngine {
    fn mode(&self) -> ExtractionMode {
        self.mode
    }

    fn extract(&self, text: &str) -> Result<EngineOutput, EngineError> {
        let blocks = self.extractor_for(text).extract(text);
        let date_blocks = self.resolve_blocks(text, blocks);
        let normalized_fields = self.fields.extract(text);

        debug_assert!(
            date_blocks.iter().all(|b| (0.0..=1.0).contains(&b.confidence)),
            "date block confidence out of bounds"
        );

        Ok(EngineOutput {
            date_blocks,
            normalized_fields,
        })
    }
}

/// Engines for the configured modes, in configuration order.
pub fn build_engines(
    modes: &[ExtractionMode],
    patterns: &PatternConfig,
    resolver: &ResolverConfig,
) -> Vec<Arc<dyn ExtractionEngine>> {
    modes
        .iter()
        .map(|mode| {
            Arc::new(ModeEngine::new(*mode, patterns.clone(), resolver.clone()))
                as Arc<dyn ExtractionEngine>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::types::NormalizedField;

    fn engine(mode: ExtractionMode) -> ModeEngine {
        ModeEngine::new(mode, PatternConfig::default(), ResolverConfig::default())
    }

    const RECORD: &str =
        "서울병원 위암 (C16.9) 진단 2024.04.09, 익일 위내시경 시행\n2024-05-15 Gastrectorny follow-up";

    #[test]
    fn baseline_is_numeric_only() {
        let out = engine(ExtractionMode::Baseline).extract(RECORD).unwrap();
        assert!(out
            .date_blocks
            .iter()
            .all(|b| PatternFamily::absolute().contains(&b.pattern_family)));
        assert_eq!(out.date_blocks.len(), 2);
        assert!(out
            .normalized_fields
            .iter()
            .all(|f| !matches!(f, NormalizedField::Procedure { .. })));
    }

    #[test]
    fn enhanced_resolves_references() {
        let out = engine(ExtractionMode::Enhanced).extract(RECORD).unwrap();
        let next_day = out.date_blocks.iter().find(|b| b.raw_text == "익일").unwrap();
        assert_eq!(next_day.iso_date().as_deref(), Some("2024-04-10"));
        assert!(out.date_blocks.iter().all(|b| b.is_resolved()));
    }

    #[test]
    fn adaptive_corrects_vocabulary() {
        let enhanced = engine(ExtractionMode::Enhanced).extract(RECORD).unwrap();
        let adaptive = engine(ExtractionMode::AdaptiveHybrid).extract(RECORD).unwrap();
        let has_gastrectomy =
            |fields: &[NormalizedField]| fields.iter().any(|f| f.name() == "Gastrectomy");
        assert!(!has_gastrectomy(&enhanced.normalized_fields));
        assert!(has_gastrectomy(&adaptive.normalized_fields));
    }

    #[test]
    fn shape_analysis() {
        let shape = DocumentShape::analyze("입원 2024.01.01\n퇴원 2024.01.05");
        assert!(shape.has_hangul);
        assert!(!shape.has_latin_words);
        assert!(!shape.narrative);

        let narrative = DocumentShape::analyze("line one\nline two\nline three\n\nend");
        assert!(narrative.narrative);
        let windows = DocumentShape::analyze("line one\r\n\r\nline two\r\n\r\nline three");
        assert!(!windows.narrative);
        assert!(narrative.families().contains(&PatternFamily::EnglishLong));
        assert_eq!(narrative.scopes().len(), 2);
    }

    #[test]
    fn engines_built_in_order() {
        let engines = build_engines(
            &[ExtractionMode::AdaptiveHybrid, ExtractionMode::Baseline],
            &PatternConfig::default(),
            &ResolverConfig::default(),
        );
        let modes: Vec<_> = engines.iter().map(|e| e.mode()).collect();
        assert_eq!(modes, vec![ExtractionMode::AdaptiveHybrid, ExtractionMode::Baseline]);
    }

    #[test]
    fn empty_text_yields_empty_output() {
        for mode in ExtractionMode::all() {
            let out = engine(*mode).extract("").unwrap();
            assert!(out.date_blocks.is_empty());
            assert!(out.normalized_fields.is_empty());
        }
    }
}

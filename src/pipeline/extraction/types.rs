use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Independent extraction strategy that produced a block or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Rule-only: numeric date formats, line contexts, no reference resolution.
    Baseline,
    /// Every pattern family, both context scopes, nested reference resolution.
    Enhanced,
    /// Chooses families and scopes from the document shape; corrects OCR'd terms.
    AdaptiveHybrid,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Enhanced => "enhanced",
            Self::AdaptiveHybrid => "adaptive_hybrid",
        }
    }

    pub fn all() -> &'static [ExtractionMode] {
        &[Self::Baseline, Self::Enhanced, Self::AdaptiveHybrid]
    }
}

impl std::fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Regex family a date mention was matched by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFamily {
    /// `2024-03-01`
    Iso,
    /// `2024.03.01`
    Dotted,
    /// `2024/03/01`
    Slashed,
    /// `2024년 3월 1일`
    KoreanLong,
    /// `March 1, 2024` / `1 Mar 2024`
    EnglishLong,
    /// `3 months later`, `2주 후`, `the next day`
    Relative,
    /// Relative offset bound to an inline date: `3 months after 2024-03-01`
    Compound,
}

impl PatternFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Dotted => "dotted",
            Self::Slashed => "slashed",
            Self::KoreanLong => "korean_long",
            Self::EnglishLong => "english_long",
            Self::Relative => "relative",
            Self::Compound => "compound",
        }
    }

    /// Families that carry a complete calendar date in the matched text.
    pub fn absolute() -> &'static [PatternFamily] {
        &[
            Self::Iso,
            Self::Dotted,
            Self::Slashed,
            Self::KoreanLong,
            Self::EnglishLong,
        ]
    }

    pub fn all() -> &'static [PatternFamily] {
        &[
            Self::Iso,
            Self::Dotted,
            Self::Slashed,
            Self::KoreanLong,
            Self::EnglishLong,
            Self::Relative,
            Self::Compound,
        ]
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, Self::Relative | Self::Compound)
    }
}

/// Text scope a pattern was evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// A single line.
    Small,
    /// A paragraph spanning several lines.
    Large,
}

/// A single raw date mention extracted from text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateBlock {
    pub raw_text: String,
    pub normalized_date: Option<NaiveDate>,
    /// Byte offset into the full document text.
    pub offset_start: usize,
    pub offset_end: usize,
    pub confidence: f32,
    pub pattern_family: PatternFamily,
    pub source_mode: ExtractionMode,
    pub context: ContextScope,
}

impl DateBlock {
    /// ISO-8601 rendering of the normalized date, if any.
    pub fn iso_date(&self) -> Option<String> {
        self.normalized_date
            .map(|d| d.format("%Y-%m-%d").to_string())
    }

    pub fn is_resolved(&self) -> bool {
        self.normalized_date.is_some()
    }
}

/// Byte range plus local confidence for a normalized medical field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
}

impl TextSpan {
    /// Byte distance between this span and another range (0 when they overlap).
    pub fn distance_to(&self, start: usize, end: usize) -> usize {
        if self.end <= start {
            start - self.end
        } else if end <= self.start {
            self.start - end
        } else {
            0
        }
    }
}

/// A medical field pulled from the text by the normalization family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedField {
    Hospital {
        name: String,
        span: TextSpan,
    },
    Diagnosis {
        name: String,
        code: Option<String>,
        span: TextSpan,
    },
    Procedure {
        name: String,
        span: TextSpan,
    },
}

impl NormalizedField {
    pub fn span(&self) -> &TextSpan {
        match self {
            Self::Hospital { span, .. }
            | Self::Diagnosis { span, .. }
            | Self::Procedure { span, .. } => span,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Hospital { name, .. }
            | Self::Diagnosis { name, .. }
            | Self::Procedure { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_serializes_snake_case() {
        let json = serde_json::to_string(&ExtractionMode::AdaptiveHybrid).unwrap();
        assert_eq!(json, "\"adaptive_hybrid\"");
        assert_eq!(ExtractionMode::AdaptiveHybrid.to_string(), "adaptive_hybrid");
    }

    #[test]
    fn relative_families_flagged() {
        assert!(PatternFamily::Relative.is_relative());
        assert!(PatternFamily::Compound.is_relative());
        assert!(PatternFamily::absolute().iter().all(|f| !f.is_relative()));
    }

    #[test]
    fn span_distance() {
        let span = TextSpan { start: 10, end: 20, confidence: 1.0 };
        assert_eq!(span.distance_to(25, 30), 5);
        assert_eq!(span.distance_to(0, 4), 6);
        assert_eq!(span.distance_to(15, 40), 0);
    }

    #[test]
    fn normalized_field_is_tagged() {
        let field = NormalizedField::Diagnosis {
            name: "gastric cancer".into(),
            code: Some("C16.9".into()),
            span: TextSpan { start: 0, end: 14, confidence: 0.8 },
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["kind"], "diagnosis");
        assert_eq!(json["code"], "C16.9");
        assert_eq!(field.name(), "gastric cancer");
    }

    #[test]
    fn iso_date_rendering() {
        let block = DateBlock {
            raw_text: "2024년 3월 1일".into(),
            normalized_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            offset_start: 0,
            offset_end: 17,
            confidence: 0.9,
            pattern_family: PatternFamily::KoreanLong,
            source_mode: ExtractionMode::Enhanced,
            context: ContextScope::Small,
        };
        assert_eq!(block.iso_date().as_deref(), Some("2024-03-01"));
        assert!(block.is_resolved());
    }
}

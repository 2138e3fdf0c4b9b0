//! Pattern Extractor: regex families for date mentions in OCR text.
//!
//! Every family is evaluated against line-sized contexts and against
//! multi-line paragraphs, so both terse forms (`2024.03.01 외래`) and
//! narrative records spread over several lines are covered. Matches are
//! reported as-is, including overlaps; deduplication belongs to the merger.

use std::sync::LazyLock;

use chrono::{Duration, Months, NaiveDate};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::confidence::{clamp_confidence, score_mention};
use super::types::{ContextScope, DateBlock, ExtractionMode, PatternFamily};
use super::validity::{normalize_ymd, MAX_PLAUSIBLE_YEAR, MIN_PLAUSIBLE_YEAR};

// ═══════════════════════════════════════════
// Patterns
// ═══════════════════════════════════════════

const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

const NUMBER_WORDS: &str =
    "[0-9]{1,3}|an?|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve";

static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})").unwrap());

static DOTTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{4})\.\s?([0-9]{1,2})\.\s?([0-9]{1,2})").unwrap());

static SLASHED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{4})/([0-9]{1,2})/([0-9]{1,2})").unwrap());

static KOREAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{4})\s*년\s*([0-9]{1,2})\s*월\s*([0-9]{1,2})\s*일").unwrap()
});

static ENGLISH_MDY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+([0-9]{{1,2}})(?:st|nd|rd|th)?,?\s+([0-9]{{4}})\b"
    ))
    .unwrap()
});

static ENGLISH_DMY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b([0-9]{{1,2}})(?:st|nd|rd|th)?\s+({MONTHS})\.?,?\s+([0-9]{{4}})\b"
    ))
    .unwrap()
});

static RELATIVE_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({NUMBER_WORDS})\s+(day|week|month|year)s?\s+(later|afterwards|after|ago|before|prior)(?:\s+(?:the\s+)?(?:above|previous|preceding|aforementioned)\b(?:\s+[a-z]+)?)?"
    ))
    .unwrap()
});

static NEXT_DAY_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:the\s+)?(next|following|previous|preceding)\s+day\b").unwrap()
});

static RELATIVE_KO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:(?:상기|이전|직전)\s*(?:[가-힣]+\s*)?)?([0-9]{1,3})\s*(일|주|개월|달|년)\s*(이후|후|뒤|전)",
    )
    .unwrap()
});

static NEXT_DAY_KO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(익일|그\s*다음\s*날|다음\s*날|전날)").unwrap());

static COMPOUND_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({NUMBER_WORDS})\s+(day|week|month|year)s?\s+(after|before|following|prior\s+to)\s+(?:the\s+)?(?:[a-z]+\s+){{0,3}}?([0-9]{{4}}[-./][0-9]{{1,2}}[-./][0-9]{{1,2}})"
    ))
    .unwrap()
});

static COMPOUND_KO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([0-9]{4}[-./][0-9]{1,2}[-./][0-9]{1,2}|[0-9]{4}\s*년\s*[0-9]{1,2}\s*월\s*[0-9]{1,2}\s*일)\s*(?:[가-힣]+\s*)?([0-9]{1,3})\s*(일|주|개월|달|년)\s*(이후|후|뒤|전)",
    )
    .unwrap()
});

/// Lenient absolute date used to recover the anchor embedded in a compound mention.
static EMBEDDED_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{4})\s*[-./년]\s*([0-9]{1,2})\s*[-./월]\s*([0-9]{1,2})").unwrap()
});

/// Blank line between paragraphs, LF or CRLF.
static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t\r]*\n").unwrap());

/// Words that tie a relative mention to an earlier date in the text.
const BACK_REFERENCE_WORDS: &[&str] = &[
    "above", "previous", "preceding", "aforementioned", "상기", "이전", "직전",
];

// ═══════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatternConfig {
    /// Added when the surrounding context mentions a clinical event.
    pub medical_keyword_bonus: f32,
    /// Subtracted for matches found only through paragraph contexts.
    pub large_context_penalty: f32,
    /// Subtracted when the matched text is not a real calendar date.
    pub invalid_date_penalty: f32,
    pub min_year: i32,
    pub max_year: i32,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            medical_keyword_bonus: 0.05,
            large_context_penalty: 0.05,
            invalid_date_penalty: 0.40,
            min_year: MIN_PLAUSIBLE_YEAR,
            max_year: MAX_PLAUSIBLE_YEAR,
        }
    }
}

// ═══════════════════════════════════════════
// Relative offsets
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetUnit {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetDirection {
    Forward,
    Backward,
}

/// A parsed "N units after/before" expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeOffset {
    pub amount: u32,
    pub unit: OffsetUnit,
    pub direction: OffsetDirection,
    /// The phrase explicitly points at an earlier mention ("the above visit", "상기").
    pub refers_back: bool,
}

impl RelativeOffset {
    /// Apply the offset to an anchor date. `None` on calendar overflow.
    pub fn apply(&self, anchor: NaiveDate) -> Option<NaiveDate> {
        let forward = self.direction == OffsetDirection::Forward;
        match self.unit {
            OffsetUnit::Day | OffsetUnit::Week => {
                let days = if self.unit == OffsetUnit::Week {
                    i64::from(self.amount) * 7
                } else {
                    i64::from(self.amount)
                };
                let delta = Duration::days(if forward { days } else { -days });
                anchor.checked_add_signed(delta)
            }
            OffsetUnit::Month | OffsetUnit::Year => {
                let months = if self.unit == OffsetUnit::Year {
                    self.amount.checked_mul(12)?
                } else {
                    self.amount
                };
                if forward {
                    anchor.checked_add_months(Months::new(months))
                } else {
                    anchor.checked_sub_months(Months::new(months))
                }
            }
        }
    }
}

fn parse_amount(raw: &str) -> Option<u32> {
    let lower = raw.trim().to_lowercase();
    if let Ok(n) = lower.parse::<u32>() {
        return Some(n);
    }
    let n = match lower.as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        _ => return None,
    };
    Some(n)
}

fn parse_unit(raw: &str) -> Option<OffsetUnit> {
    match raw.to_lowercase().as_str() {
        "day" | "일" => Some(OffsetUnit::Day),
        "week" | "주" => Some(OffsetUnit::Week),
        "month" | "개월" | "달" => Some(OffsetUnit::Month),
        "year" | "년" => Some(OffsetUnit::Year),
        _ => None,
    }
}

fn parse_direction(raw: &str) -> Option<OffsetDirection> {
    let lower = raw.to_lowercase();
    let word = lower.split_whitespace().next().unwrap_or("");
    match word {
        "later" | "after" | "afterwards" | "following" | "후" | "뒤" | "이후" => {
            Some(OffsetDirection::Forward)
        }
        "ago" | "before" | "prior" | "전" => Some(OffsetDirection::Backward),
        _ => None,
    }
}

fn refers_back(raw: &str) -> bool {
    let lower = raw.to_lowercase();
    BACK_REFERENCE_WORDS.iter().any(|w| lower.contains(w))
}

/// Parse the offset carried by a relative or compound mention.
pub fn parse_offset(raw: &str) -> Option<RelativeOffset> {
    let back = refers_back(raw);

    if let Some(caps) = COMPOUND_EN_RE.captures(raw) {
        return offset_from(&caps[1], &caps[2], &caps[3], back);
    }
    if let Some(caps) = COMPOUND_KO_RE.captures(raw) {
        return offset_from(&caps[2], &caps[3], &caps[4], back);
    }
    if let Some(caps) = RELATIVE_EN_RE.captures(raw) {
        return offset_from(&caps[1], &caps[2], &caps[3], back);
    }
    if let Some(caps) = RELATIVE_KO_RE.captures(raw) {
        return offset_from(&caps[1], &caps[2], &caps[3], back);
    }
    if let Some(caps) = NEXT_DAY_EN_RE.captures(raw) {
        let direction = match caps[1].to_lowercase().as_str() {
            "previous" | "preceding" => OffsetDirection::Backward,
            _ => OffsetDirection::Forward,
        };
        return Some(RelativeOffset {
            amount: 1,
            unit: OffsetUnit::Day,
            direction,
            refers_back: back,
        });
    }
    if let Some(caps) = NEXT_DAY_KO_RE.captures(raw) {
        let direction = if &caps[1] == "전날" {
            OffsetDirection::Backward
        } else {
            OffsetDirection::Forward
        };
        return Some(RelativeOffset {
            amount: 1,
            unit: OffsetUnit::Day,
            direction,
            refers_back: back,
        });
    }
    None
}

fn offset_from(amount: &str, unit: &str, direction: &str, back: bool) -> Option<RelativeOffset> {
    Some(RelativeOffset {
        amount: parse_amount(amount)?,
        unit: parse_unit(unit)?,
        direction: parse_direction(direction)?,
        refers_back: back,
    })
}

/// Recover the absolute date embedded in a compound mention.
pub fn parse_embedded_date(raw: &str, min_year: i32, max_year: i32) -> Option<NaiveDate> {
    let caps = EMBEDDED_DATE_RE.captures(raw)?;
    ymd_from(&caps, 1, 2, 3, min_year, max_year)
}

fn ymd_from(
    caps: &Captures<'_>,
    y: usize,
    m: usize,
    d: usize,
    min_year: i32,
    max_year: i32,
) -> Option<NaiveDate> {
    let year = caps.get(y)?.as_str().parse::<i32>().ok()?;
    let month = caps.get(m)?.as_str().parse::<u32>().ok()?;
    let day = caps.get(d)?.as_str().parse::<u32>().ok()?;
    normalize_ymd(year, month, day, min_year, max_year)
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Numeric dates must not be glued to other digits (`12024-03-01`, `2024-03-011`).
fn digit_bounded(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let before_ok = start == 0 || !bytes[start - 1].is_ascii_digit();
    let after_ok = end >= bytes.len() || !bytes[end].is_ascii_digit();
    before_ok && after_ok
}

// ═══════════════════════════════════════════
// Extractor
// ═══════════════════════════════════════════

/// A slice of the document with its byte offset.
#[derive(Debug, Clone, Copy)]
struct Context<'a> {
    text: &'a str,
    offset: usize,
    scope: ContextScope,
}

/// Line contexts, trailing newline excluded.
fn small_contexts(text: &str) -> Vec<Context<'_>> {
    let mut contexts = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if !trimmed.trim().is_empty() {
            contexts.push(Context {
                text: trimmed,
                offset,
                scope: ContextScope::Small,
            });
        }
        offset += line.len();
    }
    contexts
}

/// Blank-line separated paragraphs with their byte offsets.
pub fn split_paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut paragraphs = Vec::new();
    let mut start = 0;
    for sep in PARAGRAPH_BREAK_RE.find_iter(text) {
        paragraphs.push((start, &text[start..sep.start()]));
        start = sep.end();
    }
    paragraphs.push((start, &text[start..]));
    paragraphs
}

/// Paragraph contexts that span more than one line.
fn large_contexts(text: &str) -> Vec<Context<'_>> {
    split_paragraphs(text)
        .into_iter()
        .filter(|(_, para)| para.trim().contains('\n'))
        .map(|(offset, para)| Context {
            text: para,
            offset,
            scope: ContextScope::Large,
        })
        .collect()
}

/// Scans text with the configured regex families and context scopes.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    mode: ExtractionMode,
    families: Vec<PatternFamily>,
    scopes: Vec<ContextScope>,
    config: PatternConfig,
}

impl PatternExtractor {
    /// Every family, both scopes.
    pub fn new(mode: ExtractionMode, config: PatternConfig) -> Self {
        Self {
            mode,
            families: PatternFamily::all().to_vec(),
            scopes: vec![ContextScope::Small, ContextScope::Large],
            config,
        }
    }

    pub fn with_families(mut self, families: &[PatternFamily]) -> Self {
        self.families = families.to_vec();
        self
    }

    pub fn with_scopes(mut self, scopes: &[ContextScope]) -> Self {
        self.scopes = scopes.to_vec();
        self
    }

    pub fn families(&self) -> &[PatternFamily] {
        &self.families
    }

    /// Extract every date mention. Unmatched or malformed text yields no blocks.
    pub fn extract(&self, text: &str) -> Vec<DateBlock> {
        let mut contexts = Vec::new();
        if self.scopes.contains(&ContextScope::Small) {
            contexts.extend(small_contexts(text));
        }
        if self.scopes.contains(&ContextScope::Large) {
            contexts.extend(large_contexts(text));
        }

        let mut blocks = Vec::new();
        for ctx in &contexts {
            for family in &self.families {
                self.scan_family(*family, ctx, &mut blocks);
            }
        }

        blocks.sort_by(|a, b| {
            a.offset_start
                .cmp(&b.offset_start)
                .then(a.offset_end.cmp(&b.offset_end))
                .then(family_rank(a.pattern_family).cmp(&family_rank(b.pattern_family)))
                .then(scope_rank(a.context).cmp(&scope_rank(b.context)))
        });

        tracing::debug!(
            mode = self.mode.as_str(),
            contexts = contexts.len(),
            blocks = blocks.len(),
            "Pattern extraction complete"
        );

        blocks
    }

    fn scan_family(&self, family: PatternFamily, ctx: &Context<'_>, out: &mut Vec<DateBlock>) {
        let (min, max) = (self.config.min_year, self.config.max_year);
        match family {
            PatternFamily::Iso => self.scan_numeric(&ISO_RE, family, ctx, out),
            PatternFamily::Dotted => self.scan_numeric(&DOTTED_RE, family, ctx, out),
            PatternFamily::Slashed => self.scan_numeric(&SLASHED_RE, family, ctx, out),
            PatternFamily::KoreanLong => self.scan_numeric(&KOREAN_RE, family, ctx, out),
            PatternFamily::EnglishLong => {
                for caps in ENGLISH_MDY_RE.captures_iter(ctx.text) {
                    let date = month_number(&caps[1]).and_then(|m| {
                        let day = caps[2].parse().ok()?;
                        let year = caps[3].parse().ok()?;
                        normalize_ymd(year, m, day, min, max)
                    });
                    self.push(&caps, date, family, ctx, out);
                }
                for caps in ENGLISH_DMY_RE.captures_iter(ctx.text) {
                    let date = month_number(&caps[2]).and_then(|m| {
                        let day = caps[1].parse().ok()?;
                        let year = caps[3].parse().ok()?;
                        normalize_ymd(year, m, day, min, max)
                    });
                    self.push(&caps, date, family, ctx, out);
                }
            }
            PatternFamily::Relative => {
                for re in [&*RELATIVE_EN_RE, &*RELATIVE_KO_RE, &*NEXT_DAY_EN_RE, &*NEXT_DAY_KO_RE] {
                    for caps in re.captures_iter(ctx.text) {
                        self.push_unresolved(&caps, family, ctx, out);
                    }
                }
            }
            PatternFamily::Compound => {
                for re in [&*COMPOUND_EN_RE, &*COMPOUND_KO_RE] {
                    for caps in re.captures_iter(ctx.text) {
                        self.push_unresolved(&caps, family, ctx, out);
                    }
                }
            }
        }
    }

    fn scan_numeric(
        &self,
        re: &Regex,
        family: PatternFamily,
        ctx: &Context<'_>,
        out: &mut Vec<DateBlock>,
    ) {
        for caps in re.captures_iter(ctx.text) {
            let Some(whole) = caps.get(0) else { continue };
            if !digit_bounded(ctx.text, whole.start(), whole.end()) {
                continue;
            }
            let date = ymd_from(&caps, 1, 2, 3, self.config.min_year, self.config.max_year);
            self.push(&caps, date, family, ctx, out);
        }
    }

    fn push(
        &self,
        caps: &Captures<'_>,
        date: Option<NaiveDate>,
        family: PatternFamily,
        ctx: &Context<'_>,
        out: &mut Vec<DateBlock>,
    ) {
        let Some(whole) = caps.get(0) else { return };
        let mut confidence = score_mention(
            family,
            ctx.scope,
            ctx.text,
            self.config.medical_keyword_bonus,
            self.config.large_context_penalty,
        );
        if date.is_none() {
            confidence = clamp_confidence(confidence - self.config.invalid_date_penalty);
        }
        out.push(DateBlock {
            raw_text: whole.as_str().to_string(),
            normalized_date: date,
            offset_start: ctx.offset + whole.start(),
            offset_end: ctx.offset + whole.end(),
            confidence,
            pattern_family: family,
            source_mode: self.mode,
            context: ctx.scope,
        });
    }

    /// Relative mentions are emitted without a date; the resolver fills them.
    fn push_unresolved(
        &self,
        caps: &Captures<'_>,
        family: PatternFamily,
        ctx: &Context<'_>,
        out: &mut Vec<DateBlock>,
    ) {
        let Some(whole) = caps.get(0) else { return };
        if parse_offset(whole.as_str()).is_none() {
            return;
        }
        let confidence = score_mention(
            family,
            ctx.scope,
            ctx.text,
            self.config.medical_keyword_bonus,
            self.config.large_context_penalty,
        );
        out.push(DateBlock {
            raw_text: whole.as_str().to_string(),
            normalized_date: None,
            offset_start: ctx.offset + whole.start(),
            offset_end: ctx.offset + whole.end(),
            confidence,
            pattern_family: family,
            source_mode: self.mode,
            context: ctx.scope,
        });
    }
}

fn family_rank(family: PatternFamily) -> usize {
    PatternFamily::all()
        .iter()
        .position(|f| *f == family)
        .unwrap_or(usize::MAX)
}

fn scope_rank(scope: ContextScope) -> u8 {
    match scope {
        ContextScope::Small => 0,
        ContextScope::Large => 1,
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

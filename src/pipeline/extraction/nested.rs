//! Nested Reference Resolver.
//!
//! Turns relative mentions ("3 months after the above visit", "익일") into
//! absolute dates by tying each one to an anchor: a date already resolved in
//! the same text. With hierarchy building enabled, a resolved reference can
//! itself anchor later references ("admitted 2024-02-01, surgery the next
//! day, discharged 2 weeks later"). Nothing is guessed: a reference with no
//! acceptable anchor is dropped.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::confidence::{clamp_confidence, has_medical_context, thresholds};
use super::patterns::{parse_embedded_date, parse_offset};
use super::types::{DateBlock, PatternFamily};
use super::validity::{MAX_PLAUSIBLE_YEAR, MIN_PLAUSIBLE_YEAR};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    pub enable_hierarchy_building: bool,
    pub enable_ambiguity_resolution: bool,
    pub enable_medical_context: bool,
    /// Resolutions scoring below this are dropped.
    pub confidence_threshold: f32,
    /// Anchors further than this many bytes from the reference are ignored.
    pub max_anchor_distance: usize,
    /// Maximum chain length when references anchor other references.
    pub max_depth: u8,
    /// Added when the text around the reference mentions a clinical event.
    pub medical_context_bonus: f32,
    /// Bytes on either side of the reference inspected for clinical keywords.
    pub context_window: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enable_hierarchy_building: true,
            enable_ambiguity_resolution: true,
            enable_medical_context: true,
            confidence_threshold: thresholds::LOW,
            max_anchor_distance: 400,
            max_depth: 3,
            medical_context_bonus: 0.05,
            context_window: 40,
        }
    }
}

/// A relative reference with the anchor it was resolved against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedReference {
    /// The reference with its `normalized_date` filled in.
    pub block: DateBlock,
    /// Start offset of the anchor mention; `None` for an anchor embedded in a compound mention.
    pub anchor_offset: Option<usize>,
    pub anchor_date: NaiveDate,
    /// 1 when anchored on an absolute date, +1 for each reference in the chain.
    pub depth: u8,
}

/// An anchor candidate: an absolute mention or an already-resolved reference.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    start: usize,
    end: usize,
    date: NaiveDate,
    confidence: f32,
    depth: u8,
}

impl Anchor {
    fn distance_to(&self, block: &DateBlock) -> usize {
        if self.end <= block.offset_start {
            block.offset_start - self.end
        } else if block.offset_end <= self.start {
            self.start - block.offset_end
        } else {
            0
        }
    }

    fn precedes(&self, block: &DateBlock) -> bool {
        self.end <= block.offset_start
    }

    fn overlaps(&self, block: &DateBlock) -> bool {
        self.start < block.offset_end && block.offset_start < self.end
    }
}

pub struct NestedReferenceResolver {
    config: ResolverConfig,
}

impl NestedReferenceResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve every relative/compound block in `blocks` against the resolved
    /// anchors in the same list. Returned in offset order.
    pub fn resolve(&self, text: &str, blocks: &[DateBlock]) -> Vec<ResolvedReference> {
        let mut anchors: Vec<Anchor> = blocks
            .iter()
            .filter(|b| !b.pattern_family.is_relative())
            .filter_map(|b| {
                Some(Anchor {
                    start: b.offset_start,
                    end: b.offset_end,
                    date: b.normalized_date?,
                    confidence: b.confidence,
                    depth: 0,
                })
            })
            .collect();

        let mut pending: Vec<&DateBlock> = blocks
            .iter()
            .filter(|b| b.pattern_family.is_relative() && b.normalized_date.is_none())
            .collect();
        pending.sort_by_key(|b| (b.offset_start, b.offset_end));

        let mut resolved = Vec::new();
        for block in pending {
            match self.resolve_one(text, block, &anchors) {
                Some(reference) => {
                    if self.config.enable_hierarchy_building
                        && reference.depth < self.config.max_depth
                    {
                        anchors.push(Anchor {
                            start: reference.block.offset_start,
                            end: reference.block.offset_end,
                            date: reference.block.normalized_date.unwrap_or(reference.anchor_date),
                            confidence: reference.block.confidence,
                            depth: reference.depth,
                        });
                    }
                    resolved.push(reference);
                }
                None => {
                    tracing::debug!(
                        raw = %block.raw_text,
                        offset = block.offset_start,
                        "Relative reference left unresolved"
                    );
                }
            }
        }

        resolved
    }

    fn resolve_one(
        &self,
        text: &str,
        block: &DateBlock,
        anchors: &[Anchor],
    ) -> Option<ResolvedReference> {
        let offset = parse_offset(&block.raw_text)?;

        let (anchor_date, anchor_offset, anchor_confidence, depth) =
            if block.pattern_family == PatternFamily::Compound {
                let date =
                    parse_embedded_date(&block.raw_text, MIN_PLAUSIBLE_YEAR, MAX_PLAUSIBLE_YEAR)?;
                (date, None, block.confidence, 1)
            } else {
                let anchor = self.pick_anchor(block, offset.refers_back, anchors)?;
                (
                    anchor.date,
                    Some(anchor.start),
                    anchor.confidence,
                    anchor.depth + 1,
                )
            };

        let date = offset.apply(anchor_date)?;
        let confidence = self.score(text, block, anchor_confidence, anchor_offset, depth);
        if confidence < self.config.confidence_threshold {
            tracing::debug!(
                raw = %block.raw_text,
                confidence,
                threshold = self.config.confidence_threshold,
                "Resolution below threshold, dropped"
            );
            return None;
        }

        let mut resolved_block = block.clone();
        resolved_block.normalized_date = Some(date);
        resolved_block.confidence = confidence;

        Some(ResolvedReference {
            block: resolved_block,
            anchor_offset,
            anchor_date,
            depth,
        })
    }

    /// Nearest anchor wins; equal distance → higher confidence; still tied → earlier anchor.
    fn pick_anchor(&self, block: &DateBlock, back_only: bool, anchors: &[Anchor]) -> Option<Anchor> {
        let mut candidates: Vec<Anchor> = anchors
            .iter()
            .filter(|a| !a.overlaps(block))
            .filter(|a| !back_only || a.precedes(block))
            .filter(|a| a.distance_to(block) <= self.config.max_anchor_distance)
            .copied()
            .collect();

        if candidates.is_empty() {
            return None;
        }

        // Distinct anchor dates: the same date mentioned twice is not ambiguous.
        let mut distinct: Vec<NaiveDate> = candidates.iter().map(|a| a.date).collect();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() > 1 && !self.config.enable_ambiguity_resolution {
            return None;
        }

        candidates.sort_by(|a, b| {
            a.distance_to(block)
                .cmp(&b.distance_to(block))
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.start.cmp(&b.start))
        });
        candidates.first().copied()
    }

    fn score(
        &self,
        text: &str,
        block: &DateBlock,
        anchor_confidence: f32,
        anchor_offset: Option<usize>,
        depth: u8,
    ) -> f32 {
        // Geometric mean keeps a weak anchor from being hidden by a strong phrase match.
        let mut score = (block.confidence * anchor_confidence).sqrt();

        if let Some(anchor_start) = anchor_offset {
            let distance = anchor_start.abs_diff(block.offset_start) as f32;
            let max = self.config.max_anchor_distance.max(1) as f32;
            score *= 1.0 - 0.2 * (distance / max).min(1.0);
        }

        // Each hop in a reference chain compounds uncertainty.
        score *= 0.95_f32.powi(i32::from(depth.saturating_sub(1)));

        if self.config.enable_medical_context {
            let window = surrounding(text, block.offset_start, block.offset_end, self.config.context_window);
            if has_medical_context(window) {
                score += self.config.medical_context_bonus;
            }
        }

        clamp_confidence(score)
    }
}

/// Slice around a byte range, widened to char boundaries.
fn surrounding(text: &str, start: usize, end: usize, window: usize) -> &str {
    let mut from = start.saturating_sub(window).min(text.len());
    let mut to = end.saturating_add(window).min(text.len());
    while from > 0 && !text.is_char_boundary(from) {
        from -= 1;
    }
    while to < text.len() && !text.is_char_boundary(to) {
        to += 1;
    }
    &text[from..to]
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

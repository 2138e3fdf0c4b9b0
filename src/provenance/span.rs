//! Source Span Manager: ties merged events back to the OCR block they
//! were most likely read from.

use super::anchors::{anchor_terms, contains_term};
use super::coordinates::spatial_neighbors;
use super::types::{OcrBlock, SourceSpan, SpanConfig};
use crate::pipeline::merge::MergedEvent;

/// Best-matching block for one event, scored by how many anchor terms the
/// block text contains. Ties prefer the block whose `block_index` equals
/// `block_hint`, then input order. `None` when no block scores above zero.
pub fn attach_source_span(
    event: &MergedEvent,
    raw_text: &str,
    block_hint: Option<usize>,
    blocks: &[OcrBlock],
    config: &SpanConfig,
) -> Option<SourceSpan> {
    let terms = anchor_terms(event, raw_text, config.min_anchor_len);
    if terms.is_empty() {
        return None;
    }

    let mut best: Option<(&OcrBlock, usize)> = None;
    for block in blocks {
        let score = terms.iter().filter(|t| contains_term(&block.text, t)).count();
        if score == 0 {
            continue;
        }
        let replace = match best {
            None => true,
            Some((current, best_score)) => {
                score > best_score
                    || (score == best_score
                        && block_hint == Some(block.block_index)
                        && block_hint != Some(current.block_index))
            }
        };
        if replace {
            best = Some((block, score));
        }
    }

    let (block, score) = best?;
    tracing::debug!(
        event_id = %event.id,
        page = block.page,
        block = block.block_index,
        score,
        "Source span attached"
    );
    Some(SourceSpan {
        anchor_terms: terms,
        matched_block: Some(block.block_index),
        match_score: score,
        page: Some(block.page),
        bbox: Some(block.bbox),
        neighbor_blocks: spatial_neighbors(block, blocks, config.neighbor_distance),
    })
}

/// Index of the block covering `offset` when the document text is the
/// block texts joined by newlines in input order.
pub fn block_hint_for_offset(blocks: &[OcrBlock], offset: usize) -> Option<usize> {
    let mut start = 0;
    for block in blocks {
        let end = start + block.text.len();
        if offset < end {
            return (offset >= start).then_some(block.block_index);
        }
        start = end + 1;
    }
    None
}

/// Fill `source_span` on every event. An event that matches nothing keeps
/// `None`; that means provenance unknown, not an extraction failure.
pub fn attach_all(
    mut events: Vec<MergedEvent>,
    raw_text: &str,
    blocks: &[OcrBlock],
    config: &SpanConfig,
) -> Vec<MergedEvent> {
    for event in &mut events {
        let hint = block_hint_for_offset(blocks, event.source_offset);
        event.source_span = attach_source_span(event, raw_text, hint, blocks, config);
    }
    tracing::info!(
        events = events.len(),
        blocks = blocks.len(),
        attachment_rate = calculate_attachment_rate(&events),
        "Source spans attached"
    );
    events
}

/// Fraction of events carrying a source span, 0 for no events.
pub fn calculate_attachment_rate(events: &[MergedEvent]) -> f32 {
    if events.is_empty() {
        return 0.0;
    }
    let attached = events.iter().filter(|e| e.source_span.is_some()).count();
    attached as f32 / events.len() as f32
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::types::ExtractionMode;
    use crate::pipeline::merge::Diagnosis;
    use crate::provenance::types::BoundingBox;
    use uuid::Uuid;

    fn make_event(n: u128, date: &str, hospital: Option<&str>, dx: Option<&str>) -> MergedEvent {
        MergedEvent {
            id: Uuid::from_u128(n),
            date: date.into(),
            hospital: hospital.map(String::from),
            diagnosis: dx.map(|name| Diagnosis { name: name.into(), code: None }),
            procedures: vec![],
            confidence: 0.9,
            contributing_modes: vec![ExtractionMode::Baseline],
            source_offset: 0,
            source_span: None,
        }
    }

    fn make_block(index: usize, page: u32, text: &str, y: f32) -> OcrBlock {
        OcrBlock {
            page,
            block_index: index,
            text: text.into(),
            bbox: BoundingBox { x_min: 0.0, y_min: y, x_max: 100.0, y_max: y + 20.0 },
            confidence: Some(0.9),
        }
    }

    #[test]
    fn highest_scoring_block_wins() {
        let event = make_event(1, "2024-03-01", Some("서울병원"), Some("위암"));
        let blocks = vec![
            make_block(0, 1, "2024.03.01 외래", 0.0),
            make_block(1, 1, "2024.03.01 서울병원 위암", 30.0),
            make_block(2, 2, "unrelated", 0.0),
        ];
        let span = attach_source_span(&event, "", None, &blocks, &SpanConfig::default()).unwrap();
        assert_eq!(span.matched_block, Some(1));
        assert_eq!(span.match_score, 3);
        assert_eq!(span.page, Some(1));
        assert_eq!(span.neighbor_blocks, vec![0]);
    }

    #[test]
    fn tie_prefers_hint_then_first() {
        let event = make_event(1, "2024-03-01", None, None);
        let blocks = vec![make_block(0, 1, "2024-03-01", 0.0), make_block(1, 1, "2024-03-01", 500.0)];
        let config = SpanConfig::default();
        let first = attach_source_span(&event, "", None, &blocks, &config).unwrap();
        assert_eq!(first.matched_block, Some(0));
        let hinted = attach_source_span(&event, "", Some(1), &blocks, &config).unwrap();
        assert_eq!(hinted.matched_block, Some(1));
    }

    #[test]
    fn no_match_is_none() {
        let event = make_event(1, "2024-03-01", None, None);
        let blocks = vec![make_block(0, 1, "2023-01-01", 0.0)];
        assert!(attach_source_span(&event, "", None, &blocks, &SpanConfig::default()).is_none());
        assert!(attach_source_span(&event, "", None, &[], &SpanConfig::default()).is_none());
    }

    #[test]
    fn attachment_is_idempotent_and_read_only() {
        let events = vec![make_event(1, "2024-03-01", None, None), make_event(2, "2025-01-01", None, None)];
        let blocks = vec![make_block(0, 1, "2024-03-01", 0.0)];
        let snapshot = blocks.clone();
        let once = attach_all(events.clone(), "", &blocks, &SpanConfig::default());
        let twice = attach_all(once.clone(), "", &blocks, &SpanConfig::default());
        assert_eq!(once, twice);
        assert_eq!(blocks, snapshot);
        assert!((calculate_attachment_rate(&once) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn more_blocks_never_lower_rate() {
        let events = vec![
            make_event(1, "2024-03-01", None, None),
            make_event(2, "2024-04-01", Some("Hospital B"), None),
        ];
        let mut blocks = vec![make_block(0, 1, "2024-03-01", 0.0)];
        let config = SpanConfig::default();
        let mut previous = 0.0;
        for extra in ["noise", "2024.04.01 Hospital B", "2024-03-01 again"] {
            let rate = calculate_attachment_rate(&attach_all(events.clone(), "", &blocks, &config));
            assert!(rate >= previous);
            previous = rate;
            blocks.push(make_block(blocks.len(), 1, extra, 40.0 * blocks.len() as f32));
        }
        assert_eq!(calculate_attachment_rate(&attach_all(events, "", &blocks, &config)), 1.0);
    }

    #[test]
    fn hint_follows_joined_offsets() {
        let blocks = vec![make_block(7, 1, "abc", 0.0), make_block(9, 1, "defg", 0.0)];
        assert_eq!(block_hint_for_offset(&blocks, 0), Some(7));
        assert_eq!(block_hint_for_offset(&blocks, 3), None);
        assert_eq!(block_hint_for_offset(&blocks, 4), Some(9));
        assert_eq!(block_hint_for_offset(&blocks, 20), None);
    }

    #[test]
    fn empty_rate_is_zero() {
        assert_eq!(calculate_attachment_rate(&[]), 0.0);
    }
}

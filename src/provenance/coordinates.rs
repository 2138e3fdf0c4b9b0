use std::collections::HashSet;

use uuid::Uuid;

use super::span::calculate_attachment_rate;
use super::types::{CoordinateCoverage, Coverage, OcrBlock, SpanCoverage};
use crate::pipeline::merge::MergedEvent;
use crate::timeline::Episode;

/// Block indices on the same page whose centers lie within `max_distance`
/// of `anchor`'s center, excluding `anchor` itself.
pub fn spatial_neighbors(anchor: &OcrBlock, blocks: &[OcrBlock], max_distance: f32) -> Vec<usize> {
    blocks
        .iter()
        .filter(|b| b.page == anchor.page && b.block_index != anchor.block_index)
        .filter(|b| anchor.bbox.center_distance(&b.bbox) <= max_distance)
        .map(|b| b.block_index)
        .collect()
}

/// Match rate over events plus episodes. An episode counts as matched when
/// any of its members carries a source span.
pub fn coordinate_coverage(
    events: &[MergedEvent],
    episodes: &[Episode],
    blocks: &[OcrBlock],
) -> CoordinateCoverage {
    let spanned: HashSet<Uuid> = events
        .iter()
        .filter(|e| e.source_span.is_some())
        .map(|e| e.id)
        .collect();

    let matched_episodes = episodes
        .iter()
        .filter(|ep| ep.member_event_ids.iter().any(|id| spanned.contains(id)))
        .count();

    let total_items = events.len() + episodes.len();
    let matched_items = spanned.len() + matched_episodes;
    CoordinateCoverage {
        match_rate: if total_items == 0 {
            0.0
        } else {
            matched_items as f32 / total_items as f32
        },
        matched_items,
        total_items,
        blocks_total: blocks.len(),
    }
}

/// Span attachment rate and coordinate coverage together.
pub fn coverage_report(events: &[MergedEvent], episodes: &[Episode], blocks: &[OcrBlock]) -> Coverage {
    Coverage {
        source_span: SpanCoverage {
            rate: calculate_attachment_rate(events),
        },
        coordinates: coordinate_coverage(events, episodes, blocks),
    }
}

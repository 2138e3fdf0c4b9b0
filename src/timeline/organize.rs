//! Date Organizer: window filter, stable sort and same-day grouping.
//!
//! Total over its input: an event whose date cannot be parsed is never
//! filtered and always sorts last, whichever the direction.

use chrono::{Duration, NaiveDate};

use super::types::{DateGroup, OrganizeOptions, OrganizeStatistics, OrganizedData, SortDirection};
use crate::pipeline::merge::MergedEvent;

/// Earliest date kept for the options, `None` when nothing is filtered.
pub fn window_start(options: &OrganizeOptions) -> Option<NaiveDate> {
    let enrollment = options.enrollment_date?;
    let days = options.period_type.days()?;
    enrollment.checked_sub_signed(Duration::days(days))
}

pub fn sort_and_filter(events: Vec<MergedEvent>, options: &OrganizeOptions) -> OrganizedData {
    let input = events.len();
    let start = window_start(options);

    let mut dated: Vec<(NaiveDate, MergedEvent)> = Vec::new();
    let mut undated: Vec<MergedEvent> = Vec::new();
    let mut filtered_count = 0;

    for event in events {
        match event.parsed_date() {
            Some(date) => {
                if start.is_some_and(|s| date < s) {
                    tracing::debug!(date = %date, event_id = %event.id, "Event outside disclosure window");
                    filtered_count += 1;
                } else {
                    dated.push((date, event));
                }
            }
            None => {
                tracing::debug!(date = %event.date, event_id = %event.id, "Unparseable event date kept");
                undated.push(event);
            }
        }
    }

    // sort_by is stable: equal dates keep merge order in both directions.
    match options.sort_direction {
        SortDirection::Asc => dated.sort_by(|a, b| a.0.cmp(&b.0)),
        SortDirection::Desc => dated.sort_by(|a, b| b.0.cmp(&a.0)),
    }

    let groups = options.group_by_date.then(|| group_by_date(&dated, &undated));

    let kept: Vec<MergedEvent> = dated
        .into_iter()
        .map(|(_, e)| e)
        .chain(undated)
        .collect();

    debug_assert_eq!(kept.len() + filtered_count, input, "organizer lost events");

    let statistics = OrganizeStatistics {
        processed_groups: match &groups {
            Some(groups) => groups.len(),
            None => count_distinct_days(&kept),
        },
        confidence: mean_confidence(&kept),
        filtering_rate: if input == 0 {
            0.0
        } else {
            filtered_count as f32 / input as f32
        },
    };

    tracing::info!(
        input,
        kept = kept.len(),
        filtered = filtered_count,
        period = %options.period_type,
        "Organize complete"
    );

    OrganizedData {
        events: kept,
        groups,
        filtered_count,
        statistics,
    }
}

fn group_by_date(dated: &[(NaiveDate, MergedEvent)], undated: &[MergedEvent]) -> Vec<DateGroup> {
    let mut groups: Vec<DateGroup> = Vec::new();
    for (date, event) in dated {
        match groups.last_mut() {
            Some(group) if group.date == Some(*date) => group.events.push(event.clone()),
            _ => groups.push(DateGroup {
                date: Some(*date),
                events: vec![event.clone()],
            }),
        }
    }
    if !undated.is_empty() {
        groups.push(DateGroup {
            date: None,
            events: undated.to_vec(),
        });
    }
    groups
}

fn count_distinct_days(events: &[MergedEvent]) -> usize {
    let mut days: Vec<Option<NaiveDate>> = events.iter().map(|e| e.parsed_date()).collect();
    days.sort();
    days.dedup();
    days.len()
}

fn mean_confidence(events: &[MergedEvent]) -> f32 {
    if events.is_empty() {
        return 0.0;
    }
    events.iter().map(|e| e.confidence).sum::<f32>() / events.len() as f32
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

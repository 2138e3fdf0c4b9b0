//! Episode Clusterer: splits the dated event sequence into episodes on
//! hospital changes and on long gaps within a diagnosis category.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::{categorize, default_rules, CategoryRule, FALLBACK_CATEGORY};
use super::types::{Episode, KeyEvent};
use crate::pipeline::merge::{MergedEvent, MEDCHRON_NAMESPACE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// A gap strictly longer than this starts a new episode.
    pub gap_threshold_days: i64,
    pub category_rules: Vec<CategoryRule>,
    pub fallback_category: String,
    pub max_key_events: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            gap_threshold_days: 90,
            category_rules: default_rules(),
            fallback_category: FALLBACK_CATEGORY.into(),
            max_key_events: 5,
        }
    }
}

impl ClusterConfig {
    fn category_of(&self, event: &MergedEvent) -> Option<String> {
        let diagnosis = event.diagnosis.as_ref()?;
        Some(
            categorize(diagnosis, &self.category_rules)
                .unwrap_or(&self.fallback_category)
                .to_string(),
        )
    }
}

struct Member<'a> {
    date: NaiveDate,
    event: &'a MergedEvent,
    category: Option<String>,
}

/// Open episode while walking the sorted sequence.
#[derive(Default)]
struct Builder<'a> {
    members: Vec<Member<'a>>,
    hospital: Option<String>,
    last_by_category: HashMap<String, NaiveDate>,
}

impl<'a> Builder<'a> {
    fn last_date(&self) -> Option<NaiveDate> {
        self.members.last().map(|m| m.date)
    }

    fn breaks_on(&self, member: &Member<'_>, gap_threshold_days: i64) -> bool {
        let Some(last) = self.last_date() else {
            return false;
        };
        if let (Some(current), Some(next)) = (&self.hospital, &member.event.hospital) {
            if normalize_hospital(current) != normalize_hospital(next) {
                return true;
            }
        }
        let previous = member
            .category
            .as_ref()
            .and_then(|c| self.last_by_category.get(c).copied())
            .unwrap_or(last);
        (member.date - previous).num_days() > gap_threshold_days
    }

    fn push(&mut self, member: Member<'a>) {
        if self.hospital.is_none() {
            self.hospital = member.event.hospital.clone();
        }
        if let Some(category) = &member.category {
            self.last_by_category.insert(category.clone(), member.date);
        }
        self.members.push(member);
    }
}

fn normalize_hospital(name: &str) -> String {
    name.split_whitespace().collect::<String>().to_lowercase()
}

/// Cluster merged events into episodes ordered by start date.
///
/// Events are stable-sorted by date, so equal dates keep input order.
/// Events without a parseable date are skipped.
pub fn cluster_events(events: &[MergedEvent], config: &ClusterConfig) -> Vec<Episode> {
    let mut dated: Vec<Member<'_>> = Vec::with_capacity(events.len());
    for event in events {
        match event.parsed_date() {
            Some(date) => dated.push(Member {
                date,
                event,
                category: config.category_of(event),
            }),
            None => {
                tracing::warn!(event_id = %event.id, date = %event.date, "Skipping event with unparseable date");
            }
        }
    }
    dated.sort_by_key(|m| m.date);

    let mut episodes = Vec::new();
    let mut current = Builder::default();
    for member in dated {
        if current.breaks_on(&member, config.gap_threshold_days) {
            let finished = std::mem::take(&mut current);
            episodes.extend(finish_episode(finished, config));
        }
        current.push(member);
    }
    episodes.extend(finish_episode(current, config));

    tracing::info!(
        events = events.len(),
        episodes = episodes.len(),
        gap_threshold_days = config.gap_threshold_days,
        "Clustering complete"
    );
    episodes
}

fn finish_episode(builder: Builder<'_>, config: &ClusterConfig) -> Option<Episode> {
    let members = builder.members;
    let start_date = members.first()?.date;
    let end_date = members.last()?.date;

    let category = dominant_category(&members).unwrap_or_else(|| config.fallback_category.clone());
    let visit_count = members.iter().map(|m| m.date).collect::<HashSet<_>>().len();
    let member_event_ids: Vec<Uuid> = members.iter().map(|m| m.event.id).collect();
    let key_events = key_events(&members, config.max_key_events);

    let id_source = member_event_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let id = Uuid::new_v5(&MEDCHRON_NAMESPACE, format!("episode|{id_source}").as_bytes());

    let summary = build_summary(
        &category,
        builder.hospital.as_deref(),
        start_date,
        end_date,
        visit_count,
        &key_events,
    );

    tracing::debug!(
        episode_id = %id,
        category = %category,
        members = members.len(),
        start = %start_date,
        end = %end_date,
        "Episode closed"
    );

    Some(Episode {
        id,
        category,
        hospital: builder.hospital,
        start_date,
        end_date,
        visit_count,
        key_events,
        member_event_ids,
        summary,
    })
}

/// Most frequent member category; ties go to the one seen first.
fn dominant_category(members: &[Member<'_>]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for category in members.iter().filter_map(|m| m.category.as_deref()) {
        match counts.iter_mut().find(|(c, _)| *c == category) {
            Some((_, n)) => *n += 1,
            None => counts.push((category, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (category, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((category, n));
        }
    }
    best.map(|(c, _)| c.to_string())
}

/// First and last member, plus members that introduce a new diagnosis or
/// record a procedure. When over `cap`, the last member is always kept.
fn key_events(members: &[Member<'_>], cap: usize) -> Vec<KeyEvent> {
    let mut seen_diagnoses: HashSet<String> = HashSet::new();
    let mut picked: Vec<usize> = Vec::new();
    let last = members.len().saturating_sub(1);

    for (i, member) in members.iter().enumerate() {
        let new_diagnosis = member
            .event
            .diagnosis_name()
            .is_some_and(|name| seen_diagnoses.insert(name.to_lowercase()));
        if i == 0 || i == last || new_diagnosis || !member.event.procedures.is_empty() {
            picked.push(i);
        }
    }

    if cap == 0 {
        return Vec::new();
    }
    if picked.len() > cap {
        picked.truncate(cap - 1);
        picked.push(last);
    }

    picked
        .into_iter()
        .map(|i| {
            let member = &members[i];
            KeyEvent {
                event_id: member.event.id,
                date: member.date,
                label: key_event_label(member.event),
            }
        })
        .collect()
}

fn key_event_label(event: &MergedEvent) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(diagnosis) = &event.diagnosis {
        match &diagnosis.code {
            Some(code) => parts.push(format!("{} ({code})", diagnosis.name)),
            None => parts.push(diagnosis.name.clone()),
        }
    }
    if !event.procedures.is_empty() {
        parts.push(event.procedures.join(", "));
    }
    if parts.is_empty() {
        "Visit".into()
    } else {
        parts.join("; ")
    }
}

fn build_summary(
    category: &str,
    hospital: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
    visit_count: usize,
    key_events: &[KeyEvent],
) -> String {
    let place = hospital.unwrap_or("unknown hospital");
    let range = if start == end {
        start.to_string()
    } else {
        format!("{start} to {end}")
    };
    let visits = if visit_count == 1 { "visit" } else { "visits" };
    let highlights = key_events
        .iter()
        .map(|k| format!("{} {}", k.date, k.label))
        .collect::<Vec<_>>()
        .join("; ");
    format!("{category} at {place}, {range} ({visit_count} {visits}): {highlights}")
}

/// Check episode invariants against the events they were built from:
/// non-empty membership, `start <= end`, every member dated inside the
/// range, and episodes ordered by start date.
pub fn validate_episodes(episodes: &[Episode], events: &[MergedEvent]) -> Result<(), String> {
    let dates: HashMap<Uuid, Option<NaiveDate>> =
        events.iter().map(|e| (e.id, e.parsed_date())).collect();

    let mut previous_start: Option<NaiveDate> = None;
    for episode in episodes {
        if episode.member_event_ids.is_empty() {
            return Err(format!("episode {} has no members", episode.id));
        }
        if episode.start_date > episode.end_date {
            return Err(format!(
                "episode {} starts {} after it ends {}",
                episode.id, episode.start_date, episode.end_date
            ));
        }
        if previous_start.is_some_and(|p| p > episode.start_date) {
            return Err(format!("episode {} is out of order", episode.id));
        }
        previous_start = Some(episode.start_date);

        for member in &episode.member_event_ids {
            match dates.get(member) {
                Some(Some(date)) if *date >= episode.start_date && *date <= episode.end_date => {}
                Some(Some(date)) => {
                    return Err(format!(
                        "event {member} dated {date} lies outside episode {}",
                        episode.id
                    ))
                }
                _ => return Err(format!("episode {} references unknown event {member}", episode.id)),
            }
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

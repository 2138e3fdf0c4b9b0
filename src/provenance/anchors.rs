//! Anchor terms: the strings an event is expected to appear as on the page.

use chrono::Datelike;

use crate::pipeline::merge::MergedEvent;

/// Every surface form an OCR'd record might use for the event's date.
pub fn date_variants(date: &str) -> Vec<String> {
    let Some(parsed) = chrono::NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok() else {
        return vec![date.trim().to_string()];
    };
    let (y, m, d) = (parsed.year(), parsed.month(), parsed.day());
    vec![
        format!("{y:04}-{m:02}-{d:02}"),
        format!("{y:04}.{m:02}.{d:02}"),
        format!("{y:04}/{m:02}/{d:02}"),
        format!("{y}.{m}.{d}"),
        format!("{y}년 {m}월 {d}일"),
        format!("{y}년{m}월{d}일"),
    ]
}

/// Case-insensitive containment.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.to_lowercase().contains(&term.to_lowercase())
}

/// Anchor terms for an event, in date, hospital, diagnosis, procedure order.
///
/// Terms shorter than `min_len` characters are dropped. With a non-empty
/// `raw_text`, terms absent from it are pruned unless none would remain.
pub fn anchor_terms(event: &MergedEvent, raw_text: &str, min_len: usize) -> Vec<String> {
    let mut candidates = date_variants(&event.date);
    if let Some(hospital) = &event.hospital {
        candidates.push(hospital.clone());
    }
    if let Some(diagnosis) = &event.diagnosis {
        candidates.push(diagnosis.name.clone());
        if let Some(code) = &diagnosis.code {
            candidates.push(code.clone());
        }
    }
    candidates.extend(event.procedures.iter().cloned());

    let mut terms: Vec<String> = Vec::new();
    for term in candidates {
        let term = term.trim().to_string();
        if term.chars().count() < min_len || terms.contains(&term) {
            continue;
        }
        terms.push(term);
    }

    if raw_text.is_empty() {
        return terms;
    }
    let present: Vec<String> = terms
        .iter()
        .filter(|t| contains_term(raw_text, t))
        .cloned()
        .collect();
    if present.is_empty() {
        terms
    } else {
        present
    }
}

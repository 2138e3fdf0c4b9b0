//! Fuses the selected date result and medical result into `MergedEvent`s.
//!
//! Every normalized date block becomes one observation. Each medical field is
//! owned by the nearest date mention preceding it (records lead with the
//! date), or by the nearest following one when nothing precedes it within the
//! association window. An observation takes the nearest owned hospital and
//! diagnosis and every owned procedure. Observations sharing
//! (date, hospital, diagnosis) are collapsed into one event.

use std::collections::HashMap;

use uuid::Uuid;

use super::types::{Diagnosis, MergeOptions, MergeStrategy, MergedEvent, MEDCHRON_NAMESPACE};
use crate::pipeline::engine::types::EngineResult;
use crate::pipeline::extraction::confidence::clamp_confidence;
use crate::pipeline::extraction::types::{DateBlock, ExtractionMode, NormalizedField};

/// Weight floor so a zero-confidence engine still counts.
const MIN_ENGINE_WEIGHT: f32 = 0.05;

/// Dedup key: ISO date plus case-folded hospital and diagnosis.
type EventKey = (String, String, String);

struct Observation<'a> {
    block: &'a DateBlock,
    hospital: Option<&'a NormalizedField>,
    diagnosis: Option<&'a NormalizedField>,
    procedures: Vec<&'a NormalizedField>,
}

struct Accumulator {
    key: EventKey,
    date: String,
    hospital: Option<String>,
    diagnosis: Option<Diagnosis>,
    procedures: Vec<String>,
    weighted_sum: f32,
    weight_total: f32,
    modes: Vec<ExtractionMode>,
    source_offset: usize,
}

impl Accumulator {
    fn add_mode(&mut self, mode: ExtractionMode) {
        if !self.modes.contains(&mode) {
            self.modes.push(mode);
        }
    }
}

/// Fuse the best date result with the best medical result.
/// No date result → no events. Output is in first-mention order.
pub fn merge_results(
    date_result: Option<&EngineResult>,
    medical_result: Option<&EngineResult>,
    options: &MergeOptions,
) -> Vec<MergedEvent> {
    let Some(date_result) = date_result else {
        tracing::debug!("No date result selected, nothing to merge");
        return Vec::new();
    };

    let fields: &[NormalizedField] = medical_result
        .map(|r| r.normalized_fields.as_slice())
        .unwrap_or(&[]);
    let date_weight = date_result.confidence.max(MIN_ENGINE_WEIGHT);
    let medical_weight = medical_result
        .map(|r| r.confidence.max(MIN_ENGINE_WEIGHT))
        .unwrap_or(MIN_ENGINE_WEIGHT);

    let mut blocks: Vec<&DateBlock> = date_result
        .date_blocks
        .iter()
        .filter(|b| b.normalized_date.is_some())
        .collect();
    blocks.sort_by_key(|b| (b.offset_start, b.offset_end));

    let owners = assign_owners(&blocks, fields, options.association_window);

    let mut index: HashMap<EventKey, usize> = HashMap::new();
    let mut events: Vec<Accumulator> = Vec::new();

    for block in blocks {
        let Some(date) = block.iso_date() else { continue };
        let obs = observe(block, fields, &owners);

        let hospital = obs.hospital.map(|f| f.name().to_string());
        let diagnosis = obs.diagnosis.and_then(|f| match f {
            NormalizedField::Diagnosis { name, code, .. } => Some(Diagnosis {
                name: name.clone(),
                code: code.clone(),
            }),
            _ => None,
        });
        let key: EventKey = (
            date.clone(),
            hospital.as_deref().map(str::to_lowercase).unwrap_or_default(),
            diagnosis.as_ref().map(|d| d.name.to_lowercase()).unwrap_or_default(),
        );

        let observed = observation_confidence(&obs, date_weight, medical_weight);
        let weight = match options.strategy {
            MergeStrategy::ConfidenceWeighted => observed.max(f32::EPSILON),
        };

        let slot = *index.entry(key.clone()).or_insert_with(|| {
            events.push(Accumulator {
                key,
                date,
                hospital,
                diagnosis: None,
                procedures: Vec::new(),
                weighted_sum: 0.0,
                weight_total: 0.0,
                modes: Vec::new(),
                source_offset: block.offset_start,
            });
            events.len() - 1
        });

        let acc = &mut events[slot];
        acc.weighted_sum += observed * weight;
        acc.weight_total += weight;
        acc.add_mode(block.source_mode);
        acc.add_mode(date_result.mode);

        // A coded observation upgrades an uncoded one with the same name.
        if let Some(dx) = diagnosis {
            match &mut acc.diagnosis {
                None => acc.diagnosis = Some(dx),
                Some(existing) if existing.code.is_none() => existing.code = dx.code,
                Some(_) => {}
            }
        }
        for p in &obs.procedures {
            let name = p.name().to_string();
            if !acc.procedures.contains(&name) {
                acc.procedures.push(name);
            }
        }
        if let Some(medical) = medical_result {
            if obs.hospital.is_some() || obs.diagnosis.is_some() || !obs.procedures.is_empty() {
                acc.add_mode(medical.mode);
            }
        }
    }

    let merged: Vec<MergedEvent> = events.into_iter().map(finish).collect();

    tracing::info!(
        date_mode = date_result.mode.as_str(),
        medical_mode = medical_result.map(|r| r.mode.as_str()).unwrap_or("none"),
        events = merged.len(),
        "Merge complete"
    );

    merged
}

/// Credit every successful engine that also read an event's date, then put
/// the modes in a fixed order. Which engine won selection no longer shows in
/// the output when several engines agree.
pub fn credit_corroborating_modes(events: &mut [MergedEvent], results: &[EngineResult]) {
    for event in events.iter_mut() {
        for result in results.iter().filter(|r| r.success) {
            let corroborates = result
                .date_blocks
                .iter()
                .any(|b| b.iso_date().as_deref() == Some(event.date.as_str()));
            if corroborates && !event.contributing_modes.contains(&result.mode) {
                event.contributing_modes.push(result.mode);
            }
        }
        event.contributing_modes.sort();
    }
}

type Position = (usize, usize);

fn position(block: &DateBlock) -> Position {
    (block.offset_start, block.offset_end)
}

/// Owning date position for every field, `None` when no date is within `window`.
fn assign_owners(blocks: &[&DateBlock], fields: &[NormalizedField], window: usize) -> Vec<Option<Position>> {
    fields
        .iter()
        .map(|field| {
            let span = field.span();
            if let Some(b) = blocks
                .iter()
                .find(|b| b.offset_start < span.end && span.start < b.offset_end)
            {
                return Some(position(b));
            }
            let preceding = blocks
                .iter()
                .filter(|b| b.offset_end <= span.start && span.start - b.offset_end <= window)
                .max_by_key(|b| b.offset_end);
            let following = || {
                blocks
                    .iter()
                    .filter(|b| b.offset_start >= span.end && b.offset_start - span.end <= window)
                    .min_by_key(|b| b.offset_start)
            };
            preceding.or_else(following).map(|b| position(b))
        })
        .collect()
}

fn observe<'a>(
    block: &'a DateBlock,
    fields: &'a [NormalizedField],
    owners: &[Option<Position>],
) -> Observation<'a> {
    let here = Some(position(block));
    let owned: Vec<&'a NormalizedField> = fields
        .iter()
        .zip(owners)
        .filter(|(_, owner)| **owner == here)
        .map(|(f, _)| f)
        .collect();

    let distance = |f: &NormalizedField| f.span().distance_to(block.offset_start, block.offset_end);
    let nearest = |want: fn(&NormalizedField) -> bool| {
        owned
            .iter()
            .copied()
            .filter(|f| want(f))
            .min_by_key(|f| distance(f))
    };

    Observation {
        block,
        hospital: nearest(|f| matches!(f, NormalizedField::Hospital { .. })),
        diagnosis: nearest(|f| matches!(f, NormalizedField::Diagnosis { .. })),
        procedures: owned
            .iter()
            .copied()
            .filter(|f| matches!(f, NormalizedField::Procedure { .. }))
            .collect(),
    }
}

/// Block confidence blended with the attached fields' confidence, each side
/// weighted by its engine's self-reported confidence.
fn observation_confidence(obs: &Observation<'_>, date_weight: f32, medical_weight: f32) -> f32 {
    let attached: Vec<f32> = obs
        .hospital
        .iter()
        .chain(obs.diagnosis.iter())
        .chain(obs.procedures.iter())
        .map(|f| f.span().confidence)
        .collect();

    if attached.is_empty() {
        return clamp_confidence(obs.block.confidence);
    }

    let field_mean = attached.iter().sum::<f32>() / attached.len() as f32;
    clamp_confidence(
        (date_weight * obs.block.confidence + medical_weight * field_mean)
            / (date_weight + medical_weight),
    )
}

fn finish(acc: Accumulator) -> MergedEvent {
    let confidence = if acc.weight_total > 0.0 {
        clamp_confidence(acc.weighted_sum / acc.weight_total)
    } else {
        0.0
    };
    let id = Uuid::new_v5(
        &MEDCHRON_NAMESPACE,
        format!("event|{}|{}|{}", acc.key.0, acc.key.1, acc.key.2).as_bytes(),
    );
    debug_assert!(!acc.modes.is_empty(), "merged event without contributing mode");

    MergedEvent {
        id,
        date: acc.date,
        hospital: acc.hospital,
        diagnosis: acc.diagnosis,
        procedures: acc.procedures,
        confidence,
        contributing_modes: acc.modes,
        source_offset: acc.source_offset,
        source_span: None,
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::types::EngineOutput;
    use crate::pipeline::engine::{ExtractionEngine, ModeEngine};
    use crate::pipeline::extraction::nested::ResolverConfig;
    use crate::pipeline::extraction::patterns::PatternConfig;

    fn run(mode: ExtractionMode, text: &str) -> EngineResult {
        let engine = ModeEngine::new(mode, PatternConfig::default(), ResolverConfig::default());
        EngineResult::succeeded(mode, engine.extract(text).unwrap(), 10)
    }

    #[test]
    fn iso_and_korean_forms_collapse() {
        let text = "외래 2024-03-01 진료\n입원 2024년 3월 1일";
        let result = run(ExtractionMode::Enhanced, text);
        let events = merge_results(Some(&result), Some(&result), &MergeOptions::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date, "2024-03-01");
        assert_eq!(events[0].contributing_modes, vec![ExtractionMode::Enhanced]);
    }

    #[test]
    fn fields_associate_with_nearest_date() {
        let text = "2024.04.09 서울병원 위암 (C16.9) 진단\n2025.01.10 부산의원 고혈압 처방";
        let dates = run(ExtractionMode::Baseline, text);
        let medical = run(ExtractionMode::Enhanced, text);
        let events = merge_results(Some(&dates), Some(&medical), &MergeOptions::default());
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].hospital.as_deref(), Some("서울병원"));
        assert_eq!(
            events[0].diagnosis,
            Some(Diagnosis { name: "Gastric cancer".into(), code: Some("C16.9".into()) })
        );
        assert_eq!(events[1].hospital.as_deref(), Some("부산의원"));
        assert_eq!(events[1].diagnosis_name(), Some("Hypertension"));
        assert_eq!(
            events[0].contributing_modes,
            vec![ExtractionMode::Baseline, ExtractionMode::Enhanced]
        );
    }

    #[test]
    fn same_date_different_hospital_kept_apart() {
        let text = "2024.04.09 서울병원 외래\n\n\n\n2024.04.09 부산의원 외래";
        let result = run(ExtractionMode::Enhanced, text);
        let options = MergeOptions { association_window: 20, ..MergeOptions::default() };
        let events = merge_results(Some(&result), Some(&result), &options);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn window_limits_association() {
        let text = format!("2024-01-05 visit{}서울병원", " ".repeat(300));
        let result = run(ExtractionMode::Enhanced, &text);
        let events = merge_results(Some(&result), Some(&result), &MergeOptions::default());
        assert_eq!(events.len(), 1);
        assert!(events[0].hospital.is_none());
    }

    #[test]
    fn missing_date_result_is_empty() {
        let medical = run(ExtractionMode::Enhanced, "서울병원 위암");
        assert!(merge_results(None, Some(&medical), &MergeOptions::default()).is_empty());
    }

    #[test]
    fn missing_medical_result_still_yields_dates() {
        let dates = run(ExtractionMode::Baseline, "2024-02-02 and 2024-02-03");
        let events = merge_results(Some(&dates), None, &MergeOptions::default());
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.hospital.is_none() && e.diagnosis.is_none()));
    }

    #[test]
    fn unnormalized_blocks_never_become_events() {
        let dates = run(ExtractionMode::Baseline, "2025.03.45 검사");
        assert_eq!(dates.date_blocks.len(), 1);
        assert!(merge_results(Some(&dates), None, &MergeOptions::default()).is_empty());
    }

    #[test]
    fn conservation_and_bounds() {
        let text = "2024-01-01 서울병원\n2024.01.01 서울병원\n2024/01/02 위암\nJanuary 3, 2024 gastric cancer";
        let result = run(ExtractionMode::Enhanced, text);
        let events = merge_results(Some(&result), Some(&result), &MergeOptions::default());
        assert!(events.len() <= result.date_blocks.len());
        for e in &events {
            assert!((0.0..=1.0).contains(&e.confidence));
            assert!(!e.contributing_modes.is_empty());
        }
    }

    #[test]
    fn ids_are_deterministic() {
        let text = "2024-03-01 서울병원";
        let a = merge_results(Some(&run(ExtractionMode::Enhanced, text)), None, &MergeOptions::default());
        let b = merge_results(Some(&run(ExtractionMode::Enhanced, text)), None, &MergeOptions::default());
        assert_eq!(a[0].id, b[0].id);
        assert_eq!(a, b);
    }

    #[test]
    fn corroborating_engines_are_credited_in_fixed_order() {
        let text = "2024년 3월 1일 서울병원 위암 진단\n2024-05-02 재진";
        let enhanced = run(ExtractionMode::Enhanced, text);
        let adaptive = run(ExtractionMode::AdaptiveHybrid, text);
        let baseline = run(ExtractionMode::Baseline, text);
        let mut failed = run(ExtractionMode::Baseline, text);
        failed.success = false;

        let results = [adaptive.clone(), baseline.clone(), enhanced.clone()];
        let mut from_enhanced = merge_results(Some(&enhanced), Some(&enhanced), &MergeOptions::default());
        let mut from_adaptive = merge_results(Some(&adaptive), Some(&adaptive), &MergeOptions::default());
        credit_corroborating_modes(&mut from_enhanced, &results);
        credit_corroborating_modes(&mut from_adaptive, &results);

        let modes = |events: &[MergedEvent]| {
            events.iter().map(|e| e.contributing_modes.clone()).collect::<Vec<_>>()
        };
        assert_eq!(from_enhanced.len(), 2);
        assert_eq!(modes(&from_enhanced), modes(&from_adaptive));
        // Baseline has no Korean long-form pattern, so it only reads the ISO date.
        assert_eq!(
            from_enhanced[0].contributing_modes,
            vec![ExtractionMode::Enhanced, ExtractionMode::AdaptiveHybrid]
        );
        assert_eq!(
            from_enhanced[1].contributing_modes,
            vec![ExtractionMode::Baseline, ExtractionMode::Enhanced, ExtractionMode::AdaptiveHybrid]
        );

        let mut only_failed = merge_results(Some(&enhanced), None, &MergeOptions::default());
        credit_corroborating_modes(&mut only_failed, &[failed]);
        assert!(only_failed.iter().all(|e| e.contributing_modes == vec![ExtractionMode::Enhanced]));
    }

    #[test]
    fn weighted_fusion_of_duplicates() {
        let make = |conf: f32, start: usize| DateBlock {
            raw_text: "2024-03-01".into(),
            normalized_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1),
            offset_start: start,
            offset_end: start + 10,
            confidence: conf,
            pattern_family: crate::pipeline::extraction::types::PatternFamily::Iso,
            source_mode: ExtractionMode::Baseline,
            context: crate::pipeline::extraction::types::ContextScope::Small,
        };
        let result = EngineResult::succeeded(
            ExtractionMode::Baseline,
            EngineOutput { date_blocks: vec![make(0.9, 0), make(0.3, 50)], normalized_fields: vec![] },
            5,
        );
        let events = merge_results(Some(&result), None, &MergeOptions::default());
        assert_eq!(events.len(), 1);
        // (0.9·0.9 + 0.3·0.3) / (0.9 + 0.3) = 0.75
        assert!((events[0].confidence - 0.75).abs() < 1e-5);
        assert_eq!(events[0].source_offset, 0);
    }
}

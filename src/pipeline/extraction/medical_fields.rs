//! Medical Field Normalizer: hospitals, diagnoses and procedures.
//!
//! The "medical-normalization" extraction family. Each finding is a
//! [`NormalizedField`] carrying its byte span in the source text so the
//! merger can associate it with nearby dates.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::confidence::clamp_confidence;
use super::medical_correction::{CorrectedText, TermCorrector};
use super::types::{NormalizedField, TextSpan};

// ═══════════════════════════════════════════
// Dictionaries
// ═══════════════════════════════════════════

/// A diagnosis with its ICD-10 code and the surface forms it appears under.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisEntry {
    pub name: &'static str,
    pub code: &'static str,
    pub aliases: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct ProcedureEntry {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

pub const DIAGNOSES: &[DiagnosisEntry] = &[
    DiagnosisEntry { name: "Gastric cancer", code: "C16.9", aliases: &["gastric cancer", "stomach cancer", "gastric carcinoma", "위암"] },
    DiagnosisEntry { name: "Colorectal cancer", code: "C18.9", aliases: &["colon cancer", "colorectal cancer", "대장암"] },
    DiagnosisEntry { name: "Lung cancer", code: "C34.9", aliases: &["lung cancer", "폐암"] },
    DiagnosisEntry { name: "Breast cancer", code: "C50.9", aliases: &["breast cancer", "유방암"] },
    DiagnosisEntry { name: "Thyroid cancer", code: "C73", aliases: &["thyroid cancer", "갑상선암"] },
    DiagnosisEntry { name: "Liver cancer", code: "C22.0", aliases: &["hepatocellular carcinoma", "liver cancer", "간암"] },
    DiagnosisEntry { name: "Hypertension", code: "I10", aliases: &["hypertension", "high blood pressure", "고혈압"] },
    DiagnosisEntry { name: "Angina pectoris", code: "I20.9", aliases: &["angina pectoris", "angina", "협심증"] },
    DiagnosisEntry { name: "Myocardial infarction", code: "I21.9", aliases: &["myocardial infarction", "heart attack", "심근경색"] },
    DiagnosisEntry { name: "Atrial fibrillation", code: "I48.9", aliases: &["atrial fibrillation", "심방세동"] },
    DiagnosisEntry { name: "Cerebral infarction", code: "I63.9", aliases: &["cerebral infarction", "뇌경색"] },
    DiagnosisEntry { name: "Stroke", code: "I64", aliases: &["stroke", "뇌졸중"] },
    DiagnosisEntry { name: "Type 2 diabetes mellitus", code: "E11.9", aliases: &["type 2 diabetes", "diabetes mellitus", "diabetes", "당뇨병", "당뇨"] },
    DiagnosisEntry { name: "Hyperlipidemia", code: "E78.5", aliases: &["hyperlipidemia", "dyslipidemia", "고지혈증", "이상지질혈증"] },
    DiagnosisEntry { name: "Pneumonia", code: "J18.9", aliases: &["pneumonia", "폐렴"] },
    DiagnosisEntry { name: "Asthma", code: "J45.9", aliases: &["asthma", "천식"] },
    DiagnosisEntry { name: "Gastritis", code: "K29.7", aliases: &["gastritis", "위염"] },
    DiagnosisEntry { name: "Gastric ulcer", code: "K25.9", aliases: &["gastric ulcer", "위궤양"] },
    DiagnosisEntry { name: "Appendicitis", code: "K37", aliases: &["appendicitis", "충수염", "맹장염"] },
    DiagnosisEntry { name: "Intervertebral disc disorder", code: "M51.2", aliases: &["herniated disc", "disc herniation", "추간판탈출증", "디스크"] },
    DiagnosisEntry { name: "Osteoarthritis of knee", code: "M17.9", aliases: &["knee osteoarthritis", "osteoarthritis", "무릎관절증", "퇴행성관절염"] },
    DiagnosisEntry { name: "Cataract", code: "H26.9", aliases: &["cataract", "백내장"] },
    DiagnosisEntry { name: "Fracture", code: "T14.2", aliases: &["fracture", "골절"] },
    DiagnosisEntry { name: "Normal delivery", code: "O80", aliases: &["normal delivery", "자연분만"] },
];

pub const PROCEDURES: &[ProcedureEntry] = &[
    ProcedureEntry { name: "Gastrectomy", aliases: &["subtotal gastrectomy", "total gastrectomy", "gastrectomy", "위절제술", "위아전절제술"] },
    ProcedureEntry { name: "Colonoscopy", aliases: &["colonoscopy", "대장내시경"] },
    ProcedureEntry { name: "Gastroscopy", aliases: &["gastroscopy", "upper endoscopy", "endoscopy", "위내시경", "내시경"] },
    ProcedureEntry { name: "Biopsy", aliases: &["biopsy", "조직검사"] },
    ProcedureEntry { name: "Chemotherapy", aliases: &["chemotherapy", "항암치료", "항암화학요법"] },
    ProcedureEntry { name: "Radiotherapy", aliases: &["radiotherapy", "radiation therapy", "방사선치료"] },
    ProcedureEntry { name: "Appendectomy", aliases: &["appendectomy", "충수절제술"] },
    ProcedureEntry { name: "Coronary angioplasty", aliases: &["coronary angioplasty", "angioplasty", "stent insertion", "관상동맥성형술", "스텐트삽입술"] },
    ProcedureEntry { name: "Cesarean section", aliases: &["cesarean section", "c-section", "제왕절개"] },
    ProcedureEntry { name: "CT scan", aliases: &["ct scan", "computed tomography", "ct촬영"] },
    ProcedureEntry { name: "MRI", aliases: &["mri", "magnetic resonance imaging", "자기공명영상"] },
    ProcedureEntry { name: "Cataract surgery", aliases: &["cataract surgery", "phacoemulsification", "백내장수술"] },
];

/// ICD-10 code: letter (U is reserved), two digits, optional subcategory.
static ICD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-TV-Z][0-9]{2}(?:\.[0-9]{1,2}[A-Z]?)?)\b").unwrap());

static HOSPITAL_KO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[가-힣A-Za-z0-9]+?(?:대학교병원|대학병원|요양병원|병원|의원|의료원|메디컬센터|클리닉)")
        .unwrap()
});

static HOSPITAL_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:[A-Z][A-Za-z'&.-]*\s+){1,4}(?:Hospital|Clinic|Medical Center|Medical Centre|Infirmary)\b",
    )
    .unwrap()
});

static DIAGNOSIS_RE: LazyLock<Regex> =
    LazyLock::new(|| alias_regex(DIAGNOSES.iter().flat_map(|d| d.aliases.iter().copied())));

static PROCEDURE_RE: LazyLock<Regex> =
    LazyLock::new(|| alias_regex(PROCEDURES.iter().flat_map(|p| p.aliases.iter().copied())));

static DIAGNOSIS_BY_ALIAS: LazyLock<HashMap<String, &'static DiagnosisEntry>> = LazyLock::new(|| {
    DIAGNOSES
        .iter()
        .flat_map(|d| d.aliases.iter().map(move |a| (normalize_alias(a), d)))
        .collect()
});

static PROCEDURE_BY_ALIAS: LazyLock<HashMap<String, &'static ProcedureEntry>> = LazyLock::new(|| {
    PROCEDURES
        .iter()
        .flat_map(|p| p.aliases.iter().map(move |a| (normalize_alias(a), p)))
        .collect()
});

/// Longest alias first so "대장내시경" wins over "내시경" at the same start.
/// Latin aliases are word-bounded; Hangul aliases are not, since particles attach directly.
fn alias_regex<'a>(aliases: impl Iterator<Item = &'a str>) -> Regex {
    let mut aliases: Vec<&str> = aliases.collect();
    aliases.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let alternation = aliases
        .iter()
        .map(|alias| {
            let escaped = regex::escape(alias).replace(' ', r"\s+");
            if alias.is_ascii() {
                format!(r"\b{escaped}\b")
            } else {
                escaped
            }
        })
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)(?:{alternation})")).unwrap()
}

fn normalize_alias(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Dictionary entry whose code matches exactly, else by three-character category.
pub fn diagnosis_for_code(code: &str) -> Option<&'static DiagnosisEntry> {
    let upper = code.to_uppercase();
    DIAGNOSES.iter().find(|d| d.code == upper).or_else(|| {
        let category = upper.get(..3)?;
        DIAGNOSES.iter().find(|d| d.code.get(..3) == Some(category))
    })
}

/// Single-word Latin vocabulary the OCR corrector is allowed to correct toward.
pub fn correction_vocabulary() -> Vec<&'static str> {
    DIAGNOSES
        .iter()
        .flat_map(|d| d.aliases.iter())
        .chain(PROCEDURES.iter().flat_map(|p| p.aliases.iter()))
        .flat_map(|alias| alias.split_whitespace())
        .filter(|w| w.is_ascii() && w.len() >= 5)
        .collect()
}

// ═══════════════════════════════════════════
// Normalizer
// ═══════════════════════════════════════════

/// Field confidences before adjustments.
pub mod field_confidence {
    pub const ICD_CODE: f32 = 0.95;
    pub const DICTIONARY_DIAGNOSIS: f32 = 0.85;
    pub const KOREAN_HOSPITAL: f32 = 0.85;
    pub const ENGLISH_HOSPITAL: f32 = 0.80;
    pub const PROCEDURE: f32 = 0.80;
    /// Subtracted when the match depends on an OCR correction.
    pub const CORRECTION_PENALTY: f32 = 0.15;
}

/// A code within this many bytes of a dictionary diagnosis is attached to it.
const CODE_ATTACH_DISTANCE: usize = 12;

/// Which sub-families the normalizer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOptions {
    /// Diagnosis dictionary; without it only ICD codes are recognized.
    pub dictionary: bool,
    pub procedures: bool,
    /// Fuzzy-correct OCR'd vocabulary before dictionary matching.
    pub correction: bool,
}

impl FieldOptions {
    pub fn codes_only() -> Self {
        Self { dictionary: false, procedures: false, correction: false }
    }

    pub fn full() -> Self {
        Self { dictionary: true, procedures: true, correction: false }
    }

    pub fn corrected() -> Self {
        Self { dictionary: true, procedures: true, correction: true }
    }
}

pub struct MedicalFieldNormalizer {
    options: FieldOptions,
    corrector: Option<TermCorrector>,
}

impl MedicalFieldNormalizer {
    pub fn new(options: FieldOptions) -> Self {
        let corrector = options
            .correction
            .then(|| TermCorrector::new(correction_vocabulary()));
        Self { options, corrector }
    }

    pub fn options(&self) -> FieldOptions {
        self.options
    }

    /// Extract every field, ordered by span start.
    pub fn extract(&self, text: &str) -> Vec<NormalizedField> {
        let mut fields = Vec::new();
        self.extract_hospitals(text, &mut fields);

        let mut diagnoses = Vec::new();
        if self.options.dictionary || self.options.procedures {
            let corrected = match &self.corrector {
                Some(corrector) => corrector.correct_text(text),
                None => CorrectedText {
                    text: text.to_string(),
                    corrections: Vec::new(),
                },
            };
            if self.options.dictionary {
                extract_dictionary_diagnoses(&corrected, &mut diagnoses);
            }
            if self.options.procedures {
                extract_procedures(&corrected, &mut fields);
            }
        }

        let codes = extract_codes(text);
        attach_codes(&mut diagnoses, codes);
        fields.extend(diagnoses);

        fields.sort_by(|a, b| {
            a.span()
                .start
                .cmp(&b.span().start)
                .then(a.span().end.cmp(&b.span().end))
                .then(kind_rank(a).cmp(&kind_rank(b)))
        });

        tracing::debug!(
            fields = fields.len(),
            dictionary = self.options.dictionary,
            correction = self.options.correction,
            "Medical field normalization complete"
        );

        fields
    }

    fn extract_hospitals(&self, text: &str, out: &mut Vec<NormalizedField>) {
        for (re, confidence) in [
            (&*HOSPITAL_KO_RE, field_confidence::KOREAN_HOSPITAL),
            (&*HOSPITAL_EN_RE, field_confidence::ENGLISH_HOSPITAL),
        ] {
            for m in re.find_iter(text) {
                let name = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
                out.push(NormalizedField::Hospital {
                    name,
                    span: TextSpan { start: m.start(), end: m.end(), confidence },
                });
            }
        }
    }
}

fn extract_dictionary_diagnoses(corrected: &CorrectedText, out: &mut Vec<NormalizedField>) {
    for m in DIAGNOSIS_RE.find_iter(&corrected.text) {
        let Some(entry) = DIAGNOSIS_BY_ALIAS.get(&normalize_alias(m.as_str())) else {
            continue;
        };
        let mut confidence = field_confidence::DICTIONARY_DIAGNOSIS;
        if corrected.touches_correction(m.start(), m.end()) {
            confidence -= field_confidence::CORRECTION_PENALTY;
        }
        out.push(NormalizedField::Diagnosis {
            name: entry.name.to_string(),
            code: None,
            span: TextSpan {
                start: corrected.original_offset(m.start()),
                end: corrected.original_offset(m.end()),
                confidence: clamp_confidence(confidence),
            },
        });
    }
}

fn extract_procedures(corrected: &CorrectedText, out: &mut Vec<NormalizedField>) {
    for m in PROCEDURE_RE.find_iter(&corrected.text) {
        let Some(entry) = PROCEDURE_BY_ALIAS.get(&normalize_alias(m.as_str())) else {
            continue;
        };
        let mut confidence = field_confidence::PROCEDURE;
        if corrected.touches_correction(m.start(), m.end()) {
            confidence -= field_confidence::CORRECTION_PENALTY;
        }
        out.push(NormalizedField::Procedure {
            name: entry.name.to_string(),
            span: TextSpan {
                start: corrected.original_offset(m.start()),
                end: corrected.original_offset(m.end()),
                confidence: clamp_confidence(confidence),
            },
        });
    }
}

/// Code-only diagnoses; name taken from the dictionary when the code is known.
fn extract_codes(text: &str) -> Vec<NormalizedField> {
    ICD_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let m = caps.get(1)?;
            let code = m.as_str().to_string();
            let name = diagnosis_for_code(&code)
                .map(|d| d.name.to_string())
                .unwrap_or_else(|| code.clone());
            Some(NormalizedField::Diagnosis {
                name,
                code: Some(code),
                span: TextSpan {
                    start: m.start(),
                    end: m.end(),
                    confidence: field_confidence::ICD_CODE,
                },
            })
        })
        .collect()
}

/// Fold each code into the nearest uncoded dictionary diagnosis within
/// [`CODE_ATTACH_DISTANCE`]; unattached codes stay as their own diagnoses.
fn attach_codes(diagnoses: &mut Vec<NormalizedField>, codes: Vec<NormalizedField>) {
    let mut leftovers = Vec::new();
    for code_field in codes {
        let NormalizedField::Diagnosis { code: Some(code), span: code_span, .. } = &code_field else {
            continue;
        };

        let target = diagnoses
            .iter_mut()
            .filter_map(|field| {
                let distance = match field {
                    NormalizedField::Diagnosis { code: None, span, .. } => {
                        span.distance_to(code_span.start, code_span.end)
                    }
                    _ => return None,
                };
                (distance <= CODE_ATTACH_DISTANCE).then_some((distance, field))
            })
            .min_by_key(|(distance, _)| *distance);

        match target {
            Some((_, NormalizedField::Diagnosis { code: slot, span, .. })) => {
                *slot = Some(code.clone());
                span.start = span.start.min(code_span.start);
                span.end = span.end.max(code_span.end);
                span.confidence = span.confidence.max(code_span.confidence);
            }
            _ => leftovers.push(code_field),
        }
    }
    diagnoses.extend(leftovers);
}

fn kind_rank(field: &NormalizedField) -> u8 {
    match field {
        NormalizedField::Hospital { .. } => 0,
        NormalizedField::Diagnosis { .. } => 1,
        NormalizedField::Procedure { .. } => 2,
    }
}

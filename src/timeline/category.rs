//! Diagnosis category taxonomy: keyword and ICD-10 prefix rules.

use serde::{Deserialize, Serialize};

use crate::pipeline::merge::Diagnosis;

pub const FALLBACK_CATEGORY: &str = "general";

/// One taxonomy entry. Rules are tried in order, first match wins, so more
/// specific prefixes (`I10`) must come before broader ones (`I`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRule {
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub code_prefixes: Vec<String>,
}

impl CategoryRule {
    fn new(label: &str, keywords: &[&str], code_prefixes: &[&str]) -> Self {
        Self {
            label: label.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            code_prefixes: code_prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn matches(&self, diagnosis: &Diagnosis) -> bool {
        if let Some(code) = &diagnosis.code {
            let code = code.trim().to_uppercase();
            if self
                .code_prefixes
                .iter()
                .any(|p| !p.is_empty() && code.starts_with(&p.to_uppercase()))
            {
                return true;
            }
        }
        let name = diagnosis.name.to_lowercase();
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && name.contains(&k.to_lowercase()))
    }
}

pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new(
            "oncology",
            &["cancer", "carcinoma", "tumor", "tumour", "lymphoma", "leukemia", "암", "종양"],
            &["C", "D0", "D1", "D2", "D3", "D4"],
        ),
        CategoryRule::new(
            "hypertension",
            &["hypertension", "고혈압"],
            &["I10", "I11", "I12", "I13", "I15"],
        ),
        CategoryRule::new(
            "cerebrovascular",
            &["stroke", "cerebral infarction", "뇌경색", "뇌출혈", "뇌졸중"],
            &["I6"],
        ),
        CategoryRule::new(
            "cardiovascular",
            &["angina", "myocardial", "heart failure", "arrhythmia", "협심증", "심근경색", "심부전"],
            &["I"],
        ),
        CategoryRule::new(
            "endocrine",
            &["diabetes", "thyroid", "당뇨", "갑상선"],
            &["E"],
        ),
        CategoryRule::new(
            "respiratory",
            &["pneumonia", "asthma", "bronchitis", "폐렴", "천식", "기관지염"],
            &["J"],
        ),
        CategoryRule::new(
            "gastrointestinal",
            &["gastritis", "ulcer", "colitis", "위염", "궤양", "장염"],
            &["K"],
        ),
        CategoryRule::new(
            "musculoskeletal",
            &["arthritis", "disc", "관절염", "디스크", "추간판"],
            &["M"],
        ),
        CategoryRule::new(
            "obstetric",
            &["pregnancy", "delivery", "임신", "분만", "출산"],
            &["O"],
        ),
        CategoryRule::new(
            "injury",
            &["fracture", "sprain", "injury", "골절", "염좌", "손상"],
            &["S", "T"],
        ),
    ]
}

/// Label of the first matching rule, `None` when nothing matches.
pub fn categorize<'a>(diagnosis: &Diagnosis, rules: &'a [CategoryRule]) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| rule.matches(diagnosis))
        .map(|rule| rule.label.as_str())
}

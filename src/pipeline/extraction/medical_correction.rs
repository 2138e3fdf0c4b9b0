//! Post-OCR correction of diagnosis and procedure vocabulary.
//!
//! Scanned records routinely turn "gastrectomy" into "gastrectorny" or
//! "pneumonia" into "pneurnonia", which defeats dictionary matching. The
//! corrector fixes a word only when it is long enough (>= 5 chars), lies
//! within edit distance 2 of exactly one known term, and is not already a
//! known term. Corrections are applied to a copy of the text together with
//! an edit list, so matches found in the corrected copy can be mapped back
//! to byte offsets in the original.

/// One replaced word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
    pub original_start: usize,
    pub original_end: usize,
    pub corrected_start: usize,
    pub corrected_end: usize,
    pub distance: u32,
}

/// Corrected copy of a text plus the edits that produced it.
#[derive(Debug, Clone, Default)]
pub struct CorrectedText {
    pub text: String,
    pub corrections: Vec<Correction>,
}

impl CorrectedText {
    /// Map a byte offset in the corrected text back to the original text.
    /// An offset strictly inside a corrected word maps to the end of the original word.
    pub fn original_offset(&self, pos: usize) -> usize {
        let mut delta: i64 = 0;
        for c in &self.corrections {
            if c.corrected_end <= pos {
                delta += (c.original_end - c.original_start) as i64
                    - (c.corrected_end - c.corrected_start) as i64;
            } else if c.corrected_start < pos {
                return c.original_end;
            } else {
                break;
            }
        }
        (pos as i64 + delta).max(0) as usize
    }

    /// True when `[start, end)` in the corrected text touches a corrected word.
    pub fn touches_correction(&self, start: usize, end: usize) -> bool {
        self.corrections
            .iter()
            .any(|c| c.corrected_start < end && start < c.corrected_end)
    }
}

/// Fuzzy matcher over a fixed vocabulary.
#[derive(Debug, Clone)]
pub struct TermCorrector {
    /// Lowercase, sorted, deduplicated for binary search.
    terms: Vec<String>,
    min_word_chars: usize,
    max_distance: u32,
}

impl TermCorrector {
    pub fn new<'a>(terms: impl IntoIterator<Item = &'a str>) -> Self {
        let mut terms: Vec<String> = terms.into_iter().map(|t| t.to_lowercase()).collect();
        terms.sort();
        terms.dedup();
        Self {
            terms,
            min_word_chars: 5,
            max_distance: 2,
        }
    }

    pub fn vocabulary_len(&self) -> usize {
        self.terms.len()
    }

    /// Best unique dictionary term for a misspelled word, `None` when the
    /// word is short, already known, or ambiguous.
    pub fn correct_word(&self, word: &str) -> Option<(&str, u32)> {
        let char_len = word.chars().count();
        if char_len < self.min_word_chars {
            return None;
        }

        let lower = word.to_lowercase();
        if self.terms.binary_search(&lower).is_ok() {
            return None;
        }

        let mut best_term: Option<&str> = None;
        let mut best_distance = self.max_distance + 1;
        let mut ambiguous = false;

        for term in &self.terms {
            let len_diff = char_len.abs_diff(term.chars().count());
            if len_diff as u32 > self.max_distance {
                continue;
            }

            let dist = edit_distance(&lower, term);
            if dist < best_distance {
                best_distance = dist;
                best_term = Some(term.as_str());
                ambiguous = false;
            } else if dist == best_distance && best_term.is_some() {
                ambiguous = true;
            }
        }

        match best_term {
            Some(term) if !ambiguous => Some((term, best_distance)),
            _ => None,
        }
    }

    /// Correct every word of `text`, keeping an edit list for offset mapping.
    pub fn correct_text(&self, text: &str) -> CorrectedText {
        let mut out = CorrectedText {
            text: String::with_capacity(text.len()),
            corrections: Vec::new(),
        };
        let mut word_start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                word_start.get_or_insert(idx);
            } else {
                if let Some(start) = word_start.take() {
                    self.push_word(&text[start..idx], start, &mut out);
                }
                out.text.push(ch);
            }
        }

        if let Some(start) = word_start {
            self.push_word(&text[start..], start, &mut out);
        }

        out
    }

    fn push_word(&self, word: &str, original_start: usize, out: &mut CorrectedText) {
        match self.correct_word(word) {
            Some((term, distance)) => {
                let corrected = preserve_case(word, term);
                let corrected_start = out.text.len();
                out.text.push_str(&corrected);
                tracing::debug!(
                    original = word,
                    corrected = %corrected,
                    distance,
                    "OCR term corrected"
                );
                out.corrections.push(Correction {
                    original: word.to_string(),
                    corrected_end: out.text.len(),
                    corrected,
                    original_start,
                    original_end: original_start + word.len(),
                    corrected_start,
                    distance,
                });
            }
            None => out.text.push_str(word),
        }
    }
}

/// Preserve the original word's capitalization pattern when applying correction.
fn preserve_case(original: &str, correction: &str) -> String {
    if original.chars().all(|c| c.is_uppercase() || !c.is_alphabetic()) {
        return correction.to_uppercase();
    }

    let first_upper = original.chars().next().is_some_and(|c| c.is_uppercase());
    if first_upper {
        let mut chars = correction.chars();
        match chars.next() {
            Some(c) => {
                let mut s = c.to_uppercase().to_string();
                s.extend(chars);
                s
            }
            None => correction.to_string(),
        }
    } else {
        correction.to_string()
    }
}

/// Levenshtein edit distance over chars.
fn edit_distance(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n as u32;
    }
    if n == 0 {
        return m as u32;
    }

    let mut prev: Vec<u32> = (0..=n as u32).collect();
    let mut curr = vec![0u32; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = (i + 1) as u32;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = u32::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

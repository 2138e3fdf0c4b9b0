pub mod types;
pub mod scoring;
pub mod merger;

pub use types::*;
pub use scoring::{quality_score, score_result, select_best, ResultFamily, ScoreWeights};
pub use merger::{credit_corroborating_modes, merge_results};

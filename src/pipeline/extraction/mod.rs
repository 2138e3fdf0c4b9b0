pub mod types;
pub mod confidence;
pub mod validity;
pub mod patterns;
pub mod nested;
pub mod medical_correction;
pub mod medical_fields;

pub use types::*;
pub use confidence::*;
pub use patterns::{
    parse_embedded_date, parse_offset, split_paragraphs, PatternConfig, PatternExtractor, RelativeOffset,
};
pub use nested::{NestedReferenceResolver, ResolvedReference, ResolverConfig};
pub use medical_fields::{FieldOptions, MedicalFieldNormalizer};

//! Source-span provenance: links reconciled events to the OCR blocks and
//! page coordinates they came from. Never mutates the blocks.

pub mod anchors;
pub mod coordinates;
pub mod span;
pub mod types;

pub use anchors::{anchor_terms, date_variants};
pub use coordinates::{coordinate_coverage, coverage_report, spatial_neighbors};
pub use span::{attach_all, attach_source_span, block_hint_for_offset, calculate_attachment_rate};
pub use types::*;

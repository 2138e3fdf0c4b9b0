//! medchron: reconciles OCR-extracted medical and insurance records into a
//! time-ordered, episode-clustered, source-traceable event chronology.

pub mod config;
pub mod pipeline_config;
pub mod pipeline; // extraction, engine fan-out, merge, audit, processor
pub mod timeline; // organizer + episode clusterer
pub mod provenance; // OCR block source spans

pub use pipeline::{DocumentInput, DocumentMetadata, PipelineOutput, ProcessingError, Reconciler};
pub use pipeline_config::{ConfigError, ReconcileConfig};

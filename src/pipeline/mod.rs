pub mod extraction;
pub mod engine;
pub mod merge;
pub mod audit;
pub mod processor;

pub use processor::{
    DocumentInput, DocumentMetadata, PipelineOutput, ProcessingContext, ProcessingError, Reconciler,
};

pub mod types;
pub mod modes;
pub mod orchestrator;

pub use types::*;
pub use modes::{build_engines, DocumentShape, ModeEngine};
pub use orchestrator::{EngineOrchestrator, OrchestratorConfig};

pub use crate::pipeline::extraction::types::ExtractionMode;

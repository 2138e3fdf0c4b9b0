//! Reconciliation configuration.
//!
//! Every threshold and weight used by the reconciliation stages lives here as a
//! named, overridable value. Defaults are compiled in; a JSON document (inline or
//! via the `MEDCHRON_CONFIG` file) may override any subset of fields.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CONFIG_ENV_VAR;
use crate::pipeline::engine::OrchestratorConfig;
use crate::pipeline::extraction::{PatternConfig, ResolverConfig};
use crate::pipeline::merge::{MergeOptions, ScoreWeights};
use crate::provenance::SpanConfig;
use crate::timeline::{ClusterConfig, SortDirection};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Defaults applied by the organizer when the caller does not specify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrganizeDefaults {
    pub sort_direction: SortDirection,
    pub group_by_date: bool,
}

impl Default for OrganizeDefaults {
    fn default() -> Self {
        Self {
            sort_direction: SortDirection::Asc,
            group_by_date: true,
        }
    }
}

/// Full reconciliation policy, one section per pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcileConfig {
    pub extraction: PatternConfig,
    pub resolver: ResolverConfig,
    pub orchestrator: OrchestratorConfig,
    pub scoring: ScoreWeights,
    pub merge: MergeOptions,
    pub organize: OrganizeDefaults,
    pub clustering: ClusterConfig,
    pub provenance: SpanConfig,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl ReconcileConfig {
    /// Parse a (possibly partial) JSON override on top of the defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Load from the file named by `MEDCHRON_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "Loading reconciliation config");
                Self::from_file(Path::new(&path))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Reject values that would break scoring or clustering invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.scoring.total_weight();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(ConfigError::Invalid(format!(
                "score weights must sum to 1.0, got {sum:.3}"
            )));
        }
        if !(0.0..=1.0).contains(&self.resolver.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "resolver.confidenceThreshold must be within [0, 1]".into(),
            ));
        }
        if self.clustering.gap_threshold_days < 0 {
            return Err(ConfigError::Invalid(
                "clustering.gapThresholdDays must not be negative".into(),
            ));
        }
        if self.orchestrator.modes.is_empty() {
            return Err(ConfigError::Invalid(
                "orchestrator.modes must name at least one mode".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

//! Engine Orchestrator: settle-all fan-out of extraction modes.
//!
//! Each configured engine runs on the blocking pool against the same shared
//! `Arc<str>`. A failing, panicking or timed-out engine becomes a
//! `success = false` result; its siblings are unaffected. Results come back
//! in configured order regardless of completion order.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use super::modes::build_engines;
use super::types::{EngineError, EngineResult, ExtractionEngine};
use crate::pipeline::extraction::patterns::PatternConfig;
use crate::pipeline::extraction::nested::ResolverConfig;
use crate::pipeline::extraction::types::ExtractionMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Modes to run, in result order.
    pub modes: Vec<ExtractionMode>,
    /// Per-mode timeout. `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            modes: ExtractionMode::all().to_vec(),
            timeout_ms: Some(30_000),
        }
    }
}

pub struct EngineOrchestrator {
    engines: Vec<Arc<dyn ExtractionEngine>>,
    timeout: Option<Duration>,
}

impl EngineOrchestrator {
    pub fn new(engines: Vec<Arc<dyn ExtractionEngine>>, timeout: Option<Duration>) -> Self {
        Self { engines, timeout }
    }

    /// Built-in mode engines for the configured modes.
    pub fn from_config(
        config: &OrchestratorConfig,
        patterns: &PatternConfig,
        resolver: &ResolverConfig,
    ) -> Self {
        Self::new(
            build_engines(&config.modes, patterns, resolver),
            config.timeout_ms.map(Duration::from_millis),
        )
    }

    pub fn modes(&self) -> Vec<ExtractionMode> {
        self.engines.iter().map(|e| e.mode()).collect()
    }

    /// Run every engine to completion and collect one result per engine.
    pub async fn run(&self, text: Arc<str>) -> Vec<EngineResult> {
        let mut set = JoinSet::new();

        for (index, engine) in self.engines.iter().enumerate() {
            let engine = Arc::clone(engine);
            let text = Arc::clone(&text);
            let limit = self.timeout;
            set.spawn(async move { (index, run_engine(engine, text, limit).await) });
        }

        let mut slots: Vec<Option<EngineResult>> = vec![None; self.engines.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Orchestrator task lost"),
            }
        }

        let results: Vec<EngineResult> = slots
            .into_iter()
            .zip(&self.engines)
            .map(|(slot, engine)| {
                slot.unwrap_or_else(|| {
                    EngineResult::failed(
                        engine.mode(),
                        &EngineError::Failed("task lost before completion".into()),
                        0,
                    )
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        tracing::info!(
            engines = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            "Engine fan-out complete"
        );

        results
    }
}

async fn run_engine(
    engine: Arc<dyn ExtractionEngine>,
    text: Arc<str>,
    limit: Option<Duration>,
) -> EngineResult {
    let mode = engine.mode();
    let started = Instant::now();
    let task = tokio::task::spawn_blocking(move || engine.extract(&text));

    // On timeout the blocking work keeps running and its result is discarded.
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                let error = EngineError::TimedOut(limit.as_millis() as u64);
                tracing::warn!(mode = mode.as_str(), error = %error, "Engine timed out");
                return EngineResult::failed(mode, &error, elapsed_ms(started));
            }
        },
        None => task.await,
    };

    let elapsed = elapsed_ms(started);
    match joined {
        Ok(Ok(output)) => {
            let result = EngineResult::succeeded(mode, output, elapsed);
            tracing::info!(
                mode = mode.as_str(),
                date_blocks = result.date_blocks.len(),
                fields = result.normalized_fields.len(),
                confidence = result.confidence,
                elapsed_ms = elapsed,
                "Engine complete"
            );
            result
        }
        Ok(Err(error)) => {
            tracing::warn!(mode = mode.as_str(), error = %error, "Engine failed");
            EngineResult::failed(mode, &error, elapsed)
        }
        Err(join_error) => {
            let error = if join_error.is_panic() {
                EngineError::Panicked(panic_message(join_error.into_panic()))
            } else {
                EngineError::Failed("engine task cancelled".into())
            };
            tracing::warn!(mode = mode.as_str(), error = %error, "Engine aborted");
            EngineResult::failed(mode, &error, elapsed)
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

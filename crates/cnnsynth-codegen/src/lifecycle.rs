//! Runtime state machine of the generated program.
//!
//! The sequencer advances a [`Lifecycle`] as it emits each phase, so an
//! ordering mistake in the sequencer surfaces as an illegal transition
//! instead of silently wrong firmware.

use std::fmt;

use serde::Serialize;

use crate::error::SynthesisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Uninitialized,
    /// Weights loaded and the state machine configured.
    Configured,
    Running,
    Complete,
    TornDown,
    /// Infinite start/wait loop; never torn down.
    LoopingForever,
    /// A fatal check fired.
    Failed,
    /// This side never touches the accelerator.
    Delegated,
}

impl Stage {
    /// Whether the generated program may move from `self` to `next`.
    pub fn permits(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Uninitialized, Configured)
                | (Uninitialized, Delegated)
                | (Uninitialized, Failed)
                | (Configured, Running)
                | (Configured, Failed)
                | (Running, Running)
                | (Running, Complete)
                | (Complete, TornDown)
                | (Complete, LoopingForever)
                | (Complete, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::TornDown | Stage::LoopingForever | Stage::Failed | Stage::Delegated
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Uninitialized => "uninitialized",
            Stage::Configured => "configured",
            Stage::Running => "running",
            Stage::Complete => "complete",
            Stage::TornDown => "torn-down",
            Stage::LoopingForever => "looping-forever",
            Stage::Failed => "failed",
            Stage::Delegated => "delegated",
        };
        f.write_str(name)
    }
}

/// Tracks the stage reached by the emitted program and every fatal check
/// that can divert it to [`Stage::Failed`].
#[derive(Debug, Clone)]
pub struct Lifecycle {
    stage: Stage,
    history: Vec<Stage>,
    fatal_checks: usize,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            stage: Stage::Uninitialized,
            history: vec![Stage::Uninitialized],
            fatal_checks: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn fatal_checks(&self) -> usize {
        self.fatal_checks
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), SynthesisError> {
        if !self.stage.permits(next) {
            return Err(SynthesisError::IllegalTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(from = %self.stage, to = %next, "lifecycle transition");
        self.stage = next;
        self.history.push(next);
        Ok(())
    }

    /// Register a fatal check emitted at the current stage. The failure
    /// edge is a runtime branch, so the tracked stage does not change.
    pub fn fatal_check(&mut self) -> Result<(), SynthesisError> {
        if !self.stage.permits(Stage::Failed) {
            return Err(SynthesisError::IllegalTransition {
                from: self.stage.to_string(),
                to: Stage::Failed.to_string(),
            });
        }
        self.fatal_checks += 1;
        Ok(())
    }
}

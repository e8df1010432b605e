//! Prepared passive-checkout step.
//!
//! A passive step delegates to an external checkout engine: preparation
//! loads and resolves the referenced file through the host's
//! [`PassiveBackend`](crate::backend::PassiveBackend); running executes the
//! prepared nested file and adopts its outcome. A file that cannot be
//! loaded is a preparation failure, surfaced as a `FailedStep` by the
//! caller.

use std::path::PathBuf;

use crate::backend::{PreparedPassiveFile, RunContext};
use crate::error::AppResult;
use crate::prepared::PreparedStepState;
use crate::procedure::{PassiveStep, StepPath};
use crate::result::Outcome;

/// A passive checkout reference bound to its loaded, prepared file.
pub struct PreparedPassiveStep {
    /// Shared runtime state.
    pub state: PreparedStepState,
    /// Path the nested checkout was loaded from.
    pub filepath: PathBuf,
    file: Box<dyn PreparedPassiveFile>,
}

impl PreparedPassiveStep {
    /// Load and prepare the referenced checkout file.
    pub(crate) async fn from_step(
        step: &PassiveStep,
        path: StepPath,
        ctx: &RunContext,
    ) -> AppResult<Self> {
        let file = ctx.passive.prepare(&step.filepath).await?;
        Ok(Self {
            state: PreparedStepState::new(&step.meta, path),
            filepath: step.filepath.clone(),
            file,
        })
    }

    /// Run the nested checkout and adopt its outcome.
    pub(crate) async fn execute(&mut self, _ctx: &RunContext) -> AppResult<Outcome> {
        Ok(self.file.run().await)
    }
}

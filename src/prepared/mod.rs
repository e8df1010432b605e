//! Runtime model for checkout procedures.
//!
//! Every edit-model step has a prepared twin here that holds resolved
//! hardware handles and per-step results. The lifecycle is:
//!
//! ```text
//! ProcedureFile --from_origin--> PreparedProcedureFile
//!                                  |  run()            (sequential, async)
//!                                  v
//!                                per-step Outcome, aggregated to the root
//! ```
//!
//! Two disciplines hold throughout:
//!
//! - **Never raise across the boundary.** Preparation failures become
//!   [`FailedStep`] sentinels; run failures become internal-error outcomes.
//!   Nothing in this module propagates an error to the caller.
//! - **Results are recomputed on read.** A node's combined result is derived
//!   from its current state every time it is asked for, so a verification
//!   flag flipped after `run()` returned is reflected without re-running.

pub mod passive;
pub mod plan_step;
pub mod set_value;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::backend::RunContext;
use crate::error::CheckoutError;
use crate::procedure::{ProcedureFile, ProcedureGroup, ProcedureStep, StepMetadata, StepPath};
use crate::result::{summarize_severity, GroupResultMode, Outcome, Severity};

pub use passive::PreparedPassiveStep;
pub use plan_step::PreparedPlanStep;
pub use set_value::{PreparedSetValueStep, PreparedValueToSignal};

/// State shared by every prepared step variant.
#[derive(Debug, Clone)]
pub struct PreparedStepState {
    /// Name of the originating step.
    pub name: Option<String>,
    /// Path of the originating step in the edit tree; doubles as identity,
    /// with the parent group at the path prefix.
    pub path: StepPath,
    /// Flags copied from the originating step.
    pub meta: StepMetadata,
    /// Confirmation by a human that the result matches expectations.
    pub verify_result: Outcome,
    /// Whether the step itself completed successfully.
    pub step_result: Outcome,
}

impl PreparedStepState {
    fn new(meta: &StepMetadata, path: StepPath) -> Self {
        Self {
            name: meta.name.clone(),
            path,
            meta: meta.clone(),
            verify_result: Outcome::incomplete(),
            step_result: Outcome::incomplete(),
        }
    }

    /// Combine a step outcome with the verification state per the step's
    /// flags.
    ///
    /// When verification is required the verification outcome joins the
    /// combination and the reason is labelled `Verified`/`Not Verified`;
    /// when step success is required the step outcome joins and a failure
    /// appends a `Not Successful` label. With neither flag set the step
    /// auto-succeeds.
    fn combined_result(&self, step_outcome: &Outcome) -> Outcome {
        let mut parts: Vec<&Outcome> = Vec::new();
        let mut reason = String::new();

        if self.meta.verify_required {
            parts.push(&self.verify_result);
            if self.verify_result.severity == Severity::Success {
                reason.push_str(&format!("Verified ({})", self.verify_result.reason_str()));
            } else {
                reason.push_str(&format!(
                    "Not Verified ({})",
                    self.verify_result.reason_str()
                ));
            }
        }

        if self.meta.step_success_required {
            parts.push(step_outcome);
            if step_outcome.severity != Severity::Success {
                if !reason.is_empty() {
                    reason.push_str(", ");
                }
                reason.push_str(&format!("Not Successful ({})", step_outcome.reason_str()));
            }
        }

        if parts.is_empty() {
            // Nothing required, auto-success
            return Outcome::success();
        }

        Outcome {
            severity: summarize_severity(GroupResultMode::All, parts),
            reason: (!reason.is_empty()).then_some(reason),
        }
    }
}

/// Sentinel for a step whose preparation failed.
///
/// Carries the causing error and the originating step so a group can report
/// it in place without ever having run it. A group containing any failed
/// step can never report success.
#[derive(Debug)]
pub struct FailedStep {
    /// Path of the originating step.
    pub path: StepPath,
    /// The originating step, as configured.
    pub origin: ProcedureStep,
    /// The causing error.
    pub error: CheckoutError,
    /// Pre-set internal-error result for this step.
    pub combined_result: Outcome,
    /// Verification state; never advances past incomplete.
    pub verify_result: Outcome,
    /// Step state; never advances past incomplete.
    pub step_result: Outcome,
}

impl FailedStep {
    fn from_error(step: &ProcedureStep, path: StepPath, error: CheckoutError) -> Self {
        let combined_result = Outcome::internal_error(format!(
            "Failed to prepare step: {error}. Step is: {} ({})",
            step.name().unwrap_or("<unnamed>"),
            step.meta().description.as_deref().unwrap_or_default(),
        ));
        Self {
            path,
            origin: step.clone(),
            error,
            combined_result,
            verify_result: Outcome::incomplete(),
            step_result: Outcome::incomplete(),
        }
    }

    /// The terminal result of this step.
    pub fn result(&self) -> &Outcome {
        &self.combined_result
    }

    /// Name of the originating step, if set.
    pub fn name(&self) -> Option<&str> {
        self.origin.name()
    }
}

/// A procedure step bound to live hardware, ready to run.
pub enum PreparedProcedureStep {
    /// A group of further prepared steps.
    Group(PreparedProcedureGroup),
    /// A narrative marker; runs to success.
    Description(PreparedDescriptionStep),
    /// A nested passive checkout.
    Passive(PreparedPassiveStep),
    /// Set values, then verify.
    SetValue(PreparedSetValueStep),
    /// Run scan plans, then verify.
    Plan(PreparedPlanStep),
}

impl PreparedProcedureStep {
    /// Prepare an edit step for running.
    ///
    /// Dispatches on the step variant; if preparation fails for any reason
    /// the failure is returned as a [`FailedStep`] sentinel. This function
    /// never propagates an error.
    pub fn from_origin<'a>(
        step: &'a ProcedureStep,
        path: StepPath,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<PreparedProcedureStep, FailedStep>> {
        Box::pin(async move {
            let prepared = match step {
                ProcedureStep::Group(group) => Ok(PreparedProcedureStep::Group(
                    PreparedProcedureGroup::from_group(group, path.clone(), ctx).await,
                )),
                ProcedureStep::Description(description) => {
                    Ok(PreparedProcedureStep::Description(PreparedDescriptionStep {
                        state: PreparedStepState::new(&description.meta, path.clone()),
                    }))
                }
                ProcedureStep::Passive(passive) => {
                    PreparedPassiveStep::from_step(passive, path.clone(), ctx)
                        .await
                        .map(PreparedProcedureStep::Passive)
                }
                ProcedureStep::SetValue(set_value) => Ok(PreparedProcedureStep::SetValue(
                    PreparedSetValueStep::from_step(set_value, path.clone(), ctx).await,
                )),
                ProcedureStep::Plan(plan) => Ok(PreparedProcedureStep::Plan(
                    PreparedPlanStep::from_step(plan, path.clone(), ctx).await,
                )),
            };

            prepared.map_err(|error| {
                warn!(step = ?step.name(), %error, "step failed to prepare");
                FailedStep::from_error(step, path, error)
            })
        })
    }

    /// Run the step and return its combined result.
    ///
    /// Any failure inside the variant-specific work is converted to an
    /// internal-error outcome; `run` never propagates an error. The step
    /// outcome is stored, then the combined result (folding in the
    /// verification state) is returned.
    pub fn run<'a>(&'a mut self, ctx: &'a RunContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            info!(step = ?self.name(), path = %self.state().path, "running step");
            let step_outcome = match self.execute(ctx).await {
                Ok(outcome) => outcome,
                Err(error) => Outcome::internal_error(error.to_string()),
            };
            self.state_mut().step_result = step_outcome;
            self.result()
        })
    }

    async fn execute(&mut self, ctx: &RunContext) -> crate::error::AppResult<Outcome> {
        match self {
            PreparedProcedureStep::Group(group) => Ok(group.run_steps(ctx).await),
            PreparedProcedureStep::Description(_) => Ok(Outcome::success()),
            PreparedProcedureStep::Passive(passive) => passive.execute(ctx).await,
            PreparedProcedureStep::SetValue(set_value) => set_value.execute(ctx).await,
            PreparedProcedureStep::Plan(plan) => plan.execute(ctx).await,
        }
    }

    /// The shared runtime state of whichever variant this is.
    pub fn state(&self) -> &PreparedStepState {
        match self {
            PreparedProcedureStep::Group(step) => &step.state,
            PreparedProcedureStep::Description(step) => &step.state,
            PreparedProcedureStep::Passive(step) => &step.state,
            PreparedProcedureStep::SetValue(step) => &step.state,
            PreparedProcedureStep::Plan(step) => &step.state,
        }
    }

    /// Mutable access to the shared runtime state.
    pub fn state_mut(&mut self) -> &mut PreparedStepState {
        match self {
            PreparedProcedureStep::Group(step) => &mut step.state,
            PreparedProcedureStep::Description(step) => &mut step.state,
            PreparedProcedureStep::Passive(step) => &mut step.state,
            PreparedProcedureStep::SetValue(step) => &mut step.state,
            PreparedProcedureStep::Plan(step) => &mut step.state,
        }
    }

    /// Name of the originating step, if set.
    pub fn name(&self) -> Option<&str> {
        self.state().name.as_deref()
    }

    /// Path of the originating step in the edit tree.
    pub fn path(&self) -> &StepPath {
        &self.state().path
    }

    /// The combined result of this step, recomputed from current state.
    ///
    /// Pure and side-effect free; safe to call at any time, including
    /// between runs, and twice in a row with identical answers.
    pub fn result(&self) -> Outcome {
        match self {
            PreparedProcedureStep::Group(group) => group.result(),
            _ => {
                let state = self.state();
                state.combined_result(&state.step_result)
            }
        }
    }

    /// Whether human verification may be recorded for this step.
    ///
    /// Verification only makes sense once the step's own work succeeded.
    pub fn allow_verify(&self) -> bool {
        match self {
            PreparedProcedureStep::Group(group) => {
                group.current_outcome().severity == Severity::Success
            }
            _ => self.state().step_result.severity == Severity::Success,
        }
    }

    /// Record a human verification outcome for this step.
    pub fn set_verify_result(&mut self, outcome: Outcome) {
        self.state_mut().verify_result = outcome;
    }
}

/// A narrative step, prepared. It has no work to do.
pub struct PreparedDescriptionStep {
    /// Shared runtime state.
    pub state: PreparedStepState,
}

/// A group of prepared steps, run strictly in declaration order.
pub struct PreparedProcedureGroup {
    /// Shared runtime state.
    pub state: PreparedStepState,
    /// Children that prepared successfully, in declaration order.
    pub steps: Vec<PreparedProcedureStep>,
    /// Children whose preparation failed.
    ///
    /// A non-empty list forces this group's outcome to error regardless of
    /// how the prepared children fared.
    pub prepare_failures: Vec<FailedStep>,
}

impl PreparedProcedureGroup {
    /// Prepare all of the group's children.
    ///
    /// Preparation of one child never aborts preparation of its siblings:
    /// failures land in [`prepare_failures`](Self::prepare_failures) and
    /// everything else in [`steps`](Self::steps).
    pub async fn from_group(group: &ProcedureGroup, path: StepPath, ctx: &RunContext) -> Self {
        let mut prepared = Self {
            state: PreparedStepState::new(&group.meta, path.clone()),
            steps: Vec::new(),
            prepare_failures: Vec::new(),
        };

        for (index, step) in group.steps.iter().enumerate() {
            match PreparedProcedureStep::from_origin(step, path.child(index), ctx).await {
                Ok(step) => prepared.steps.push(step),
                Err(failed) => prepared.prepare_failures.push(failed),
            }
        }

        prepared
    }

    /// Run all children sequentially and return the group's combined result.
    pub async fn run(&mut self, ctx: &RunContext) -> Outcome {
        let outcome = self.run_steps(ctx).await;
        self.state.step_result = outcome;
        self.result()
    }

    async fn run_steps(&mut self, ctx: &RunContext) -> Outcome {
        let mut results = Vec::with_capacity(self.steps.len());
        for step in &mut self.steps {
            results.push(step.run(ctx).await);
        }
        self.summarize(results.iter())
    }

    /// The group-level outcome derived from each child's *current* result.
    pub fn current_outcome(&self) -> Outcome {
        let results: Vec<Outcome> = self.steps.iter().map(PreparedProcedureStep::result).collect();
        self.summarize(results.iter())
    }

    fn summarize<'a>(&self, results: impl IntoIterator<Item = &'a Outcome>) -> Outcome {
        if !self.prepare_failures.is_empty() {
            return Outcome::error("at least one step failed to initialize");
        }
        Outcome::from(summarize_severity(GroupResultMode::All, results))
    }

    /// The combined result of the group, recomputed from current children.
    ///
    /// Re-pulls each child's current result rather than the outcomes stored
    /// at run time, so verification recorded after `run` returned is
    /// reflected here.
    pub fn result(&self) -> Outcome {
        self.state.combined_result(&self.current_outcome())
    }

    /// Find the prepared step at `path`, descending through nested groups.
    pub fn find_step(&self, path: &StepPath) -> Option<&PreparedProcedureStep> {
        for step in &self.steps {
            if step.path() == path {
                return Some(step);
            }
            if let PreparedProcedureStep::Group(group) = step {
                if path.indices().starts_with(step.path().indices()) {
                    return group.find_step(path);
                }
            }
        }
        None
    }

    /// Mutable variant of [`find_step`](Self::find_step).
    pub fn find_step_mut(&mut self, path: &StepPath) -> Option<&mut PreparedProcedureStep> {
        for step in &mut self.steps {
            if step.path() == path {
                return Some(step);
            }
            let descend = path.indices().starts_with(step.path().indices());
            if descend {
                if let PreparedProcedureStep::Group(group) = step {
                    return group.find_step_mut(path);
                }
            }
        }
        None
    }

    /// Iterate over every prepared step below this group, depth-first.
    pub fn walk_steps(&self) -> impl Iterator<Item = &PreparedProcedureStep> {
        let mut entries = Vec::new();
        collect_steps(self, &mut entries);
        entries.into_iter()
    }
}

fn collect_steps<'a>(
    group: &'a PreparedProcedureGroup,
    entries: &mut Vec<&'a PreparedProcedureStep>,
) {
    for step in &group.steps {
        entries.push(step);
        if let PreparedProcedureStep::Group(sub_group) = step {
            collect_steps(sub_group, entries);
        }
    }
}

/// A procedure file resolved against live hardware.
pub struct PreparedProcedureFile {
    /// The originating file; prepared nodes reference into it by path.
    pub file: Arc<ProcedureFile>,
    /// The prepared root group.
    pub root: PreparedProcedureGroup,
}

impl PreparedProcedureFile {
    /// Prepare a procedure file for running.
    ///
    /// Walks the edit tree top-down, producing one prepared step (or
    /// [`FailedStep`] sentinel) per edit node.
    pub async fn from_origin(file: Arc<ProcedureFile>, ctx: &RunContext) -> Self {
        let root = PreparedProcedureGroup::from_group(&file.root, StepPath::root(), ctx).await;
        Self { file, root }
    }

    /// Run the whole procedure and return the root's combined result.
    pub async fn run(&mut self, ctx: &RunContext) -> Outcome {
        self.root.run(ctx).await
    }

    /// The current combined result of the whole procedure.
    pub fn result(&self) -> Outcome {
        self.root.result()
    }

    /// The edit step a prepared node at `path` was built from.
    pub fn origin_of(&self, path: &StepPath) -> Option<&ProcedureStep> {
        self.file.step_at(path)
    }

    /// Find the prepared step at `path`.
    pub fn find_step(&self, path: &StepPath) -> Option<&PreparedProcedureStep> {
        self.root.find_step(path)
    }

    /// Mutable variant of [`find_step`](Self::find_step).
    pub fn find_step_mut(&mut self, path: &StepPath) -> Option<&mut PreparedProcedureStep> {
        self.root.find_step_mut(path)
    }

    /// Record a human verification outcome for the step at `path`.
    ///
    /// Returns false when no prepared step lives at that path.
    pub fn set_verify_result(&mut self, path: &StepPath, outcome: Outcome) -> bool {
        match self.find_step_mut(path) {
            Some(step) => {
                step.set_verify_result(outcome);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBeamline;
    use crate::procedure::{DescriptionStep, ProcedureGroup, StepMetadata};

    fn description(name: &str, verify: bool, success: bool) -> ProcedureStep {
        ProcedureStep::Description(DescriptionStep {
            meta: StepMetadata {
                name: Some(name.to_string()),
                description: None,
                verify_required: verify,
                step_success_required: success,
            },
        })
    }

    fn file_with_steps(steps: Vec<ProcedureStep>) -> Arc<ProcedureFile> {
        Arc::new(ProcedureFile {
            version: 0,
            root: ProcedureGroup {
                meta: StepMetadata::named("root"),
                steps,
            },
        })
    }

    #[tokio::test]
    async fn test_description_step_always_succeeds() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![description("intro", false, true)]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;

        let outcome = prepared.root.steps[0].run(&ctx).await;
        assert_eq!(outcome.severity, Severity::Success);
        assert_eq!(
            prepared.root.steps[0].state().step_result.severity,
            Severity::Success
        );
    }

    #[tokio::test]
    async fn test_flags_gate_what_counts() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![description("ignored", false, false)]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;

        // Force a failed step outcome; with neither flag set, the combined
        // result is still success.
        prepared.root.steps[0].state_mut().step_result = Outcome::error("broken");
        assert_eq!(prepared.root.steps[0].result().severity, Severity::Success);
    }

    #[tokio::test]
    async fn test_verify_required_blocks_until_verified() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![description("check beam", true, true)]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;

        let combined = prepared.root.steps[0].run(&ctx).await;
        assert_eq!(combined.severity, Severity::Error);
        assert!(combined.reason_str().contains("Not Verified"));

        prepared.root.steps[0].set_verify_result(Outcome::success());
        let combined = prepared.root.steps[0].result();
        assert_eq!(combined.severity, Severity::Success);
        assert!(combined.reason_str().contains("Verified"));
    }

    #[tokio::test]
    async fn test_group_result_reflects_later_verification() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![description("check beam", true, true)]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;

        // Root requires no verification of its own for this test.
        prepared.root.state.meta.verify_required = false;

        let outcome = prepared.run(&ctx).await;
        assert_eq!(outcome.severity, Severity::Error);

        // A human verifies the child after run() returned; the group's
        // recomputed result reflects it without re-running.
        let path = StepPath::root().child(0);
        assert!(prepared.set_verify_result(&path, Outcome::success()));
        assert_eq!(prepared.result().severity, Severity::Success);
    }

    #[tokio::test]
    async fn test_group_with_prepare_failure_reports_error() {
        let beamline = MockBeamline::new();
        let ctx = beamline.context();

        // One child that cannot be prepared (passive checkout that fails to
        // load) and two that prepare fine.
        let file = file_with_steps(vec![
            description("first", false, true),
            ProcedureStep::Passive(crate::procedure::PassiveStep {
                meta: StepMetadata::named("broken checkout"),
                filepath: "/no/such/checkout.yaml".into(),
            }),
            description("last", false, true),
        ]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;
        prepared.root.state.meta.verify_required = false;

        assert_eq!(prepared.root.steps.len(), 2);
        assert_eq!(prepared.root.prepare_failures.len(), 1);
        assert_eq!(
            prepared.root.prepare_failures[0].result().severity,
            Severity::InternalError
        );

        let outcome = prepared.run(&ctx).await;
        assert_eq!(outcome.severity, Severity::Error);
        assert!(outcome.reason_str().contains("Not Successful"));
    }

    #[tokio::test]
    async fn test_origin_round_trip() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![
            description("first", true, true),
            ProcedureStep::Group(ProcedureGroup {
                meta: StepMetadata::named("inner"),
                steps: vec![description("nested", true, true)],
            }),
        ]);
        let prepared = PreparedProcedureFile::from_origin(file.clone(), &ctx).await;

        for step in prepared.root.walk_steps() {
            let origin = prepared.origin_of(step.path()).unwrap();
            assert_eq!(origin.name(), step.name());
            assert_eq!(file.step_at(step.path()), Some(origin));
        }
        let walked: Vec<_> = prepared.root.walk_steps().collect();
        assert_eq!(walked.len(), 3);
    }

    #[tokio::test]
    async fn test_result_is_idempotent() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![description("a", true, true)]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;
        prepared.run(&ctx).await;

        let first = prepared.result();
        let second = prepared.result();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_find_step_mut_in_nested_group() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![ProcedureStep::Group(ProcedureGroup {
            meta: StepMetadata::named("inner"),
            steps: vec![description("nested", true, true)],
        })]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;

        let path = StepPath::root().child(0).child(0);
        let step = prepared.find_step_mut(&path).unwrap();
        assert_eq!(step.name(), Some("nested"));
        assert!(prepared.find_step(&StepPath::root().child(5)).is_none());
    }

    #[tokio::test]
    async fn test_allow_verify_requires_step_success() {
        let ctx = MockBeamline::new().context();
        let file = file_with_steps(vec![description("a", true, true)]);
        let mut prepared = PreparedProcedureFile::from_origin(file, &ctx).await;

        assert!(!prepared.root.steps[0].allow_verify());
        prepared.root.steps[0].run(&ctx).await;
        assert!(prepared.root.steps[0].allow_verify());
    }
}

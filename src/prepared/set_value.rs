//! Prepared set-value step: write values, then verify readbacks.
//!
//! Preparation resolves each action's target to a live signal and each
//! success criterion to a prepared comparison; anything that fails to
//! resolve lands in a failure list rather than aborting the step. Running
//! performs the writes in order (optionally halting on the first failure),
//! evaluates the criteria, and combines per the step's flags.

use serde_json::Value;
use tracing::debug;

use crate::backend::{RunContext, SignalHandle};
use crate::comparison::{ComparisonError, PreparedSignalComparison};
use crate::error::{AppResult, CheckoutError};
use crate::prepared::PreparedStepState;
use crate::procedure::{SetValueStep, StepPath};
use crate::result::{summarize_severity, GroupResultMode, Outcome, Severity};
use crate::target::ValueToTarget;

/// A value bound to a resolved signal, ready to write.
pub struct PreparedValueToSignal {
    /// Identifying name, for reporting.
    pub name: String,
    /// The resolved signal to write to.
    pub signal: SignalHandle,
    /// The value to write.
    pub value: Value,
    /// The originating action, kept for its write tuning.
    pub origin: ValueToTarget,
    /// Result of the write; incomplete until run.
    pub result: Outcome,
}

impl PreparedValueToSignal {
    /// Resolve an action's target and value.
    pub async fn from_origin(origin: &ValueToTarget, ctx: &RunContext) -> AppResult<Self> {
        let name = origin.target.describe();
        let signal = origin
            .target
            .to_signal(ctx.signals.as_ref())
            .await
            .ok_or_else(|| CheckoutError::SignalResolution(name.clone()))?;
        let value = origin.value.clone().ok_or_else(|| {
            CheckoutError::InvalidStep(format!("action ({name}) has no value to set"))
        })?;

        Ok(Self {
            name,
            signal,
            value,
            origin: origin.clone(),
            result: Outcome::incomplete(),
        })
    }

    /// Write the stored value to the signal and record the outcome.
    ///
    /// Write failures become error outcomes carrying the cause; this never
    /// propagates an error.
    pub async fn run(&mut self, ctx: &RunContext) -> Outcome {
        let write = ctx
            .signals
            .write(
                &self.signal,
                &self.value,
                self.origin.timeout,
                self.origin.settle_time,
            )
            .await;

        self.result = match write {
            Ok(()) => Outcome::success(),
            Err(error) => {
                debug!(action = %self.name, %error, "signal write failed");
                Outcome::error(error.to_string())
            }
        };
        self.result.clone()
    }
}

/// A set-value step bound to resolved signals and comparisons.
pub struct PreparedSetValueStep {
    /// Shared runtime state.
    pub state: PreparedStepState,
    halt_on_fail: bool,
    require_action_success: bool,
    /// Actions whose targets resolved, in declaration order.
    pub prepared_actions: Vec<PreparedValueToSignal>,
    /// Actions that failed to be prepared, as configured.
    pub prepare_action_failures: Vec<ValueToTarget>,
    /// Success criteria whose targets resolved.
    pub prepared_criteria: Vec<PreparedSignalComparison>,
    /// Success criteria that failed to be prepared, with causes.
    pub prepare_criteria_failures: Vec<ComparisonError>,
}

impl PreparedSetValueStep {
    /// Resolve every action and success criterion of the step.
    ///
    /// Resolution failures are collected per item; preparing one item never
    /// aborts the others, and this constructor itself cannot fail.
    pub(crate) async fn from_step(step: &SetValueStep, path: StepPath, ctx: &RunContext) -> Self {
        let mut prepared = Self {
            state: PreparedStepState::new(&step.meta, path),
            halt_on_fail: step.halt_on_fail,
            require_action_success: step.require_action_success,
            prepared_actions: Vec::new(),
            prepare_action_failures: Vec::new(),
            prepared_criteria: Vec::new(),
            prepare_criteria_failures: Vec::new(),
        };

        for action in &step.actions {
            match PreparedValueToSignal::from_origin(action, ctx).await {
                Ok(value_to_signal) => prepared.prepared_actions.push(value_to_signal),
                Err(_) => prepared.prepare_action_failures.push(action.clone()),
            }
        }

        for criterion in &step.success_criteria {
            match PreparedSignalComparison::from_target(criterion, ctx).await {
                Ok(comparison) => prepared.prepared_criteria.push(comparison),
                Err(error) => prepared.prepare_criteria_failures.push(error),
            }
        }

        prepared
    }

    /// Execute the actions, then the success criteria, and combine.
    ///
    /// Order matters: a failing action under `halt_on_fail` returns an
    /// error immediately, skipping the remaining actions *and* every
    /// criterion — partial execution, no rollback. Action results only join
    /// the final combination when `require_action_success` is set; without
    /// the flag they ran for side effect only.
    pub(crate) async fn execute(&mut self, ctx: &RunContext) -> AppResult<Outcome> {
        for action in &mut self.prepared_actions {
            let action_result = action.run(ctx).await;
            if self.halt_on_fail && action_result.severity > Severity::Success {
                return Ok(Outcome::error(format!(
                    "action failed ({}), step halted",
                    action.name
                )));
            }
        }

        for criterion in &mut self.prepared_criteria {
            criterion.compare(ctx).await;
        }

        if self.require_action_success && !self.prepare_action_failures.is_empty() {
            let names: Vec<String> = self
                .prepare_action_failures
                .iter()
                .map(|action| action.target.describe())
                .collect();
            return Ok(Outcome::error(format!(
                "one or more actions failed to initialize: {names:?}"
            )));
        }

        if !self.prepare_criteria_failures.is_empty() {
            let names: Vec<&str> = self
                .prepare_criteria_failures
                .iter()
                .map(|failure| failure.name.as_str())
                .collect();
            return Ok(Outcome::error(format!(
                "one or more success criteria failed to initialize: {names:?}"
            )));
        }

        let mut results: Vec<&Outcome> = self
            .prepared_criteria
            .iter()
            .map(|criterion| &criterion.result)
            .collect();
        if self.require_action_success {
            results.extend(self.prepared_actions.iter().map(|action| &action.result));
        }

        Ok(Outcome::from(summarize_severity(
            GroupResultMode::All,
            results,
        )))
    }
}

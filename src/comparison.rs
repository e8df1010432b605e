//! Comparison specifications and their runtime-bound counterparts.
//!
//! The pass/fail logic of an individual comparison is external to this
//! crate; a [`Comparison`] is an opaque named criteria blob interpreted by
//! the host's [`ComparisonBackend`]. This module owns the *dispatch*: a
//! check either targets a live signal or the recorded output of a prior
//! plan, and [`create_prepared_comparison`] resolves each variant into its
//! prepared form. Resolution failure is captured as a [`ComparisonError`]
//! record, never raised, so callers can classify failures without a
//! try/catch.

use serde::{Deserialize, Serialize};

use crate::backend::{RunContext, SignalHandle};
use crate::error::CheckoutError;
use crate::result::Outcome;
use crate::target::{ComparisonToPlanData, ComparisonToTarget, PlanData};

/// A named comparison with backend-interpreted criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Name of the comparison, for reporting.
    pub name: String,
    /// Criteria blob; opaque to the engine, interpreted by the backend.
    #[serde(default)]
    pub criteria: serde_json::Value,
}

/// A check attached to a plan step: against a live signal or prior plan data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanCheck {
    /// Compare the live value of a target signal.
    Target(ComparisonToTarget),
    /// Compare reduced data recorded by a sibling plan.
    PlanData(ComparisonToPlanData),
}

/// A comparison that failed to be prepared, with the causing error.
///
/// Plays the same role for comparisons that `FailedStep` plays for steps:
/// preparation failures are collected, not propagated.
#[derive(Debug)]
pub struct ComparisonError {
    /// Name of the comparison that failed.
    pub name: String,
    /// Identifier of the thing it targeted (signal or plan name).
    pub identifier: String,
    /// The causing error.
    pub error: CheckoutError,
}

/// A comparison bound to a resolved live signal.
pub struct PreparedSignalComparison {
    /// Name of the comparison.
    pub name: String,
    /// The resolved signal under test.
    pub signal: SignalHandle,
    /// The comparison to apply.
    pub comparison: Comparison,
    /// Result of the last evaluation; incomplete until compared.
    pub result: Outcome,
}

impl PreparedSignalComparison {
    /// Resolve a [`ComparisonToTarget`] into its prepared form.
    ///
    /// Fails with a [`ComparisonError`] when the target does not resolve to
    /// a signal.
    pub async fn from_target(
        check: &ComparisonToTarget,
        ctx: &RunContext,
    ) -> Result<Self, ComparisonError> {
        let identifier = check.target.describe();
        let signal = check.target.to_signal(ctx.signals.as_ref()).await.ok_or_else(|| {
            ComparisonError {
                name: check.comparison.name.clone(),
                identifier: identifier.clone(),
                error: CheckoutError::SignalResolution(identifier.clone()),
            }
        })?;

        Ok(Self {
            name: check.comparison.name.clone(),
            signal,
            comparison: check.comparison.clone(),
            result: Outcome::incomplete(),
        })
    }

    /// Evaluate the comparison and store its outcome.
    pub async fn compare(&mut self, ctx: &RunContext) -> Outcome {
        self.result = ctx
            .comparisons
            .compare_signal(&self.signal, &self.comparison)
            .await;
        self.result.clone()
    }
}

/// A comparison bound to the recorded output of a prior plan run.
pub struct PreparedPlanComparison {
    /// Name of the comparison.
    pub name: String,
    /// Which plan data to consume.
    pub plan_data: PlanData,
    /// The comparison to apply.
    pub comparison: Comparison,
    /// Result of the last evaluation; incomplete until compared.
    pub result: Outcome,
}

impl PreparedPlanComparison {
    /// Resolve a [`ComparisonToPlanData`] into its prepared form.
    ///
    /// Fails with a [`ComparisonError`] when no plan name was given; there
    /// is nothing to correlate the data against.
    pub fn from_plan_data(check: &ComparisonToPlanData) -> Result<Self, ComparisonError> {
        let plan_name = check.plan_data.plan_name.clone().ok_or_else(|| ComparisonError {
            name: check.comparison.name.clone(),
            identifier: String::new(),
            error: CheckoutError::Comparison(
                "plan data comparison has no plan name".to_string(),
            ),
        })?;

        Ok(Self {
            name: format!("{}[{plan_name}]", check.comparison.name),
            plan_data: check.plan_data.clone(),
            comparison: check.comparison.clone(),
            result: Outcome::incomplete(),
        })
    }

    /// Evaluate the comparison and store its outcome.
    pub async fn compare(&mut self, ctx: &RunContext) -> Outcome {
        self.result = ctx
            .comparisons
            .compare_plan_data(&self.plan_data, &self.comparison)
            .await;
        self.result.clone()
    }
}

/// A prepared check of either flavor.
pub enum PreparedCheck {
    /// Bound to a live signal.
    Signal(PreparedSignalComparison),
    /// Bound to prior plan data.
    PlanData(PreparedPlanComparison),
}

impl PreparedCheck {
    /// Name of the underlying comparison.
    pub fn name(&self) -> &str {
        match self {
            PreparedCheck::Signal(check) => &check.name,
            PreparedCheck::PlanData(check) => &check.name,
        }
    }

    /// Result of the last evaluation.
    pub fn result(&self) -> &Outcome {
        match self {
            PreparedCheck::Signal(check) => &check.result,
            PreparedCheck::PlanData(check) => &check.result,
        }
    }

    /// Evaluate the check and store its outcome.
    pub async fn compare(&mut self, ctx: &RunContext) -> Outcome {
        match self {
            PreparedCheck::Signal(check) => check.compare(ctx).await,
            PreparedCheck::PlanData(check) => check.compare(ctx).await,
        }
    }
}

/// Resolve a check into its prepared counterpart.
///
/// Dispatches on the check variant; either way a resolution failure comes
/// back as a [`ComparisonError`] value rather than an error, mirroring the
/// never-raise discipline of step preparation.
pub async fn create_prepared_comparison(
    check: &PlanCheck,
    ctx: &RunContext,
) -> Result<PreparedCheck, ComparisonError> {
    match check {
        PlanCheck::Target(to_target) => PreparedSignalComparison::from_target(to_target, ctx)
            .await
            .map(PreparedCheck::Signal),
        PlanCheck::PlanData(to_plan) => {
            PreparedPlanComparison::from_plan_data(to_plan).map(PreparedCheck::PlanData)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBeamline;
    use crate::result::Severity;
    use crate::target::Target;

    fn check_for_channel(channel: &str) -> PlanCheck {
        PlanCheck::Target(ComparisonToTarget {
            target: Target {
                channel: Some(channel.to_string()),
                ..Target::default()
            },
            comparison: Comparison {
                name: "gap readback".to_string(),
                criteria: serde_json::json!({ "equals": 7.5 }),
            },
        })
    }

    #[tokio::test]
    async fn test_dispatch_to_signal_comparison() {
        let beamline = MockBeamline::new();
        beamline.add_channel("UND:GAP", 7.5.into());
        let ctx = beamline.context();

        let mut prepared = create_prepared_comparison(&check_for_channel("UND:GAP"), &ctx)
            .await
            .ok()
            .unwrap();
        assert!(prepared.result().is_incomplete());

        let outcome = prepared.compare(&ctx).await;
        assert_eq!(outcome.severity, Severity::Success);
        assert_eq!(prepared.result(), &outcome);
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_captured_not_raised() {
        let beamline = MockBeamline::new();
        let ctx = beamline.context();

        let result = create_prepared_comparison(&check_for_channel("NO:SUCH"), &ctx).await;
        let error = result.err().unwrap();
        assert_eq!(error.name, "gap readback");
        assert_eq!(error.identifier, "NO:SUCH");
        assert!(matches!(error.error, CheckoutError::SignalResolution(_)));
    }

    #[tokio::test]
    async fn test_plan_data_check_requires_plan_name() {
        let beamline = MockBeamline::new();
        let ctx = beamline.context();

        let check = PlanCheck::PlanData(ComparisonToPlanData::default());
        let error = create_prepared_comparison(&check, &ctx).await.err().unwrap();
        assert!(matches!(error.error, CheckoutError::Comparison(_)));
    }
}

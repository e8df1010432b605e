//! Prepared plan step: submit scan plans, then verify their results.
//!
//! Preparation builds one submittable plan per specification and one
//! prepared check per comparison, collecting per-item failures. Running
//! validates *every* plan against the allowed namespace before submitting
//! *any* of them: a batch with one invalid plan submits nothing.

use tracing::warn;

use crate::backend::RunContext;
use crate::comparison::{create_prepared_comparison, ComparisonError, PreparedCheck};
use crate::error::AppResult;
use crate::plan::{PlanDestination, PlanOptions, PreparedPlan};
use crate::prepared::PreparedStepState;
use crate::procedure::{PlanStep, StepPath};
use crate::result::{summarize_severity, GroupResultMode, Outcome};

/// A plan step bound to submittable plans and prepared checks.
pub struct PreparedPlanStep {
    /// Shared runtime state.
    pub state: PreparedStepState,
    destination: PlanDestination,
    require_plan_success: bool,
    /// Plans ready to submit, in declaration order.
    pub prepared_plans: Vec<PreparedPlan>,
    /// Plans that failed to be prepared, as configured.
    pub prepare_plan_failures: Vec<PlanOptions>,
    /// Checks ready to evaluate.
    pub prepared_checks: Vec<PreparedCheck>,
    /// Checks that failed to be prepared, with causes.
    pub prepare_check_failures: Vec<ComparisonError>,
}

impl PreparedPlanStep {
    /// Resolve every plan and check of the step.
    ///
    /// Failures are collected per item; preparing one item never aborts
    /// the others, and this constructor itself cannot fail.
    pub(crate) async fn from_step(step: &PlanStep, path: StepPath, ctx: &RunContext) -> Self {
        let mut prepared = Self {
            state: PreparedStepState::new(&step.meta, path),
            destination: step.destination,
            require_plan_success: step.require_plan_success,
            prepared_plans: Vec::new(),
            prepare_plan_failures: Vec::new(),
            prepared_checks: Vec::new(),
            prepare_check_failures: Vec::new(),
        };

        for plan in &step.plans {
            match PreparedPlan::from_origin(plan) {
                Ok(prepared_plan) => prepared.prepared_plans.push(prepared_plan),
                Err(error) => {
                    warn!(plan = %plan.name, %error, "plan failed to prepare");
                    prepared.prepare_plan_failures.push(plan.clone());
                }
            }
        }

        for check in &step.checks {
            match create_prepared_comparison(check, ctx).await {
                Ok(prepared_check) => prepared.prepared_checks.push(prepared_check),
                Err(error) => prepared.prepare_check_failures.push(error),
            }
        }

        prepared
    }

    /// Validate, submit, and check, combining everything that applies.
    pub(crate) async fn execute(&mut self, ctx: &RunContext) -> AppResult<Outcome> {
        if self.require_plan_success && !self.prepare_plan_failures.is_empty() {
            let names: Vec<&str> = self
                .prepare_plan_failures
                .iter()
                .map(|plan| plan.name.as_str())
                .collect();
            return Ok(Outcome::error(format!(
                "one or more plans failed to prepare: {names:?}"
            )));
        }

        // Validate every plan before submitting any of them.
        let mut validation_failures = Vec::new();
        for plan in &self.prepared_plans {
            let (permitted, detail) = ctx.plans.validate(&plan.item).await;
            if !permitted {
                validation_failures.push(format!("{} ({detail})", plan.name));
            }
        }
        if !validation_failures.is_empty() {
            return Ok(Outcome::error(format!(
                "one or more plans failed validation: {validation_failures:?}"
            )));
        }

        let mut plan_results = Vec::with_capacity(self.prepared_plans.len());
        for plan in &mut self.prepared_plans {
            plan_results.push(plan.run(self.destination, ctx).await);
        }

        for check in &mut self.prepared_checks {
            check.compare(ctx).await;
        }

        if !self.prepare_check_failures.is_empty() {
            let names: Vec<&str> = self
                .prepare_check_failures
                .iter()
                .map(|failure| failure.name.as_str())
                .collect();
            return Ok(Outcome::error(format!(
                "one or more success criteria failed to initialize: {names:?}"
            )));
        }

        let results: Vec<&Outcome> = self
            .prepared_checks
            .iter()
            .map(PreparedCheck::result)
            .chain(plan_results.iter())
            .collect();

        Ok(Outcome::from(summarize_severity(
            GroupResultMode::All,
            results,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBeamline;
    use crate::comparison::{Comparison, PlanCheck};
    use crate::procedure::StepMetadata;
    use crate::result::Severity;
    use crate::target::{ComparisonToPlanData, DataSelection, PlanData};

    fn plan(name: &str, plan_name: &str) -> PlanOptions {
        PlanOptions {
            name: name.to_string(),
            plan: plan_name.to_string(),
            ..PlanOptions::default()
        }
    }

    fn step(plans: Vec<PlanOptions>, checks: Vec<PlanCheck>) -> PlanStep {
        PlanStep {
            meta: StepMetadata {
                verify_required: false,
                ..StepMetadata::named("daily scans")
            },
            plans,
            checks,
            destination: PlanDestination::Local,
            halt_on_fail: true,
            require_plan_success: true,
        }
    }

    fn data_check(plan_name: &str, expected: f64) -> PlanCheck {
        PlanCheck::PlanData(ComparisonToPlanData {
            plan_data: PlanData {
                plan_name: Some(plan_name.to_string()),
                data_points: DataSelection::Points(vec![0, 1, 2]),
                reduction_mode: crate::reduce::ReduceMethod::Average,
            },
            comparison: Comparison {
                name: "scan average".to_string(),
                criteria: serde_json::json!({ "equals": expected }),
            },
        })
    }

    async fn prepare(step: &PlanStep, ctx: &RunContext) -> PreparedPlanStep {
        PreparedPlanStep::from_step(step, StepPath::root().child(0), ctx).await
    }

    #[tokio::test]
    async fn test_submit_and_check_plan_data() {
        let beamline = MockBeamline::new();
        beamline.allow_plan("line_scan");
        beamline.set_plan_data("align", vec![1.0, 2.0, 3.0]);
        let ctx = beamline.context();

        let origin = step(
            vec![plan("align", "line_scan")],
            vec![data_check("align", 2.0)],
        );
        let mut prepared = prepare(&origin, &ctx).await;

        let outcome = prepared.execute(&ctx).await.unwrap();
        assert_eq!(outcome.severity, Severity::Success);
        assert!(prepared.prepared_plans[0].uuid.is_some());
    }

    #[tokio::test]
    async fn test_validation_failure_submits_nothing() {
        let beamline = MockBeamline::new();
        beamline.allow_plan("line_scan");
        let ctx = beamline.context();

        let origin = step(
            vec![plan("good", "line_scan"), plan("bad", "forbidden_scan")],
            Vec::new(),
        );
        let mut prepared = prepare(&origin, &ctx).await;

        let outcome = prepared.execute(&ctx).await.unwrap();
        assert_eq!(outcome.severity, Severity::Error);
        assert!(outcome.reason_str().contains("failed validation"));
        assert!(outcome.reason_str().contains("bad"));
        // Validate-all-then-run: the valid plan was not submitted either.
        assert!(beamline.submitted_plans().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_failure_fails_fast_when_required() {
        let beamline = MockBeamline::new();
        beamline.allow_plan("line_scan");
        let ctx = beamline.context();

        let origin = step(
            vec![plan("good", "line_scan"), plan("empty", "")],
            Vec::new(),
        );
        let mut prepared = prepare(&origin, &ctx).await;
        assert_eq!(prepared.prepare_plan_failures.len(), 1);

        let outcome = prepared.execute(&ctx).await.unwrap();
        assert_eq!(outcome.severity, Severity::Error);
        assert!(outcome.reason_str().contains("failed to prepare"));
        assert!(beamline.submitted_plans().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_failure_tolerated_when_not_required() {
        let beamline = MockBeamline::new();
        beamline.allow_plan("line_scan");
        let ctx = beamline.context();

        let mut origin = step(
            vec![plan("good", "line_scan"), plan("empty", "")],
            Vec::new(),
        );
        origin.require_plan_success = false;
        let mut prepared = prepare(&origin, &ctx).await;

        let outcome = prepared.execute(&ctx).await.unwrap();
        assert_eq!(outcome.severity, Severity::Success);
        assert_eq!(beamline.submitted_plans().len(), 1);
    }

    #[tokio::test]
    async fn test_check_prepare_failure_is_an_error() {
        let beamline = MockBeamline::new();
        beamline.allow_plan("line_scan");
        let ctx = beamline.context();

        // A plan-data check with no plan name cannot be prepared.
        let origin = step(
            vec![plan("align", "line_scan")],
            vec![PlanCheck::PlanData(ComparisonToPlanData::default())],
        );
        let mut prepared = prepare(&origin, &ctx).await;
        assert_eq!(prepared.prepare_check_failures.len(), 1);

        let outcome = prepared.execute(&ctx).await.unwrap();
        assert_eq!(outcome.severity, Severity::Error);
        assert!(outcome
            .reason_str()
            .contains("success criteria failed to initialize"));
    }
}

//! Scan plan specifications and the plan submission adapter.
//!
//! A [`PlanOptions`] names a plan in the execution engine's namespace with
//! positional and keyword arguments. Preparation turns it into a
//! [`PreparedPlan`] holding the submittable [`PlanItem`]; running submits
//! the item to the configured destination and records the correlation id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::backend::RunContext;
use crate::error::{AppResult, CheckoutError};
use crate::result::Outcome;

/// Where a plan is submitted for execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanDestination {
    /// The in-process run engine.
    #[default]
    Local,
    /// A remote queueing service.
    Queue,
}

/// Options for one scan plan within a plan step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanOptions {
    /// Name identifying this plan within the procedure.
    pub name: String,
    /// The plan name in the execution engine's namespace.
    pub plan: String,
    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
    /// Argument names that must not be edited by a host GUI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_arguments: Option<Vec<String>>,
}

/// The submittable request built from a [`PlanOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    /// The plan name in the execution engine's namespace.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
    /// Submitting user group.
    pub user_group: String,
}

impl PlanItem {
    /// Build the request item for a plan specification.
    pub fn from_options(options: &PlanOptions) -> Self {
        Self {
            name: options.plan.clone(),
            args: options.args.clone(),
            kwargs: options.kwargs.clone(),
            user_group: "root".to_string(),
        }
    }
}

/// A plan resolved into a submittable request.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    /// Name identifying this plan within the procedure.
    pub name: String,
    /// The request to submit.
    pub item: PlanItem,
    /// The originating plan options.
    pub origin: PlanOptions,
    /// Correlation id returned by the execution engine, once submitted.
    pub uuid: Option<Uuid>,
    /// Result of the submission; incomplete until run.
    pub result: Outcome,
}

impl PreparedPlan {
    /// Resolve plan options into a submittable plan.
    ///
    /// Fails when the options name no plan to run.
    pub fn from_origin(origin: &PlanOptions) -> AppResult<Self> {
        if origin.plan.is_empty() {
            return Err(CheckoutError::InvalidPlan(format!(
                "plan options ({}) name no plan to run",
                origin.name
            )));
        }

        Ok(Self {
            name: origin.name.clone(),
            item: PlanItem::from_options(origin),
            origin: origin.clone(),
            uuid: None,
            result: Outcome::incomplete(),
        })
    }

    /// Submit the plan to `destination` and record the outcome.
    ///
    /// Only the local run engine is supported; any other destination is a
    /// recorded error and the plan is not submitted. Submission failures
    /// become error outcomes, never propagated errors.
    pub async fn run(&mut self, destination: PlanDestination, ctx: &RunContext) -> Outcome {
        if destination != PlanDestination::Local {
            self.result =
                Outcome::error("only the local run engine destination is supported");
            return self.result.clone();
        }

        match ctx.plans.submit(&self.item).await {
            Ok(uuid) => {
                info!(plan = %self.name, %uuid, "plan submitted");
                self.uuid = Some(uuid);
                self.result = Outcome::success();
            }
            Err(error) => {
                self.result =
                    Outcome::error(format!("plan submission failed ({}): {error}", self.name));
            }
        }
        self.result.clone()
    }
}

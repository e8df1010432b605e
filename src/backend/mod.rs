//! Capability seams between the procedure engine and the outside world.
//!
//! The engine never talks to hardware, scan engines, or checkout files
//! directly. Hosts supply implementations of the traits in this module and
//! bundle them into a [`RunContext`]; the prepared tree carries the context
//! through preparation and execution.
//!
//! Backend methods return `anyhow::Result` so hosts can surface whatever
//! error types they have; the engine converts failures into `FailedStep`
//! sentinels or error-severity outcomes at the boundary and never lets them
//! propagate further.

pub mod mock;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::comparison::Comparison;
use crate::plan::PlanItem;
use crate::result::Outcome;
use crate::target::PlanData;

/// Opaque token for a resolved, addressable hardware signal.
///
/// The id is only meaningful to the [`SignalBackend`] that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalHandle {
    /// Backend-scoped identifier for the signal.
    pub id: String,
}

impl SignalHandle {
    /// Wrap a backend-scoped identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for SignalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Resolution and write access to live hardware signals.
#[async_trait]
pub trait SignalBackend: Send + Sync {
    /// Look up the signal behind a device attribute in the device directory.
    async fn signal_for_device(&self, device: &str, attr: &str) -> anyhow::Result<SignalHandle>;

    /// Look up a signal by its raw channel identifier.
    async fn signal_for_channel(&self, channel: &str) -> anyhow::Result<SignalHandle>;

    /// Write a value to a resolved signal and wait for completion.
    ///
    /// `timeout` and `settle_time` are optional; when absent the backend's
    /// defaults apply.
    async fn write(
        &self,
        signal: &SignalHandle,
        value: &Value,
        timeout: Option<Duration>,
        settle_time: Option<Duration>,
    ) -> anyhow::Result<()>;
}

/// Evaluation of a single comparison.
///
/// The pass/fail logic itself lives behind this trait; the engine only
/// requires a severity-bearing [`Outcome`]. Implementations must not fail:
/// an unevaluable comparison is an error-severity outcome.
#[async_trait]
pub trait ComparisonBackend: Send + Sync {
    /// Compare the current value of a live signal against the criteria.
    async fn compare_signal(&self, signal: &SignalHandle, comparison: &Comparison) -> Outcome;

    /// Compare reduced data from a previously-run plan against the criteria.
    async fn compare_plan_data(&self, data: &PlanData, comparison: &Comparison) -> Outcome;
}

/// Submission of scan plans to an execution engine.
#[async_trait]
pub trait PlanBackend: Send + Sync {
    /// Check a plan item against the allowed-plans/allowed-devices namespace.
    ///
    /// Returns whether the item is permitted plus a human-readable detail.
    async fn validate(&self, item: &PlanItem) -> (bool, String);

    /// Submit a plan item for execution and return its correlation id.
    async fn submit(&self, item: &PlanItem) -> anyhow::Result<Uuid>;
}

/// A nested passive-checkout file that has been loaded and prepared.
#[async_trait]
pub trait PreparedPassiveFile: Send + Sync {
    /// Execute the nested checkout and report its overall outcome.
    async fn run(&mut self) -> Outcome;
}

/// Loading and preparation of nested passive-checkout files.
///
/// Passive checkouts are an independently-specified engine; the procedure
/// runner only delegates to it through this seam.
#[async_trait]
pub trait PassiveBackend: Send + Sync {
    /// Load the checkout file at `path` and resolve it against live hardware.
    async fn prepare(&self, path: &Path) -> anyhow::Result<Box<dyn PreparedPassiveFile>>;
}

/// Bundle of every capability a procedure needs to prepare and run.
///
/// Cheap to clone; all members are shared handles.
#[derive(Clone)]
pub struct RunContext {
    /// Signal resolution and writes.
    pub signals: Arc<dyn SignalBackend>,
    /// Comparison evaluation.
    pub comparisons: Arc<dyn ComparisonBackend>,
    /// Plan validation and submission.
    pub plans: Arc<dyn PlanBackend>,
    /// Nested passive-checkout execution.
    pub passive: Arc<dyn PassiveBackend>,
}

impl RunContext {
    /// Bundle the four capabilities into a context.
    pub fn new(
        signals: Arc<dyn SignalBackend>,
        comparisons: Arc<dyn ComparisonBackend>,
        plans: Arc<dyn PlanBackend>,
        passive: Arc<dyn PassiveBackend>,
    ) -> Self {
        Self {
            signals,
            comparisons,
            plans,
            passive,
        }
    }
}

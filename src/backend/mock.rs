//! In-memory mock beamline implementing every capability trait.
//!
//! Backs the crate's tests and gives hosts a hardware-free way to exercise
//! procedures: registered channels and device attributes behave as settable
//! signals, plan submissions are recorded with fresh correlation ids, plan
//! data series can be injected for plan-data checks, and passive checkout
//! files map directly to configured outcomes.
//!
//! Comparison criteria are interpreted minimally: an object of the form
//! `{"equals": value}` compares for equality; anything else evaluates to an
//! error outcome.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{
    ComparisonBackend, PassiveBackend, PlanBackend, PreparedPassiveFile, RunContext,
    SignalBackend, SignalHandle,
};
use crate::comparison::Comparison;
use crate::plan::PlanItem;
use crate::result::Outcome;
use crate::target::PlanData;

#[derive(Default)]
struct MockState {
    signals: HashMap<String, Value>,
    failing_writes: HashSet<String>,
    allowed_plans: HashSet<String>,
    submitted: Vec<PlanItem>,
    plan_data: HashMap<String, Vec<f64>>,
    passive_files: HashMap<PathBuf, Outcome>,
}

/// A simulated beamline: signals, plan engine, and passive checkouts in one.
///
/// Clones share state; [`MockBeamline::context`] wraps clones of self into
/// a [`RunContext`] serving all four capabilities.
#[derive(Clone, Default)]
pub struct MockBeamline {
    state: Arc<Mutex<MockState>>,
}

impl MockBeamline {
    /// An empty beamline: no signals, no allowed plans, no checkout files.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bundle this beamline into a [`RunContext`] serving every capability.
    pub fn context(&self) -> RunContext {
        RunContext::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    /// Register a raw channel with an initial value.
    pub fn add_channel(&self, channel: &str, value: Value) {
        self.state().signals.insert(channel.to_string(), value);
    }

    /// Register a device attribute with an initial value.
    pub fn add_device(&self, device: &str, attr: &str, value: Value) {
        self.state()
            .signals
            .insert(format!("{device}.{attr}"), value);
    }

    /// Make every write to the given signal id fail.
    pub fn fail_writes_to(&self, id: &str) {
        self.state().failing_writes.insert(id.to_string());
    }

    /// Current value of a signal, by id.
    pub fn channel_value(&self, id: &str) -> Option<Value> {
        self.state().signals.get(id).cloned()
    }

    /// Add a plan name to the allowed namespace.
    pub fn allow_plan(&self, plan: &str) {
        self.state().allowed_plans.insert(plan.to_string());
    }

    /// Every plan item submitted so far, in order.
    pub fn submitted_plans(&self) -> Vec<PlanItem> {
        self.state().submitted.clone()
    }

    /// Inject a recorded data series for a named plan.
    pub fn set_plan_data(&self, plan_name: &str, samples: Vec<f64>) {
        self.state().plan_data.insert(plan_name.to_string(), samples);
    }

    /// Register a passive checkout file that runs to the given outcome.
    pub fn add_passive_checkout(&self, path: impl Into<PathBuf>, outcome: Outcome) {
        self.state().passive_files.insert(path.into(), outcome);
    }

    fn evaluate_equals(&self, comparison: &Comparison, actual: &Value) -> Outcome {
        let Some(expected) = comparison.criteria.get("equals") else {
            return Outcome::error(format!(
                "unsupported criteria for comparison ({})",
                comparison.name
            ));
        };
        if expected == actual {
            Outcome::success()
        } else {
            Outcome::error(format!(
                "{}: expected {expected}, got {actual}",
                comparison.name
            ))
        }
    }
}

#[async_trait]
impl SignalBackend for MockBeamline {
    async fn signal_for_device(&self, device: &str, attr: &str) -> anyhow::Result<SignalHandle> {
        let id = format!("{device}.{attr}");
        if self.state().signals.contains_key(&id) {
            Ok(SignalHandle::new(id))
        } else {
            Err(anyhow!("device attribute not found: {id}"))
        }
    }

    async fn signal_for_channel(&self, channel: &str) -> anyhow::Result<SignalHandle> {
        if self.state().signals.contains_key(channel) {
            Ok(SignalHandle::new(channel))
        } else {
            Err(anyhow!("channel not found: {channel}"))
        }
    }

    async fn write(
        &self,
        signal: &SignalHandle,
        value: &Value,
        _timeout: Option<Duration>,
        _settle_time: Option<Duration>,
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        if state.failing_writes.contains(&signal.id) {
            return Err(anyhow!("write refused by signal {}", signal.id));
        }
        match state.signals.get_mut(&signal.id) {
            Some(stored) => {
                *stored = value.clone();
                Ok(())
            }
            None => Err(anyhow!("unknown signal {}", signal.id)),
        }
    }
}

#[async_trait]
impl ComparisonBackend for MockBeamline {
    async fn compare_signal(&self, signal: &SignalHandle, comparison: &Comparison) -> Outcome {
        let Some(actual) = self.channel_value(&signal.id) else {
            return Outcome::error(format!("unknown signal {}", signal.id));
        };
        self.evaluate_equals(comparison, &actual)
    }

    async fn compare_plan_data(&self, data: &PlanData, comparison: &Comparison) -> Outcome {
        let Some(plan_name) = &data.plan_name else {
            return Outcome::error("plan data comparison has no plan name");
        };
        let Some(samples) = self.state().plan_data.get(plan_name).cloned() else {
            return Outcome::error(format!("no recorded data for plan ({plan_name})"));
        };

        let selected: Vec<f64> = data
            .data_points
            .indices()
            .into_iter()
            .filter_map(|index| samples.get(index).copied())
            .collect();
        let Some(reduced) = data.reduction_mode.reduce(&selected) else {
            return Outcome::error(format!(
                "selection matched no data points for plan ({plan_name})"
            ));
        };

        self.evaluate_equals(comparison, &Value::from(reduced))
    }
}

#[async_trait]
impl PlanBackend for MockBeamline {
    async fn validate(&self, item: &PlanItem) -> (bool, String) {
        if self.state().allowed_plans.contains(&item.name) {
            (true, "plan permitted".to_string())
        } else {
            (false, format!("plan not in allowed namespace: {}", item.name))
        }
    }

    async fn submit(&self, item: &PlanItem) -> anyhow::Result<Uuid> {
        let mut state = self.state();
        if !state.allowed_plans.contains(&item.name) {
            return Err(anyhow!("plan not in allowed namespace: {}", item.name));
        }
        state.submitted.push(item.clone());
        Ok(Uuid::new_v4())
    }
}

struct MockPassiveFile {
    outcome: Outcome,
}

#[async_trait]
impl PreparedPassiveFile for MockPassiveFile {
    async fn run(&mut self) -> Outcome {
        self.outcome.clone()
    }
}

#[async_trait]
impl PassiveBackend for MockBeamline {
    async fn prepare(&self, path: &Path) -> anyhow::Result<Box<dyn PreparedPassiveFile>> {
        match self.state().passive_files.get(path) {
            Some(outcome) => Ok(Box::new(MockPassiveFile {
                outcome: outcome.clone(),
            })),
            None => Err(anyhow!("unable to load checkout file: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_updates_channel() {
        let beamline = MockBeamline::new();
        beamline.add_channel("PV:X", 0.0.into());

        let signal = beamline.signal_for_channel("PV:X").await.unwrap();
        beamline
            .write(&signal, &Value::from(2.5), None, None)
            .await
            .unwrap();
        assert_eq!(beamline.channel_value("PV:X"), Some(2.5.into()));
    }

    #[tokio::test]
    async fn test_plan_data_comparison_reduces_selection() {
        let beamline = MockBeamline::new();
        beamline.set_plan_data("scan", vec![1.0, 3.0, 100.0]);

        let data = PlanData {
            plan_name: Some("scan".to_string()),
            data_points: crate::target::DataSelection::Points(vec![0, 1]),
            reduction_mode: crate::reduce::ReduceMethod::Average,
        };
        let comparison = Comparison {
            name: "scan average".to_string(),
            criteria: serde_json::json!({ "equals": 2.0 }),
        };
        let outcome = beamline.compare_plan_data(&data, &comparison).await;
        assert_eq!(outcome.severity, crate::result::Severity::Success);
    }

    #[tokio::test]
    async fn test_unsupported_criteria_is_error() {
        let beamline = MockBeamline::new();
        beamline.add_channel("PV:X", 1.0.into());
        let signal = beamline.signal_for_channel("PV:X").await.unwrap();

        let comparison = Comparison {
            name: "odd".to_string(),
            criteria: serde_json::json!({ "within": 0.1 }),
        };
        let outcome = beamline.compare_signal(&signal, &comparison).await;
        assert_eq!(outcome.severity, crate::result::Severity::Error);
    }
}

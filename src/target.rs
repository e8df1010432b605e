//! Target specifications: where a value goes and what data to compare.
//!
//! A [`Target`] names one addressable hardware signal, either as a device
//! attribute looked up in the device directory or as a raw channel
//! identifier. [`PlanData`] instead points at the output of a sibling plan
//! step. Both are pure data with an on-demand resolution method; resolution
//! failure is silent by design so callers must check for absence.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::{SignalBackend, SignalHandle};
use crate::comparison::Comparison;
use crate::reduce::ReduceMethod;

/// A destination for a value: a device+attribute pair or a raw channel id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Name of the target, for reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Device name in the device directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Attribute of the device holding the signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    /// Raw channel identifier, used when no device+attr pair is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Target {
    /// Resolve this target to a signal handle.
    ///
    /// First attempts the device+attribute lookup, falling back to the raw
    /// channel identifier. Returns `None` when the target is underspecified
    /// or the backend cannot resolve it; failures are logged at debug level
    /// and never propagated.
    pub async fn to_signal(&self, signals: &dyn SignalBackend) -> Option<SignalHandle> {
        let resolved = match (&self.device, &self.attr, &self.channel) {
            (Some(device), Some(attr), _) => signals.signal_for_device(device, attr).await,
            (_, _, Some(channel)) => signals.signal_for_channel(channel).await,
            _ => {
                debug!(
                    target = %self.describe(),
                    "unable to create signal, insufficient information to specify signal"
                );
                return None;
            }
        };

        match resolved {
            Ok(signal) => Some(signal),
            Err(error) => {
                debug!(target = %self.describe(), %error, "unable to create signal");
                None
            }
        }
    }

    /// A short human-readable identification of this target.
    pub fn describe(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.device, &self.attr, &self.channel) {
            (Some(device), Some(attr), _) => format!("{device}.{attr}"),
            (_, _, Some(channel)) => channel.clone(),
            _ => "<unspecified target>".to_string(),
        }
    }
}

/// A value to write to a target, with optional write tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueToTarget {
    /// Where the value goes.
    #[serde(flatten)]
    pub target: Target,
    /// The value to set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Write timeout; backend default when absent.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Settle time after the write; backend default when absent.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub settle_time: Option<Duration>,
}

/// A comparison applied to the live value of a target signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonToTarget {
    /// The signal under test.
    #[serde(flatten)]
    pub target: Target,
    /// The comparison to apply.
    pub comparison: Comparison,
}

/// Which data points of a plan's output a comparison consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataSelection {
    /// A single 0-indexed point.
    Single(usize),
    /// An explicit list of 0-indexed points.
    Points(Vec<usize>),
    /// A slice `[start, stop)` with the given stride.
    Slice {
        /// First index included.
        start: usize,
        /// First index excluded.
        stop: usize,
        /// Stride between points.
        step: usize,
    },
}

impl Default for DataSelection {
    fn default() -> Self {
        DataSelection::Points(Vec::new())
    }
}

impl DataSelection {
    /// Materialize the selected indices.
    pub fn indices(&self) -> Vec<usize> {
        match self {
            DataSelection::Single(index) => vec![*index],
            DataSelection::Points(points) => points.clone(),
            DataSelection::Slice { start, stop, step } => {
                if *step == 0 {
                    return Vec::new();
                }
                (*start..*stop).step_by(*step).collect()
            }
        }
    }
}

/// A reference to the output of a sibling plan step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanData {
    /// Name of the plan step to take data from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    /// Which data points to consume.
    #[serde(default)]
    pub data_points: DataSelection,
    /// How to collapse multiple points into one value.
    #[serde(default)]
    pub reduction_mode: ReduceMethod,
}

/// A comparison applied to reduced data from a prior plan run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonToPlanData {
    /// Which plan data to consume.
    #[serde(flatten)]
    pub plan_data: PlanData,
    /// The comparison to apply.
    pub comparison: Comparison,
}

//! Edit model for checkout procedures.
//!
//! A procedure is a tree of steps: narrative description steps, passive
//! checkout references, set-value-and-verify steps, scan plan executions,
//! and groups nesting further steps. These types carry everything needed to
//! *specify* a step; the runtime counterparts in [`crate::prepared`] resolve
//! them against live hardware and hold results.
//!
//! The step family is a closed tagged union: adding a step means adding a
//! variant here, a prepared counterpart, and arms in the prepare/run/result
//! dispatches — the compiler flags every site.
//!
//! Steps do not store parent pointers. A node is addressed by its
//! [`StepPath`] (the index path from the root group), which doubles as a
//! stable identity and yields the parent as the path prefix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::comparison::PlanCheck;
use crate::error::AppResult;
use crate::plan::{PlanDestination, PlanOptions};
use crate::target::{ComparisonToTarget, ValueToTarget};

fn default_true() -> bool {
    true
}

/// Fields common to every step variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    /// The title of the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Narrative explanation of the step: setup, what is to happen, etc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether a human must confirm the step's result.
    #[serde(default = "default_true")]
    pub verify_required: bool,
    /// Whether the step itself must complete successfully.
    #[serde(default = "default_true")]
    pub step_success_required: bool,
}

impl Default for StepMetadata {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            verify_required: true,
            step_success_required: true,
        }
    }
}

impl StepMetadata {
    /// Metadata with just a name and default flags.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// A group of procedure steps (or nested groups).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureGroup {
    /// Common step fields.
    #[serde(flatten)]
    pub meta: StepMetadata,
    /// Steps included in the group, in execution order.
    #[serde(default)]
    pub steps: Vec<ProcedureStep>,
}

/// A simple title or descriptive step; no work, always succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptionStep {
    /// Common step fields.
    #[serde(flatten)]
    pub meta: StepMetadata,
}

/// A step that runs a passive checkout file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassiveStep {
    /// Common step fields.
    #[serde(flatten)]
    pub meta: StepMetadata,
    /// Path to the passive checkout file.
    #[serde(default)]
    pub filepath: PathBuf,
}

/// A step that sets one or more values and checks one or more values after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetValueStep {
    /// Common step fields.
    #[serde(flatten)]
    pub meta: StepMetadata,
    /// Values to write, in order.
    #[serde(default)]
    pub actions: Vec<ValueToTarget>,
    /// Comparisons evaluated after the actions ran.
    #[serde(default)]
    pub success_criteria: Vec<ComparisonToTarget>,
    /// Stop performing actions if one fails.
    #[serde(default = "default_true")]
    pub halt_on_fail: bool,
    /// Only count the step successful if all actions succeeded.
    #[serde(default = "default_true")]
    pub require_action_success: bool,
}

impl Default for SetValueStep {
    fn default() -> Self {
        Self {
            meta: StepMetadata::default(),
            actions: Vec::new(),
            success_criteria: Vec::new(),
            halt_on_fail: true,
            require_action_success: true,
        }
    }
}

/// A step comprised of one or more scan plans plus follow-up checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Common step fields.
    #[serde(flatten)]
    pub meta: StepMetadata,
    /// Plans to submit, in order.
    #[serde(default)]
    pub plans: Vec<PlanOptions>,
    /// Checks evaluated after the plans ran.
    #[serde(default)]
    pub checks: Vec<PlanCheck>,
    /// Where the plans are submitted.
    #[serde(default)]
    pub destination: PlanDestination,
    /// Stop performing plans if one fails.
    #[serde(default = "default_true")]
    pub halt_on_fail: bool,
    /// Only count the step successful if all plans succeeded.
    #[serde(default = "default_true")]
    pub require_plan_success: bool,
}

impl Default for PlanStep {
    fn default() -> Self {
        Self {
            meta: StepMetadata::default(),
            plans: Vec::new(),
            checks: Vec::new(),
            destination: PlanDestination::Local,
            halt_on_fail: true,
            require_plan_success: true,
        }
    }
}

/// One node in the procedure tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcedureStep {
    /// A group of further steps.
    Group(ProcedureGroup),
    /// A narrative marker.
    Description(DescriptionStep),
    /// A passive checkout file reference.
    Passive(PassiveStep),
    /// Set values, then verify.
    SetValue(SetValueStep),
    /// Run scan plans, then verify.
    Plan(PlanStep),
}

impl ProcedureStep {
    /// The common fields of whichever variant this is.
    pub fn meta(&self) -> &StepMetadata {
        match self {
            ProcedureStep::Group(step) => &step.meta,
            ProcedureStep::Description(step) => &step.meta,
            ProcedureStep::Passive(step) => &step.meta,
            ProcedureStep::SetValue(step) => &step.meta,
            ProcedureStep::Plan(step) => &step.meta,
        }
    }

    /// The step's name, if set.
    pub fn name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    /// A short label for the variant, for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcedureStep::Group(_) => "group",
            ProcedureStep::Description(_) => "description",
            ProcedureStep::Passive(_) => "passive",
            ProcedureStep::SetValue(_) => "set_value",
            ProcedureStep::Plan(_) => "plan",
        }
    }
}

/// Index path addressing a step inside a procedure tree.
///
/// The empty path addresses the root group; `[1, 0]` is the first child of
/// the root's second child. Paths are stable identities for prepared nodes
/// and the parent is simply the path without its last element — the upward
/// reference carries no ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepPath(Vec<usize>);

impl StepPath {
    /// The path of the root group.
    pub fn root() -> Self {
        Self::default()
    }

    /// The path of the `index`-th child of this node.
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// The path of the enclosing group, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The index steps from the root.
    pub fn indices(&self) -> &[usize] {
        &self.0
    }
}

impl std::fmt::Display for StepPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("root")?;
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

impl From<&[usize]> for StepPath {
    fn from(indices: &[usize]) -> Self {
        Self(indices.to_vec())
    }
}

/// File comprised of several procedure steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureFile {
    /// File format version.
    #[serde(default)]
    pub version: u32,
    /// Top-level procedure group.
    #[serde(default)]
    pub root: ProcedureGroup,
}

impl ProcedureFile {
    /// Load a procedure file, dispatching on the file extension.
    ///
    /// `.json` loads as JSON; anything else loads as YAML.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let bytes = std::fs::read(path)?;
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        {
            Self::from_json_slice(&bytes)
        } else {
            Self::from_yaml_slice(&bytes)
        }
    }

    /// Load a procedure tree from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Load a procedure tree from YAML bytes.
    pub fn from_yaml_slice(bytes: &[u8]) -> AppResult<Self> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Dump the tree to a JSON string.
    pub fn to_json_string(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Dump the tree to a YAML string.
    pub fn to_yaml_string(&self) -> AppResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Look up the step at `path`.
    ///
    /// Returns `None` for the root path (the root group is not itself a
    /// [`ProcedureStep`]) and for paths that leave the tree.
    pub fn step_at(&self, path: &StepPath) -> Option<&ProcedureStep> {
        let (first, rest) = path.indices().split_first()?;
        let mut step = self.root.steps.get(*first)?;
        for index in rest {
            match step {
                ProcedureStep::Group(group) => step = group.steps.get(*index)?,
                _ => return None,
            }
        }
        Some(step)
    }

    /// Iterate over every step in the file, depth-first, with its path.
    pub fn walk_steps(&self) -> impl Iterator<Item = (StepPath, &ProcedureStep)> {
        let mut entries = Vec::new();
        walk_group(&self.root, &StepPath::root(), &mut entries);
        entries.into_iter()
    }
}

fn walk_group<'a>(
    group: &'a ProcedureGroup,
    path: &StepPath,
    entries: &mut Vec<(StepPath, &'a ProcedureStep)>,
) {
    for (index, step) in group.steps.iter().enumerate() {
        let step_path = path.child(index);
        entries.push((step_path.clone(), step));
        if let ProcedureStep::Group(sub_group) = step {
            walk_group(sub_group, &step_path, entries);
        }
    }
}

//! Outcome model for checkout procedures.
//!
//! Every step, action, and comparison in a procedure reports an [`Outcome`]:
//! an ordered [`Severity`] plus a human-readable reason. Outcomes compose up
//! the step hierarchy through [`summarize_severity`], which is the single
//! place severity reduction happens.

use serde::{Deserialize, Serialize};

/// Canonical reason attached to the "not yet run" sentinel outcome.
pub const INCOMPLETE_REASON: &str = "step not yet run";

/// Ordered outcome level for a step, action, or comparison.
///
/// The ordering is total: `Success < Warning < Error < InternalError`.
/// Combining outcomes in "all must succeed" mode takes the maximum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The step did what was asked of it.
    #[default]
    Success,
    /// The step completed, but something merits attention.
    Warning,
    /// The step ran and failed, or could not run as configured.
    Error,
    /// The runner itself failed while executing the step.
    InternalError,
}

/// A severity-leveled outcome with a human-readable reason.
///
/// Named `Outcome` rather than `Result` to avoid shadowing
/// [`std::result::Result`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Outcome level.
    pub severity: Severity,
    /// Human-readable explanation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    /// A plain success with no reason attached.
    pub fn success() -> Self {
        Self::default()
    }

    /// An error outcome with the given reason.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            reason: Some(reason.into()),
        }
    }

    /// An internal-error outcome with the given reason.
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self {
            severity: Severity::InternalError,
            reason: Some(reason.into()),
        }
    }

    /// The "not yet evaluated" sentinel.
    ///
    /// Distinct from success: a step that has not run yet counts against a
    /// combined result exactly like a failed one, but carries a recognizable
    /// reason so hosts can tell the two apart.
    pub fn incomplete() -> Self {
        Self {
            severity: Severity::Error,
            reason: Some(INCOMPLETE_REASON.to_string()),
        }
    }

    /// Whether this outcome is the [`Outcome::incomplete`] sentinel.
    pub fn is_incomplete(&self) -> bool {
        self.severity == Severity::Error && self.reason.as_deref() == Some(INCOMPLETE_REASON)
    }

    /// The reason string, or an empty string if none was recorded.
    pub fn reason_str(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

impl From<Severity> for Outcome {
    fn from(severity: Severity) -> Self {
        Self {
            severity,
            reason: None,
        }
    }
}

/// Policy for reducing several child outcomes into one severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupResultMode {
    /// Every input must succeed: the summary is the worst input severity.
    #[default]
    All,
    /// Any succeeding input suffices: the summary is the best input severity.
    Any,
}

/// Reduce a collection of outcomes to a single severity under `mode`.
///
/// An empty input summarizes to [`Severity::Success`]: nothing was required,
/// so nothing failed.
pub fn summarize_severity<'a, I>(mode: GroupResultMode, outcomes: I) -> Severity
where
    I: IntoIterator<Item = &'a Outcome>,
{
    let severities = outcomes.into_iter().map(|outcome| outcome.severity);
    let summary = match mode {
        GroupResultMode::All => severities.max(),
        GroupResultMode::Any => severities.min(),
    };
    summary.unwrap_or(Severity::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Success < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::InternalError);
    }

    #[test]
    fn test_summarize_all_takes_worst() {
        let outcomes = [
            Outcome::success(),
            Outcome::error("late shutter"),
            Outcome::from(Severity::Warning),
        ];
        assert_eq!(
            summarize_severity(GroupResultMode::All, &outcomes),
            Severity::Error
        );
    }

    #[test]
    fn test_summarize_any_takes_best() {
        let outcomes = [Outcome::error("a"), Outcome::success()];
        assert_eq!(
            summarize_severity(GroupResultMode::Any, &outcomes),
            Severity::Success
        );
    }

    #[test]
    fn test_summarize_empty_is_success() {
        assert_eq!(
            summarize_severity(GroupResultMode::All, &[]),
            Severity::Success
        );
    }

    #[test]
    fn test_incomplete_sentinel() {
        let outcome = Outcome::incomplete();
        assert!(outcome.is_incomplete());
        assert_ne!(outcome.severity, Severity::Success);
        assert!(!Outcome::error("other").is_incomplete());
        assert!(!Outcome::success().is_incomplete());
    }

    #[test]
    fn test_severity_serde_names() {
        let json = serde_json::to_string(&Severity::InternalError).unwrap();
        assert_eq!(json, "\"internal_error\"");
    }
}

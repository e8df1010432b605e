//! Custom error types for the checkout runner.
//!
//! This module defines the primary error type, `CheckoutError`, for the
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to describe the ways a procedure can fail to be loaded or
//! prepared.
//!
//! Note that almost none of these errors escape the crate as raised errors:
//! the prepare/run boundary converts every failure into a `FailedStep`
//! sentinel or an error-severity `Outcome` as close to its source as
//! possible. `CheckoutError` is the *payload* those sentinels carry, plus
//! the error type of the file load/dump entry points.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, CheckoutError>;

/// Everything that can go wrong while loading or preparing a procedure.
#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unable to resolve signal for target: {0}")]
    SignalResolution(String),

    #[error("Step configuration invalid: {0}")]
    InvalidStep(String),

    #[error("Plan configuration invalid: {0}")]
    InvalidPlan(String),

    #[error("Comparison could not be prepared: {0}")]
    Comparison(String),

    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckoutError::SignalResolution("mirror pitch".to_string());
        assert_eq!(
            err.to_string(),
            "Unable to resolve signal for target: mirror pitch"
        );
    }

    #[test]
    fn test_backend_error_wraps_anyhow() {
        let err = CheckoutError::from(anyhow::anyhow!("queue unreachable"));
        assert!(err.to_string().contains("queue unreachable"));
    }
}

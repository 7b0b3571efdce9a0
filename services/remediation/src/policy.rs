//! Failure policy for optional steps
//!
//! Steps such as history persistence, event emission and observer
//! notification either log and continue or propagate their error, decided
//! once when the engine is built.

use std::fmt::Display;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure at `warn` and carry on
    #[default]
    LogAndContinue,
    /// Return the failure to the caller
    Propagate,
}

impl FailurePolicy {
    /// Apply the policy to a step result
    ///
    /// `Ok(None)` means the step failed and the failure was swallowed.
    pub fn apply<T, E: Display>(
        self,
        step: &str,
        result: Result<T, E>,
    ) -> Result<Option<T>, E> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => match self {
                FailurePolicy::LogAndContinue => {
                    warn!("{} failed, continuing: {}", step, e);
                    Ok(None)
                }
                FailurePolicy::Propagate => Err(e),
            },
        }
    }
}

/// Log-and-continue shorthand for best-effort steps
pub fn best_effort<T, E: Display>(step: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed, continuing: {}", step, e);
            None
        }
    }
}

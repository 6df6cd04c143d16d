//! Error types for the control pipeline.
//!
//! Only request-fatal conditions are errors here. Malformed model output and
//! per-task failures are recovered where they happen and show up as an empty
//! plan or as individual task results instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    /// The registry or the catalog could not be queried.
    #[error("Service discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("No services matched the query")]
    NoMatch,

    #[error("None of the discovered services are currently available in the registry")]
    NoLiveMatch,

    /// The completion backend was unreachable or answered with garbage.
    #[error("Plan compilation unavailable: {0}")]
    PlanCompilationUnavailable(String),

    #[error("Request timed out after {0}s")]
    RequestTimeout(u64),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),
}

impl ControlError {
    /// Expected outcomes that are not service faults.
    pub fn is_no_services(&self) -> bool {
        matches!(self, ControlError::NoMatch | ControlError::NoLiveMatch)
    }
}

/// Local failure of a single task, turned into that task's result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskFailure {
    #[error("{message}")]
    Validation { status_code: u16, message: String },

    #[error("{0}")]
    Transport(String),
}

impl TaskFailure {
    pub fn validation(status_code: u16, message: impl Into<String>) -> Self {
        TaskFailure::Validation {
            status_code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_messages_match_expected_wording() {
        assert_eq!(ControlError::NoMatch.to_string(), "No services matched the query");
        assert_eq!(
            ControlError::NoLiveMatch.to_string(),
            "None of the discovered services are currently available in the registry"
        );
        assert!(ControlError::NoLiveMatch.is_no_services());
        assert!(!ControlError::RequestTimeout(5).is_no_services());
    }
}

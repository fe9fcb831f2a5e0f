//! Error types for the interception engine.

use crate::types::{InstanceId, Selector};
use thiserror::Error;

/// Main error type for interception operations.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("Runtime registration failed for class {class}: {reason}")]
    RuntimeRegistration { class: String, reason: String },

    #[error("Class already exists: {0}")]
    ClassExists(String),

    #[error("Unsupported signature for {selector}: {reason}")]
    UnsupportedSignature { selector: Selector, reason: String },

    #[error("Class {class} does not implement {selector}")]
    UnknownSelector { class: String, selector: Selector },

    #[error("Invalid type encoding: {0}")]
    InvalidEncoding(String),

    #[error("Argument mismatch for {selector}: {detail}")]
    ArgumentMismatch { selector: Selector, detail: String },

    #[error("Instance {0} has been deallocated")]
    Deallocated(InstanceId),

    #[error("Class {class} has no property named {property}")]
    InvalidPropertyName { class: String, property: String },

    #[error("Value of {property} is not an object and cannot continue the key path")]
    InvalidObjectOnKeyPath { property: String },

    #[error("{} observer(s) failed for {selector}: {}", .failures.len(), first_failure(.failures))]
    ObserverFailed {
        selector: Selector,
        failures: Vec<ObserverError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for InterceptError {
    fn from(e: serde_json::Error) -> Self {
        InterceptError::Config(e.to_string())
    }
}

fn first_failure(failures: &[ObserverError]) -> &str {
    failures.first().map(|f| f.0.as_str()).unwrap_or("")
}

/// Error raised by an observer callback.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        ObserverError(message.into())
    }
}

/// Result type returned by observer callbacks.
pub type ObserverResult = std::result::Result<(), ObserverError>;

/// Result type for interception operations.
pub type Result<T> = std::result::Result<T, InterceptError>;

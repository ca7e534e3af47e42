//! Error types for converge.

pub mod classify;
pub mod unified;

pub use classify::{classify_error, is_transient_error, ErrorClassifier, FaultClassifier};
pub use unified::{Disposition, ErrorCategory, FaultCode};

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Property key carrying the last observed resource state.
pub const STATE_PROPERTY: &str = "state";
/// Property key carrying the request id a fault belongs to.
pub const REQUEST_ID_PROPERTY: &str = "request_id";
/// Property key set to `"true"` once a retry budget ran out.
pub const RETRIES_EXHAUSTED_PROPERTY: &str = "retries_exhausted";
/// Property key carrying the number of attempts made.
pub const ATTEMPTS_PROPERTY: &str = "attempts";

/// Structured, immutable error value.
///
/// Every builder method consumes the fault and returns a new one; the
/// cause chain in `wrapped` only ever grows at the end.
///
/// # Example
/// ```
/// use converge::error::{ErrorCategory, Fault, FaultCode};
///
/// let fault = Fault::new(
///     FaultCode::RETRIEVAL_FAILED,
///     ErrorCategory::RetrievalFailed,
///     "Failed to find volume",
/// )
/// .wrap("backend returned 404")
/// .with_property("volume_id", "vol-1");
///
/// assert_eq!(fault.to_string(), "Failed to find volume");
/// assert_eq!(fault.wrapped(), ["backend returned 404"]);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct Fault {
    code: FaultCode,
    category: ErrorCategory,
    message: String,
    #[serde(default)]
    wrapped: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl Fault {
    pub fn new(code: FaultCode, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code,
            category,
            message: message.into(),
            wrapped: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// A fault raised while validating configuration.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FaultCode::CONFIGURATION, ErrorCategory::Configuration, message)
    }

    /// The remote service rejected the session credential.
    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::new(
            FaultCode::INVALID_SERVICE_SESSION,
            ErrorCategory::AuthenticationFailed,
            message,
        )
    }

    /// A connection-level failure that is worth retrying.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FaultCode::TRANSPORT_FAILURE, ErrorCategory::Network, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FaultCode::OPERATION_CANCELLED, ErrorCategory::Cancelled, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(FaultCode::WAIT_TIMED_OUT, ErrorCategory::TimedOut, message)
    }

    pub fn unexpected_state(state: &str, message: impl Into<String>) -> Self {
        Self::new(
            FaultCode::UNEXPECTED_STATE,
            ErrorCategory::UnexpectedState,
            message,
        )
        .with_property(STATE_PROPERTY, state)
    }

    /// Build a fault from an arbitrary error, keeping its `source()` chain.
    ///
    /// The category is `Network` when the error is recognised as a
    /// connection-level failure and `Unclassified` otherwise.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let (code, category) = if is_transient_error(error) {
            (FaultCode::TRANSPORT_FAILURE, ErrorCategory::Network)
        } else {
            (FaultCode::UNCLASSIFIED, ErrorCategory::Unclassified)
        };
        let mut fault = Self::new(code, category, error.to_string());
        let mut source = error.source();
        while let Some(cause) = source {
            fault = fault.wrap(cause.to_string());
            source = cause.source();
        }
        fault
    }

    /// Append a cause description to the end of the chain.
    pub fn wrap(mut self, cause: impl Into<String>) -> Self {
        self.wrapped.push(cause.into());
        self
    }

    /// Append another fault as a cause: its message, then its own chain.
    /// Its properties are copied unless this fault already sets the key.
    pub fn wrap_fault(mut self, cause: Fault) -> Self {
        self.wrapped.push(cause.message);
        self.wrapped.extend(cause.wrapped);
        for (key, value) in cause.properties {
            self.properties.entry(key).or_insert(value);
        }
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_request_id(self, request_id: impl Into<String>) -> Self {
        self.with_property(REQUEST_ID_PROPERTY, request_id)
    }

    /// Re-categorise a fault, keeping code, message, causes, and properties.
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn code(&self) -> &FaultCode {
        &self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn wrapped(&self) -> &[String] {
        &self.wrapped
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.category == ErrorCategory::Cancelled
    }

    pub fn is_timed_out(&self) -> bool {
        self.category == ErrorCategory::TimedOut
    }

    pub fn is_retries_exhausted(&self) -> bool {
        self.property(RETRIES_EXHAUSTED_PROPERTY) == Some("true")
    }

    /// Detailed single-line rendering with code, category, causes, and
    /// properties.
    pub fn diagnostic(&self) -> String {
        let mut out = format!(
            "{{Code:{}, Type:{}, Description:{}",
            self.code, self.category, self.message
        );
        if !self.wrapped.is_empty() {
            let _ = write!(out, ", Wrapped:[{}]", self.wrapped.join("; "));
        }
        if !self.properties.is_empty() {
            let props = self
                .properties
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(out, ", Properties:{{{props}}}");
        }
        out.push('}');
        out
    }
}

impl From<reqwest::Error> for Fault {
    fn from(error: reqwest::Error) -> Self {
        let status = error.status();
        let fault = Self::from_error(&error);
        match status {
            Some(status) => fault.with_property("status", status.as_u16().to_string()),
            None => fault,
        }
    }
}

impl From<std::io::Error> for Fault {
    fn from(error: std::io::Error) -> Self {
        Self::from_error(&error)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(error: serde_json::Error) -> Self {
        Self::new(
            FaultCode::UNCLASSIFIED,
            ErrorCategory::InvalidRequest,
            format!("Serialization error: {error}"),
        )
    }
}

impl From<toml::de::Error> for Fault {
    fn from(error: toml::de::Error) -> Self {
        Self::configuration(format!("Invalid configuration file: {error}"))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, Fault>;

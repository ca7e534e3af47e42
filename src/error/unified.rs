//! Unified error classification: categories, codes, and retry dispositions.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Coarse fault category. Classification switches on this and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum ErrorCategory {
    Unclassified,
    InvalidRequest,
    NotFound,
    Conflict,
    RetrievalFailed,
    ProvisioningFailed,
    DeletionFailed,
    /// The service session or API key was rejected as invalid or expired.
    AuthenticationFailed,
    /// Re-deriving the credential failed.
    CredentialRefreshFailed,
    /// Connection-level failure: refused, reset, DNS, connect timeout.
    Network,
    Configuration,
    TimedOut,
    UnexpectedState,
    Cancelled,
}

/// Retry disposition produced by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Disposition {
    Terminal,
    RetryableTransient,
    RetryableAfterRefresh,
}

/// Open, extensible fault identifier used for diagnostics and logging.
///
/// Classification never looks at the code; new codes can be introduced by
/// callers without touching retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultCode(Cow<'static, str>);

const UNCLASSIFIED_CODE: &str = "ErrorUnclassified";

impl FaultCode {
    pub const UNCLASSIFIED: Self = Self::from_static(UNCLASSIFIED_CODE);
    pub const REQUIRED_FIELD_MISSING: Self = Self::from_static("ErrorRequiredFieldMissing");
    pub const RETRIEVAL_FAILED: Self = Self::from_static("ErrorRetrievalFailed");
    pub const PROVISIONING_FAILED: Self = Self::from_static("ErrorProvisioningFailed");
    pub const INVALID_SERVICE_SESSION: Self = Self::from_static("InvalidServiceSession");
    pub const FAILED_TOKEN_EXCHANGE: Self = Self::from_static("ErrorFailedTokenExchange");
    pub const INSUFFICIENT_AUTHENTICATION: Self =
        Self::from_static("ErrorInsufficientAuthentication");
    pub const CONFIGURATION: Self = Self::from_static("ErrorConfiguration");
    pub const RETRIES_EXHAUSTED: Self = Self::from_static("ErrorRetriesExhausted");
    pub const WAIT_TIMED_OUT: Self = Self::from_static("ErrorWaitTimedOut");
    pub const UNEXPECTED_STATE: Self = Self::from_static("ErrorUnexpectedState");
    pub const OPERATION_CANCELLED: Self = Self::from_static("ErrorOperationCancelled");
    pub const TRANSPORT_FAILURE: Self = Self::from_static("ErrorTransportFailure");

    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    pub fn new(code: impl Into<String>) -> Self {
        Self(Cow::Owned(code.into()))
    }

    /// The code string; an empty code reads back as `ErrorUnclassified`.
    pub fn as_str(&self) -> &str {
        if self.0.is_empty() {
            UNCLASSIFIED_CODE
        } else {
            self.0.as_ref()
        }
    }
}

impl Default for FaultCode {
    fn default() -> Self {
        Self::UNCLASSIFIED
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for FaultCode {
    fn from(code: &'static str) -> Self {
        Self::from_static(code)
    }
}

impl From<String> for FaultCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

//! Convenience re-exports for common use.

pub use crate::auth::{
    Credential, CredentialRefreshCoordinator, CredentialSource, SharedCredential,
};
pub use crate::config::ResilienceConfig;
pub use crate::error::{Disposition, ErrorCategory, Fault, FaultCode, Result};
pub use crate::poll::{Converged, Observation, PollSpec, StateConvergencePoller, NOT_FOUND_STATE};
pub use crate::util::retry::{BackoffRetrier, RetryPolicy};

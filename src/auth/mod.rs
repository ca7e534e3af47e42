//! Credentials and the refresh path used when the control plane rejects them.

pub mod iam;
pub mod refresh;
pub mod source;
pub mod token;

pub use iam::IamTokenExchange;
pub use refresh::{CredentialRefreshCoordinator, RefreshBudget, DEFAULT_MAX_REFRESH_CYCLES};
pub use source::{CredentialSource, FnCredentialSource};
pub use token::{Credential, SharedCredential};

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access credential presented to the remote control plane.
///
/// # Example
/// ```
/// use converge::auth::Credential;
/// use chrono::{Duration, Utc};
///
/// let credential = Credential::new("access-token")
///     .with_expiry(Utc::now() + Duration::minutes(30));
/// assert!(!credential.is_expired());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token sent with each request.
    pub value: String,
    /// Server-reported expiry, when known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"..")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug)]
struct Versioned {
    credential: Credential,
    generation: u64,
}

/// Session-wide credential slot.
///
/// Cloning shares the slot. Readers always see a whole credential; only
/// [`CredentialRefreshCoordinator`](super::CredentialRefreshCoordinator)
/// replaces it. Each replacement bumps a generation counter so concurrent
/// refreshers can tell whether someone else already did the work.
#[derive(Debug, Clone)]
pub struct SharedCredential {
    inner: Arc<RwLock<Versioned>>,
}

impl SharedCredential {
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Versioned {
                credential,
                generation: 0,
            })),
        }
    }

    /// Snapshot of the current credential.
    pub fn current(&self) -> Credential {
        self.read(|v| v.credential.clone())
    }

    pub fn generation(&self) -> u64 {
        self.read(|v| v.generation)
    }

    pub(crate) fn replace(&self, credential: Credential) -> u64 {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.credential = credential;
        guard.generation += 1;
        guard.generation
    }

    fn read<R>(&self, f: impl FnOnce(&Versioned) -> R) -> R {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }
}

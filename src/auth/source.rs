use async_trait::async_trait;
use futures::future::BoxFuture;

use super::token::Credential;
use crate::error::Fault;

/// Performs the actual credential exchange (API key for access token, etc.).
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<Credential, Fault>;
}

/// Adapts a closure returning a boxed future into a [`CredentialSource`].
///
/// # Example
/// ```
/// use converge::auth::{Credential, FnCredentialSource};
/// use converge::error::Fault;
///
/// let source = FnCredentialSource::new(|| {
///     Box::pin(async { Ok::<_, Fault>(Credential::new("fresh-token")) })
/// });
/// ```
pub struct FnCredentialSource<F> {
    fetch: F,
}

impl<F> FnCredentialSource<F>
where
    F: Fn() -> BoxFuture<'static, Result<Credential, Fault>> + Send + Sync,
{
    pub fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl<F> CredentialSource for FnCredentialSource<F>
where
    F: Fn() -> BoxFuture<'static, Result<Credential, Fault>> + Send + Sync,
{
    async fn fetch(&self) -> Result<Credential, Fault> {
        (self.fetch)().await
    }
}

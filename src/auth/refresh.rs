use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::source::CredentialSource;
use super::token::SharedCredential;
use crate::error::{ErrorCategory, Fault};

/// Default number of refresh cycles allowed per operation.
pub const DEFAULT_MAX_REFRESH_CYCLES: u32 = 1;

/// Replaces the shared credential when the remote side rejects it.
///
/// Refreshes are serialized: at most one exchange is in flight per
/// coordinator. A refresh failure is terminal and is never retried here.
pub struct CredentialRefreshCoordinator {
    credential: SharedCredential,
    source: Arc<dyn CredentialSource>,
    refresh_lock: Mutex<()>,
    max_refresh_cycles: u32,
}

impl CredentialRefreshCoordinator {
    pub fn new(credential: SharedCredential, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            credential,
            source,
            refresh_lock: Mutex::new(()),
            max_refresh_cycles: DEFAULT_MAX_REFRESH_CYCLES,
        }
    }

    /// Cap on refresh cycles per operation. `0` disables refresh entirely.
    pub fn with_max_refresh_cycles(mut self, max_refresh_cycles: u32) -> Self {
        self.max_refresh_cycles = max_refresh_cycles;
        self
    }

    pub fn max_refresh_cycles(&self) -> u32 {
        self.max_refresh_cycles
    }

    pub fn credential(&self) -> &SharedCredential {
        &self.credential
    }

    /// Fresh per-operation budget.
    pub fn budget(&self) -> RefreshBudget {
        RefreshBudget {
            remaining: self.max_refresh_cycles,
            max: self.max_refresh_cycles,
        }
    }

    /// Re-derive the credential after `trigger` rejected it.
    ///
    /// `observed_generation` is the credential generation the failing call
    /// ran with. If the credential was already replaced since then, the
    /// exchange is skipped and the caller simply retries with the newer one.
    pub async fn refresh(&self, trigger: &Fault, observed_generation: u64) -> Result<(), Fault> {
        let _guard = self.refresh_lock.lock().await;

        if self.credential.generation() != observed_generation {
            tracing::debug!(
                observed_generation,
                "credential already refreshed by a concurrent operation"
            );
            return Ok(());
        }

        tracing::info!(trigger = %trigger, "refreshing credential");
        match self.source.fetch().await {
            Ok(credential) => {
                let generation = self.credential.replace(credential);
                tracing::info!(generation, "credential refreshed");
                Ok(())
            }
            Err(fault) => {
                tracing::error!(error = %fault, "credential refresh failed");
                Err(fault
                    .with_category(ErrorCategory::CredentialRefreshFailed)
                    .wrap(format!("credential refresh triggered by: {trigger}")))
            }
        }
    }

    /// Refresh within `budget`, or explain why the trigger stays terminal.
    ///
    /// `cancel` wins over an in-flight exchange: the exchange future is
    /// dropped and a cancelled fault wrapping the trigger is returned.
    pub(crate) async fn refresh_within(
        &self,
        budget: &mut RefreshBudget,
        trigger: Fault,
        observed_generation: u64,
        cancel: &CancellationToken,
    ) -> Result<(), Fault> {
        if !budget.try_spend() {
            return Err(trigger.wrap(format!(
                "credential refresh budget of {} cycle(s) exhausted",
                budget.max
            )));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("cancelled during credential refresh");
                Err(Fault::cancelled("cancelled during credential refresh")
                    .wrap(trigger.to_string()))
            }
            result = self.refresh(&trigger, observed_generation) => result,
        }
    }
}

/// Refresh cycles remaining for a single `execute` / `wait_for` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshBudget {
    remaining: u32,
    max: u32,
}

impl RefreshBudget {
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn try_spend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::auth::{Credential, FnCredentialSource};
    use crate::error::FaultCode;

    fn counting_source(calls: Arc<AtomicUsize>) -> Arc<dyn CredentialSource> {
        Arc::new(FnCredentialSource::new(move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Fault>(Credential::new(format!("token-{n}")))
            })
        }))
    }

    #[tokio::test]
    async fn refresh_replaces_credential() {
        let shared = SharedCredential::new(Credential::new("token-0"));
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = CredentialRefreshCoordinator::new(shared.clone(), counting_source(calls.clone()));

        coordinator
            .refresh(&Fault::invalid_session("expired"), 0)
            .await
            .unwrap();

        assert_eq!(shared.current().value, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_generation_skips_exchange() {
        let shared = SharedCredential::new(Credential::new("token-0"));
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = CredentialRefreshCoordinator::new(shared.clone(), counting_source(calls.clone()));

        coordinator.refresh(&Fault::invalid_session("expired"), 0).await.unwrap();
        // A second caller that also saw generation 0 piggybacks on the first refresh.
        coordinator.refresh(&Fault::invalid_session("expired"), 0).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.generation(), 1);
    }

    #[tokio::test]
    async fn failure_is_recategorised_and_keeps_trigger() {
        let shared = SharedCredential::new(Credential::new("token-0"));
        let source = Arc::new(FnCredentialSource::new(|| {
            Box::pin(async {
                Err::<Credential, _>(Fault::new(
                    FaultCode::FAILED_TOKEN_EXCHANGE,
                    ErrorCategory::AuthenticationFailed,
                    "IAM token exchange request failed",
                ))
            })
        }));
        let coordinator = CredentialRefreshCoordinator::new(shared.clone(), source);

        let fault = coordinator
            .refresh(&Fault::invalid_session("session expired"), 0)
            .await
            .unwrap_err();

        assert_eq!(fault.category(), ErrorCategory::CredentialRefreshFailed);
        assert_eq!(fault.code(), &FaultCode::FAILED_TOKEN_EXCHANGE);
        assert_eq!(
            fault.wrapped(),
            ["credential refresh triggered by: session expired"]
        );
        assert_eq!(shared.current().value, "token-0");
    }

    #[test]
    fn budget_spends_down_to_zero() {
        let shared = SharedCredential::new(Credential::new("t"));
        let coordinator = CredentialRefreshCoordinator::new(
            shared,
            counting_source(Arc::new(AtomicUsize::new(0))),
        )
        .with_max_refresh_cycles(2);
        let mut budget = coordinator.budget();

        assert!(budget.try_spend());
        assert!(budget.try_spend());
        assert!(!budget.try_spend());
        assert_eq!(budget.remaining(), 0);
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use converge::auth::{Credential, CredentialSource, FnCredentialSource};
use converge::error::Fault;
use converge::poll::Observation;
use converge::util::retry::RetryPolicy;
use tokio::time::Instant;

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn policy(max_attempts: u32, base_secs: u64, max_secs: u64) -> RetryPolicy {
    RetryPolicy::new(max_attempts, secs(base_secs), secs(max_secs)).expect("valid policy")
}

/// Records the instant of every call so tests can check the delays between
/// attempts under a paused clock.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl CallLog {
    pub fn record(&self) -> usize {
        let mut calls = self.calls.lock().expect("call log lock poisoned");
        calls.push(Instant::now());
        calls.len()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().expect("call log lock poisoned").len()
    }

    pub fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().expect("call log lock poisoned");
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

/// A credential source that mints `token-1`, `token-2`, … and counts calls.
pub fn minting_source(calls: Arc<AtomicUsize>) -> Arc<dyn CredentialSource> {
    Arc::new(FnCredentialSource::new(move || {
        let calls = calls.clone();
        Box::pin(async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, Fault>(Credential::new(format!("token-{n}")))
        })
    }))
}

/// A credential source that always fails and counts calls.
pub fn failing_source(calls: Arc<AtomicUsize>) -> Arc<dyn CredentialSource> {
    Arc::new(FnCredentialSource::new(move || {
        let calls = calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Credential, _>(Fault::new(
                converge::error::FaultCode::FAILED_TOKEN_EXCHANGE,
                converge::error::ErrorCategory::AuthenticationFailed,
                "IAM token exchange request failed",
            ))
        })
    }))
}

/// A credential source that takes `delay` to answer, for cancellation tests.
pub fn stalled_source(delay: Duration, calls: Arc<AtomicUsize>) -> Arc<dyn CredentialSource> {
    Arc::new(FnCredentialSource::new(move || {
        let calls = calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok::<_, Fault>(Credential::new("token-late"))
        })
    }))
}

/// Replays a fixed sequence of probe results, repeating the last one.
#[derive(Clone)]
pub struct ScriptedProbe {
    script: Arc<Mutex<VecDeque<Result<Observation, Fault>>>>,
    last: Arc<Mutex<Option<Result<Observation, Fault>>>>,
    pub log: CallLog,
}

impl ScriptedProbe {
    pub fn new(script: Vec<Result<Observation, Fault>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            last: Arc::new(Mutex::new(None)),
            log: CallLog::default(),
        }
    }

    pub fn states(states: &[&str]) -> Self {
        Self::new(states.iter().map(|s| Ok(Observation::from(*s))).collect())
    }

    pub async fn next(&self) -> Result<Observation, Fault> {
        self.log.record();
        let next = self.script.lock().expect("script lock poisoned").pop_front();
        let mut last = self.last.lock().expect("script lock poisoned");
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last.clone().expect("probe script must not be empty"),
        }
    }
}

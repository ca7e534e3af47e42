//! Tests for the state convergence poller and the wait adapters.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use converge::auth::{Credential, CredentialRefreshCoordinator, SharedCredential};
use converge::config::ResilienceConfig;
use converge::error::{ErrorCategory, Fault, FaultCode};
use converge::poll::{waits, Observation, PollSpec, StateConvergencePoller, NOT_FOUND_STATE};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use support::{minting_source, secs, stalled_source, ScriptedProbe};

fn stable_spec(deadline_secs: u64) -> PollSpec {
    PollSpec::new(["stable"], ["failed"], secs(1), secs(deadline_secs)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn converges_after_exactly_three_probes() {
    let probe = ScriptedProbe::states(&["pending", "pending", "stable"]);

    let converged = StateConvergencePoller::new()
        .wait_for(&stable_spec(60), &CancellationToken::new(), || probe.next())
        .await
        .unwrap();

    assert_eq!(converged.state, "stable");
    assert_eq!(converged.probes, 3);
    assert_eq!(probe.log.count(), 3);
    assert_eq!(probe.log.gaps(), vec![secs(1), secs(1)]);
    assert_eq!(converged.elapsed, secs(2));
}

#[tokio::test(start_paused = true)]
async fn times_out_with_last_observed_state() {
    let probe = ScriptedProbe::states(&["pending"]);

    let fault = StateConvergencePoller::new()
        .wait_for(&stable_spec(3), &CancellationToken::new(), || probe.next())
        .await
        .unwrap_err();

    assert!(fault.is_timed_out());
    assert_eq!(fault.code(), &FaultCode::WAIT_TIMED_OUT);
    assert_eq!(fault.property("state"), Some("pending"));
    assert_eq!(fault.property("deadline_ms"), Some("3000"));
    assert_eq!(probe.log.count(), 4);
}

#[tokio::test(start_paused = true)]
async fn absence_converges_when_targeted() {
    let probe = ScriptedProbe::new(vec![
        Ok(Observation::state("detaching")),
        Ok(Observation::state("detaching")),
        Ok(Observation::Absent),
    ]);
    let spec = PollSpec::new([NOT_FOUND_STATE], ["failed"], secs(1), secs(30)).unwrap();

    let converged = StateConvergencePoller::new()
        .wait_for(&spec, &CancellationToken::new(), || probe.next())
        .await
        .unwrap();

    assert_eq!(converged.state, NOT_FOUND_STATE);
    assert_eq!(converged.probes, 3);
}

#[tokio::test(start_paused = true)]
async fn absence_fails_when_not_targeted() {
    let probe = ScriptedProbe::new(vec![Ok(Observation::state("pending")), Ok(Observation::Absent)]);

    let fault = StateConvergencePoller::new()
        .wait_for(&stable_spec(30), &CancellationToken::new(), || probe.next())
        .await
        .unwrap_err();

    assert_eq!(fault.category(), ErrorCategory::UnexpectedState);
    assert_eq!(fault.property("state"), Some(NOT_FOUND_STATE));
    assert_eq!(probe.log.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn error_state_fails_immediately() {
    let probe = ScriptedProbe::states(&["pending", "failed", "stable"]);
    let spec = stable_spec(30).describing("snapshot snap-1");

    let fault = StateConvergencePoller::new()
        .wait_for(&spec, &CancellationToken::new(), || probe.next())
        .await
        .unwrap_err();

    assert_eq!(fault.category(), ErrorCategory::UnexpectedState);
    assert_eq!(fault.property("state"), Some("failed"));
    assert_eq!(fault.message(), "snapshot snap-1 reached unexpected state 'failed'");
    assert_eq!(probe.log.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_probe_faults_are_swallowed() {
    let probe = ScriptedProbe::new(vec![
        Ok(Observation::state("pending")),
        Err(Fault::network("connection reset by peer")),
        Err(Fault::network("i/o timeout")),
        Ok(Observation::state("stable")),
    ]);

    let converged = StateConvergencePoller::new()
        .wait_for(&stable_spec(60), &CancellationToken::new(), || probe.next())
        .await
        .unwrap();

    assert_eq!(converged.probes, 4);
    assert_eq!(probe.log.gaps(), vec![secs(1), secs(1), secs(1)]);
}

#[tokio::test(start_paused = true)]
async fn terminal_probe_fault_ends_polling() {
    let not_found = Fault::new(
        FaultCode::RETRIEVAL_FAILED,
        ErrorCategory::RetrievalFailed,
        "Failed to find 'vol-1' volume ID.",
    );
    let probe = ScriptedProbe::new(vec![Ok(Observation::state("pending")), Err(not_found.clone())]);

    let fault = StateConvergencePoller::new()
        .wait_for(&stable_spec(60), &CancellationToken::new(), || probe.next())
        .await
        .unwrap_err();

    assert_eq!(fault, not_found);
    assert_eq!(probe.log.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_polling_is_distinct_from_timeout() {
    let probe = ScriptedProbe::states(&["pending"]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let poller = StateConvergencePoller::new();
    let spec = stable_spec(600);

    let (result, ()) = tokio::join!(poller.wait_for(&spec, &cancel, || probe.next()), async move {
        tokio::time::sleep(secs(5) + secs(1) / 2).await;
        trigger.cancel();
    });

    let fault = result.unwrap_err();
    assert!(fault.is_cancelled());
    assert!(!fault.is_timed_out());
    assert_eq!(fault.property("state"), Some("pending"));
    assert_eq!(probe.log.count(), 6);
}

#[tokio::test(start_paused = true)]
async fn credential_rejection_refreshes_and_keeps_polling() {
    let shared = SharedCredential::new(Credential::new("token-0"));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(CredentialRefreshCoordinator::new(
        shared.clone(),
        minting_source(refreshes.clone()),
    ));
    let poller = StateConvergencePoller::new().with_refresh(coordinator);
    let probes = Arc::new(AtomicUsize::new(0));

    let converged = poller
        .wait_for(&stable_spec(60), &CancellationToken::new(), || {
            let shared = shared.clone();
            let probes = probes.clone();
            async move {
                let n = probes.fetch_add(1, Ordering::SeqCst) + 1;
                if shared.current().value == "token-0" {
                    Err(Fault::invalid_session("The Service Session was not found"))
                } else if n < 3 {
                    Ok(Observation::state("pending"))
                } else {
                    Ok(Observation::state("stable"))
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(converged.state, "stable");
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_refresh_while_polling() {
    let shared = SharedCredential::new(Credential::new("token-0"));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(CredentialRefreshCoordinator::new(
        shared,
        stalled_source(secs(120), refreshes.clone()),
    ));
    let poller = StateConvergencePoller::new().with_refresh(coordinator);
    let probe = ScriptedProbe::new(vec![
        Ok(Observation::state("pending")),
        Err(Fault::invalid_session("expired")),
    ]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let spec = stable_spec(600);
    let started = tokio::time::Instant::now();

    let (result, ()) = tokio::join!(poller.wait_for(&spec, &cancel, || probe.next()), async move {
        tokio::time::sleep(secs(3)).await;
        trigger.cancel();
    });

    let fault = result.unwrap_err();
    assert!(fault.is_cancelled());
    assert_eq!(fault.property("state"), Some("pending"));
    assert_eq!(started.elapsed(), secs(3));
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(probe.log.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn credential_rejection_without_refresh_is_terminal() {
    let probe = ScriptedProbe::new(vec![Err(Fault::invalid_session("expired"))]);

    let fault = StateConvergencePoller::new()
        .wait_for(&stable_spec(60), &CancellationToken::new(), || probe.next())
        .await
        .unwrap_err();

    assert_eq!(fault.code(), &FaultCode::INVALID_SERVICE_SESSION);
    assert_eq!(probe.log.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn detach_wait_adapter_converges_on_absence() {
    let config = ResilienceConfig {
        poll_interval_ms: 2_000,
        poll_deadline_ms: 20_000,
        ..ResilienceConfig::default()
    };
    let spec = waits::attachment_detached(&config, "att-1").unwrap();
    let probe = ScriptedProbe::new(vec![
        Ok(Observation::from_optional(Some("detaching"))),
        Ok(Observation::from_optional(None::<String>)),
    ]);

    let converged = StateConvergencePoller::new()
        .wait_for(&spec, &CancellationToken::new(), || probe.next())
        .await
        .unwrap();

    assert_eq!(converged.state, NOT_FOUND_STATE);
    assert_eq!(probe.log.gaps(), vec![secs(2)]);
}

#[tokio::test(start_paused = true)]
async fn volume_wait_adapter_times_out_on_config_deadline() {
    let config = ResilienceConfig {
        poll_interval_ms: 1_000,
        poll_deadline_ms: 2_500,
        ..ResilienceConfig::default()
    };
    let spec = waits::volume_available(&config, "vol-1").unwrap();
    let probe = ScriptedProbe::states(&["pending"]);

    let fault = StateConvergencePoller::new()
        .wait_for(&spec, &CancellationToken::new(), || probe.next())
        .await
        .unwrap_err();

    assert!(fault.is_timed_out());
    assert!(fault.message().starts_with("volume vol-1 did not reach available"));
    // Probes at 0s, 1s, 2s, and a final one at the 2.5s deadline.
    assert_eq!(probe.log.count(), 4);
}

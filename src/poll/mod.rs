//! Waiting for a remote resource to converge on a desired state.
//!
//! Every concrete wait (volume available, attachment detached, …) is a
//! [`PollSpec`] plus a probe handed to the one [`StateConvergencePoller`].

pub mod waits;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::CredentialRefreshCoordinator;
use crate::error::{
    Disposition, ErrorClassifier, Fault, FaultClassifier, Result, STATE_PROPERTY,
};
use crate::util::sleep::sleep_or_cancel;

/// State label used for a resource that no longer exists.
pub const NOT_FOUND_STATE: &str = "<not-found>";

/// One successful read of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    State(String),
    /// The resource does not exist (any more).
    Absent,
}

impl Observation {
    pub fn state(label: impl Into<String>) -> Self {
        Self::State(label.into())
    }

    /// `None` maps to [`Observation::Absent`].
    pub fn from_optional(label: Option<impl Into<String>>) -> Self {
        label.map_or(Self::Absent, |l| Self::State(l.into()))
    }

    pub fn label(&self) -> &str {
        match self {
            Self::State(label) => label,
            Self::Absent => NOT_FOUND_STATE,
        }
    }
}

impl From<&str> for Observation {
    fn from(label: &str) -> Self {
        Self::State(label.to_string())
    }
}

impl From<String> for Observation {
    fn from(label: String) -> Self {
        Self::State(label)
    }
}

/// What to wait for and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// States that end the wait successfully.
    target_states: BTreeSet<String>,
    /// States that end the wait with an `UnexpectedState` fault.
    error_states: BTreeSet<String>,
    /// Fixed delay between probes.
    interval: Duration,
    /// Total time allowed, measured from the first probe.
    deadline: Duration,
    /// Human-readable name used in logs and fault messages.
    resource: String,
}

impl PollSpec {
    /// Build a validated spec.
    ///
    /// Fails with a configuration fault when no target state is given, the
    /// target and error sets overlap, or `interval` is zero.
    pub fn new<T, E>(
        target_states: impl IntoIterator<Item = T>,
        error_states: impl IntoIterator<Item = E>,
        interval: Duration,
        deadline: Duration,
    ) -> Result<Self>
    where
        T: Into<String>,
        E: Into<String>,
    {
        let target_states: BTreeSet<String> = target_states.into_iter().map(Into::into).collect();
        let error_states: BTreeSet<String> = error_states.into_iter().map(Into::into).collect();

        if target_states.is_empty() {
            return Err(Fault::configuration("at least one target state is required"));
        }
        let overlap: Vec<&str> = target_states
            .intersection(&error_states)
            .map(String::as_str)
            .collect();
        if !overlap.is_empty() {
            return Err(Fault::configuration(
                "target and error states must not overlap",
            )
            .with_property("overlap", overlap.join(",")));
        }
        if interval.is_zero() {
            return Err(Fault::configuration("poll interval must be positive"));
        }

        Ok(Self {
            target_states,
            error_states,
            interval,
            deadline,
            resource: "resource".to_string(),
        })
    }

    /// Name the resource in log lines and fault messages.
    pub fn describing(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn target_states(&self) -> &BTreeSet<String> {
        &self.target_states
    }

    pub fn error_states(&self) -> &BTreeSet<String> {
        &self.error_states
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn is_target(&self, label: &str) -> bool {
        self.target_states.contains(label)
    }

    pub fn is_error(&self, label: &str) -> bool {
        self.error_states.contains(label)
    }

    fn targets_display(&self) -> String {
        self.target_states
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Successful outcome of [`StateConvergencePoller::wait_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    /// Target state label that was observed.
    pub state: String,
    /// Number of probes made, including the converging one.
    pub probes: u32,
    /// Time from the first probe to convergence.
    pub elapsed: Duration,
}

/// Polls a probe on a fixed interval until the resource converges, fails,
/// the deadline passes, or the caller cancels.
///
/// Transient probe faults are swallowed: a resource that is momentarily
/// unreachable must not abort a long convergence wait.
#[derive(Clone)]
pub struct StateConvergencePoller {
    classifier: Arc<dyn FaultClassifier>,
    refresh: Option<Arc<CredentialRefreshCoordinator>>,
}

impl Default for StateConvergencePoller {
    fn default() -> Self {
        Self::new()
    }
}

impl StateConvergencePoller {
    pub fn new() -> Self {
        Self {
            classifier: Arc::new(ErrorClassifier),
            refresh: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_refresh(mut self, coordinator: Arc<CredentialRefreshCoordinator>) -> Self {
        self.refresh = Some(coordinator);
        self
    }

    pub async fn wait_for<P, Fut>(
        &self,
        spec: &PollSpec,
        cancel: &CancellationToken,
        probe: P,
    ) -> Result<Converged>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation>>,
    {
        let span = tracing::info_span!(
            "wait_for",
            resource = %spec.resource,
            targets = %spec.targets_display(),
            deadline_ms = spec.deadline.as_millis() as u64,
        );
        self.run(spec, cancel, probe).instrument(span).await
    }

    async fn run<P, Fut>(
        &self,
        spec: &PollSpec,
        cancel: &CancellationToken,
        mut probe: P,
    ) -> Result<Converged>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation>>,
    {
        let started = Instant::now();
        let mut budget = self.refresh.as_ref().map(|r| r.budget());
        let mut last_state: Option<String> = None;
        let mut probes: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(with_last_state(
                    Fault::cancelled(format!("wait for {} cancelled", spec.resource)),
                    &last_state,
                ));
            }

            let generation = self
                .refresh
                .as_ref()
                .map(|r| r.credential().generation())
                .unwrap_or_default();
            probes += 1;

            match probe().await {
                Ok(observation) => {
                    let label = observation.label();
                    if spec.is_target(label) {
                        let elapsed = started.elapsed();
                        tracing::info!(state = label, probes, "resource converged");
                        return Ok(Converged {
                            state: label.to_string(),
                            probes,
                            elapsed,
                        });
                    }
                    if observation == Observation::Absent {
                        tracing::error!("resource disappeared while waiting");
                        return Err(Fault::unexpected_state(
                            label,
                            format!("{} no longer exists", spec.resource),
                        ));
                    }
                    if spec.is_error(label) {
                        tracing::error!(state = label, "resource reached an error state");
                        return Err(Fault::unexpected_state(
                            label,
                            format!("{} reached unexpected state '{label}'", spec.resource),
                        ));
                    }
                    tracing::debug!(state = label, probes, "resource not converged yet");
                    last_state = Some(label.to_string());
                }
                Err(fault) => match self.classifier.classify(&fault) {
                    Disposition::Terminal => {
                        tracing::error!(error = %fault, "probe failed terminally");
                        return Err(fault);
                    }
                    Disposition::RetryableTransient => {
                        tracing::warn!(error = %fault, probes, "transient probe failure, still polling");
                    }
                    Disposition::RetryableAfterRefresh => {
                        let (Some(coordinator), Some(budget)) =
                            (self.refresh.as_ref(), budget.as_mut())
                        else {
                            return Err(fault);
                        };
                        tracing::warn!(error = %fault, "probe credential rejected, refreshing");
                        coordinator
                            .refresh_within(budget, fault, generation, cancel)
                            .await
                            .map_err(|refresh_fault| {
                                if refresh_fault.is_cancelled() {
                                    with_last_state(refresh_fault, &last_state)
                                } else {
                                    refresh_fault
                                }
                            })?;
                        if started.elapsed() < spec.deadline {
                            continue;
                        }
                    }
                },
            }

            let elapsed = started.elapsed();
            if elapsed >= spec.deadline {
                tracing::error!(?last_state, probes, "timed out waiting for convergence");
                return Err(with_last_state(
                    Fault::timed_out(format!(
                        "{} did not reach {} within {:?}",
                        spec.resource,
                        spec.targets_display(),
                        spec.deadline
                    ))
                    .with_property("deadline_ms", spec.deadline.as_millis().to_string())
                    .with_property("probes", probes.to_string()),
                    &last_state,
                ));
            }

            let pause = spec.interval.min(spec.deadline - elapsed);
            sleep_or_cancel(pause, cancel)
                .await
                .map_err(|cancelled| with_last_state(cancelled, &last_state))?;
        }
    }
}

fn with_last_state(fault: Fault, last_state: &Option<String>) -> Fault {
    match last_state {
        Some(state) => fault.with_property(STATE_PROPERTY, state.as_str()),
        None => fault,
    }
}

//! Configuration (layered: defaults < TOML file < environment).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_MAX_REFRESH_CYCLES;
use crate::error::{Fault, Result};
use crate::poll::PollSpec;
use crate::util::retry::RetryPolicy;

/// Environment variable names, paired with the field they override.
const ENV_MAX_ATTEMPTS: &str = "CONVERGE_MAX_ATTEMPTS";
const ENV_BASE_INTERVAL_MS: &str = "CONVERGE_BASE_INTERVAL_MS";
const ENV_MAX_INTERVAL_MS: &str = "CONVERGE_MAX_INTERVAL_MS";
const ENV_POLL_INTERVAL_MS: &str = "CONVERGE_POLL_INTERVAL_MS";
const ENV_POLL_DEADLINE_MS: &str = "CONVERGE_POLL_DEADLINE_MS";
const ENV_MAX_REFRESH_CYCLES: &str = "CONVERGE_MAX_REFRESH_CYCLES_PER_OPERATION";

/// Retry and polling parameters recognised by the resilience layer.
///
/// # Example
/// ```
/// use converge::config::ResilienceConfig;
///
/// let config = ResilienceConfig::from_toml_str(
///     r#"
///     max_attempts = 5
///     base_interval_ms = 2000
///     "#,
/// )?;
/// let policy = config.retry_policy()?;
/// assert_eq!(policy.max_attempts(), 5);
/// # Ok::<(), converge::error::Fault>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Maximum number of attempts per operation (including the first).
    pub max_attempts: u32,
    /// Backoff step between attempts, in milliseconds.
    pub base_interval_ms: u64,
    /// Cap on a single backoff delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Fixed delay between state probes, in milliseconds.
    pub poll_interval_ms: u64,
    /// Total time a convergence wait may take, in milliseconds.
    pub poll_deadline_ms: u64,
    /// Credential refreshes allowed per operation; `0` disables refresh.
    pub max_refresh_cycles_per_operation: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_interval_ms: 5_000,
            max_interval_ms: 10_000,
            poll_interval_ms: 5_000,
            poll_deadline_ms: 300_000,
            max_refresh_cycles_per_operation: DEFAULT_MAX_REFRESH_CYCLES,
        }
    }
}

impl ResilienceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            Fault::configuration(format!("Failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by `CONVERGE_*` environment variables (a `.env`
    /// file is loaded first if present).
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Optional TOML file, then environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        override_from_env(ENV_MAX_ATTEMPTS, &mut self.max_attempts)?;
        override_from_env(ENV_BASE_INTERVAL_MS, &mut self.base_interval_ms)?;
        override_from_env(ENV_MAX_INTERVAL_MS, &mut self.max_interval_ms)?;
        override_from_env(ENV_POLL_INTERVAL_MS, &mut self.poll_interval_ms)?;
        override_from_env(ENV_POLL_DEADLINE_MS, &mut self.poll_deadline_ms)?;
        override_from_env(
            ENV_MAX_REFRESH_CYCLES,
            &mut self.max_refresh_cycles_per_operation,
        )?;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry_policy()?;
        if self.poll_interval_ms == 0 {
            return Err(Fault::configuration("poll_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_interval_ms),
            Duration::from_millis(self.max_interval_ms),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_deadline(&self) -> Duration {
        Duration::from_millis(self.poll_deadline_ms)
    }

    /// A [`PollSpec`] using this config's interval and deadline.
    pub fn poll_spec<T, E>(
        &self,
        target_states: impl IntoIterator<Item = T>,
        error_states: impl IntoIterator<Item = E>,
    ) -> Result<PollSpec>
    where
        T: Into<String>,
        E: Into<String>,
    {
        PollSpec::new(
            target_states,
            error_states,
            self.poll_interval(),
            self.poll_deadline(),
        )
    }
}

fn override_from_env<T: std::str::FromStr>(var: &str, field: &mut T) -> Result<()> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(());
    };
    *field = raw.trim().parse().map_err(|_| {
        Fault::configuration(format!("{var} must be a non-negative integer"))
            .with_property("value", raw.clone())
    })?;
    Ok(())
}

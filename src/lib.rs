//! converge: client-side resilience for eventually-consistent control planes.
//!
//! Runs remote operations with bounded, policy-driven retries, separates
//! transient faults from terminal ones, refreshes rejected credentials
//! without losing the in-flight operation, and waits for asynchronous
//! operations to converge on a desired resource state.
//!
//! # Quick Start
//!
//! ```no_run
//! use converge::prelude::*;
//! use converge::poll::waits;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn attach(volume: &str) -> converge::error::Result<String> { Ok("att-1".into()) }
//! # async fn attachment_status(id: &str) -> converge::error::Result<Option<String>> { Ok(None) }
//! # async fn example() -> converge::error::Result<()> {
//! let config = ResilienceConfig::from_env()?;
//! let cancel = CancellationToken::new();
//!
//! let retrier = BackoffRetrier::new(config.retry_policy()?);
//! let attachment_id = retrier.execute(&cancel, || attach("vol-1")).await?;
//!
//! let spec = waits::attachment_attached(&config, &attachment_id)?;
//! StateConvergencePoller::new()
//!     .wait_for(&spec, &cancel, || async {
//!         attachment_status(&attachment_id).await.map(Observation::from_optional)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod poll;
pub mod prelude;
pub mod util;

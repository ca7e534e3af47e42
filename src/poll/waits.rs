//! Poll specs for the control plane's asynchronous operations.

use super::{PollSpec, NOT_FOUND_STATE};
use crate::config::ResilienceConfig;
use crate::error::Result;

pub const VOLUME_AVAILABLE: &str = "available";
pub const ATTACHMENT_ATTACHED: &str = "attached";
pub const SNAPSHOT_STABLE: &str = "stable";
pub const FAILED: &str = "failed";

/// Wait for a newly created or resized volume to become usable.
pub fn volume_available(config: &ResilienceConfig, volume_id: &str) -> Result<PollSpec> {
    Ok(config
        .poll_spec([VOLUME_AVAILABLE], [FAILED])?
        .describing(format!("volume {volume_id}")))
}

/// Wait for an attach request to complete.
pub fn attachment_attached(config: &ResilienceConfig, attachment_id: &str) -> Result<PollSpec> {
    Ok(config
        .poll_spec([ATTACHMENT_ATTACHED], [FAILED])?
        .describing(format!("volume attachment {attachment_id}")))
}

/// Wait for a detach to complete: the attachment record disappearing is
/// the success signal.
pub fn attachment_detached(config: &ResilienceConfig, attachment_id: &str) -> Result<PollSpec> {
    Ok(config
        .poll_spec([NOT_FOUND_STATE], [FAILED])?
        .describing(format!("volume attachment {attachment_id}")))
}

/// Wait for a snapshot to finish copying.
pub fn snapshot_stable(config: &ResilienceConfig, snapshot_id: &str) -> Result<PollSpec> {
    Ok(config
        .poll_spec([SNAPSHOT_STABLE], [FAILED])?
        .describing(format!("snapshot {snapshot_id}")))
}

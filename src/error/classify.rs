//! Fault classification into retry dispositions.

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::sync::LazyLock;

use regex::Regex;

use super::{Disposition, ErrorCategory, Fault};

/// Last-resort signatures for opaque errors that expose no structured type.
static TRANSIENT_SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)connection (reset|refused|aborted)|broken pipe|\bEOF\b|no such host|i/o timeout|TLS handshake timeout",
    )
    .expect("transient signature regex must compile")
});

/// Maps a fault to a retry disposition.
///
/// Implementations must be pure: the same fault always yields the same
/// disposition.
pub trait FaultClassifier: Send + Sync {
    fn classify(&self, fault: &Fault) -> Disposition;
}

/// Default classifier. Looks only at [`ErrorCategory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl FaultClassifier for ErrorClassifier {
    fn classify(&self, fault: &Fault) -> Disposition {
        match fault.category() {
            ErrorCategory::Network => Disposition::RetryableTransient,
            ErrorCategory::AuthenticationFailed => Disposition::RetryableAfterRefresh,
            _ => Disposition::Terminal,
        }
    }
}

/// Classify an error that is not a [`Fault`].
///
/// A `Fault` anywhere in the chain is classified by category. Otherwise
/// connection-level failures are transient and everything else is terminal.
pub fn classify_error(error: &(dyn StdError + 'static)) -> Disposition {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(fault) = err.downcast_ref::<Fault>() {
            return ErrorClassifier.classify(fault);
        }
        current = err.source();
    }
    if is_transient_error(error) {
        Disposition::RetryableTransient
    } else {
        Disposition::Terminal
    }
}

/// Whether an error (or anything in its `source()` chain) is a
/// connection-level failure.
///
/// Structured types are inspected first: `reqwest::Error` connect and
/// timeout flags, then `std::io::Error` kinds. Message signatures are only
/// consulted when no structured error is present in the chain.
pub fn is_transient_error(error: &(dyn StdError + 'static)) -> bool {
    let mut saw_structured = false;
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(http) = err.downcast_ref::<reqwest::Error>() {
            saw_structured = true;
            if http.is_connect() || http.is_timeout() {
                return true;
            }
        } else if let Some(io) = err.downcast_ref::<std::io::Error>() {
            saw_structured = true;
            if is_transient_io_kind(io.kind()) {
                return true;
            }
        }
        current = err.source();
    }
    !saw_structured && matches_transient_signature(&error.to_string())
}

fn is_transient_io_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
    )
}

fn matches_transient_signature(message: &str) -> bool {
    TRANSIENT_SIGNATURE_RE.is_match(message)
}

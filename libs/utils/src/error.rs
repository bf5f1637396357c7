//! Error classification shared by all three binaries.
//!
//! Grounded on `proxy/src/control_plane/provider/mod.rs`'s `errors` module
//! (`ApiError`/`ReportableError`/`UserFacingError` split): errors carry enough structure
//! to decide (a) what, if anything, is safe to put in a client-facing response body and
//! (b) which metric/log bucket they belong to, without leaking internal detail.

use std::fmt;

/// Coarse bucket used for metrics and log severity, independent of the concrete error
/// type. Mirrors the kinds a reverse proxy, a TCP proxy, and a reconciler all need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller did something we reject by design (unknown host, bad auth, malformed
    /// packet). Not actionable by us.
    User,
    /// Routing miss: host/username not present in the routing table.
    NotFound,
    /// The orchestrator (or its API) misbehaved or timed out.
    Orchestrator,
    /// The KV store misbehaved or timed out.
    Store,
    /// DNS resolution failed.
    Dns,
    /// ACME/certificate issuance or renewal failed.
    Certificate,
    /// The backend the proxy was about to dial is not ready or is crash-looping.
    Upstream,
    /// Anything else: I/O errors, bugs, serialization errors.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::User => "user",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Orchestrator => "orchestrator",
            ErrorKind::Store => "store",
            ErrorKind::Dns => "dns",
            ErrorKind::Certificate => "certificate",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error type that wants automatic metrics/log classification.
pub trait ReportableError: fmt::Display + Send + Sync + 'static {
    fn error_kind(&self) -> ErrorKind;
}

/// Implemented by errors that have a message safe to show to the party on the other end
/// of the socket (an HTTP client, a database client). The default is to *not* leak
/// anything; types opt in explicitly.
pub trait UserFacingError: ReportableError {
    fn to_string_client(&self) -> String {
        "internal error".to_owned()
    }
}

/// Wraps a `std::io::Error` so it can participate in [`ReportableError`] without every
/// call site writing the same boilerplate `From` impl.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct IoError(#[from] pub std::io::Error);

impl ReportableError for IoError {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

pub fn io_error(e: impl Into<std::io::Error>) -> std::io::Error {
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_as_str_roundtrips_through_display() {
        for kind in [
            ErrorKind::User,
            ErrorKind::NotFound,
            ErrorKind::Orchestrator,
            ErrorKind::Store,
            ErrorKind::Dns,
            ErrorKind::Certificate,
            ErrorKind::Upstream,
            ErrorKind::Internal,
        ] {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }
}

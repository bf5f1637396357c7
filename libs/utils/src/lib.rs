//! Small pieces of ambient infrastructure shared by all three `portway` binaries:
//! typed ids, the `ReportableError`/`ErrorKind` split, signal-driven shutdown, and
//! process bootstrap (logging + sentry).

pub mod error;
pub mod id;
pub mod logging;
pub mod shutdown;

/// Re-exported so downstream crates don't need to depend on `sentry` directly just to
/// call [`sentry_init::init_sentry`].
pub mod sentry_init {
    use sentry::ClientInitGuard;

    /// Initializes the sentry client from `SENTRY_DSN` if set. Returns `None` (and logs
    /// nothing) when the env var is absent, matching the teacher's "observability is
    /// optional in dev" posture.
    pub fn init_sentry(release: Option<std::borrow::Cow<'static, str>>) -> Option<ClientInitGuard> {
        let dsn = std::env::var("SENTRY_DSN").ok()?;
        Some(sentry::init((
            dsn,
            sentry::ClientOptions {
                release,
                attach_stacktrace: true,
                ..Default::default()
            },
        )))
    }
}

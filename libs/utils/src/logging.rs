//! `tracing-subscriber` bootstrap shared by the three binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global `tracing` subscriber: `RUST_LOG`-driven filtering (defaulting to
/// `info`), human-readable output on a terminal, newline-delimited JSON otherwise.
/// Mirrors the teacher's `tracing_subscriber::fmt()...init()` one-liner in
/// `rohan-flutterint-neon`'s `proxy/src/main.rs`, generalized to the json/plain split
/// `libs/utils`'s dependency on `tracing-subscriber`'s `json` feature implies.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

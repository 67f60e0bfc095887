//! Idempotent `tracing` initialization, matching the teacher's own
//! `tracing_subscriber::fmt` setup in spirit (env-filter driven, safe to
//! call more than once per process).

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a global `tracing_subscriber` fmt layer reading `RUST_LOG`
/// (default `info`). Safe to call from multiple call sites (tests, `main`,
/// embedding host) — only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}

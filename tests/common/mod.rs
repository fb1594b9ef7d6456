//! Shared test-only tracing setup.
//!
//! This crate never installs a global subscriber itself (see `src/lib.rs`):
//! it only emits events, leaving the choice of sink to whoever embeds it.
//! These integration tests are one such embedder, so they install one the
//! same way `cloudpeers-tlfs` does in its own `Migrate::new` — env-filtered,
//! writing to stderr — just gated to run at most once per test binary.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a env-filtered `tracing` subscriber for the current test binary,
/// if one hasn't been installed yet. Safe to call from every test.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "warn".to_owned());
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(env))
            .with_writer(std::io::stderr)
            .try_init()
            .ok();
    });
}

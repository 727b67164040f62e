//! Tracing subscriber setup for binaries and tests embedding the process layer.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Install a `fmt` subscriber honouring `RUST_LOG`, defaulting to `info`.
///
/// Does nothing if a global subscriber is already installed, so tests may
/// call it repeatedly.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Install a `fmt` subscriber with an explicit filter directive such as
/// `"buildproc=debug"`. Fails if the directive does not parse or a global
/// subscriber is already set.
pub fn try_init_tracing(filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

/// Like [`init_tracing`] but emitting one JSON object per event, for build
/// logs that are collected by machines.
pub fn init_json_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init();
}

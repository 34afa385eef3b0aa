//! Log output setup.
//!
//! Every crate in the workspace logs through `tracing`. Applications
//! that have no subscriber of their own can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`, falling back
/// to `default_filter` (for example `"tether=info"`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

//! Tracing bootstrap.
//!
//! The engines log through `tracing`; embedders that do not install their own
//! subscriber can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive (e.g. `council=debug`).
pub const LOG_ENV: &str = "COUNCIL_LOG";

/// Install a formatted subscriber filtered by `COUNCIL_LOG` (default `info`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}

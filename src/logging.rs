// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracing setup for binaries and tools embedding this crate

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `DUPEMBED_LOG=debug`)
pub const LOG_ENV: &str = "DUPEMBED_LOG";

/// Installs a stderr fmt subscriber filtered by `DUPEMBED_LOG`, defaulting to
/// `warn`. Returns false if a global subscriber was already set.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        let _ = init();
        assert!(!init());
    }
}

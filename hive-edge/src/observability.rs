//! Tracing initialization
//!
//! JSON-formatted structured logs; every request-scoped line carries the
//! correlation and request IDs attached by the correlation middleware span.

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize tracing from configuration
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Tracing initialized for service: {}", config.service.name);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_does_not_panic() {
        let config = Config::default();
        // A second init in the same process returns an error from the
        // global subscriber; both outcomes are acceptable here.
        let _ = init_tracing(&config);
    }
}

//! hive-edge binary entry point
//!
//! Exit codes: 0 success, 1 configuration error, 2 dependency unavailable
//! at start, 3 runtime fatal.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use hive_edge::config::Config;
use hive_edge::error::Error;
use hive_edge::notify::spawn_digest_scheduler;
use hive_edge::observability::init_tracing;
use hive_edge::server::Server;
use hive_edge::state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to initialize tracing: {}", e);
        return ExitCode::from(1);
    }

    let digest_interval = Duration::from_secs(config.notification.digest_flush_secs);

    let state = match AppState::from_config(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            return ExitCode::from(startup_exit_code(&e));
        }
    };

    let scheduler = spawn_digest_scheduler(Arc::clone(&state.notifications), digest_interval);

    let result = Server::new(state).serve().await;
    scheduler.abort();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Runtime failure: {}", e);
            ExitCode::from(3)
        }
    }
}

/// Configuration mistakes are 1; unreachable dependencies are 2
fn startup_exit_code(error: &Error) -> u8 {
    match error {
        Error::Config(_) | Error::Jwt(_) => 1,
        _ => 2,
    }
}

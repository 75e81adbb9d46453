//! healthbody-db - Main entry point.
//!
//! Binds the process-wide connection pool to the configured database and
//! prints every stored competition as JSON.

use healthbody_db::config::Config;
use healthbody_db::db::{ConnectionManager, SqlxDriver};
use healthbody_db::repository::{Repository, competition::Competition};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // stdout carries the JSON document; logs go to stderr
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let data_source = config.data_source()?;

    info!(
        driver = %data_source.driver(),
        url = %data_source.masked_url(),
        pool_capacity = config.pool_capacity,
        "Starting healthbody-db v{}",
        env!("CARGO_PKG_VERSION")
    );

    let driver = Arc::new(SqlxDriver::new()?);
    let manager = ConnectionManager::with_capacity(driver, config.pool_capacity);
    manager.rebind(data_source)?;

    let repository = Repository::<Competition>::new(manager.clone());
    let competitions = repository.get_all()?;
    info!(count = competitions.len(), "Loaded competitions");

    println!("{}", serde_json::to_string_pretty(&competitions)?);

    manager.close_all();
    Ok(())
}

fn main() {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    if let Err(e) = run(&config) {
        error!(error = %e, "healthbody-db failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

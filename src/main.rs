//! cmdserver: a multiplexed TCP command server
//!
//! Usage: `cmdserver <PORT> [OPTIONS]`
//!
//! Features:
//! - One thread, readiness-multiplexed connections (select or poll)
//! - Whitespace-tokenized command protocol
//! - Opt-in `SYS` command that runs a shell command line
//! - Configuration via CLI arguments or TOML file

use cmdserver::config::Config;
use cmdserver::runtime::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (prints usage and exits on a bad port)
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        multiplexer = ?config.multiplexer,
        sys_enabled = config.enable_sys,
        "Starting cmdserver"
    );

    let server = Server::bind(&config).inspect_err(|e| error!(error = %e, "Startup failed"))?;
    server.run()?;
    Ok(())
}

//! ForgeFlow daemon
//!
//! Main entry point. Loads configuration from the environment and runs the
//! trigger daemon until Ctrl-C.

use forgeflow::{config::Config, server::start_server};

/// Application entry point
///
/// The daemon:
/// - Opens the flow database under FORGEFLOW_DATA_DIR
/// - Registers the triggers of every stored flow
/// - Serves webhook triggers on FORGEFLOW_WEBHOOK_HOST:FORGEFLOW_WEBHOOK_PORT
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:8080 and the user config dir)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

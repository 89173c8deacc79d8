#![cfg(not(tarpaulin_include))]

use delivery_ledger::{AppConfig, app};
use log::error;

/// Main entry point for the web application
///
/// Reads the configuration from the environment and serves the upload page
/// and API until the server stops.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    app::run(config).await
}

#![cfg(not(tarpaulin_include))]

use dti_dashboard::app;
use dti_dashboard::config::load_settings;
use std::path::PathBuf;

/// Main entry point for the dashboard web server
///
/// Takes an optional configuration file path as its only argument; without
/// one, `dti.toml` and `DTI__*` environment variables are used.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = load_settings(config_path.as_deref())?;

    app::run(settings).await
}

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod error;
mod history;
mod llm;
mod models;
mod pipeline;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs, Command};
use crate::pipeline::{QueryPipeline, SessionContext};
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Dialect and provider are fixed here; unknown tags stop startup
    info!(
        "Initializing pipeline: {} database, {} provider",
        config.database.dialect, config.llm.provider
    );
    let pipeline = QueryPipeline::from_config(&config)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Ask { prompt, no_execute } => {
            let mut session = SessionContext::new();
            let entry = pipeline.run(&mut session, &prompt, !no_execute).await?;
            println!("{}", serde_json::to_string_pretty(entry)?);
        }
        Command::Serve => {
            let web_config = config.web.clone();
            let app_state = Arc::new(AppState::new(config, pipeline));

            info!("Starting DB Chat server on {}:{}", web_config.host, web_config.port);
            match web::run_server(web_config, app_state).await {
                Ok(_) => info!("Server stopped gracefully"),
                Err(e) => {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

//! Parley server: the authoritative, sequenced message log.
//!
//! An axum HTTP server that stores conversations, commits each user turn
//! together with its AI reply, and serves incremental fetches for polling
//! clients.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default address 127.0.0.1:8000 with the offline echo generator
//! cargo run --bin parley-server
//!
//! # Run with Gemini replies on a custom address
//! GEMINI_API_KEY=... cargo run --bin parley-server -- --bind 0.0.0.0:8080 --generator gemini
//! ```

use std::sync::Arc;

use clap::Parser;
use parley_server::config::{ServerCliArgs, ServerConfig};
use parley_server::http;
use parley_server::service::ChatService;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        generator = ?config.generator,
        "starting parley server"
    );

    let service = Arc::new(ChatService::with_config(
        config.build_generator(),
        config.limits.clone(),
        config.assigner(),
    ));

    match http::start_server(&config.bind_addr, service).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}

use std::sync::Arc;

use clap::Parser;
use qweather_mcp::{
    MCP_ENDPOINT, Result, Server, WeatherServer,
    auth::{JwtSigner, TokenCache},
    config::{Cli, Config, TransportMode},
    qweather::QWeatherClient,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries JSON-RPC in stdio mode, so logs always go to stderr
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let signer = JwtSigner::new(config.credentials)?;
    if let Err(e) = signer.check_key() {
        // Tool calls will report this too; the server still starts
        warn!("Private key unusable: {e}");
    }
    let tokens = Arc::new(TokenCache::new(Arc::new(signer)));
    let client = QWeatherClient::new(config.api_host, tokens)?;
    info!(api_host = %client.api_host(), "QWeather client ready");

    let server = Server::default().with_connection(move || WeatherServer::new(client.clone()));

    match cli.transport {
        TransportMode::Stdio => {
            info!("Serving MCP on stdio");
            server.serve_stdio().await?;
        }
        TransportMode::Http => {
            let handle = server.serve_http(cli.bind_addr()).await?;
            let addr = handle.bound_addr.clone().unwrap_or_else(|| cli.bind_addr());
            info!("Serving MCP on http://{addr}{MCP_ENDPOINT}");

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            handle.stop().await?;
        }
    }

    Ok(())
}

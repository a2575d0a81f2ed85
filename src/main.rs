//! origin-server binary.
//!
//! ```text
//!   client ──▶ listener (HTTP / HTTPS) ──▶ pool slot ──▶ server blacklist
//!                                                            │
//!                                                            ▼
//!   client ◀── hyper response ◀── domain pipeline ◀── host routing
//!                                  get-session
//!                                  only-get-or-post
//!                                  decode-post-form-urlencoded
//!                                  get-resource-path-from-url
//!                                  get-file-at-resource-path
//!                                  record-outcome ──▶ statistics channel
//! ```

use std::path::PathBuf;

use clap::Parser;

use origin_server::config::{load_or_default, ConfigSource};
use origin_server::observability::{logging, metrics};
use origin_server::{Collaborators, Server, ServerContext};

#[derive(Debug, Parser)]
#[command(name = "origin-server", version, about = "Multi-domain HTTP/HTTPS origin server")]
struct Args {
    /// Configuration file. Missing file means defaults.
    #[arg(long, default_value = "origin-server.toml")]
    config: PathBuf,

    /// Log filter, overrides the configured one.
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (config, source) = match load_or_default(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            logging::init_logging(args.log.as_deref());
            tracing::error!(path = %args.config.display(), error = %e, "Configuration rejected");
            return Err(e.into());
        }
    };

    logging::init_logging(args.log.as_deref().or(Some(config.observability.log_level.as_str())));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "origin-server starting");
    if source == ConfigSource::Defaults {
        tracing::warn!(path = %args.config.display(), "Configuration file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        http_port = config.parameters.http_port,
        https_port = config.parameters.https_port,
        domains = config.domains.len(),
        max_connections = config.parameters.max_accepted_connections,
        "Configuration loaded"
    );

    let collaborators = Collaborators::from_parameters(&config.parameters);
    let (context, control) = ServerContext::new(config, Some(args.config), collaborators)?;
    Server::new(context, control).run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser};
use tracing::info;

use modbus_server::{Config, InMemoryDataStore, Server};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the config file. If omitted, layered config/ + env loading is used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the default configuration as YAML and exit.
    #[arg(long = "dump-default-config")]
    dump_default: bool,

    /// Number of registers/coils to allocate in the built-in in-memory handler.
    #[arg(long, default_value_t = 256)]
    store_size: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.common.dump_default {
        let config = Config::default();
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let config = match &cli.common.config {
        Some(path) if path.exists() => {
            eprintln!("loading config from {}", path.display());
            Config::from_file(path)?
        }
        Some(path) => {
            eprintln!(
                "config file {} not found, falling back to layered config/env loading",
                path.display()
            );
            Config::load()?
        }
        None => Config::load()?,
    };

    if modbus_server::logging::setup_logging(&config.logging).is_err() {
        // A subscriber may already be installed (e.g. under a test harness);
        // fall back to the bare default rather than aborting startup.
        tracing_subscriber::fmt::init();
    }
    info!(url = %config.url, "starting modbus-server");

    let handler = InMemoryDataStore::new(cli.common.store_size);
    let server = Arc::new(Server::new(config.clone(), handler)?);
    server.start().await?;

    if config.http.enabled {
        let addr = format!("{}:{}", config.http.bind_addr, config.http.bind_port);
        let server_for_http = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(err) = modbus_server::http_api::serve(addr, server_for_http).await {
                tracing::error!(%err, "http status endpoint exited with error");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    server.stop().await?;

    Ok(())
}

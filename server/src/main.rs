use clap::Parser;
use log::{error, info};
use server::network::Server;
use std::time::Duration;

/// Command line arguments for the sync server binary. The core library
/// takes explicit parameters; this is the only place configuration lives.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Broadcast tick interval in milliseconds
    #[clap(short, long, default_value_t = shared::TICK_INTERVAL_MS)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let addr = format!("{}:{}", args.host, args.port);
    let server = match Server::new(&addr, Duration::from_millis(args.tick_ms)).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_handle();
    let run_handle = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    shutdown.request();
    run_handle.await?;

    Ok(())
}

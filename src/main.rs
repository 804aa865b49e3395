//! tls-echo
//!
//! Demo front end for the transport: an echo server and a one-shot client.
//!
//! ```text
//! tls-echo --config echo.toml serve
//! tls-echo --config echo.toml send 127.0.0.1:4433 "hello"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tls_transport::config::{load_config, TransportConfig};
use tls_transport::lifecycle::{signals, StopSignal};
use tls_transport::observability::{logging, metrics};
use tls_transport::server::{handler_fn, serve, HandlerResult};
use tls_transport::{InputStream, OutputStream};

#[derive(Parser)]
#[command(name = "tls-echo")]
#[command(about = "TLS echo server and client", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the echo server until SIGINT / SIGTERM
    Serve,
    /// Send one message and print the echoed reply
    Send {
        address: SocketAddr,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };

    logging::init_logging(config.observability.log_filter.as_deref());

    match cli.command {
        Commands::Serve => run_server(config).await,
        Commands::Send { address, message } => send(&config, address, &message).await,
    }
}

async fn run_server(config: TransportConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = config
        .server
        .as_ref()
        .ok_or("configuration has no [server] section")?;

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_addr()?)?;
    }

    let stop = StopSignal::new();
    signals::stop_on_termination(stop.clone());

    tracing::info!(
        bind_address = %server.bind_address,
        tls_version = %server.tls_version,
        timeout_secs = ?server.timeout_secs,
        "tls-echo starting"
    );

    let report = serve(
        server.listen_options()?,
        handler_fn(echo),
        config.serve_options(Some(stop.subscribe())),
    )
    .await?;

    tracing::info!(
        accepted = report.accepted,
        handshake_failures = report.handshake_failures,
        accept_failures = report.accept_failures,
        "Shutdown complete"
    );
    Ok(())
}

fn echo<'a>(
    peer: SocketAddr,
    input: &'a mut InputStream,
    output: &'a mut OutputStream,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let bytes = tokio::io::copy(input, output).await?;
        tracing::debug!(peer = %peer, bytes, "Echo finished");
        Ok(())
    })
}

async fn send(
    config: &TransportConfig,
    address: SocketAddr,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let connector = config.client.connector()?;
    let source = config.client.source_addr()?;

    let mut pair = connector.connect(source, address).await?;
    pair.output.write_all(message.as_bytes()).await?;
    // close_notify tells the server we are done; it echoes and closes.
    pair.output.shutdown().await?;

    let mut reply = Vec::new();
    pair.input.read_to_end(&mut reply).await?;
    pair.close().await;

    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

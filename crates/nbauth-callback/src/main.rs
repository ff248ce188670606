use clap::Parser;
use eyre::eyre;
use nbauth_core::OriginPolicy;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "nbauth-callback")]
#[command(about = "Serves the OAuth2 callback page for notebook token relays.")]
struct Args {
    /// Port to listen on
    port: u16,

    /// Externally routed base URL of the notebook proxy
    #[arg(env = "NBAUTH_BASE_URL")]
    base_url: String,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    address: String,

    /// Post the result to any opener origin instead of the proxy's origin only
    #[arg(long)]
    allow_any_origin: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "nbauth_callback={log_level},nbauth_core={log_level}"
        ))
        .init();

    let origin_policy = if args.allow_any_origin {
        OriginPolicy::Any
    } else {
        OriginPolicy::Strict
    };
    let page = nbauth_callback::render_page(&args.base_url, origin_policy)
        .map_err(|e| eyre!("Failed to render callback page: {}", e))?;

    let addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;

    info!("Starting callback server on {}", addr);
    info!(origin_policy = ?origin_policy, "Base URL: {}", args.base_url);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let _signal_task: tokio::task::JoinHandle<()> = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        warn!("Received Ctrl+C, shutting down gracefully...");
        signal.cancel();
    });

    nbauth_callback::serve(listener, Arc::from(page), shutdown)
        .await
        .map_err(|e| eyre!("Callback server error: {}", e))?;

    info!("Callback server shut down gracefully");
    Ok(())
}

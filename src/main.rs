//! Vigil server.
//!
//! ```bash
//! # in-memory, defaults
//! vigil
//!
//! # durable, evaluating every 30 seconds
//! vigil --data-dir /var/lib/vigil --tick-secs 30
//! ```
//!
//! Every flag falls back to its `VIGIL_*` variable (a `.env` file is read
//! too), then to the built-in default.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil::{
    DurabilityMode, LogNotifier, NotificationDispatcher, Notifier, Outbox, Ticker, Vigil,
    VigilConfig, WebhookNotifier, web,
};

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Dead man's switch custody backend")]
struct Args {
    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Journal and snapshot directory; omit to keep state in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// sync | async | none
    #[arg(long)]
    durability: Option<DurabilityMode>,

    /// Seconds between coordinator ticks
    #[arg(long)]
    tick_secs: Option<u64>,

    /// POST notifications to this URL instead of logging them
    #[arg(long)]
    notify_webhook: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vigil=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args)?;
    let addr = config.bind_addr().context("invalid listen address")?;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str()).context("building webhook client")?),
        None => Arc::new(LogNotifier),
    };
    let (outbox, receiver) = Outbox::channel();
    let dispatcher = NotificationDispatcher::new(receiver, notifier).spawn();

    let vigil = Arc::new(
        Vigil::builder(config.clone())
            .outbox(outbox)
            .open()
            .await
            .context("opening vigil state")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = Ticker::new(Arc::clone(&vigil), config.tick_interval).spawn(shutdown_rx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        %addr,
        durable = vigil.is_durable(),
        tick_secs = config.tick_interval.as_secs(),
        "vigil listening"
    );

    axum::serve(listener, web::router(Arc::clone(&vigil)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    let _ = shutdown_tx.send(true);
    ticker.await.context("ticker task")?;
    vigil.checkpoint().await.context("final checkpoint")?;

    // Dropping the last handle closes the outbox; the dispatcher drains and exits.
    drop(vigil);
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher).await;
    info!("vigil stopped");
    Ok(())
}

fn load_config(args: Args) -> Result<VigilConfig> {
    let mut config = VigilConfig::from_env().context("reading VIGIL_* environment")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(mode) = args.durability {
        config.durability = mode;
    }
    if let Some(secs) = args.tick_secs {
        config.tick_interval = Duration::from_secs(secs);
    }
    if let Some(url) = args.notify_webhook {
        config.notify_webhook = Some(url);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

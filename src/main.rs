use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use readygate::{config, Gate};

#[derive(Parser)]
#[command(name = "readygate", version, about = "Readiness gating daemon")]
struct Cli {
    /// Config file path or http(s) URL
    #[arg(
        short,
        long,
        env = "READYGATE_CONFIG",
        default_value = "readygate.yaml"
    )]
    config: String,

    /// Enable debug logging
    #[arg(short, long, env = "READYGATE_DEBUG")]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "READYGATE_LOG_JSON")]
    log_json: bool,

    /// Wrapped command to supervise, e.g. `readygate -c gate.yaml -- myserver --port 8080`
    #[arg(last = true)]
    wrap: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.debug {
        "readygate=debug"
    } else {
        "readygate=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut cfg = config::load(&cli.config).await?;
    if !cli.wrap.is_empty() {
        cfg.wrap = Some(cli.wrap.clone());
    }

    let gate = Gate::new(cfg)?;

    // An operating-system interrupt cancels the shared token; every
    // component unwinds and the daemon exits zero.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        trigger.cancel();
    });

    gate.run(cancel).await.map_err(Into::into)
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

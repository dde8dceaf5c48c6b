use anyhow::{Context, Result};
use clap::Parser;
use nanobot_worker::app::App;
use nanobot_worker::config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "nanobot-worker")]
#[command(about = "Task gateway for document solving, screenshots, images and voiceovers")]
struct CliArgs {
    /// Interface to bind. Overrides HOST.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on. Overrides PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nanobot_worker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("Starting nanobot-worker v{}", env!("CARGO_PKG_VERSION"));

    let app = Arc::new(App::from_config(&config).context("Failed to initialize application")?);
    let router = Arc::clone(&app).router();

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&app)))
        .await
        .context("Server error")?;

    info!("Served {} requests, shutting down", app.guard().served());
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM, or once the request quota asks for a recycle.
async fn shutdown_signal(app: Arc<App>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = app.guard().recycle_requested() => info!("Request quota reached, recycling worker"),
    }
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::parse_from(["nanobot-worker", "--port", "9000", "--host", "127.0.0.1"]);
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.host.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_cli_defaults_to_environment() {
        let args = CliArgs::parse_from(["nanobot-worker"]);
        assert!(args.port.is_none());
        assert!(args.host.is_none());
    }
}

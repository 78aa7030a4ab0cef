use anyhow::Context;

use rconq_api::app::{build_app, build_services};
use rconq_infra::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rconq_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    if config.uses_default_master_token() {
        tracing::warn!("MASTER_TOKEN not set; using insecure default");
    }

    let services = build_services(&config)
        .await
        .context("failed to start services")?;
    let sweeper = services.sweeper().spawn(config.cleanup_interval());

    let app = build_app(&services, config.request_timeout());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        servers = ?services.registry.server_names(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

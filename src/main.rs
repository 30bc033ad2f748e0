use std::sync::Arc;

use anyhow::Context;
use stockledger::{
    PostgresAdapter, StockService,
    config::AppConfig,
    http::{self, AppInfo, AppState},
    telemetry,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    telemetry::setup_tracing(&config.application.log_level);
    let metrics = telemetry::setup_metrics().context("installing metrics recorder")?;

    tracing::info!(
        name = %config.application.name,
        version = %config.application.version,
        env = %config.application.env,
        "starting"
    );

    let adapter = PostgresAdapter::connect(&config.database)
        .await
        .context("opening database")?;
    adapter.init_schema().await.context("initializing schema")?;

    let service = Arc::new(StockService::new(adapter.clone(), &config.stock));

    match service.health_check().await {
        Ok(()) => tracing::info!("services health check ok"),
        Err(err) => tracing::error!(error = %err, "services health check failed"),
    }

    let app = http::router(AppState {
        service,
        info: Arc::new(AppInfo {
            application: config.application.clone(),
            server: config.server.clone(),
        }),
        metrics,
    });

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("binding port {}", config.server.port))?;
    tracing::info!(port = config.server.port, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    adapter.pool().close().await;
    tracing::info!(name = %config.application.name, "finalized");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

use std::sync::Arc;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use crate::api::{self, AppState};
use crate::cli::commands::ServeArgs;
use crate::errors::ScanlineError;
use crate::notify::create_notifier;
use crate::pipeline::PipelineRuntime;
use crate::scanner::TrivyScanner;

pub async fn handle_serve(args: ServeArgs, config_path: Option<&str>) -> Result<(), ScanlineError> {
    let config = super::load(config_path).await?;
    let db = super::open_database(&config, args.db.as_deref())?;

    let engine = Arc::new(TrivyScanner::from_config(&config.scanner));
    let notifier = create_notifier(&config.notifier)?;
    info!(engine = %config.scanner.binary, notifier = notifier.name(), "Pipeline configured");

    let host = args.host.unwrap_or_else(|| config.api.bind.clone());
    let port = args.port.unwrap_or(config.api.port);

    let runtime = Arc::new(PipelineRuntime::new(db, config, engine, notifier));
    runtime.recover(Utc::now()).await?;

    let cancel = CancellationToken::new();
    let workers = runtime.start(cancel.clone())?;
    let app = api::build_router(AppState::with_runtime(runtime));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| ScanlineError::Internal(format!("Server error: {}", e)))?;

    cancel.cancel();
    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "Worker task ended abnormally");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            cancel.cancel();
        }
    }
}

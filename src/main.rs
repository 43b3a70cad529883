use std::sync::Arc;

use tokio::{net::TcpListener, sync::mpsc};
use tracing::{error, info};

use storefront_api::{
    app_router,
    config::{self, init_tracing},
    db,
    events::{self, EventSender},
    handlers::AppServices,
    notifications::LogNotificationSender,
    services::payments::PaymentGateway,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    init_tracing(&cfg.log_level, cfg.log_json);
    info!(environment = %cfg.environment, "Starting storefront API");

    let db = Arc::new(db::establish_connection(&cfg).await?);
    if cfg.auto_schema {
        db::ensure_schema(&db).await?;
    }

    let (tx, rx) = mpsc::channel(1024);
    let event_sender = Arc::new(EventSender::new(tx));
    tokio::spawn(events::process_events(rx));

    let gateway = Arc::new(PaymentGateway::from_config(&cfg.payment)?);
    info!(provider = gateway.active().name(), "Payment gateway ready");

    let services = AppServices::new(
        db.clone(),
        &cfg,
        gateway,
        Arc::new(LogNotificationSender),
        Some(event_sender),
    );

    let bind_addr = cfg.bind_addr();
    let state = AppState {
        db,
        config: Arc::new(cfg),
        services,
    };
    let app = app_router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!("Server error: {e}");
            e
        })?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

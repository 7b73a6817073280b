use deploy_webhook_listener::config::ListenerConfig;
use deploy_webhook_listener::deploy::{Dispatcher, ShellRunner};
use deploy_webhook_listener::error::ListenerError;
use deploy_webhook_listener::logging::setup_logging;
use deploy_webhook_listener::{AppState, build_router};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match ListenerConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Held until exit so buffered file logs get flushed
    let _log_guard = match setup_logging(config.log_dir.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: ListenerConfig) -> Result<(), ListenerError> {
    if let Some(warning) = config.secret_warning() {
        warn!("{}", warning);
    }

    let dispatcher = Dispatcher::new(Arc::new(ShellRunner), config.deploy.clone());
    let state = Arc::new(AppState::new(&config, dispatcher));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|source| ListenerError::BindError {
            address: config.bind_address.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    for line in config.startup_report(local_addr) {
        info!("{}", line);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Webhook listener stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
    info!("Shutdown signal received");
}

use crate::{config::Config, predictor::Predictor, server::HttpServer};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let mut predictor = Predictor::new();
    if let Err(e) = predictor.load(&config.model) {
        tracing::error!("Failed to load model: {}", e);
        return Err(Box::new(e));
    }
    tracing::info!(
        device = config.model.device.as_str(),
        path = %config.model.get_model_path().display(),
        "Model loaded"
    );

    let predictor = Arc::new(predictor);
    let server = HttpServer::new(predictor, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use crate::{
    config::ServerConfig, model::Model, predictor::Predictor, routes::api_routes,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::CorsLayer;

pub struct SharedState<M: Model> {
    pub predictor: Arc<Predictor<M>>,
    pub metrics: Arc<Metrics>,
}

impl<M: Model> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            predictor: Arc::clone(&self.predictor),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: Model>(
        predictor: Arc<Predictor<M>>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState { predictor, metrics };

        // The browser dashboard is served from a different origin, so
        // preflights and responses allow everything.
        let router = Router::new()
            .merge(api_routes())
            .with_state(app_state)
            .layer(CorsLayer::permissive())
            .layer(metrics_layer);

        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting server on {}", self.listener.local_addr()?);

        let Self { router, listener } = self;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}

mod health;
mod metrics;
mod model_info;
mod predict;

use crate::{model::Model, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes<M: Model>() -> Router<SharedState<M>> {
    Router::new()
        .route("/predict", post(predict::predict::<M>))
        .route("/model-info", get(model_info::model_info::<M>))
        .route("/health", get(health::healthcheck::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
}

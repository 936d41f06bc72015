use crate::{model::Model, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

pub async fn healthcheck<M: Model>(State(state): State<SharedState<M>>) -> impl IntoResponse {
    let status = if state.predictor.is_loaded() {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(Status {
        status: status.into(),
    })
}

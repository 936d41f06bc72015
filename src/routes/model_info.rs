use crate::{model::Model, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};

pub async fn model_info<M: Model>(State(state): State<SharedState<M>>) -> impl IntoResponse {
    Json(state.predictor.info())
}

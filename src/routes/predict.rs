use crate::{
    model::Model,
    predictor::{PredictError, PredictionResult},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub result: PredictionResult,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error("no image data provided")]
    EmptyBody,
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("invalid multipart payload: {0}")]
    Multipart(String),
    #[error(transparent)]
    Predict(#[from] PredictError),
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictImageError::EmptyBody
            | PredictImageError::Body(_)
            | PredictImageError::Multipart(_) => StatusCode::BAD_REQUEST,
            PredictImageError::Predict(PredictError::NotLoaded) => StatusCode::SERVICE_UNAVAILABLE,
            PredictImageError::Predict(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Image bytes from either a raw request body or the first non-empty field
/// of a multipart form.
pub struct ImageUpload(pub Bytes);

impl<S> FromRequest<S> for ImageUpload
where
    S: Send + Sync,
{
    type Rejection = PredictImageError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| PredictImageError::Multipart(e.to_string()))?;
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| PredictImageError::Multipart(e.to_string()))?
            {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| PredictImageError::Multipart(e.to_string()))?;
                if !data.is_empty() {
                    return Ok(ImageUpload(data));
                }
            }
            Err(PredictImageError::EmptyBody)
        } else {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| PredictImageError::Body(e.to_string()))?;
            if body.is_empty() {
                return Err(PredictImageError::EmptyBody);
            }
            Ok(ImageUpload(body))
        }
    }
}

#[instrument(skip(state, image_data))]
pub async fn predict<M: Model>(
    State(state): State<SharedState<M>>,
    ImageUpload(image_data): ImageUpload,
) -> Result<Json<PredictResponse>, PredictImageError> {
    state.metrics.record_request("/predict");

    let result = state.predictor.predict(&image_data)?;

    state
        .metrics
        .record_prediction_duration(result.processing_time_ms, "/predict");
    tracing::debug!(
        predicted_class = %result.predicted_class,
        confidence = result.confidence_score,
        "prediction complete"
    );

    Ok(Json(PredictResponse {
        success: true,
        result,
    }))
}

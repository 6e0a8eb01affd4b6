use std::{io::Cursor, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use image::DynamicImage;
use serde::Serialize;
use tokio::task;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::ServiceError,
    pipeline::{GenerationRequest, Seeding, TextToImage},
};

// Local dev frontends; the only origins allowed to call the API.
const ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<dyn TextToImage>,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    model: String,
    device: String,
}

pub fn build_router(pipeline: Arc<dyn TextToImage>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            ALLOWED_ORIGINS.map(HeaderValue::from_static),
        ))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .with_state(AppState { pipeline })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        model: state.pipeline.model_id().to_string(),
        device: state.pipeline.device_name().to_string(),
    })
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Response, ServiceError> {
    request.validate()?;

    let seeding = Seeding::from(request.seed);
    let pipeline = state.pipeline.clone();
    let image = task::spawn_blocking(move || pipeline.generate(&request, seeding))
        .await
        .map_err(|err| ServiceError::Inference(format!("generation task failed: {err}")))??;

    let png = encode_png(&image)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ServiceError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .map_err(|err| ServiceError::Encode(err.to_string()))?;
    Ok(bytes)
}

//! Router-level tests driving the HTTP surface against a fake pipeline.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use tower::ServiceExt;

use image_forge::{GenerationRequest, Seeding, ServiceError, TextToImage, build_router};

const PNG_MAGIC: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];

#[derive(Default)]
struct FakePipeline {
    fail: bool,
    seen: Mutex<Vec<(GenerationRequest, Seeding)>>,
}

impl FakePipeline {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl TextToImage for FakePipeline {
    fn generate(
        &self,
        request: &GenerationRequest,
        seeding: Seeding,
    ) -> Result<DynamicImage, ServiceError> {
        let mut seen = self.seen.lock();
        seen.push((request.clone(), seeding));
        let calls = seen.len();
        drop(seen);

        if self.fail {
            return Err(ServiceError::Inference("device out of memory".into()));
        }
        // Seeded output depends only on the seed; unseeded output varies
        // per call, mimicking the real sampler's behavior.
        let shade = match seeding {
            Seeding::Seeded(seed) => seed.rem_euclid(251) as u8,
            Seeding::Unseeded => (calls % 251) as u8,
        };
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            8,
            8,
            Rgb([shade, 40, 40]),
        )))
    }

    fn model_id(&self) -> &str {
        "stabilityai/sd-turbo"
    }

    fn device_name(&self) -> &'static str {
        "cpu"
    }
}

fn test_app(pipeline: Arc<FakePipeline>) -> Router {
    build_router(pipeline)
}

fn generate_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_model_and_device() {
    let app = test_app(Arc::new(FakePipeline::default()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["model"], "stabilityai/sd-turbo");
    assert_eq!(payload["device"], "cpu");
}

#[tokio::test]
async fn generate_returns_png_bytes() {
    let app = test_app(Arc::new(FakePipeline::default()));

    let response = app
        .oneshot(generate_request(serde_json::json!({
            "prompt": "a red fox in snow",
            "steps": 2,
            "seed": 42,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "image/png"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!bytes.is_empty());
    assert_eq!(&bytes[..4], &PNG_MAGIC);
}

#[tokio::test]
async fn defaults_reach_the_pipeline() {
    let pipeline = Arc::new(FakePipeline::default());
    let app = test_app(pipeline.clone());

    let response = app
        .oneshot(generate_request(serde_json::json!({ "prompt": "a fox" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = pipeline.seen.lock();
    let (request, seeding) = &seen[0];
    assert_eq!(request.width, 1024);
    assert_eq!(request.height, 1024);
    assert_eq!(request.steps, 2);
    assert_eq!(request.guidance_scale, 0.0);
    assert_eq!(*seeding, Seeding::Unseeded);
}

#[tokio::test]
async fn seed_is_plumbed_through() {
    let pipeline = Arc::new(FakePipeline::default());
    let app = test_app(pipeline.clone());

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(generate_request(serde_json::json!({
                "prompt": "a fox",
                "seed": 42,
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let seen = pipeline.seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(_, s)| *s == Seeding::Seeded(42)));
}

#[tokio::test]
async fn identical_seeded_requests_return_identical_bytes() {
    let app = test_app(Arc::new(FakePipeline::default()));
    let mut bodies = Vec::new();

    for seed in [7, 7, 8] {
        let response = app
            .clone()
            .oneshot(generate_request(serde_json::json!({
                "prompt": "a red fox in snow",
                "seed": seed,
            })))
            .await
            .unwrap();
        bodies.push(response.into_body().collect().await.unwrap().to_bytes());
    }

    assert_eq!(bodies[0], bodies[1]);
    assert_ne!(bodies[0], bodies[2]);
}

#[tokio::test]
async fn unseeded_requests_may_differ() {
    let app = test_app(Arc::new(FakePipeline::default()));
    let mut bodies = Vec::new();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(generate_request(serde_json::json!({
                "prompt": "a red fox in snow",
            })))
            .await
            .unwrap();
        bodies.push(response.into_body().collect().await.unwrap().to_bytes());
    }

    assert_ne!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn empty_prompt_is_rejected_without_touching_the_pipeline() {
    let pipeline = Arc::new(FakePipeline::default());
    let app = test_app(pipeline.clone());

    let response = app
        .oneshot(generate_request(serde_json::json!({ "prompt": "" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(payload["details"][0]["field"], "prompt");
    assert!(pipeline.seen.lock().is_empty());
}

#[tokio::test]
async fn out_of_range_fields_are_all_reported() {
    let pipeline = Arc::new(FakePipeline::default());
    let app = test_app(pipeline.clone());

    let response = app
        .oneshot(generate_request(serde_json::json!({
            "prompt": "a fox",
            "width": 8192,
            "steps": 0,
            "guidance_scale": 21.0,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let fields: Vec<_> = payload["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["width", "steps", "guidance_scale"]);
    assert!(pipeline.seen.lock().is_empty());
}

#[tokio::test]
async fn pipeline_failure_surfaces_as_server_error() {
    let app = test_app(Arc::new(FakePipeline::failing()));

    let response = app
        .oneshot(generate_request(serde_json::json!({ "prompt": "a fox" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(payload["error"].as_str().unwrap().contains("generation"));
}

#[tokio::test]
async fn cors_allows_the_dev_origins_only() {
    for (origin, allowed) in [
        ("http://localhost:5173", true),
        ("http://127.0.0.1:5173", true),
        ("http://evil.example", false),
    ] {
        let app = test_app(Arc::new(FakePipeline::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let allow_origin = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .map(|v| v.to_str().unwrap().to_string());
        if allowed {
            assert_eq!(allow_origin.as_deref(), Some(origin), "origin {origin}");
        } else {
            assert_eq!(allow_origin, None, "origin {origin}");
        }
    }
}

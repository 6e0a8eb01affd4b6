pub mod config;
pub mod error;
pub mod pipeline;
pub mod server;

pub use config::AppConfig;
pub use error::{FieldViolation, ServiceError};
pub use pipeline::{GenerationRequest, MODEL_ID, Seeding, StableDiffusionPipeline, TextToImage};
pub use server::build_router;

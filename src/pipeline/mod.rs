pub mod device;
pub mod stable_diffusion;
pub mod types;

use image::DynamicImage;

pub use device::{Backends, select_device};
pub use stable_diffusion::{MODEL_ID, StableDiffusionPipeline};
pub use types::{GenerationRequest, Seeding};

use crate::error::ServiceError;

/// The pipeline handle behind the HTTP surface. One implementation wraps the
/// real diffusion models; tests substitute a fake.
pub trait TextToImage: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
        seeding: Seeding,
    ) -> Result<DynamicImage, ServiceError>;

    /// Model identifier reported by `/health`.
    fn model_id(&self) -> &str;

    /// Resolved compute device reported by `/health`.
    fn device_name(&self) -> &'static str;
}

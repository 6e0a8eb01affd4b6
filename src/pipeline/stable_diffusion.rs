use diffusers::pipelines::stable_diffusion::StableDiffusionConfig;
use diffusers::transformers::clip;
use image::{DynamicImage, RgbImage};
use parking_lot::Mutex;
use tch::{Device, Kind, Tensor, nn::Module};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    pipeline::{
        TextToImage,
        device::{self, Backends},
        types::{GenerationRequest, Seeding},
    },
};

/// Fixed model identifier; a distilled SD 2.1 checkpoint tuned for very few
/// steps at guidance 0.
pub const MODEL_ID: &str = "stabilityai/sd-turbo";

// Classifier-free guidance only kicks in above this, matching the wrapped
// library's convention.
const GUIDANCE_THRESHOLD: f64 = 1.0;

const VAE_SCALING_FACTOR: f64 = 0.18215;

/// Text-to-image pipeline over the tch `diffusers` crate. The CLIP text
/// encoder, UNet and VAE are built once on the selected device; per-request
/// state is limited to the scheduler and the latent tensor.
pub struct StableDiffusionPipeline {
    device: Device,
    // tch tensors are Send but not Sync, so concurrent requests serialize
    // here. Thread safety of the underlying kernels is libtorch's business.
    models: Mutex<Models>,
}

struct Models {
    tokenizer: clip::Tokenizer,
    text_model: clip::ClipTextTransformer,
    vae: diffusers::models::vae::AutoEncoderKL,
    unet: diffusers::models::unet_2d::UNet2DConditionModel,
}

impl StableDiffusionPipeline {
    /// Loads every model artifact onto the selected device. Any failure here
    /// is fatal to startup; the server never binds without a usable handle.
    pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
        let (device, variant) = device::select_device(Backends::detect());
        info!(
            model = MODEL_ID,
            device = device::device_name(device),
            ?variant,
            "loading stable diffusion pipeline"
        );

        for path in [
            &config.vocab_path,
            &config.clip_weights_path,
            &config.unet_weights_path,
            &config.vae_weights_path,
        ] {
            if !path.exists() {
                return Err(ServiceError::Load(format!(
                    "model artifact missing: {}",
                    path.display()
                )));
            }
        }

        let sd_config = StableDiffusionConfig::v2_1(None, None, None);
        let tokenizer = clip::Tokenizer::create(&config.vocab_path, &sd_config.clip)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let text_model = sd_config
            .build_clip_transformer(&config.clip_weights_path.to_string_lossy(), device)
            .map_err(|e| ServiceError::Load(format!("clip transformer: {e}")))?;
        let vae = sd_config
            .build_vae(&config.vae_weights_path.to_string_lossy(), device)
            .map_err(|e| ServiceError::Load(format!("vae: {e}")))?;
        let unet = sd_config
            .build_unet(&config.unet_weights_path.to_string_lossy(), device, 4)
            .map_err(|e| ServiceError::Load(format!("unet: {e}")))?;

        Ok(Self {
            device,
            models: Mutex::new(Models {
                tokenizer,
                text_model,
                vae,
                unet,
            }),
        })
    }

    fn encode_prompt(&self, tokenizer: &clip::Tokenizer, prompt: &str) -> Result<Tensor, ServiceError> {
        let tokens = tokenizer
            .encode(prompt)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let tokens: Vec<i64> = tokens.into_iter().map(|t| t as i64).collect();
        Ok(Tensor::from_slice(&tokens).view((1, -1)).to(self.device))
    }
}

impl TextToImage for StableDiffusionPipeline {
    fn generate(
        &self,
        request: &GenerationRequest,
        seeding: Seeding,
    ) -> Result<DynamicImage, ServiceError> {
        let models = self.models.lock();
        let _no_grad = tch::no_grad_guard();

        // The RNG lives on the same device as the models, so seeding it here
        // makes equal seeds reproduce equal latents and equal outputs.
        if let Seeding::Seeded(seed) = seeding {
            tch::manual_seed(seed);
        }

        let sd_config = StableDiffusionConfig::v2_1(None, Some(request.height), Some(request.width));
        let scheduler = sd_config.build_scheduler(request.steps);
        let use_guidance = request.guidance_scale > GUIDANCE_THRESHOLD;

        let cond_embeddings = models
            .text_model
            .forward(&self.encode_prompt(&models.tokenizer, &request.prompt)?);
        let text_embeddings = if use_guidance {
            let uncond = self
                .encode_prompt(&models.tokenizer, request.negative_prompt().unwrap_or(""))?;
            let uncond_embeddings = models.text_model.forward(&uncond);
            Tensor::cat(&[uncond_embeddings, cond_embeddings], 0)
        } else {
            cond_embeddings
        };

        let mut latents = initial_latents(sd_config.height, sd_config.width, self.device);
        latents *= scheduler.init_noise_sigma();

        for &timestep in scheduler.timesteps().iter() {
            let latent_model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)
            } else {
                latents.shallow_clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep);
            let noise_pred =
                models
                    .unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings);
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0);
                &chunks[0] + (&chunks[1] - &chunks[0]) * request.guidance_scale
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents);
        }

        let image = models.vae.decode(&(&latents / VAE_SCALING_FACTOR));
        let image = (image / 2.0 + 0.5).clamp(0.0, 1.0).to_device(Device::Cpu);
        let image = (image * 255.0)
            .to_kind(Kind::Uint8)
            .squeeze_dim(0)
            .permute([1, 2, 0])
            .contiguous();
        tensor_to_image(&image)
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }

    fn device_name(&self) -> &'static str {
        device::device_name(self.device)
    }
}

/// Noise latents for one sample. Always Float: the `diffusers` builders load
/// every var store in full precision regardless of device, and libtorch
/// rejects Half activations against Float weights.
fn initial_latents(height: i64, width: i64, device: Device) -> Tensor {
    Tensor::randn([1, 4, height / 8, width / 8], (Kind::Float, device))
}

/// Converts an HWC u8 tensor into an RGB image buffer.
fn tensor_to_image(tensor: &Tensor) -> Result<DynamicImage, ServiceError> {
    let (height, width, channels) = tensor
        .size3()
        .map_err(|e| ServiceError::Inference(e.to_string()))?;
    if channels != 3 {
        return Err(ServiceError::Inference(format!(
            "expected 3 channels, got {channels}"
        )));
    }
    let pixels = Vec::<u8>::try_from(&tensor.reshape([height * width * channels]))
        .map_err(|e| ServiceError::Inference(e.to_string()))?;
    let buffer = RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| ServiceError::Inference("pixel buffer size mismatch".into()))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

/// Deployment knobs. The model identifier is deliberately not here: it is the
/// `MODEL_ID` constant in the pipeline module.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub vocab_path: PathBuf,
    pub clip_weights_path: PathBuf,
    pub unet_weights_path: PathBuf,
    pub vae_weights_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

        let vocab_path = PathBuf::from(
            env::var("VOCAB_PATH")
                .unwrap_or_else(|_| "models/bpe_simple_vocab_16e6.txt".to_string()),
        );
        let clip_weights_path = PathBuf::from(
            env::var("CLIP_WEIGHTS_PATH").unwrap_or_else(|_| "models/clip.safetensors".to_string()),
        );
        let unet_weights_path = PathBuf::from(
            env::var("UNET_WEIGHTS_PATH").unwrap_or_else(|_| "models/unet.safetensors".to_string()),
        );
        let vae_weights_path = PathBuf::from(
            env::var("VAE_WEIGHTS_PATH").unwrap_or_else(|_| "models/vae.safetensors".to_string()),
        );

        Ok(Self {
            listen_addr,
            vocab_path,
            clip_weights_path,
            unet_weights_path,
            vae_weights_path,
        })
    }
}

use tch::{Device, Kind};

/// Accelerator availability as reported by libtorch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backends {
    pub mps: bool,
    pub cuda: bool,
}

impl Backends {
    pub fn detect() -> Self {
        Self {
            mps: tch::utils::has_mps(),
            cuda: tch::Cuda::is_available(),
        }
    }
}

/// Picks the device and the expected checkpoint precision. MPS wins over
/// CUDA, CPU is the universal fallback; accelerators pair with the fp16
/// weight variant. The `Kind` is reporting metadata — activations always
/// run Float because the pipeline crate loads its var stores in full
/// precision (see `initial_latents`).
pub fn select_device(backends: Backends) -> (Device, Kind) {
    if backends.mps {
        (Device::Mps, Kind::Half)
    } else if backends.cuda {
        (Device::Cuda(0), Kind::Half)
    } else {
        (Device::Cpu, Kind::Float)
    }
}

pub fn device_name(device: Device) -> &'static str {
    match device {
        Device::Mps => "mps",
        Device::Cuda(_) => "cuda",
        Device::Cpu => "cpu",
        Device::Vulkan => "vulkan",
    }
}

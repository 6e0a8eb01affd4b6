use serde::Deserialize;

use crate::error::{FieldViolation, ServiceError};

pub const PROMPT_MAX_CHARS: usize = 2000;
pub const DIMENSION_RANGE: std::ops::RangeInclusive<i64> = 256..=4096;
pub const STEPS_RANGE: std::ops::RangeInclusive<usize> = 1..=50;
pub const GUIDANCE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=20.0;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_dimension")]
    pub width: i64,
    #[serde(default = "default_dimension")]
    pub height: i64,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default)]
    pub guidance_scale: f64,
    #[serde(default)]
    pub seed: Option<i64>,
}

fn default_dimension() -> i64 {
    1024
}

fn default_steps() -> usize {
    2
}

impl GenerationRequest {
    /// Bounds-checks every field, collecting all violations so the caller
    /// sees the full picture in one response.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let mut violations = Vec::new();

        let prompt_chars = self.prompt.chars().count();
        if prompt_chars == 0 || prompt_chars > PROMPT_MAX_CHARS {
            violations.push(FieldViolation {
                field: "prompt",
                message: format!("prompt length must be in 1..={PROMPT_MAX_CHARS} characters"),
            });
        }
        // The latent space works on 8-pixel blocks, so the pipeline asserts
        // divisibility by 8; catch it here instead.
        if !DIMENSION_RANGE.contains(&self.width) {
            violations.push(FieldViolation {
                field: "width",
                message: format!("width must be in {DIMENSION_RANGE:?}"),
            });
        } else if self.width % 8 != 0 {
            violations.push(FieldViolation {
                field: "width",
                message: "width must be a multiple of 8".to_string(),
            });
        }
        if !DIMENSION_RANGE.contains(&self.height) {
            violations.push(FieldViolation {
                field: "height",
                message: format!("height must be in {DIMENSION_RANGE:?}"),
            });
        } else if self.height % 8 != 0 {
            violations.push(FieldViolation {
                field: "height",
                message: "height must be a multiple of 8".to_string(),
            });
        }
        if !STEPS_RANGE.contains(&self.steps) {
            violations.push(FieldViolation {
                field: "steps",
                message: format!("steps must be in {STEPS_RANGE:?}"),
            });
        }
        if !GUIDANCE_RANGE.contains(&self.guidance_scale) {
            violations.push(FieldViolation {
                field: "guidance_scale",
                message: format!("guidance_scale must be in {GUIDANCE_RANGE:?}"),
            });
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(violations))
        }
    }

    /// The negative prompt, with the empty string normalized to absent so
    /// `""` and an omitted field behave identically.
    pub fn negative_prompt(&self) -> Option<&str> {
        if self.negative_prompt.is_empty() {
            None
        } else {
            Some(self.negative_prompt.as_str())
        }
    }
}

/// Whether a request asked for reproducible sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeding {
    Seeded(i64),
    Unseeded,
}

impl From<Option<i64>> for Seeding {
    fn from(seed: Option<i64>) -> Self {
        match seed {
            Some(value) => Seeding::Seeded(value),
            None => Seeding::Unseeded,
        }
    }
}

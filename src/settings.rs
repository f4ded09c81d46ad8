use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Texture quality tier; drives the resize ceiling and the lossy re-encode quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TextureQuality {
    #[default]
    High,
    Medium,
    Low,
}

impl TextureQuality {
    /// Longest allowed edge, in pixels.
    pub fn max_dimension(self) -> u32 {
        match self {
            TextureQuality::High => 2048,
            TextureQuality::Medium => 1024,
            TextureQuality::Low => 512,
        }
    }

    /// Lossy encoder quality in `0.0..=1.0`.
    pub fn encode_quality(self) -> f32 {
        match self {
            TextureQuality::High => 0.95,
            TextureQuality::Medium => 0.80,
            TextureQuality::Low => 0.60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DracoCompression {
    pub enabled: bool,
    /// Requested level, 1 (fast) to 10 (smallest).
    pub level: u8,
}

impl Default for DracoCompression {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 7,
        }
    }
}

/// Settings for a single optimization call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationSettings {
    /// Simplification aggressiveness, 0 to 100.
    pub mesh_decimation: u8,
    pub texture_quality: TextureQuality,
    pub draco_compression: DracoCompression,
    /// Preview-only flag, never read by the pipeline.
    pub wireframe_mode: bool,
}

impl OptimizationSettings {
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(text).map_err(|e| Error::InvalidSettings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mesh_decimation > 100 {
            return Err(Error::InvalidSettings(format!(
                "meshDecimation must be within 0..=100, got {}",
                self.mesh_decimation
            )));
        }
        if !(1..=10).contains(&self.draco_compression.level) {
            return Err(Error::InvalidSettings(format!(
                "dracoCompression.level must be within 1..=10, got {}",
                self.draco_compression.level
            )));
        }
        Ok(())
    }
}

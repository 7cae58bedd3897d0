use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::render::SynthesizerKind;

pub const OVERSAMPLING_FACTORS: [u32; 3] = [1, 2, 4];
pub const BIT_DEPTHS: [u8; 4] = [8, 16, 24, 32];
pub const MAX_FPS: u32 = 240;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("output size {width}x{height} is invalid")]
    InvalidSize { width: u32, height: u32 },

    #[error("oversampling must be one of 1, 2, 4 (got {0})")]
    InvalidOversampling(u32),

    #[error("bit depth must be one of 8, 16, 24, 32 (got {0})")]
    InvalidBitDepth(u8),

    #[error("target fps must be between 1 and {MAX_FPS} (got {0})")]
    InvalidFps(u32),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Frame geometry and pacing for one session. Read-only once it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderConfig {
    pub output_width: u32,
    pub output_height: u32,
    pub oversampling: u32,
    pub bit_depth: u8,
    pub target_fps: u32,
    pub show_fps: bool,
    pub fullscreen: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_width: default_width(),
            output_height: default_height(),
            oversampling: default_oversampling(),
            bit_depth: default_bit_depth(),
            target_fps: default_fps(),
            show_fps: false,
            fullscreen: false,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !OVERSAMPLING_FACTORS.contains(&self.oversampling) {
            return Err(ConfigError::InvalidOversampling(self.oversampling));
        }
        if !BIT_DEPTHS.contains(&self.bit_depth) {
            return Err(ConfigError::InvalidBitDepth(self.bit_depth));
        }
        if self.target_fps == 0 || self.target_fps > MAX_FPS {
            return Err(ConfigError::InvalidFps(self.target_fps));
        }
        let invalid = ConfigError::InvalidSize {
            width: self.output_width,
            height: self.output_height,
        };
        if self.output_width == 0 || self.output_height == 0 {
            return Err(invalid);
        }
        if self.output_width.checked_mul(self.oversampling).is_none()
            || self.output_height.checked_mul(self.oversampling).is_none()
        {
            return Err(invalid);
        }
        Ok(())
    }

    /// Width of the synthesized frame, output width times oversampling.
    pub fn render_width(&self) -> u32 {
        self.output_width.saturating_mul(self.oversampling)
    }

    pub fn render_height(&self) -> u32 {
        self.output_height.saturating_mul(self.oversampling)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub audio: AudioSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Deserialize)]
pub struct RenderSection {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_oversampling")]
    pub oversampling: u32,
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u8,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub show_fps: bool,
    #[serde(default)]
    pub fullscreen: bool,
    #[serde(default)]
    pub synthesizer: SynthesizerKind,
    pub font: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct AudioSection {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_max_transform_size")]
    pub max_transform_size: usize,
    #[serde(default = "default_block_frames")]
    pub block_frames: usize,
    pub decoupled_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            oversampling: default_oversampling(),
            bit_depth: default_bit_depth(),
            fps: default_fps(),
            show_fps: false,
            fullscreen: false,
            synthesizer: SynthesizerKind::default(),
            font: None,
        }
    }
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            source: default_source(),
            max_transform_size: default_max_transform_size(),
            block_frames: default_block_frames(),
            decoupled_interval_ms: None,
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            crf: default_crf(),
            pix_fmt: default_pix_fmt(),
        }
    }
}

pub fn default_width() -> u32 { 640 }
pub fn default_height() -> u32 { 480 }
pub fn default_oversampling() -> u32 { 1 }
pub fn default_bit_depth() -> u8 { 24 }
pub fn default_fps() -> u32 { 60 }
pub fn default_source() -> String { "system_audio".into() }
pub fn default_max_transform_size() -> usize { 2048 }
pub fn default_block_frames() -> usize { 1024 }
pub fn default_codec() -> String { "libx264".into() }
pub fn default_crf() -> u32 { 18 }
pub fn default_pix_fmt() -> String { "yuv420p".into() }

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `./tapvis.toml`, then the platform config dir.
pub fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("tapvis.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("tapvis").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("tapvis").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

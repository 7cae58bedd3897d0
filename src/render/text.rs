use anyhow::{Context, Result};
use fontdue::{Font, FontSettings};
use std::path::{Path, PathBuf};

use super::bitdepth::reduce_bit_depth;

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// First monospace-ish font found in the usual system locations.
pub fn find_system_font() -> Option<PathBuf> {
    SYSTEM_FONTS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

pub struct TextOverlay {
    font: Font,
    font_size: f32,
}

impl TextOverlay {
    pub fn from_bytes(bytes: &[u8], font_size: f32) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| anyhow::anyhow!("Failed to parse font: {}", e))?;
        Ok(Self { font, font_size })
    }

    pub fn from_path(path: &Path, font_size: f32) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font: {}", path.display()))?;
        Self::from_bytes(&bytes, font_size)
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    /// Composite text onto an RGBA pixel buffer at the given position.
    #[allow(clippy::too_many_arguments)]
    pub fn composite(
        &self,
        pixels: &mut [u8],
        width: u32,
        height: u32,
        text: &str,
        x: u32,
        y: u32,
        color: [u8; 4],
    ) {
        let mut cursor_x = x as i32;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, self.font_size);
            let glyph_y = y as i32 + self.font_size as i32 - metrics.height as i32 - metrics.ymin;

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let alpha = bitmap[gy * metrics.width + gx];
                    if alpha == 0 {
                        continue;
                    }

                    let px = cursor_x + metrics.xmin + gx as i32;
                    let py = glyph_y + gy as i32;
                    if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                        continue;
                    }

                    let idx = (py as usize * width as usize + px as usize) * 4;
                    let Some(dst) = pixels.get_mut(idx..idx + 4) else {
                        continue;
                    };

                    let a = alpha as f32 / 255.0 * (color[3] as f32 / 255.0);
                    let inv_a = 1.0 - a;
                    for c in 0..3 {
                        dst[c] = (color[c] as f32 * a + dst[c] as f32 * inv_a) as u8;
                    }
                    dst[3] = 255;
                }
            }

            cursor_x += metrics.advance_width.round() as i32;
        }
    }

    /// Measure the width of rendered text in pixels.
    pub fn measure_width(&self, text: &str) -> u32 {
        let width: f32 = text
            .chars()
            .map(|ch| self.font.metrics(ch, self.font_size).advance_width)
            .sum();
        width.ceil() as u32
    }
}

/// Draws the measured render rate into the top-left corner of each frame.
pub struct FpsOverlay {
    text: TextOverlay,
    margin: u32,
    label: String,
}

impl FpsOverlay {
    /// Size the text relative to the render height.
    pub fn new(font_path: Option<&Path>, render_height: u32) -> Result<Self> {
        let path = match font_path {
            Some(path) => path.to_path_buf(),
            None => find_system_font().context("No usable system font found")?,
        };
        let font_size = (render_height as f32 * 0.04).max(12.0);
        let text = TextOverlay::from_path(&path, font_size)?;
        log::info!("FPS overlay font: {}", path.display());
        Ok(Self {
            text,
            margin: (font_size * 0.5) as u32,
            label: String::from("-- fps"),
        })
    }

    pub fn update(&mut self, fps: f64) {
        self.label = format!("{:.1} fps", fps);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Composite the label, then requantize so the text shares the frame's
    /// color depth.
    pub fn draw(&self, pixels: &mut [u8], width: u32, height: u32, bit_depth: u8) {
        self.text.composite(
            pixels,
            width,
            height,
            &self.label,
            self.margin,
            self.margin,
            [255, 255, 255, 230],
        );
        reduce_bit_depth(pixels, bit_depth);
    }
}

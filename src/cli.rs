use clap::Parser;
use std::path::PathBuf;

use tapvis::render::SynthesizerKind;

#[derive(Parser, Debug)]
#[command(name = "tapvis", about = "Real-time audio visualizer")]
pub struct Cli {
    /// Capture source id (system_audio, input, output:<name>, input:<name>)
    #[arg(short, long, default_value = "system_audio")]
    pub source: String,

    /// Play an audio file instead of capturing (WAV, MP3, FLAC, OGG)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Restart the file when it ends
    #[arg(long = "loop")]
    pub looping: bool,

    /// List capture sources and exit
    #[arg(long)]
    pub list_sources: bool,

    /// Output width in pixels
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// Output height in pixels
    #[arg(long, default_value_t = 480)]
    pub height: u32,

    /// Render at this multiple of the output size (1, 2 or 4)
    #[arg(long, default_value_t = 1)]
    pub oversampling: u32,

    /// Color depth of synthesized frames (8, 16, 24 or 32)
    #[arg(long, default_value_t = 24)]
    pub bit_depth: u8,

    /// Frames per second
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Draw the measured frame rate onto each frame
    #[arg(long)]
    pub show_fps: bool,

    /// Request a fullscreen display surface
    #[arg(long)]
    pub fullscreen: bool,

    /// Frame synthesizer
    #[arg(long, value_enum, default_value_t = SynthesizerKind::Milky)]
    pub synthesizer: SynthesizerKind,

    /// TTF font for the frame rate overlay
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// Largest FFT size used for the spectrum
    #[arg(long, default_value_t = 2048)]
    pub max_transform_size: usize,

    /// Frames per block when playing a file
    #[arg(long, default_value_t = 1024)]
    pub block_frames: usize,

    /// Analyze the newest block every N ms instead of on every delivery
    #[arg(long)]
    pub decoupled_interval_ms: Option<u64>,

    /// Encode frames to this video file with ffmpeg
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Record captured audio to this WAV file
    #[arg(short, long)]
    pub record: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Config file (defaults to ./tapvis.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// FFmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// FFmpeg pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,

    /// H.264 CRF quality (0-51, lower = better). Ignored when --bitrate is set.
    #[arg(long, default_value_t = 18)]
    pub crf: u32,

    /// Video bitrate (e.g. 2400k, 5M). When set, uses -b:v instead of -crf.
    #[arg(short, long)]
    pub bitrate: Option<String>,
}

impl Cli {
    /// Config values apply only where the CLI is still at its default.
    pub fn merge(&mut self, cfg: tapvis::config::Config) {
        use tapvis::config::*;

        if self.width == default_width() { self.width = cfg.render.width; }
        if self.height == default_height() { self.height = cfg.render.height; }
        if self.oversampling == default_oversampling() { self.oversampling = cfg.render.oversampling; }
        if self.bit_depth == default_bit_depth() { self.bit_depth = cfg.render.bit_depth; }
        if self.fps == default_fps() { self.fps = cfg.render.fps; }
        self.show_fps |= cfg.render.show_fps;
        self.fullscreen |= cfg.render.fullscreen;
        if self.synthesizer == SynthesizerKind::default() { self.synthesizer = cfg.render.synthesizer; }
        if self.font.is_none() { self.font = cfg.render.font; }
        if self.source == default_source() { self.source = cfg.audio.source; }
        if self.max_transform_size == default_max_transform_size() {
            self.max_transform_size = cfg.audio.max_transform_size;
        }
        if self.block_frames == default_block_frames() { self.block_frames = cfg.audio.block_frames; }
        if self.decoupled_interval_ms.is_none() {
            self.decoupled_interval_ms = cfg.audio.decoupled_interval_ms;
        }
        if self.codec == default_codec() { self.codec = cfg.output.codec; }
        if self.crf == default_crf() { self.crf = cfg.output.crf; }
        if self.pix_fmt == default_pix_fmt() { self.pix_fmt = cfg.output.pix_fmt; }
    }

    pub fn render_config(&self) -> tapvis::RenderConfig {
        tapvis::RenderConfig {
            output_width: self.width,
            output_height: self.height,
            oversampling: self.oversampling,
            bit_depth: self.bit_depth,
            target_fps: self.fps,
            show_fps: self.show_fps,
            fullscreen: self.fullscreen,
        }
    }
}

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::display::FrameSink;
use crate::present::FrameBuffer;

/// Settings for piping frames into an `ffmpeg` child process.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub output: PathBuf,
    /// Muxed in alongside the video when set.
    pub audio: Option<PathBuf>,
    /// Size of the frames handed to `present`.
    pub render_width: u32,
    pub render_height: u32,
    /// Size written to the output file.
    pub output_width: u32,
    pub output_height: u32,
    pub fps: u32,
    pub codec: String,
    pub pix_fmt: String,
    pub crf: u32,
    pub bitrate: Option<String>,
}

impl EncoderOptions {
    fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-f".into(), "rawvideo".into(),
            "-pixel_format".into(), "rgba".into(),
            "-video_size".into(), format!("{}x{}", self.render_width, self.render_height).into(),
            "-framerate".into(), self.fps.to_string().into(),
            "-i".into(), "pipe:0".into(),
        ];

        if let Some(ref audio) = self.audio {
            args.extend(["-i".into(), audio.as_os_str().to_owned()]);
        }

        if self.render_width != self.output_width || self.render_height != self.output_height {
            args.extend([
                "-vf".into(),
                format!("scale={}:{}:flags=area", self.output_width, self.output_height).into(),
            ]);
        }

        args.extend([
            "-c:v".into(), self.codec.clone().into(),
            "-pix_fmt".into(), self.pix_fmt.clone().into(),
        ]);

        if let Some(ref br) = self.bitrate {
            args.extend(["-b:v".into(), br.into()]);
        } else {
            args.extend(["-crf".into(), self.crf.to_string().into()]);
            args.extend(["-preset".into(), "medium".into()]);
        }

        if self.audio.is_some() {
            args.extend([
                "-c:a".into(), "aac".into(),
                "-b:a".into(), "192k".into(),
                "-shortest".into(),
            ]);
        }

        args.push(self.output.as_os_str().to_owned());
        args
    }
}

/// Frame sink that encodes every presented frame to a video file.
pub struct FfmpegEncoder {
    child: Option<Child>,
    frame_len: usize,
    output: PathBuf,
    frames: u64,
}

impl FfmpegEncoder {
    pub fn new(options: &EncoderOptions) -> Result<Self> {
        let child = Command::new("ffmpeg")
            .args(options.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        log::info!(
            "FFmpeg encoder started: {}x{} -> {}x{} @ {}fps, codec={}",
            options.render_width,
            options.render_height,
            options.output_width,
            options.output_height,
            options.fps,
            options.codec
        );

        Ok(Self {
            child: Some(child),
            frame_len: options.render_width as usize * options.render_height as usize * 4,
            output: options.output.clone(),
            frames: 0,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for FfmpegEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn present(&mut self, frame: &FrameBuffer) -> Result<()> {
        let pixels = frame.pixels();
        if pixels.len() != self.frame_len {
            anyhow::bail!(
                "Frame is {} bytes, encoder expects {}",
                pixels.len(),
                self.frame_len
            );
        }
        let stdin = self
            .child
            .as_mut()
            .and_then(|child| child.stdin.as_mut())
            .context("FFmpeg stdin not available")?;
        stdin.write_all(pixels).context("Failed to write frame to ffmpeg")?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        // Close stdin to signal EOF
        drop(child.stdin.take());

        let output = child.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!(
            "FFmpeg encoding complete: {} frames to {}",
            self.frames,
            self.output.display()
        );
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(e) = self.finish() {
                log::warn!("{:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> EncoderOptions {
        EncoderOptions {
            output: PathBuf::from("out.mp4"),
            audio: None,
            render_width: 1280,
            render_height: 960,
            output_width: 640,
            output_height: 480,
            fps: 30,
            codec: "libx264".to_string(),
            pix_fmt: "yuv420p".to_string(),
            crf: 18,
            bitrate: None,
        }
    }

    fn has(args: &[OsString], pair: [&str; 2]) -> bool {
        args.windows(2).any(|w| w[0] == pair[0] && w[1] == pair[1])
    }

    #[test]
    fn test_args_scale_oversampled_frames() {
        let args = options().args();
        assert!(has(&args, ["-video_size", "1280x960"]));
        assert!(has(&args, ["-vf", "scale=640:480:flags=area"]));
        assert!(has(&args, ["-crf", "18"]));
        assert!(!args.iter().any(|a| a == "-shortest"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_args_with_audio_and_bitrate() {
        let mut opts = options();
        opts.render_width = 640;
        opts.render_height = 480;
        opts.audio = Some(PathBuf::from("song.flac"));
        opts.bitrate = Some("5M".to_string());

        let args = opts.args();
        assert!(!args.iter().any(|a| a == "-vf"));
        assert!(has(&args, ["-i", "song.flac"]));
        assert!(has(&args, ["-b:v", "5M"]));
        assert!(!args.iter().any(|a| a == "-crf"));
        assert!(args.iter().any(|a| a == "-shortest"));
    }
}

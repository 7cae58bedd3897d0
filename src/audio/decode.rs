use anyhow::{Context, Result};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::block::AudioBlock;
use super::source::{AudioSource, CaptureError, CaptureHandler, StreamInfo};
use crate::pacing::{Pacer, StopSignal};

/// A fully decoded file, samples interleaved.
pub struct AudioData {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Decode every packet of the first audio track into interleaved `f32`.
pub fn decode_audio(path: &Path) -> Result<AudioData> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mut reader = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unrecognized audio format")?
        .format;

    let track = reader
        .default_track()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .or_else(|| {
            reader
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        })
        .context("File has no audio track")?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params.sample_rate.context("Audio track has no sample rate")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut data = AudioData {
        samples: Vec::new(),
        channels: params.channels.map_or(1, |c| c.count() as u16),
        sample_rate,
    };
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("Audio decoding failed"),
        };

        let spec = *decoded.spec();
        data.channels = spec.channels.count() as u16;
        let frames = decoded.capacity();
        let needed = frames * spec.channels.count();
        if buffer.as_ref().map_or(true, |buf| buf.capacity() < needed) {
            buffer = Some(SampleBuffer::new(frames as u64, spec));
        }
        let Some(buf) = buffer.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        data.samples.extend_from_slice(buf.samples());
    }

    log::info!(
        "Decoded {}: {} frames, {} channels, {}Hz, {:.1}s",
        path.display(),
        data.frames(),
        data.channels,
        data.sample_rate,
        data.duration().as_secs_f32()
    );
    Ok(data)
}

/// Plays a decoded file back as a capture source, one block per period.
pub struct FileSource {
    path: PathBuf,
    block_frames: usize,
    looping: bool,
    data: Option<Arc<AudioData>>,
    stop: StopSignal,
    thread_handle: Option<JoinHandle<()>>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, block_frames: usize) -> Self {
        Self {
            path: path.into(),
            block_frames: block_frames.max(1),
            looping: false,
            data: None,
            stop: StopSignal::new(),
            thread_handle: None,
        }
    }

    /// Restart from the beginning instead of ending the stream.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

impl AudioSource for FileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn start(&mut self, handler: CaptureHandler) -> Result<StreamInfo, CaptureError> {
        self.stop();

        let data = match self.data {
            Some(ref data) => data.clone(),
            None => {
                let decoded = decode_audio(&self.path)
                    .map_err(|e| CaptureError::FileError(format!("{:#}", e)))?;
                let decoded = Arc::new(decoded);
                self.data = Some(decoded.clone());
                decoded
            }
        };
        if data.channels == 0 || data.sample_rate == 0 {
            return Err(CaptureError::FileError(format!(
                "{} has no playable audio",
                self.path.display()
            )));
        }

        let info = StreamInfo {
            sample_rate: data.sample_rate,
            channels: data.channels,
        };
        let stop = StopSignal::new();
        self.stop = stop.clone();
        let block_frames = self.block_frames;
        let looping = self.looping;

        let handle = thread::Builder::new()
            .name("file-playback".to_string())
            .spawn(move || play_blocks(&data, block_frames, looping, &handler, &stop))
            .map_err(|e| CaptureError::ThreadError(e.to_string()))?;
        self.thread_handle = Some(handle);

        Ok(info)
    }

    fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_blocks(
    data: &AudioData,
    block_frames: usize,
    looping: bool,
    handler: &CaptureHandler,
    stop: &StopSignal,
) {
    let channels = data.channels as usize;
    let period = Duration::from_secs_f64(block_frames as f64 / data.sample_rate as f64);
    let mut pacer = Pacer::new(period);

    loop {
        for chunk in data.samples.chunks(block_frames * channels) {
            if !pacer.wait(stop) {
                return;
            }
            handler.deliver(AudioBlock::interleaved(
                chunk.to_vec(),
                data.channels,
                data.sample_rate,
            ));
        }
        if !looping || data.samples.is_empty() {
            break;
        }
    }
    handler.end_of_stream();
}

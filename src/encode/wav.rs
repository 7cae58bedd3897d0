use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::AudioBlock;
use crate::pacing::StopSignal;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Writer = hound::WavWriter<BufWriter<File>>;

/// Writes raw capture blocks to a 32-bit float WAV file on its own thread.
///
/// The file is created when the first block arrives, using that block's
/// format. Write failures are logged and stop the recording; they never
/// reach the visualization loops.
pub struct WavRecorder {
    path: PathBuf,
    stop: StopSignal,
    handle: Option<JoinHandle<u64>>,
}

impl WavRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stop: StopSignal::new(),
            handle: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start consuming `blocks`. Returns immediately.
    pub fn spawn(&mut self, blocks: Receiver<AudioBlock>) -> Result<()> {
        let path = self.path.clone();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name("wav-recorder".to_string())
            .spawn(move || record(&path, &blocks, &stop))
            .context("Failed to spawn recorder thread")?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Drain what is already queued, finalize the file and return the number
    /// of frames written.
    pub fn finish(&mut self) -> u64 {
        self.stop.stop();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                log::error!("Recorder thread panicked");
                0
            }),
            None => 0,
        }
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}

struct Recording {
    writer: Writer,
    channels: usize,
    sample_rate: u32,
    frames: u64,
}

fn record(path: &Path, blocks: &Receiver<AudioBlock>, stop: &StopSignal) -> u64 {
    let mut recording: Option<Recording> = None;
    let mut failed = false;
    let mut interleaved = Vec::new();

    loop {
        let block = match blocks.recv_timeout(POLL_INTERVAL) {
            Ok(block) => block,
            Err(RecvTimeoutError::Timeout) if !stop.is_stopped() => continue,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        };
        if failed || block.is_empty() {
            continue;
        }
        if let Err(e) = write_block(path, &mut recording, &block, &mut interleaved) {
            log::error!("Recording to {} stopped: {:#}", path.display(), e);
            failed = true;
        }
    }

    let Some(recording) = recording else {
        log::info!("Recorder received no audio, nothing written");
        return 0;
    };
    let frames = recording.frames;
    match recording.writer.finalize() {
        Ok(()) => log::info!("Recorded {} frames to {}", frames, path.display()),
        Err(e) => log::error!("Failed to finalize {}: {}", path.display(), e),
    }
    frames
}

fn write_block(
    path: &Path,
    recording: &mut Option<Recording>,
    block: &AudioBlock,
    interleaved: &mut Vec<f32>,
) -> Result<()> {
    if recording.is_none() {
        *recording = Some(open(path, block)?);
    }
    let recording = recording.as_mut().context("Recording not open")?;

    if block.channels() != recording.channels || block.sample_rate() != recording.sample_rate {
        log::warn!(
            "Skipping block with format {}ch/{}Hz, recording is {}ch/{}Hz",
            block.channels(),
            block.sample_rate(),
            recording.channels,
            recording.sample_rate
        );
        return Ok(());
    }

    block.write_interleaved(interleaved);
    for &sample in interleaved.iter() {
        recording.writer.write_sample(sample)?;
    }
    recording.frames += block.frame_count() as u64;
    Ok(())
}

fn open(path: &Path, block: &AudioBlock) -> Result<Recording> {
    let spec = hound::WavSpec {
        channels: block.channels() as u16,
        sample_rate: block.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    log::info!(
        "Recording {}ch/{}Hz audio to {}",
        spec.channels,
        spec.sample_rate,
        path.display()
    );
    Ok(Recording {
        writer,
        channels: block.channels(),
        sample_rate: block.sample_rate(),
        frames: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_records_blocks_as_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.wav");

        let (tx, rx) = bounded(8);
        let mut recorder = WavRecorder::new(&path);
        recorder.spawn(rx).unwrap();

        tx.send(AudioBlock::interleaved(vec![0.25, -0.25, 0.5, -0.5], 2, 44100))
            .unwrap();
        tx.send(AudioBlock::planar(vec![vec![0.1, 0.2], vec![-0.1, -0.2]], 44100))
            .unwrap();
        // Mismatched format is skipped
        tx.send(AudioBlock::interleaved(vec![0.9; 3], 1, 44100)).unwrap();
        drop(tx);

        assert_eq!(recorder.finish(), 4);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.25, -0.25, 0.5, -0.5, 0.1, -0.1, 0.2, -0.2]);
    }

    #[test]
    fn test_no_audio_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");

        let (_tx, rx) = bounded::<AudioBlock>(8);
        let mut recorder = WavRecorder::new(&path);
        recorder.spawn(rx).unwrap();
        assert_eq!(recorder.finish(), 0);
        assert!(!path.exists());
    }
}

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::block::AudioBlock;
use crate::pacing::StopSignal;

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No output device found")]
    NoOutputDevice,

    #[error("No input device found")]
    NoInputDevice,

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Failed to open audio file: {0}")]
    FileError(String),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Format of a running capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Why a source stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEnd {
    EndOfStream,
    Invalidated(String),
}

/// Something that delivers audio blocks at its own, irregular pace.
pub trait AudioSource: Send {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Begin delivering blocks to `handler`. Fails without side effects.
    fn start(&mut self, handler: CaptureHandler) -> Result<StreamInfo, CaptureError>;

    /// Stop delivering and drop the handler. Idempotent.
    fn stop(&mut self);
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    recorder_dropped: AtomicU64,
}

impl CaptureStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Blocks discarded because the producer was still busy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn recorder_dropped(&self) -> u64 {
        self.recorder_dropped.load(Ordering::Relaxed)
    }
}

/// Entry point for capture callbacks. Every method returns immediately.
#[derive(Clone)]
pub struct CaptureHandler {
    blocks: Sender<AudioBlock>,
    recorder: Option<Sender<AudioBlock>>,
    end: Arc<Mutex<Option<SourceEnd>>>,
    ended: StopSignal,
    stats: Arc<CaptureStats>,
}

impl CaptureHandler {
    pub fn new(blocks: Sender<AudioBlock>, recorder: Option<Sender<AudioBlock>>) -> Self {
        Self {
            blocks,
            recorder,
            end: Arc::new(Mutex::new(None)),
            ended: StopSignal::new(),
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Hand a block to the producer and the recorder without blocking.
    pub fn deliver(&self, block: AudioBlock) {
        if self.ended.is_stopped() {
            return;
        }
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);

        if let Some(ref recorder) = self.recorder {
            match recorder.try_send(block.clone()) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    self.stats.recorder_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        match self.blocks.try_send(block) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// The source can no longer deliver. Terminal; later calls are ignored.
    pub fn invalidate(&self, reason: impl Into<String>) {
        self.finish(SourceEnd::Invalidated(reason.into()));
    }

    /// A finite source ran out of audio.
    pub fn end_of_stream(&self) {
        self.finish(SourceEnd::EndOfStream);
    }

    fn finish(&self, end: SourceEnd) {
        let mut slot = self.end.lock();
        if slot.is_none() {
            match end {
                SourceEnd::Invalidated(ref reason) => {
                    log::warn!("Audio source invalidated: {}", reason)
                }
                SourceEnd::EndOfStream => log::info!("Audio source reached end of stream"),
            }
            *slot = Some(end);
            self.ended.stop();
        }
    }

    pub fn end_reason(&self) -> Option<SourceEnd> {
        self.end.lock().clone()
    }

    /// Signal raised once the source has ended or been invalidated.
    pub fn ended(&self) -> &StopSignal {
        &self.ended
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn block(frames: usize) -> AudioBlock {
        AudioBlock::interleaved(vec![0.0; frames], 1, 48000)
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (tx, rx) = bounded(1);
        let handler = CaptureHandler::new(tx, None);
        handler.deliver(block(10));
        handler.deliver(block(20));
        assert_eq!(handler.stats().delivered(), 2);
        assert_eq!(handler.stats().dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().frame_count(), 10);
    }

    #[test]
    fn test_recorder_receives_copy() {
        let (tx, rx) = bounded(4);
        let (rec_tx, rec_rx) = bounded(4);
        let handler = CaptureHandler::new(tx, Some(rec_tx));
        handler.deliver(block(32));
        assert_eq!(rx.try_recv().unwrap().frame_count(), 32);
        assert_eq!(rec_rx.try_recv().unwrap().frame_count(), 32);
    }

    #[test]
    fn test_disconnected_consumer_is_ignored() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let handler = CaptureHandler::new(tx, None);
        handler.deliver(block(8));
        assert_eq!(handler.stats().dropped(), 0);
    }

    #[test]
    fn test_first_end_wins() {
        let (tx, rx) = bounded(4);
        let handler = CaptureHandler::new(tx, None);
        handler.invalidate("device unplugged");
        handler.end_of_stream();
        assert!(handler.ended().is_stopped());
        assert_eq!(
            handler.end_reason(),
            Some(SourceEnd::Invalidated("device unplugged".into()))
        );
        handler.deliver(block(8));
        assert!(rx.try_recv().is_err());
    }
}

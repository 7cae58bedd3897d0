use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::audio::{
    AudioBlock, AudioSource, CaptureError, CaptureHandler, FeatureExtractor, FeatureSnapshot,
    SourceEnd, StreamInfo,
};
use crate::config::{ConfigError, RenderConfig};
use crate::display::FrameSink;
use crate::encode::wav::WavRecorder;
use crate::exchange::FeatureExchange;
use crate::pacing::{period_for_fps, Pacer, RateMeter, StopSignal};
use crate::present::{AllocationError, FrameBuffer, PresentationBuffers};
use crate::render::text::FpsOverlay;
use crate::render::{FrameSynthesizer, SynthesisError, SynthesisInput};

/// Upper bound on how long a capture-driven producer waits for a block
/// before re-checking the stop signals. Never longer than one pacing period.
const PRODUCER_POLL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid render configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("frame buffer allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("audio capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("failed to spawn {0} thread: {1}")]
    Thread(&'static str, String),
}

/// When the producer runs its analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// Process each delivery as it arrives.
    CaptureDriven,
    /// Poll for the newest block at a fixed interval.
    Decoupled { interval: Duration },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub render: RenderConfig,
    pub max_transform_size: usize,
    pub producer: ProducerMode,
    /// Capacity of the capture to producer queue.
    pub block_queue: usize,
    /// Capacity of the capture to recorder queue.
    pub recorder_queue: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            max_transform_size: crate::audio::spectrum::MAX_TRANSFORM_SIZE,
            producer: ProducerMode::CaptureDriven,
            block_queue: 8,
            recorder_queue: 256,
        }
    }
}

/// The pluggable ends of a session.
pub struct SessionParts {
    pub source: Box<dyn AudioSource>,
    pub synthesizer: Box<dyn FrameSynthesizer>,
    pub sink: Box<dyn FrameSink>,
    pub recorder: Option<WavRecorder>,
    pub overlay: Option<FpsOverlay>,
}

#[derive(Debug, Default)]
struct Counters {
    blocks_processed: AtomicU64,
    blocks_collapsed: AtomicU64,
    spectra_skipped: AtomicU64,
    ticks: AtomicU64,
    frames_synthesized: AtomicU64,
    synthesis_failures: AtomicU64,
    frames_presented: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time view of a running session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub blocks_delivered: u64,
    pub blocks_dropped: u64,
    pub recorder_dropped: u64,
    pub blocks_processed: u64,
    pub blocks_collapsed: u64,
    pub spectra_skipped: u64,
    pub snapshots_published: u64,
    pub ticks: u64,
    pub frames_synthesized: u64,
    pub synthesis_failures: u64,
    pub frames_presented: u64,
    pub sink_failures: u64,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub stats: SessionStats,
    pub source_end: Option<SourceEnd>,
    pub recorded_frames: Option<u64>,
    pub elapsed: Duration,
}

/// A running capture, analysis, synthesis and display pipeline.
///
/// Three named threads run for the lifetime of the session: `producer`
/// turns audio blocks into published feature snapshots, `consumer`
/// synthesizes one frame per pacing period, and `display` hands every newly
/// exposed frame to the sink. Dropping the session stops it.
pub struct Session {
    stop: StopSignal,
    source: Box<dyn AudioSource>,
    recorder: Option<WavRecorder>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
    handler: CaptureHandler,
    exchange: Arc<FeatureExchange>,
    buffers: Arc<PresentationBuffers>,
    counters: Arc<Counters>,
    info: StreamInfo,
    options: SessionOptions,
    started: Instant,
    report: Option<SessionReport>,
}

impl Session {
    /// Validate, allocate, start the source, then spawn the loops.
    ///
    /// Nothing is left running when this returns an error.
    pub fn start(options: SessionOptions, parts: SessionParts) -> Result<Self, SessionError> {
        options.render.validate()?;
        let SessionParts {
            mut source,
            synthesizer,
            sink,
            mut recorder,
            overlay,
        } = parts;

        let (width, height) = (options.render.render_width(), options.render.render_height());
        let buffers = Arc::new(PresentationBuffers::allocate(width, height)?);
        let shown = FrameBuffer::allocate(width, height)?;

        let (block_tx, block_rx) = bounded(options.block_queue.max(1));
        let recorder_tx = match recorder.as_mut() {
            Some(wav) => {
                let (tx, rx) = bounded(options.recorder_queue.max(1));
                match wav.spawn(rx) {
                    Ok(()) => Some(tx),
                    Err(e) => {
                        log::error!("Recording disabled: {:#}", e);
                        recorder = None;
                        None
                    }
                }
            }
            None => None,
        };
        let handler = CaptureHandler::new(block_tx, recorder_tx);

        log::info!("Starting audio source: {}", source.describe());
        let info = source.start(handler.clone())?;
        log::info!(
            "Audio stream: {}Hz, {} channel(s)",
            info.sample_rate,
            info.channels
        );

        let mut session = Self {
            stop: StopSignal::new(),
            source,
            recorder,
            threads: Vec::with_capacity(3),
            handler,
            exchange: Arc::new(FeatureExchange::new()),
            buffers,
            counters: Arc::new(Counters::default()),
            info,
            options,
            started: Instant::now(),
            report: None,
        };

        let producer = Producer {
            blocks: block_rx,
            exchange: session.exchange.clone(),
            stop: session.stop.clone(),
            source_ended: session.handler.ended().clone(),
            mode: session.options.producer,
            poll: producer_poll(session.options.render.target_fps),
            extractor: FeatureExtractor::new(session.options.max_transform_size),
            counters: session.counters.clone(),
        };
        session.spawn("producer", move || producer.run())?;

        let consumer = Consumer {
            exchange: session.exchange.clone(),
            buffers: session.buffers.clone(),
            synthesizer,
            overlay,
            stop: session.stop.clone(),
            render: session.options.render,
            started: session.started,
            counters: session.counters.clone(),
        };
        session.spawn("consumer", move || consumer.run())?;

        let display = Display {
            buffers: session.buffers.clone(),
            shown,
            sink,
            stop: session.stop.clone(),
            timeout: period_for_fps(session.options.render.target_fps),
            counters: session.counters.clone(),
        };
        session.spawn("display", move || display.run())?;

        log::info!(
            "Session running: {}x{} (x{} oversampling), {} fps, {}-bit",
            session.options.render.output_width,
            session.options.render.output_height,
            session.options.render.oversampling,
            session.options.render.target_fps,
            session.options.render.bit_depth
        );
        Ok(session)
    }

    /// On failure the session is stopped before the error is returned.
    fn spawn<F>(&mut self, name: &'static str, body: F) -> Result<(), SessionError>
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(body) {
            Ok(handle) => {
                self.threads.push((name, handle));
                Ok(())
            }
            Err(e) => {
                self.stop();
                Err(SessionError::Thread(name, e.to_string()))
            }
        }
    }

    pub fn stream_info(&self) -> StreamInfo {
        self.info
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Newest published snapshot.
    pub fn latest(&self) -> Arc<FeatureSnapshot> {
        self.exchange.latest()
    }

    pub fn buffers(&self) -> &Arc<PresentationBuffers> {
        &self.buffers
    }

    pub fn source_end(&self) -> Option<SourceEnd> {
        self.handler.end_reason()
    }

    /// Block until the source ends or `timeout` passes. Returns `true` if it
    /// ended.
    pub fn wait_for_source_end(&self, timeout: Duration) -> bool {
        self.handler.ended().wait_timeout(timeout)
    }

    pub fn is_stopped(&self) -> bool {
        self.report.is_some()
    }

    pub fn stats(&self) -> SessionStats {
        let capture = self.handler.stats();
        let c = &self.counters;
        SessionStats {
            blocks_delivered: capture.delivered(),
            blocks_dropped: capture.dropped(),
            recorder_dropped: capture.recorder_dropped(),
            blocks_processed: c.blocks_processed.load(Ordering::Relaxed),
            blocks_collapsed: c.blocks_collapsed.load(Ordering::Relaxed),
            spectra_skipped: c.spectra_skipped.load(Ordering::Relaxed),
            snapshots_published: self.exchange.publish_count(),
            ticks: c.ticks.load(Ordering::Relaxed),
            frames_synthesized: c.frames_synthesized.load(Ordering::Relaxed),
            synthesis_failures: c.synthesis_failures.load(Ordering::Relaxed),
            frames_presented: c.frames_presented.load(Ordering::Relaxed),
            sink_failures: c.sink_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop every loop and the source, join them all, then finalize the
    /// recorder. Idempotent; later calls return the first report.
    pub fn stop(&mut self) -> SessionReport {
        if let Some(ref report) = self.report {
            return report.clone();
        }

        log::info!("Stopping session");
        self.stop.stop();
        self.source.stop();
        for (name, handle) in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("{} thread panicked", name);
            }
        }
        let recorded_frames = self.recorder.as_mut().map(WavRecorder::finish);

        let report = SessionReport {
            stats: self.stats(),
            source_end: self.source_end(),
            recorded_frames,
            elapsed: self.started.elapsed(),
        };
        log::info!(
            "Session stopped after {:.1}s: {} blocks, {} frames synthesized, {} presented",
            report.elapsed.as_secs_f32(),
            report.stats.blocks_processed,
            report.stats.frames_synthesized,
            report.stats.frames_presented
        );
        self.report = Some(report.clone());
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn producer_poll(target_fps: u32) -> Duration {
    PRODUCER_POLL.min(period_for_fps(target_fps))
}

struct Producer {
    blocks: Receiver<AudioBlock>,
    exchange: Arc<FeatureExchange>,
    stop: StopSignal,
    source_ended: StopSignal,
    mode: ProducerMode,
    poll: Duration,
    extractor: FeatureExtractor,
    counters: Arc<Counters>,
}

impl Producer {
    fn run(mut self) {
        log::info!("Producer started ({:?})", self.mode);
        let mut spare: Option<FeatureSnapshot> = None;
        let mut meter = RateMeter::new();

        loop {
            let next = match self.mode {
                ProducerMode::CaptureDriven => match self.blocks.recv_timeout(self.poll) {
                    Ok(block) => Some(block),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                ProducerMode::Decoupled { interval } => {
                    if self.stop.wait_timeout(interval) {
                        break;
                    }
                    None
                }
            };
            if self.stop.is_stopped() {
                break;
            }

            // Read before draining so blocks delivered ahead of the end are kept
            let ended = self.source_ended.is_stopped();
            let Some(block) = self.newest(next) else {
                if ended {
                    log::info!("Audio source ended, producer exiting");
                    break;
                }
                continue;
            };

            let mut snapshot = spare.take().unwrap_or_default();
            self.extractor.extract_into(&block, &mut snapshot);
            if !snapshot.has_spectrum() {
                self.counters.spectra_skipped.fetch_add(1, Ordering::Relaxed);
            }
            spare = self.exchange.publish(snapshot);
            self.counters.blocks_processed.fetch_add(1, Ordering::Relaxed);

            if let Some(rate) = meter.tick() {
                log::debug!("audio blocks/s: {:.1}", rate);
            }
        }
        log::info!("Producer stopped");
    }

    /// Collapse any backlog down to the most recent block.
    fn newest(&self, first: Option<AudioBlock>) -> Option<AudioBlock> {
        let mut newest = first;
        for block in self.blocks.try_iter() {
            if newest.replace(block).is_some() {
                self.counters.blocks_collapsed.fetch_add(1, Ordering::Relaxed);
            }
        }
        newest
    }
}

struct Consumer {
    exchange: Arc<FeatureExchange>,
    buffers: Arc<PresentationBuffers>,
    synthesizer: Box<dyn FrameSynthesizer>,
    overlay: Option<FpsOverlay>,
    stop: StopSignal,
    render: RenderConfig,
    started: Instant,
    counters: Arc<Counters>,
}

impl Consumer {
    fn run(mut self) {
        log::info!("Consumer started: {} synthesizer", self.synthesizer.name());
        let mut pacer = Pacer::from_fps(self.render.target_fps);
        let mut meter = RateMeter::new();
        let mut failures: u64 = 0;
        let width = self.buffers.width();
        let height = self.buffers.height();

        while pacer.wait(&self.stop) {
            self.counters.ticks.fetch_add(1, Ordering::Relaxed);
            let snapshot = self.exchange.latest();
            if snapshot.sequence == 0 {
                // No audio yet
                continue;
            }

            let input = SynthesisInput {
                waveform: &snapshot.waveform,
                spectrum: &snapshot.spectrum,
                sample_rate: snapshot.sample_rate,
                width,
                height,
                bit_depth: self.render.bit_depth,
                timestamp: self.started.elapsed(),
            };
            let bit_depth = self.render.bit_depth;
            let synthesizer = &mut self.synthesizer;
            let overlay = &self.overlay;
            let result = self.buffers.render_back(|target| {
                synthesizer.synthesize(&input, target)?;
                if let Some(overlay) = overlay {
                    overlay.draw(target, width, height, bit_depth);
                }
                Ok::<(), SynthesisError>(())
            });

            match result {
                Ok(_generation) => {
                    if failures > 0 {
                        log::info!("Frame synthesis recovered after {} failed ticks", failures);
                        failures = 0;
                    }
                    self.counters.frames_synthesized.fetch_add(1, Ordering::Relaxed);
                    if let Some(rate) = meter.tick() {
                        log::debug!("render fps: {:.1}", rate);
                        if let Some(ref mut overlay) = self.overlay {
                            overlay.update(rate);
                        }
                    }
                }
                Err(e) => {
                    self.counters.synthesis_failures.fetch_add(1, Ordering::Relaxed);
                    failures += 1;
                    if failures == 1 {
                        log::warn!("Frame synthesis failed, keeping previous frame: {}", e);
                    } else {
                        log::debug!("Frame synthesis failed ({} in a row): {}", failures, e);
                    }
                }
            }
        }
        log::info!("Consumer stopped");
    }
}

struct Display {
    buffers: Arc<PresentationBuffers>,
    /// Display-owned copy of the last frame handed to the sink.
    shown: FrameBuffer,
    sink: Box<dyn FrameSink>,
    stop: StopSignal,
    timeout: Duration,
    counters: Arc<Counters>,
}

impl Display {
    fn run(mut self) {
        log::info!("Display started: {} sink", self.sink.name());
        let mut failures: u64 = 0;

        while !self.stop.is_stopped() {
            if self.buffers.wait_ready(self.timeout).is_none() {
                continue;
            }

            if !self.buffers.copy_front(&mut self.shown) {
                continue;
            }
            let result = self.sink.present(&self.shown);

            match result {
                Ok(()) => {
                    failures = 0;
                    self.counters.frames_presented.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                    failures += 1;
                    if failures == 1 {
                        log::warn!("Frame sink failed: {:#}", e);
                    } else {
                        log::debug!("Frame sink failed ({} in a row): {:#}", failures, e);
                    }
                }
            }
        }

        if let Err(e) = self.sink.finish() {
            log::error!("Failed to finish {} sink: {:#}", self.sink.name(), e);
        }
        log::info!("Display stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_poll_fits_in_one_period() {
        assert_eq!(producer_poll(30), PRODUCER_POLL);
        assert_eq!(producer_poll(50), PRODUCER_POLL);
        for fps in [60, 120, 240, 1000] {
            assert!(producer_poll(fps) <= period_for_fps(fps));
        }
    }
}

use anyhow::Result;

use crate::present::FrameBuffer;

/// Receives every frame the display loop picks up.
///
/// `frame` is borrowed from the presentation buffers for the duration of
/// the call only; copy what must outlive it.
pub trait FrameSink: Send {
    fn name(&self) -> &'static str;

    fn present(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// Flush and release whatever the sink holds. Called once, after the
    /// display loop has exited.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards frames, remembering only how many it saw.
#[derive(Debug, Default)]
pub struct NullSink {
    presented: u64,
    last_generation: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn last_generation(&self) -> u64 {
        self.last_generation
    }
}

impl FrameSink for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    fn present(&mut self, frame: &FrameBuffer) -> Result<()> {
        self.presented += 1;
        self.last_generation = frame.generation();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::debug!("Null sink saw {} frames", self.presented);
        Ok(())
    }
}

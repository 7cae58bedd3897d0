/// How the samples of a multi-channel block are arranged in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    /// `[l0, r0, l1, r1, ...]`
    Interleaved,
    /// `[l0, l1, ..., r0, r1, ...]`
    Planar,
}

/// Samples from a single capture delivery.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    samples: Vec<f32>,
    channels: usize,
    frames: usize,
    sample_rate: u32,
    layout: SampleLayout,
}

impl AudioBlock {
    /// Build a block from interleaved samples. A trailing partial frame is ignored.
    pub fn interleaved(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let channels = channels as usize;
        let frames = if channels == 0 { 0 } else { samples.len() / channels };
        Self {
            samples,
            channels,
            frames,
            sample_rate,
            layout: SampleLayout::Interleaved,
        }
    }

    /// Build a block from one vector per channel. The shortest channel sets the frame count.
    pub fn planar(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels.len());
        for channel in &channels {
            samples.extend_from_slice(&channel[..frames]);
        }
        Self {
            samples,
            channels: channels.len(),
            frames,
            sample_rate,
            layout: SampleLayout::Planar,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Sample at `frame` of `channel`, regardless of layout.
    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        match self.layout {
            SampleLayout::Interleaved => self.samples[frame * self.channels + channel],
            SampleLayout::Planar => self.samples[channel * self.frames + frame],
        }
    }

    /// Mono value of one frame: the average of the first two channels.
    #[inline]
    pub fn mono_sample(&self, frame: usize) -> f32 {
        if self.channels >= 2 {
            (self.sample(0, frame) + self.sample(1, frame)) * 0.5
        } else {
            self.sample(0, frame)
        }
    }

    /// Iterate the mono downmix frame by frame.
    pub fn mono(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.frames).map(move |frame| self.mono_sample(frame))
    }

    /// Copy the block into `out` as interleaved samples.
    pub fn write_interleaved(&self, out: &mut Vec<f32>) {
        out.clear();
        match self.layout {
            SampleLayout::Interleaved => {
                out.extend_from_slice(&self.samples[..self.frames * self.channels])
            }
            SampleLayout::Planar => {
                out.reserve(self.frames * self.channels);
                for frame in 0..self.frames {
                    for channel in 0..self.channels {
                        out.push(self.sample(channel, frame));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_drops_partial_frame() {
        let block = AudioBlock::interleaved(vec![0.1, 0.2, 0.3, 0.4, 0.5], 2, 48000);
        assert_eq!(block.frame_count(), 2);
        assert_eq!(block.sample(1, 1), 0.4);
    }

    #[test]
    fn test_planar_matches_interleaved_downmix() {
        let planar = AudioBlock::planar(vec![vec![1.0, 0.0], vec![0.0, -1.0]], 44100);
        let interleaved = AudioBlock::interleaved(vec![1.0, 0.0, 0.0, -1.0], 2, 44100);
        let a: Vec<f32> = planar.mono().collect();
        let b: Vec<f32> = interleaved.mono().collect();
        assert_eq!(a, vec![0.5, -0.5]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_mono_ignores_extra_channels() {
        let block = AudioBlock::interleaved(vec![0.2, 0.4, 1.0, 0.0], 4, 48000);
        let mono: Vec<f32> = block.mono().collect();
        assert!((mono[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_zero_channels_is_empty() {
        let block = AudioBlock::interleaved(vec![0.5; 8], 0, 48000);
        assert!(block.is_empty());
        assert_eq!(block.mono().count(), 0);
    }

    #[test]
    fn test_write_interleaved_from_planar() {
        let block = AudioBlock::planar(vec![vec![1.0, 2.0], vec![3.0, 4.0]], 48000);
        let mut out = Vec::new();
        block.write_interleaved(&mut out);
        assert_eq!(out, vec![1.0, 3.0, 2.0, 4.0]);
    }
}

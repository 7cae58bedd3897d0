use super::block::AudioBlock;
use super::quantize::quantize_into;
use super::spectrum::SpectrumAnalyzer;

/// Waveform and spectrum derived from one audio block.
///
/// Both vectors always come from the same block. An empty spectrum means the
/// block was too short for any supported transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSnapshot {
    pub waveform: Vec<u8>,
    pub spectrum: Vec<u8>,
    pub sample_rate: u32,
    /// Publish counter; 0 for the initial empty snapshot.
    pub sequence: u64,
}

impl FeatureSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_waveform(&self) -> bool {
        !self.waveform.is_empty()
    }

    pub fn has_spectrum(&self) -> bool {
        !self.spectrum.is_empty()
    }
}

/// Runs quantization and spectrum analysis over blocks, reusing buffers.
pub struct FeatureExtractor {
    analyzer: SpectrumAnalyzer,
    mono: Vec<f32>,
    sequence: u64,
    skipped: u64,
}

impl FeatureExtractor {
    pub fn new(max_transform_size: usize) -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(max_transform_size),
            mono: Vec::new(),
            sequence: 0,
            skipped: 0,
        }
    }

    /// Fill `snapshot` from `block`, reusing whatever capacity it already has.
    pub fn extract_into(&mut self, block: &AudioBlock, snapshot: &mut FeatureSnapshot) {
        self.sequence += 1;
        quantize_into(block, &mut snapshot.waveform);

        self.mono.clear();
        self.mono.extend(block.mono());
        if self.analyzer.analyze(&self.mono, &mut snapshot.spectrum).is_none() {
            self.skipped += 1;
            log::debug!(
                "Block of {} frames too short for analysis, spectrum skipped",
                block.frame_count()
            );
        }

        snapshot.sample_rate = block.sample_rate();
        snapshot.sequence = self.sequence;
    }

    pub fn extract(&mut self, block: &AudioBlock) -> FeatureSnapshot {
        let mut snapshot = FeatureSnapshot::empty();
        self.extract_into(block, &mut snapshot);
        snapshot
    }

    /// Number of blocks whose spectrum was skipped.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectrum::MAX_TRANSFORM_SIZE;

    #[test]
    fn test_short_block_keeps_waveform() {
        let mut extractor = FeatureExtractor::new(MAX_TRANSFORM_SIZE);
        let block = AudioBlock::interleaved(vec![0.0; 200], 2, 48000);
        let snapshot = extractor.extract(&block);
        assert_eq!(snapshot.waveform.len(), 100);
        assert!(!snapshot.has_spectrum());
        assert_eq!(extractor.skipped(), 1);
    }

    #[test]
    fn test_sequence_increments() {
        let mut extractor = FeatureExtractor::new(MAX_TRANSFORM_SIZE);
        let block = AudioBlock::interleaved(vec![0.0; 512], 1, 44100);
        assert_eq!(extractor.extract(&block).sequence, 1);
        let snapshot = extractor.extract(&block);
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.sample_rate, 44100);
        assert_eq!(snapshot.spectrum.len(), 256);
    }

    #[test]
    fn test_extract_into_replaces_previous_contents() {
        let mut extractor = FeatureExtractor::new(MAX_TRANSFORM_SIZE);
        let mut snapshot = extractor.extract(&AudioBlock::interleaved(vec![0.0; 1024], 1, 48000));
        extractor.extract_into(&AudioBlock::interleaved(vec![0.0; 64], 1, 22050), &mut snapshot);
        assert_eq!(snapshot.waveform.len(), 64);
        assert!(snapshot.spectrum.is_empty());
        assert_eq!(snapshot.sample_rate, 22050);
    }
}

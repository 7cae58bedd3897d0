use super::block::AudioBlock;

const SCALE: f32 = 127.5;
const OFFSET: f32 = 128.0;

/// Map a sample in [-1, 1] onto a byte centered at 128.
///
/// Values outside the nominal range saturate; NaN maps to 0.
#[inline]
pub fn quantize_sample(value: f32) -> u8 {
    (value * SCALE + OFFSET).round().clamp(0.0, 255.0) as u8
}

/// Quantize the mono downmix of `block` into `out`, reusing its allocation.
pub fn quantize_into(block: &AudioBlock, out: &mut Vec<u8>) {
    out.clear();
    out.extend(block.mono().map(quantize_sample));
}

pub fn quantize(block: &AudioBlock) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.frame_count());
    quantize_into(block, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_points() {
        assert_eq!(quantize_sample(-1.0), 1);
        assert_eq!(quantize_sample(0.0), 128);
        assert_eq!(quantize_sample(1.0), 255);
    }

    #[test]
    fn test_out_of_range_saturates() {
        assert_eq!(quantize_sample(-4.0), 0);
        assert_eq!(quantize_sample(3.0), 255);
        assert_eq!(quantize_sample(f32::INFINITY), 255);
        assert_eq!(quantize_sample(f32::NEG_INFINITY), 0);
        assert_eq!(quantize_sample(f32::NAN), 0);
    }

    #[test]
    fn test_empty_block() {
        let block = AudioBlock::interleaved(Vec::new(), 2, 48000);
        assert!(quantize(&block).is_empty());
    }

    #[test]
    fn test_stereo_downmix() {
        let block = AudioBlock::interleaved(vec![1.0, -1.0, 1.0, 1.0], 2, 48000);
        assert_eq!(quantize(&block), vec![128, 255]);
    }

    #[test]
    fn test_quantize_into_reuses_buffer() {
        let mut out = vec![7u8; 64];
        let block = AudioBlock::interleaved(vec![0.0; 10], 1, 48000);
        quantize_into(&block, &mut out);
        assert_eq!(out, vec![128u8; 10]);
        assert!(out.capacity() >= 64);
    }

    proptest! {
        #[test]
        fn prop_matches_formula(s in -1.0f32..=1.0) {
            let expected = (s * 127.5 + 128.0).round().clamp(0.0, 255.0) as u8;
            prop_assert_eq!(quantize_sample(s), expected);
        }

        #[test]
        fn prop_monotonic(a in -2.0f32..2.0, b in -2.0f32..2.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(quantize_sample(lo) <= quantize_sample(hi));
        }

        #[test]
        fn prop_length_matches_frames(frames in 0usize..512, channels in 1u16..4) {
            let block = AudioBlock::interleaved(vec![0.25; frames * channels as usize], channels, 44100);
            prop_assert_eq!(quantize(&block).len(), frames);
        }
    }
}

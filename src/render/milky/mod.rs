//! Software feedback renderer.
//!
//! Every frame starts from a blurred, faded copy of the previous one, so the
//! waveform leaves trails that the palette, rotation and zoom keep reshaping.

mod blur;
mod chaser;
mod draw;
mod energy;
mod palette;
mod transform;
mod waveform;

use rand::rngs::StdRng;
use rand::SeedableRng;

use self::blur::{blur_frame, preserve_mass_fade};
use self::chaser::Chasers;
use self::draw::Canvas;
use self::energy::EnergyDetector;
use self::palette::Palette;
use self::transform::{scale, Rotation};
use self::waveform::{EmphasizedWaveform, MIN_WAVEFORM};
use super::bitdepth::reduce_bit_depth;
use super::{validate, FrameSynthesizer, SynthesisError, SynthesisInput};

const SPEED: f32 = 0.03;
const ZOOM: f32 = 1.35;
const CHASER_COUNT: usize = 2;
const CHASER_SEED: u32 = 42;
const CHASER_THICKNESS: i64 = 2;

/// (alpha factor, vertical offset) of each waveform pass
const WAVEFORM_PASSES: [(f32, f32); 4] = [(0.85, 2.0), (0.95, 1.0), (5.0, 0.0), (0.95, -1.0)];

pub struct MilkySynthesizer {
    previous: Vec<u8>,
    scratch: Vec<u8>,
    width: usize,
    height: usize,
    initialized: bool,
    speed_scalar: f32,
    waveform: EmphasizedWaveform,
    palette: Palette,
    energy: EnergyDetector,
    rotation: Rotation,
    chasers: Chasers,
    rng: StdRng,
}

impl MilkySynthesizer {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic output for a given input sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            previous: Vec::new(),
            scratch: Vec::new(),
            width: 0,
            height: 0,
            initialized: false,
            speed_scalar: 0.01,
            waveform: EmphasizedWaveform::new(),
            palette: Palette::new(),
            energy: EnergyDetector::new(),
            rotation: Rotation::new(),
            chasers: Chasers::new(CHASER_COUNT, CHASER_SEED),
            rng,
        }
    }

    fn ensure_size(&mut self, width: usize, height: usize) {
        if width == self.width && height == self.height {
            return;
        }
        let len = width * height * 4;
        self.previous = vec![0; len];
        self.scratch = vec![0; len];
        self.width = width;
        self.height = height;
        self.initialized = false;
        self.chasers.reset();
    }
}

impl Default for MilkySynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynthesizer for MilkySynthesizer {
    fn name(&self) -> &'static str {
        "milky"
    }

    fn synthesize(
        &mut self,
        input: &SynthesisInput<'_>,
        target: &mut [u8],
    ) -> Result<(), SynthesisError> {
        validate(input, target)?;
        if input.waveform.len() < MIN_WAVEFORM {
            return Err(SynthesisError::WaveformTooShort {
                len: input.waveform.len(),
                min: MIN_WAVEFORM,
            });
        }

        let (width, height) = (input.width as usize, input.height as usize);
        self.ensure_size(width, height);
        self.waveform.update(input.waveform);

        if self.initialized {
            self.speed_scalar += SPEED;
            blur_frame(&mut self.previous, width);
            preserve_mass_fade(&mut self.previous);
            target.copy_from_slice(&self.previous);
        } else {
            target.fill(0);
            self.initialized = true;
        }

        // the spike flag is from the previous frame
        self.palette
            .refresh(input.timestamp, self.energy.spike(), &mut self.rng);
        self.palette.apply(target);

        let mut canvas = Canvas::new(target, width, height);
        for (alpha, y_offset) in WAVEFORM_PASSES {
            self.waveform.render(&mut canvas, alpha, y_offset, 1.0);
        }

        self.energy
            .detect(input.waveform, input.spectrum, input.sample_rate);
        self.chasers
            .render(&mut canvas, self.speed_scalar, SPEED * 20.0, CHASER_THICKNESS);

        self.rotation
            .apply(&mut self.rng, target, &mut self.scratch, width, height);
        scale(target, &mut self.scratch, ZOOM, width, height);

        reduce_bit_depth(target, input.bit_depth);
        self.previous.copy_from_slice(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn input<'a>(waveform: &'a [u8], spectrum: &'a [u8], bit_depth: u8, ms: u64) -> SynthesisInput<'a> {
        SynthesisInput {
            waveform,
            spectrum,
            sample_rate: 48000,
            width: 48,
            height: 32,
            bit_depth,
            timestamp: Duration::from_millis(ms),
        }
    }

    fn wave() -> Vec<u8> {
        (0..512)
            .map(|n| (128.0 + 100.0 * (n as f32 * 0.05).sin()) as u8)
            .collect()
    }

    #[test]
    fn test_renders_opaque_frames() {
        let waveform = wave();
        let spectrum = vec![140u8; 256];
        let mut synth = MilkySynthesizer::with_seed(1);
        let mut target = vec![0u8; 48 * 32 * 4];
        for frame in 0..5 {
            synth
                .synthesize(&input(&waveform, &spectrum, 24, frame * 33), &mut target)
                .unwrap();
        }
        assert!(target.chunks(4).all(|p| p[3] == 255));
        assert!(target.chunks(4).any(|p| p[0] > 0));
    }

    #[test]
    fn test_same_seed_same_frames() {
        let waveform = wave();
        let spectrum = vec![128u8; 256];
        let mut a = MilkySynthesizer::with_seed(9);
        let mut b = MilkySynthesizer::with_seed(9);
        let mut fa = vec![0u8; 48 * 32 * 4];
        let mut fb = vec![0u8; 48 * 32 * 4];
        for frame in 0..3 {
            a.synthesize(&input(&waveform, &spectrum, 32, frame * 33), &mut fa).unwrap();
            b.synthesize(&input(&waveform, &spectrum, 32, frame * 33), &mut fb).unwrap();
        }
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_failure_leaves_target_untouched() {
        let mut synth = MilkySynthesizer::with_seed(2);
        let mut target = vec![77u8; 48 * 32 * 4];
        let waveform = wave();
        assert_eq!(
            synth.synthesize(&input(&waveform, &[], 32, 0), &mut target),
            Err(SynthesisError::MissingSpectrum)
        );
        assert_eq!(
            synth.synthesize(&input(&[128, 128], &[128; 64], 32, 0), &mut target),
            Err(SynthesisError::WaveformTooShort { len: 2, min: 3 })
        );
        assert!(target.iter().all(|&b| b == 77));
    }

    #[test]
    fn test_resize_restarts_feedback() {
        let waveform = wave();
        let spectrum = vec![128u8; 256];
        let mut synth = MilkySynthesizer::with_seed(4);
        let mut small = vec![0u8; 48 * 32 * 4];
        synth.synthesize(&input(&waveform, &spectrum, 32, 0), &mut small).unwrap();

        let mut large_input = input(&waveform, &spectrum, 32, 33);
        large_input.width = 64;
        large_input.height = 40;
        let mut large = vec![0u8; 64 * 40 * 4];
        synth.synthesize(&large_input, &mut large).unwrap();
        assert_eq!(synth.previous.len(), large.len());
    }
}

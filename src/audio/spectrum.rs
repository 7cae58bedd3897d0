use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::{Arc, OnceLock};

use super::quantize::quantize_sample;

/// Transform sizes the analyzer can run, smallest first.
pub const TRANSFORM_SIZES: [usize; 5] = [128, 256, 512, 1024, 2048];

pub const MAX_TRANSFORM_SIZE: usize = 2048;

/// A real-input transform of `size` points, computed as a complex FFT of
/// `size / 2` points followed by an unpacking pass.
pub struct TransformPlan {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    /// `exp(-2πik / size)` for `k` in `0..size / 2`.
    twiddles: Vec<Complex<f32>>,
}

impl TransformPlan {
    fn new(planner: &mut FftPlanner<f32>, size: usize) -> Self {
        let half = size / 2;
        let twiddles = (0..half)
            .map(|k| {
                let angle = -2.0 * PI * k as f32 / size as f32;
                Complex::new(angle.cos(), angle.sin())
            })
            .collect();
        Self {
            size,
            fft: planner.plan_fft_forward(half),
            twiddles,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bins(&self) -> usize {
        self.size / 2
    }
}

/// Immutable set of transform plans, built once per process.
pub struct TransformPlans {
    plans: Vec<TransformPlan>,
}

static SHARED_PLANS: OnceLock<TransformPlans> = OnceLock::new();

impl TransformPlans {
    pub fn new(sizes: &[usize]) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let mut sizes = sizes.to_vec();
        sizes.sort_unstable();
        sizes.dedup();
        let plans = sizes
            .into_iter()
            .filter(|size| size.is_power_of_two() && *size >= 4)
            .map(|size| TransformPlan::new(&mut planner, size))
            .collect();
        Self { plans }
    }

    /// The process-wide plans for [`TRANSFORM_SIZES`].
    pub fn shared() -> &'static TransformPlans {
        SHARED_PLANS.get_or_init(|| {
            log::debug!("Building transform plans for sizes {:?}", TRANSFORM_SIZES);
            TransformPlans::new(&TRANSFORM_SIZES)
        })
    }

    pub fn sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.plans.iter().map(|p| p.size)
    }

    /// Index of the largest plan whose size fits both `frames` and `limit`.
    pub fn select(&self, frames: usize, limit: usize) -> Option<usize> {
        let bound = frames.min(limit);
        self.plans.iter().rposition(|p| p.size <= bound)
    }

    pub fn plan(&self, index: usize) -> &TransformPlan {
        &self.plans[index]
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[derive(Default)]
struct Workspace {
    packed: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

/// Magnitude spectrum of audio blocks, quantized to bytes.
///
/// Owns its working memory; the plans themselves are shared.
pub struct SpectrumAnalyzer {
    plans: &'static TransformPlans,
    max_size: usize,
    workspaces: Vec<Workspace>,
}

impl SpectrumAnalyzer {
    pub fn new(max_size: usize) -> Self {
        Self::with_plans(TransformPlans::shared(), max_size)
    }

    pub fn with_plans(plans: &'static TransformPlans, max_size: usize) -> Self {
        let workspaces = (0..plans.len()).map(|_| Workspace::default()).collect();
        Self {
            plans,
            max_size,
            workspaces,
        }
    }

    /// Analyze the leading samples of `mono` into `out`.
    ///
    /// Returns the transform size used, or `None` when `mono` is shorter than
    /// every supported size. `out` is left empty in that case.
    pub fn analyze(&mut self, mono: &[f32], out: &mut Vec<u8>) -> Option<usize> {
        out.clear();
        let index = self.plans.select(mono.len(), self.max_size)?;
        let plan = self.plans.plan(index);
        let workspace = &mut self.workspaces[index];

        let half = plan.bins();
        workspace.packed.clear();
        workspace.packed.extend(
            mono[..plan.size]
                .chunks_exact(2)
                .map(|pair| Complex::new(pair[0], pair[1])),
        );
        let scratch_len = plan.fft.get_inplace_scratch_len();
        if workspace.scratch.len() < scratch_len {
            workspace.scratch.resize(scratch_len, Complex::default());
        }
        plan.fft
            .process_with_scratch(&mut workspace.packed, &mut workspace.scratch[..scratch_len]);

        let norm = 2.0 / plan.size as f32;
        let packed = &workspace.packed;
        out.reserve(half);
        for k in 0..half {
            let z = packed[k];
            let mirror = packed[(half - k) % half].conj();
            let even = (z + mirror) * 0.5;
            let odd = (z - mirror) * Complex::new(0.0, -0.5);
            let bin = even + plan.twiddles[k] * odd;
            out.push(quantize_sample(bin.norm() * norm));
        }
        Some(plan.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, bin: usize, size: usize, amplitude: f32) -> Vec<f32> {
        (0..frames)
            .map(|n| amplitude * (2.0 * PI * bin as f32 * n as f32 / size as f32).sin())
            .collect()
    }

    #[test]
    fn test_select_largest_fitting_size() {
        let plans = TransformPlans::shared();
        let pick = |frames| plans.select(frames, MAX_TRANSFORM_SIZE).map(|i| plans.plan(i).size());
        assert_eq!(pick(100), None);
        assert_eq!(pick(128), Some(128));
        assert_eq!(pick(1000), Some(512));
        assert_eq!(pick(4096), Some(2048));
        assert_eq!(plans.select(4096, 300).map(|i| plans.plan(i).size()), Some(256));
    }

    #[test]
    fn test_short_block_skips_spectrum() {
        let mut analyzer = SpectrumAnalyzer::new(MAX_TRANSFORM_SIZE);
        let mut out = vec![1, 2, 3];
        assert_eq!(analyzer.analyze(&[0.0; 100], &mut out), None);
        assert!(out.is_empty());
    }

    #[test]
    fn test_output_length_is_half_size() {
        let mut analyzer = SpectrumAnalyzer::new(MAX_TRANSFORM_SIZE);
        let mut out = Vec::new();
        for (frames, size) in [(128, 128), (700, 512), (3000, 2048)] {
            assert_eq!(analyzer.analyze(&vec![0.1; frames], &mut out), Some(size));
            assert_eq!(out.len(), size / 2);
        }
    }

    #[test]
    fn test_silence_sits_at_midpoint() {
        let mut analyzer = SpectrumAnalyzer::new(MAX_TRANSFORM_SIZE);
        let mut out = Vec::new();
        analyzer.analyze(&[0.0; 256], &mut out);
        assert!(out.iter().all(|&b| b == 128));
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let mut analyzer = SpectrumAnalyzer::new(MAX_TRANSFORM_SIZE);
        let mut out = Vec::new();
        let signal = sine(256, 8, 256, 0.5);
        assert_eq!(analyzer.analyze(&signal, &mut out), Some(256));
        // |X[8]| * 2 / N == amplitude
        let expected = quantize_sample(0.5) as i32;
        assert!((out[8] as i32 - expected).abs() <= 1, "bin 8 = {}", out[8]);
        for (k, &b) in out.iter().enumerate() {
            if k != 8 {
                assert!((b as i32 - 128).abs() <= 1, "bin {} = {}", k, b);
            }
        }
    }

    #[test]
    fn test_dc_component() {
        let mut analyzer = SpectrumAnalyzer::new(MAX_TRANSFORM_SIZE);
        let mut out = Vec::new();
        analyzer.analyze(&[0.25; 128], &mut out);
        // DC bin carries 2 * mean under the 2/N normalization
        assert_eq!(out[0], quantize_sample(0.5));
        assert!(out[1..].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_max_size_limits_selection() {
        let mut analyzer = SpectrumAnalyzer::new(512);
        let mut out = Vec::new();
        assert_eq!(analyzer.analyze(&vec![0.0; 4096], &mut out), Some(512));
        assert_eq!(out.len(), 256);
    }
}

use std::f32::consts::PI;

const CUTOFF_HZ: f32 = 500.0;
const FILTER_Q: f32 = 1.0;
const NOISE_GATE: f32 = 1.0;
const COOLDOWN_FRAMES: u32 = 10;

const ENERGY_ALPHA: f32 = 0.85;
const FLUX_ALPHA: f32 = 0.85;
const ENERGY_THRESHOLD: f32 = 1.3;
const FLUX_THRESHOLD: f32 = 1.4;
const MIN_VOLUME: f32 = 0.15;

/// Second-order low-pass section.
#[derive(Debug, Clone, Default)]
pub struct BiquadFilter {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
    z1: f32,
    z2: f32,
}

impl BiquadFilter {
    pub fn low_pass(cutoff: f32, sample_rate: f32, q: f32) -> Self {
        let omega = 2.0 * PI * cutoff / sample_rate;
        let alpha = omega.sin() / (2.0 * q);
        let cos_omega = omega.cos();
        let norm = 1.0 / (1.0 + alpha);
        let a0 = (1.0 - cos_omega) / 2.0;
        Self {
            a0: a0 * norm,
            a1: (1.0 - cos_omega) * norm,
            a2: a0 * norm,
            b1: -2.0 * cos_omega * norm,
            b2: (1.0 - alpha) * norm,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Transposed direct form II.
    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.a0 * input + self.z1;
        self.z1 = self.a1 * input - self.b1 * output + self.z2;
        self.z2 = self.a2 * input - self.b2 * output;
        output
    }
}

/// Flags frames where low-frequency energy and spectral flux both jump
/// above their running averages.
pub struct EnergyDetector {
    filter: BiquadFilter,
    weights: Vec<f32>,
    previous: Vec<f32>,
    avg_energy: f32,
    avg_flux: f32,
    cooldown: u32,
    spectrum_len: usize,
    sample_rate: u32,
    spike: bool,
}

impl EnergyDetector {
    pub fn new() -> Self {
        Self {
            filter: BiquadFilter::default(),
            weights: Vec::new(),
            previous: Vec::new(),
            avg_energy: 0.0,
            avg_flux: 0.0,
            cooldown: COOLDOWN_FRAMES,
            spectrum_len: 0,
            sample_rate: 0,
            spike: false,
        }
    }

    /// Result of the most recent `detect`.
    pub fn spike(&self) -> bool {
        self.spike
    }

    fn configure(&mut self, spectrum_len: usize, sample_rate: u32) {
        let bin_width = sample_rate as f32 / (2.0 * spectrum_len as f32);
        let low_bins = ((CUTOFF_HZ / bin_width) as usize).min(spectrum_len);

        self.filter = BiquadFilter::low_pass(CUTOFF_HZ, sample_rate as f32, FILTER_Q);
        // weight low frequencies, zero above the cutoff
        self.weights = (0..spectrum_len)
            .map(|i| {
                if i < low_bins {
                    1.0 / ((i + 1) as f32 * bin_width + 1e-6)
                } else {
                    0.0
                }
            })
            .collect();
        self.previous = vec![0.0; spectrum_len];
        self.spectrum_len = spectrum_len;
        self.sample_rate = sample_rate;
    }

    pub fn detect(&mut self, waveform: &[u8], spectrum: &[u8], sample_rate: u32) -> bool {
        self.spike = false;
        if waveform.is_empty() || spectrum.is_empty() || sample_rate == 0 {
            return false;
        }
        if spectrum.len() != self.spectrum_len || sample_rate != self.sample_rate {
            self.configure(spectrum.len(), sample_rate);
        }

        let mut sum = 0.0f32;
        for &sample in waveform {
            let filtered = self.filter.process(sample as f32 - 128.0);
            sum += filtered * filtered;
        }
        let energy = (sum / waveform.len() as f32).sqrt();
        if energy < NOISE_GATE {
            return false;
        }

        self.avg_energy = self.avg_energy * ENERGY_ALPHA + energy * (1.0 - ENERGY_ALPHA);
        let energy_ratio = energy / (self.avg_energy + 1e-6);

        let mut flux = 0.0f32;
        let mut weight_sum = 0.0f32;
        for ((&bin, previous), &weight) in spectrum.iter().zip(&mut self.previous).zip(&self.weights) {
            let diff = bin as f32 - *previous;
            *previous = bin as f32;
            if diff > 0.0 {
                flux += diff * weight;
            }
            weight_sum += weight;
        }
        if weight_sum > 0.0 {
            flux /= weight_sum;
        }
        self.avg_flux = self.avg_flux * FLUX_ALPHA + flux * (1.0 - FLUX_ALPHA);
        let flux_ratio = flux / (self.avg_flux + 1e-6);

        if self.cooldown >= COOLDOWN_FRAMES
            && energy_ratio > ENERGY_THRESHOLD
            && flux_ratio > FLUX_THRESHOLD
            && energy > MIN_VOLUME
        {
            log::debug!(
                "Energy spike: energy x{:.2}, flux x{:.2}",
                energy_ratio,
                flux_ratio
            );
            self.spike = true;
            self.cooldown = 0;
        } else {
            self.cooldown = self.cooldown.saturating_add(1);
        }
        self.spike
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new()
    }
}

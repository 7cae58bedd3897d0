pub mod bitdepth;
pub mod gpu;
pub mod milky;
pub mod scope;
pub mod text;

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Everything a synthesizer needs for one frame.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub waveform: &'a [u8],
    pub spectrum: &'a [u8],
    pub sample_rate: u32,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    /// Monotonic time since the session started.
    pub timestamp: Duration,
}

impl SynthesisInput<'_> {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("no waveform data")]
    MissingWaveform,

    #[error("waveform has {len} samples, need at least {min}")]
    WaveformTooShort { len: usize, min: usize },

    #[error("no spectrum data")]
    MissingSpectrum,

    #[error("target buffer is {actual} bytes, expected {expected}")]
    TargetSize { expected: usize, actual: usize },

    #[error("GPU error: {0}")]
    Device(String),
}

/// Turns one feature snapshot into one RGBA frame.
///
/// Implementations may keep state between frames. On error the target must
/// be left untouched.
pub trait FrameSynthesizer: Send {
    fn name(&self) -> &'static str;

    fn synthesize(
        &mut self,
        input: &SynthesisInput<'_>,
        target: &mut [u8],
    ) -> Result<(), SynthesisError>;
}

/// Checks shared by every synthesizer, run before anything is written.
pub fn validate(input: &SynthesisInput<'_>, target: &[u8]) -> Result<(), SynthesisError> {
    if input.waveform.is_empty() {
        return Err(SynthesisError::MissingWaveform);
    }
    if input.spectrum.is_empty() {
        return Err(SynthesisError::MissingSpectrum);
    }
    let expected = input.frame_len();
    if expected == 0 || target.len() != expected {
        return Err(SynthesisError::TargetSize {
            expected,
            actual: target.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SynthesizerKind {
    /// Software feedback renderer
    #[default]
    Milky,
    /// GPU spectrum and oscilloscope
    Scope,
}

pub fn create_synthesizer(kind: SynthesizerKind) -> anyhow::Result<Box<dyn FrameSynthesizer>> {
    Ok(match kind {
        SynthesizerKind::Milky => Box::new(milky::MilkySynthesizer::new()),
        SynthesizerKind::Scope => Box::new(scope::ScopeSynthesizer::new()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(waveform: &'a [u8], spectrum: &'a [u8]) -> SynthesisInput<'a> {
        SynthesisInput {
            waveform,
            spectrum,
            sample_rate: 48000,
            width: 4,
            height: 2,
            bit_depth: 32,
            timestamp: Duration::ZERO,
        }
    }

    #[test]
    fn test_validate_rejects_missing_data() {
        let target = vec![0u8; 32];
        assert_eq!(
            validate(&input(&[], &[128]), &target),
            Err(SynthesisError::MissingWaveform)
        );
        assert_eq!(
            validate(&input(&[128], &[]), &target),
            Err(SynthesisError::MissingSpectrum)
        );
        assert!(validate(&input(&[128], &[128]), &target).is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_target() {
        let target = vec![0u8; 31];
        assert_eq!(
            validate(&input(&[128], &[128]), &target),
            Err(SynthesisError::TargetSize { expected: 32, actual: 31 })
        );
    }
}

use super::draw::Canvas;

/// Minimum waveform length the smoothing filter can work with.
pub const MIN_WAVEFORM: usize = 3;

const VOLUME_SCALE: f32 = 0.7;

/// Bass-weighted smoothing of the waveform and the mean offset it introduced.
pub struct EmphasizedWaveform {
    pub values: Vec<f32>,
    pub offset: f32,
}

impl EmphasizedWaveform {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            offset: 0.0,
        }
    }

    /// Blend each sample with the one two steps ahead, which favors low frequencies.
    pub fn update(&mut self, waveform: &[u8]) {
        self.values.clear();
        if waveform.len() < MIN_WAVEFORM {
            self.offset = 0.0;
            return;
        }
        let mut total = 0.0f32;
        for i in 0..waveform.len() - 2 {
            let value = VOLUME_SCALE * (0.1 * waveform[i] as f32 + 0.2 * waveform[i + 2] as f32);
            total += value - waveform[i] as f32;
            self.values.push(value);
        }
        self.offset = total / self.values.len() as f32;
    }

    /// Draw the curve as white anti-aliased segments across the canvas.
    pub fn render(&self, canvas: &mut Canvas<'_>, alpha_factor: f32, y_offset: f32, x_offset: f32) {
        let len = self.values.len();
        if len < 2 {
            return;
        }
        let width = canvas.width as f32;
        let height = canvas.height as f32;
        let scale_x = width / len as f32;
        let half_height = (canvas.height / 2) as f32;

        let point = |i: usize| {
            let x = (i as f32 * scale_x + x_offset).min(width - 1.0);
            let value = self.values[i];
            let y = half_height - (value - 128.0 - self.offset) * height / 512.0 + y_offset;
            (x, y.clamp(0.0, height - 1.0))
        };

        for i in 0..len - 1 {
            let alpha = (1.0 - self.values[i] / 255.0) * alpha_factor;
            canvas.draw_line_wu(point(i), point(i + 1), [255, 255, 255], alpha);
        }
    }
}

impl Default for EmphasizedWaveform {
    fn default() -> Self {
        Self::new()
    }
}

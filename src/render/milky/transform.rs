use rand::Rng;
use rayon::prelude::*;
use std::f32::consts::PI;

const EASING: f32 = 0.005;
const RETARGET_WITHIN: f32 = 0.01;
const BLEND_ALPHA: f32 = 0.7;

/// Slowly drifting rotation toward randomly chosen angles in [-45°, 45°).
#[derive(Debug, Default)]
pub struct Rotation {
    theta: f32,
    target: f32,
}

impl Rotation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn theta(&self) -> f32 {
        self.theta
    }

    /// Advance the angle one step, picking a new target once it is reached.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> f32 {
        if (self.theta - self.target).abs() < RETARGET_WITHIN {
            self.target = rng.random_range(-45..45) as f32 * PI / 180.0;
        }
        self.theta += (self.target - self.theta) * EASING;
        self.theta
    }

    /// Rotate `frame` about its center and blend the result back over it.
    /// `scratch` must be the same size as `frame`.
    pub fn apply<R: Rng>(
        &mut self,
        rng: &mut R,
        frame: &mut [u8],
        scratch: &mut [u8],
        width: usize,
        height: usize,
    ) {
        let theta = self.step(rng);
        rotate_into(frame, scratch, theta, width, height);
        frame
            .par_chunks_mut(width * 4)
            .zip(scratch.par_chunks(width * 4))
            .for_each(|(dst, src)| {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = (*d as f32 * (1.0 - BLEND_ALPHA) + s as f32 * BLEND_ALPHA) as u8;
                }
            });
    }
}

/// Write `frame` rotated by `theta` into `out`; uncovered pixels become transparent black.
pub fn rotate_into(frame: &[u8], out: &mut [u8], theta: f32, width: usize, height: usize) {
    let (sin, cos) = theta.sin_cos();
    let cx = width as f32 * 0.5;
    let cy = height as f32 * 0.5;

    out.par_chunks_mut(width * 4).enumerate().for_each(|(y, row)| {
        let yt = y as f32 - cy;
        for x in 0..width {
            let xt = x as f32 - cx;
            let sx = (cos * xt - sin * yt + cx) as i64;
            let sy = (sin * xt + cos * yt + cy) as i64;
            let dst = &mut row[x * 4..x * 4 + 4];
            if sx >= 0 && sy >= 0 && (sx as usize) < width && (sy as usize) < height {
                let src = (sy as usize * width + sx as usize) * 4;
                dst.copy_from_slice(&frame[src..src + 4]);
            } else {
                dst.fill(0);
            }
        }
    });
}

/// Zoom `frame` by `factor` about its center, nearest neighbor.
pub fn scale(frame: &mut [u8], scratch: &mut [u8], factor: f32, width: usize, height: usize) {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let source: &[u8] = frame;

    scratch.par_chunks_mut(width * 4).enumerate().for_each(|(y, row)| {
        let sy = ((y as f32 - cy) / factor + cy).round() as i64;
        for x in 0..width {
            let sx = ((x as f32 - cx) / factor + cx).round() as i64;
            let dst = &mut row[x * 4..x * 4 + 4];
            if sx >= 0 && sy >= 0 && (sx as usize) < width && (sy as usize) < height {
                let src = (sy as usize * width + sx as usize) * 4;
                dst.copy_from_slice(&source[src..src + 4]);
            } else {
                dst.fill(0);
            }
        }
    });
    frame.copy_from_slice(scratch);
}

use super::draw::Canvas;

const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Points tracing Lissajous paths, each leaving a line from its previous position.
pub struct Chasers {
    seed: u32,
    trails: Vec<Option<(i64, i64)>>,
}

impl Chasers {
    pub fn new(count: usize, seed: u32) -> Self {
        Self {
            seed,
            trails: vec![None; count],
        }
    }

    /// Position of chaser `index` at phase `t` on a `width` x `height` canvas.
    pub fn position(&self, index: usize, t: f32, width: usize, height: usize) -> (i64, i64) {
        let k = index as f32 + 1.0;
        let phase = (self.seed as f32 * 0.618 * k).fract() * std::f32::consts::TAU;
        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;
        let x = cx + cx * 0.9 * (t * (1.0 + 0.31 * k) + phase).sin();
        let y = cy + cy * 0.9 * (t * (0.7 + 0.23 * k) + phase * 0.5).cos();
        (x as i64, y as i64)
    }

    pub fn render(&mut self, canvas: &mut Canvas<'_>, time: f32, speed: f32, thickness: i64) {
        let t = time * speed * 10.0;
        for index in 0..self.trails.len() {
            let head = self.position(index, t, canvas.width, canvas.height);
            let tail = self.trails[index].unwrap_or(head);
            for offset in 0..thickness.max(1) {
                canvas.draw_line((tail.0 + offset, tail.1), (head.0 + offset, head.1), WHITE);
            }
            self.trails[index] = Some(head);
        }
    }

    /// Forget previous positions, e.g. after the canvas size changes.
    pub fn reset(&mut self) {
        self.trails.iter_mut().for_each(|t| *t = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_stay_on_canvas() {
        let chasers = Chasers::new(2, 42);
        for step in 0..500 {
            for index in 0..2 {
                let (x, y) = chasers.position(index, step as f32 * 0.1, 64, 48);
                assert!((0..64).contains(&x) && (0..48).contains(&y));
            }
        }
    }

    #[test]
    fn test_render_draws_something() {
        let mut chasers = Chasers::new(2, 42);
        let mut pixels = vec![0u8; 32 * 32 * 4];
        let mut canvas = Canvas::new(&mut pixels, 32, 32);
        chasers.render(&mut canvas, 0.0, 0.6, 2);
        chasers.render(&mut canvas, 1.0, 0.6, 2);
        assert!(canvas.pixels.chunks(4).any(|p| p == WHITE));
    }
}

/// Mutable view of an RGBA frame with its dimensions.
pub struct Canvas<'a> {
    pub pixels: &'a mut [u8],
    pub width: usize,
    pub height: usize,
}

impl<'a> Canvas<'a> {
    pub fn new(pixels: &'a mut [u8], width: usize, height: usize) -> Self {
        debug_assert_eq!(pixels.len(), width * height * 4);
        Self {
            pixels,
            width,
            height,
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Overwrite one pixel. Coordinates outside the canvas are ignored.
    #[inline]
    pub fn set_pixel(&mut self, x: i64, y: i64, rgba: [u8; 4]) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let index = (y as usize * self.width + x as usize) * 4;
        self.pixels[index..index + 4].copy_from_slice(&rgba);
    }

    /// Bresenham line. Steps are clamped to the canvas, so a line aimed
    /// outside slides along the border instead of leaving it.
    pub fn draw_line(&mut self, from: (i64, i64), to: (i64, i64), rgba: [u8; 4]) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let max_x = self.width as i64 - 1;
        let max_y = self.height as i64 - 1;
        let (x1, y1) = (to.0.clamp(0, max_x), to.1.clamp(0, max_y));
        let (mut x, mut y) = (from.0.clamp(0, max_x), from.1.clamp(0, max_y));

        let dx = (x1 - x).abs();
        let dy = -(y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.set_pixel(x, y, rgba);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = err * 2;
            if e2 >= dy {
                err += dy;
                x = (x + sx).clamp(0, max_x);
            }
            if e2 <= dx {
                err += dx;
                y = (y + sy).clamp(0, max_y);
            }
        }
    }

    /// Anti-aliased line (Xiaolin Wu). Coverage times `alpha` is written
    /// into the alpha channel of each touched pixel.
    pub fn draw_line_wu(&mut self, mut p0: (f32, f32), mut p1: (f32, f32), rgb: [u8; 3], alpha: f32) {
        let steep = (p1.1 - p0.1).abs() > (p1.0 - p0.0).abs();
        if steep {
            p0 = (p0.1, p0.0);
            p1 = (p1.1, p1.0);
        }
        if p0.0 > p1.0 {
            std::mem::swap(&mut p0, &mut p1);
        }

        let dx = p1.0 - p0.0;
        let dy = p1.1 - p0.1;
        let gradient = if dx == 0.0 { 1.0 } else { dy / dx };

        let plot = |canvas: &mut Self, x: i64, y: i64, coverage: f32| {
            let a = (coverage * alpha * 255.0).clamp(0.0, 255.0) as u8;
            let rgba = [rgb[0], rgb[1], rgb[2], a];
            if steep {
                canvas.set_pixel(y, x, rgba);
            } else {
                canvas.set_pixel(x, y, rgba);
            }
        };

        // first endpoint
        let xend = p0.0.round();
        let yend = p0.1 + gradient * (xend - p0.0);
        let xgap = rfpart(p0.0 + 0.5);
        let xpxl1 = xend as i64;
        let ypxl1 = yend.floor() as i64;
        plot(self, xpxl1, ypxl1, rfpart(yend) * xgap);
        plot(self, xpxl1, ypxl1 + 1, fpart(yend) * xgap);
        let mut intery = yend + gradient;

        // second endpoint
        let xend = p1.0.round();
        let yend = p1.1 + gradient * (xend - p1.0);
        let xgap = fpart(p1.0 + 0.5);
        let xpxl2 = xend as i64;
        let ypxl2 = yend.floor() as i64;
        plot(self, xpxl2, ypxl2, rfpart(yend) * xgap);
        plot(self, xpxl2, ypxl2 + 1, fpart(yend) * xgap);

        for x in (xpxl1 + 1)..xpxl2 {
            let y = intery.floor() as i64;
            plot(self, x, y, rfpart(intery));
            plot(self, x, y + 1, fpart(intery));
            intery += gradient;
        }
    }
}

#[inline]
fn fpart(x: f32) -> f32 {
    x - x.floor()
}

#[inline]
fn rfpart(x: f32) -> f32 {
    1.0 - fpart(x)
}

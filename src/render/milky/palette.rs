use rand::Rng;
use std::time::Duration;

pub const PALETTE_SIZE: usize = 256;
/// Palette components use six bits per channel.
pub const MAX_COLOR: u8 = 63;

const REGENERATE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteKind {
    PurpleMajik,
    GreenLantern,
    AmberSun,
    Frosty,
}

impl PaletteKind {
    const ALL: [PaletteKind; 4] = [
        PaletteKind::PurpleMajik,
        PaletteKind::GreenLantern,
        PaletteKind::AmberSun,
        PaletteKind::Frosty,
    ];
}

/// Indexed color table driven by the red channel of the previous frame.
pub struct Palette {
    colors: [[u8; 3]; PALETTE_SIZE],
    kind: PaletteKind,
    generated_at: Option<Duration>,
}

impl Palette {
    pub fn new() -> Self {
        let kind = PaletteKind::PurpleMajik;
        Self {
            colors: build(kind),
            kind,
            generated_at: None,
        }
    }

    pub fn kind(&self) -> PaletteKind {
        self.kind
    }

    pub fn color(&self, index: u8) -> [u8; 3] {
        self.colors[index as usize]
    }

    /// Pick a new random palette on first use, or on an energy spike when the
    /// current one is older than ten seconds.
    pub fn refresh<R: Rng>(&mut self, now: Duration, spike: bool, rng: &mut R) -> bool {
        let due = match self.generated_at {
            None => true,
            Some(at) => spike && now.saturating_sub(at) > REGENERATE_AFTER,
        };
        if due {
            self.kind = PaletteKind::ALL[rng.random_range(0..PaletteKind::ALL.len())];
            self.colors = build(self.kind);
            self.generated_at = Some(now);
            log::debug!("Palette regenerated: {:?}", self.kind);
        }
        due
    }

    /// Map every pixel through the palette using its red channel as index.
    pub fn apply(&self, frame: &mut [u8]) {
        for pixel in frame.chunks_exact_mut(4) {
            let [r, g, b] = self.colors[pixel[0] as usize];
            pixel[0] = r;
            pixel[1] = g;
            pixel[2] = b;
            pixel[3] = 255;
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

fn build(kind: PaletteKind) -> [[u8; 3]; PALETTE_SIZE] {
    let mut colors = [[MAX_COLOR; 3]; PALETTE_SIZE];
    for a in 0..64u32 {
        let linear = a as u8;
        let square = (a * a / 64) as u8;
        let root = ((a as f32).sqrt() * 8.0) as u8;
        colors[a as usize] = match kind {
            PaletteKind::PurpleMajik => [linear, square, root],
            PaletteKind::GreenLantern => [square, root, linear],
            PaletteKind::AmberSun => [root, linear, square],
            PaletteKind::Frosty => [square, linear, root],
        };
    }
    if kind == PaletteKind::AmberSun {
        // fade the upper range back to darkness
        for a in 64..PALETTE_SIZE {
            let fade = ((PALETTE_SIZE - a) * MAX_COLOR as usize / (PALETTE_SIZE - 64)) as u8;
            colors[a] = [fade; 3];
        }
    }
    colors
}

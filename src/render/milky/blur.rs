/// Soften the frame with a [1, 2, 1] kernel along each row of pixels.
/// Alpha is left alone.
pub fn blur_frame(frame: &mut [u8], width: usize) {
    if width < 3 {
        return;
    }
    for row in frame.chunks_exact_mut(width * 4) {
        for channel in 0..3 {
            let mut left = row[channel] as u16;
            for x in 1..width - 1 {
                let i = x * 4 + channel;
                let center = row[i] as u16;
                let right = row[i + 4] as u16;
                row[i] = ((left + 2 * center + right + 2) / 4) as u8;
                left = center;
            }
        }
    }
}

/// Fade every color channel by one step so trails decay toward black
/// without shifting hue.
pub fn preserve_mass_fade(frame: &mut [u8]) {
    for pixel in frame.chunks_exact_mut(4) {
        for value in &mut pixel[..3] {
            *value = value.saturating_sub(1);
        }
    }
}

/// Quantize an RGBA frame to a lower color depth in place.
///
/// 32 leaves the frame untouched, 24 drops alpha, 16 quantizes to RGB565 and
/// 8 to RGB332. Reduced frames are fully opaque.
pub fn reduce_bit_depth(frame: &mut [u8], bit_depth: u8) {
    let bits: [u32; 3] = match bit_depth {
        32.. => return,
        24..=31 => [8, 8, 8],
        16..=23 => [5, 6, 5],
        _ => [3, 3, 2],
    };

    for pixel in frame.chunks_exact_mut(4) {
        for (value, &b) in pixel[..3].iter_mut().zip(bits.iter()) {
            *value = requantize(*value, b);
        }
        pixel[3] = 255;
    }
}

/// Keep the top `bits` of `value` and spread them back over the full byte.
#[inline]
fn requantize(value: u8, bits: u32) -> u8 {
    if bits >= 8 {
        return value;
    }
    let levels = (1u32 << bits) - 1;
    let level = value as u32 >> (8 - bits);
    ((level * 255 + levels / 2) / levels) as u8
}

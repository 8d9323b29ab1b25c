// Sample arithmetic shared by the queue, the mixing tick and the transcoders
//
// All summation happens on canonical i16 PCM. Results are clamped to the
// symmetric range [-32767, 32767] so that a later subtraction of the same
// contribution can never overflow.

pub const SAMPLE_MAX: i16 = 32767;
pub const SAMPLE_MIN: i16 = -32767;

#[inline]
fn clamp_sample(value: i32) -> i16 {
    value.clamp(SAMPLE_MIN as i32, SAMPLE_MAX as i32) as i16
}

#[inline]
pub fn saturating_add(a: i16, b: i16) -> i16 {
    clamp_sample(a as i32 + b as i32)
}

#[inline]
pub fn saturating_subtract(a: i16, b: i16) -> i16 {
    clamp_sample(a as i32 - b as i32)
}

/// `dst[i] = saturating_add(dst[i], src[i])` over the common prefix
pub fn saturating_add_into(dst: &mut [i16], src: &[i16]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = saturating_add(*d, s);
    }
}

/// `dst[i] = saturating_subtract(dst[i], src[i])` over the common prefix
pub fn saturating_subtract_into(dst: &mut [i16], src: &[i16]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = saturating_subtract(*d, s);
    }
}

/// Apply a volume level in place.
///
/// `0` leaves the buffer untouched, a positive level multiplies by that factor
/// and a negative level divides by its magnitude.
pub fn adjust_volume(samples: &mut [i16], level: i32) {
    match level {
        0 => {}
        l if l > 0 => {
            for s in samples.iter_mut() {
                *s = clamp_sample((*s as i32).saturating_mul(l));
            }
        }
        l => {
            let divisor = l.unsigned_abs() as i32;
            for s in samples.iter_mut() {
                *s = clamp_sample(*s as i32 / divisor);
            }
        }
    }
}

/// Samples in one tick: `rate * interval_ms / 1000`
pub fn tick_samples(sample_rate: u32, interval_ms: u32) -> usize {
    (sample_rate as u64 * interval_ms as u64 / 1000) as usize
}

pub fn pcm_to_bytes(pcm: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len() * 2);
    for s in pcm {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode little-endian i16 samples; a trailing odd byte is ignored.
pub fn bytes_to_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

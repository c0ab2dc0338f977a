//! Sample format conversion between capture bytes, float, and 16-bit PCM

use crate::audio::SampleFormat;

/// Convert one float sample to 16-bit PCM
///
/// Scales by 32768 and truncates toward zero, no dither. Out-of-range
/// input saturates at the i16 limits.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert one 16-bit sample to float in [-1.0, 1.0)
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Convert a float slice into `output`, which must be at least as long
pub fn f32_slice_to_i16(input: &[f32], output: &mut [i16]) {
    for (dst, &src) in output.iter_mut().zip(input) {
        *dst = f32_to_i16(src);
    }
}

/// Decode little-endian capture bytes into float samples
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn bytes_to_f32(data: &[u8], format: SampleFormat, output: &mut Vec<f32>) {
    output.clear();
    match format {
        SampleFormat::F32 => output.extend(
            data.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        ),
        SampleFormat::I16 => output.extend(
            data.chunks_exact(2)
                .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]]))),
        ),
    }
}

//! Multichannel to stereo downmix
//!
//! Channel order follows the WAVE layout: FL, FR, C, LFE, SL, SR, BL, BR.

use crate::error::{Result, StreamerError};

const CENTER_GAIN: f32 = 0.7;
const LFE_GAIN: f32 = 0.5;
const SURROUND_GAIN: f32 = 0.7;
/// Applied to the accumulated sums before the final clamp
const OUTPUT_SCALE: f32 = 0.5;

/// Downmix `frames` interleaved frames of `channels` channels into stereo
///
/// `output` receives `2 * frames` interleaved samples. Channels beyond the
/// eighth are ignored. With four or more full-scale channels the scaled sum
/// can still pass 1.0, so the result is clamped to [-1, 1].
pub fn downmix_to_stereo(
    input: &[f32],
    output: &mut [f32],
    frames: usize,
    channels: u16,
) -> Result<()> {
    if channels < 2 {
        return Err(StreamerError::InvalidChannelCount(channels));
    }
    let channels = channels as usize;

    let frames = frames
        .min(input.len() / channels)
        .min(output.len() / 2);

    for (frame, out) in input
        .chunks_exact(channels)
        .zip(output.chunks_exact_mut(2))
        .take(frames)
    {
        let mut left = frame[0];
        let mut right = frame[1];

        if channels > 2 {
            left += frame[2] * CENTER_GAIN;
            right += frame[2] * CENTER_GAIN;
        }
        if channels > 3 {
            left += frame[3] * LFE_GAIN;
            right += frame[3] * LFE_GAIN;
        }
        if channels > 4 {
            left += frame[4] * SURROUND_GAIN;
        }
        if channels > 5 {
            right += frame[5] * SURROUND_GAIN;
        }
        // 7.1 back pair
        if channels > 6 {
            left += frame[6] * SURROUND_GAIN;
        }
        if channels > 7 {
            right += frame[7] * SURROUND_GAIN;
        }

        out[0] = (left * OUTPUT_SCALE).clamp(-1.0, 1.0);
        out[1] = (right * OUTPUT_SCALE).clamp(-1.0, 1.0);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mono() {
        let mut out = [0.0; 2];
        let err = downmix_to_stereo(&[0.5], &mut out, 1, 1).unwrap_err();
        assert!(matches!(err, StreamerError::InvalidChannelCount(1)));
    }

    #[test]
    fn test_stereo_is_halved() {
        let mut out = [0.0; 4];
        downmix_to_stereo(&[1.0, -1.0, 0.5, 0.25], &mut out, 2, 2).unwrap();
        assert_eq!(out, [0.5, -0.5, 0.25, 0.125]);
    }

    #[test]
    fn test_5_1_weights() {
        // FL FR C LFE SL SR
        let input = [0.1, 0.2, 0.4, 0.2, 0.3, 0.5];
        let mut out = [0.0; 2];
        downmix_to_stereo(&input, &mut out, 1, 6).unwrap();

        let left = (0.1 + 0.4 * 0.7 + 0.2 * 0.5 + 0.3 * 0.7) * 0.5;
        let right = (0.2 + 0.4 * 0.7 + 0.2 * 0.5 + 0.5 * 0.7) * 0.5;
        assert!((out[0] - left).abs() < 1e-6);
        assert!((out[1] - right).abs() < 1e-6);
    }

    #[test]
    fn test_7_1_back_channels_are_one_sided() {
        let mut input = [0.0f32; 8];
        input[6] = 1.0;
        let mut out = [0.0; 2];
        downmix_to_stereo(&input, &mut out, 1, 8).unwrap();
        assert!((out[0] - 0.35).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_output_bounds_for_supported_layouts() {
        // Worst case per side: all contributing channels at the same rail
        for channels in 2..=8u16 {
            for &level in &[1.0f32, -1.0] {
                let input = vec![level; channels as usize * 4];
                let mut out = vec![0.0; 8];
                downmix_to_stereo(&input, &mut out, 4, channels).unwrap();
                for sample in out {
                    assert!(
                        (-1.0..=1.0).contains(&sample),
                        "{} channels produced {}",
                        channels,
                        sample
                    );
                }
            }
        }
    }

    #[test]
    fn test_frame_count_is_bounded_by_buffers() {
        let input = [0.5f32; 6];
        let mut out = [9.0f32; 4];
        downmix_to_stereo(&input, &mut out, 10, 2).unwrap();
        assert_eq!(out, [0.25, 0.25, 0.25, 0.25]);
    }
}

//! Sample-rate conversion from the capture rate to the codec rate

use crate::error::{Result, StreamerError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, info};

/// Frame accounting reported by one converter call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResampleOutcome {
    /// Input frames the converter accepted
    pub frames_used: usize,
    /// Output frames appended to the caller's buffer
    pub frames_generated: usize,
}

/// Block-based sample-rate converter over interleaved float frames
pub trait SampleRateConverter: Send {
    /// Convert `input` (interleaved) and append the result to `output`
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<ResampleOutcome>;

    /// Output rate divided by input rate
    fn ratio(&self) -> f64;

    /// Nominal output frame count for `input_frames` input frames
    fn output_frames_for(&self, input_frames: usize) -> usize {
        (input_frames as f64 * self.ratio()).ceil() as usize
    }
}

/// Sinc converter backed by rubato
///
/// rubato consumes fixed-size chunks, so captured frames are staged per
/// channel until a whole chunk (10ms of input) is available.
pub struct SincConverter {
    resampler: SincFixedIn<f32>,
    channels: usize,
    chunk_size: usize,
    /// Staged input, one vector per channel
    pending: Vec<Vec<f32>>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
    ratio: f64,
}

impl SincConverter {
    /// Create a converter for interleaved audio with `channels` channels
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(StreamerError::Resampler(format!(
                "invalid conversion {} Hz -> {} Hz with {} channel(s)",
                input_rate, output_rate, channels
            )));
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let chunk_size = (input_rate / 100).max(1) as usize;
        let channels = channels as usize;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, channels)
            .map_err(|e| StreamerError::Resampler(format!("failed to create resampler: {}", e)))?;

        let input_buffer = resampler.input_buffer_allocate(true);
        let output_buffer = resampler.output_buffer_allocate(true);

        info!(
            "Resampler created: {} Hz -> {} Hz, {} channels, chunk {} frames",
            input_rate, output_rate, channels, chunk_size
        );

        Ok(Self {
            resampler,
            channels,
            chunk_size,
            pending: vec![Vec::with_capacity(chunk_size * 4); channels],
            input_buffer,
            output_buffer,
            ratio,
        })
    }

    /// Input frames per internal conversion step
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Frames staged but not yet converted
    pub fn pending_frames(&self) -> usize {
        self.pending[0].len()
    }
}

impl SampleRateConverter for SincConverter {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<ResampleOutcome> {
        let input_frames = input.len() / self.channels;
        for frame in input.chunks_exact(self.channels) {
            for (channel, &sample) in self.pending.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        let mut shortfall = 0;
        let mut generated = 0;
        let mut offset = 0;

        while self.pending[0].len() - offset >= self.chunk_size {
            for (dst, src) in self.input_buffer.iter_mut().zip(&self.pending) {
                dst.copy_from_slice(&src[offset..offset + self.chunk_size]);
            }

            let (used, produced) = self
                .resampler
                .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
                .map_err(|e| StreamerError::Resampler(e.to_string()))?;

            shortfall += self.chunk_size.saturating_sub(used);
            offset += self.chunk_size;

            output.reserve(produced * self.channels);
            for i in 0..produced {
                for channel in &self.output_buffer {
                    output.push(channel[i]);
                }
            }
            generated += produced;
        }

        if offset > 0 {
            for channel in &mut self.pending {
                channel.drain(..offset);
            }
        }

        debug!(
            "Resampled {} frames -> {} frames ({} staged)",
            input_frames,
            generated,
            self.pending_frames()
        );

        Ok(ResampleOutcome {
            frames_used: input_frames - shortfall.min(input_frames),
            frames_generated: generated,
        })
    }

    fn ratio(&self) -> f64 {
        self.ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_sine(frames: usize, rate: u32, start: usize) -> Vec<f32> {
        (start..start + frames)
            .flat_map(|i| {
                let t = i as f32 / rate as f32;
                let s = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
                [s, -s]
            })
            .collect()
    }

    #[test]
    fn test_rejects_invalid_rates() {
        assert!(SincConverter::new(0, 32000, 2).is_err());
        assert!(SincConverter::new(48000, 32000, 0).is_err());
    }

    #[test]
    fn test_nominal_output_size() {
        let converter = SincConverter::new(48000, 32000, 2).unwrap();
        assert_eq!(converter.chunk_size(), 480);
        assert_eq!(converter.output_frames_for(480), 320);
        assert_eq!(converter.output_frames_for(441), 294);
        // ceil, not floor
        assert_eq!(converter.output_frames_for(1), 1);
    }

    #[test]
    fn test_partial_chunk_is_staged() {
        let mut converter = SincConverter::new(48000, 32000, 2).unwrap();
        let mut output = Vec::new();

        let outcome = converter
            .process(&stereo_sine(200, 48000, 0), &mut output)
            .unwrap();
        assert_eq!(outcome.frames_used, 200);
        assert_eq!(outcome.frames_generated, 0);
        assert!(output.is_empty());
        assert_eq!(converter.pending_frames(), 200);

        let outcome = converter
            .process(&stereo_sine(400, 48000, 200), &mut output)
            .unwrap();
        assert_eq!(outcome.frames_used, 400);
        assert!(outcome.frames_generated > 0);
        assert_eq!(output.len(), outcome.frames_generated * 2);
        assert_eq!(converter.pending_frames(), 120);
    }

    #[test]
    fn test_48k_to_32k_rate() {
        let mut converter = SincConverter::new(48000, 32000, 2).unwrap();
        let mut output = Vec::new();
        let mut total = 0;

        for block in 0..20 {
            let outcome = converter
                .process(&stereo_sine(480, 48000, block * 480), &mut output)
                .unwrap();
            assert_eq!(outcome.frames_used, 480);
            total += outcome.frames_generated;
        }

        assert_eq!(output.len(), total * 2);
        assert!(
            (total as i64 - 6400).abs() < 100,
            "expected ~6400 frames, got {}",
            total
        );
        for &sample in &output {
            assert!(sample.abs() <= 1.0, "sample out of range: {}", sample);
        }
    }

    #[test]
    fn test_deterministic() {
        let input = stereo_sine(960, 48000, 0);
        let run = || {
            let mut converter = SincConverter::new(48000, 32000, 2).unwrap();
            let mut output = Vec::new();
            converter.process(&input, &mut output).unwrap();
            output
        };
        assert_eq!(run(), run());
    }
}

//! Audio capture, conversion, and the SBC streaming pipeline

mod buffer;
pub mod capture;
pub mod convert;
pub mod downmix;
mod engine;
pub mod resample;
mod stream;
#[cfg(windows)]
mod wasapi;

pub use buffer::RingBuffer;
pub use capture::{open_capture, CaptureHandler, CaptureOptions, CaptureSource};
pub use engine::{EngineConfig, EngineState, StreamEngine};
pub use stream::{SbcAudioStream, StreamOptions, StreamStats, STREAM_CHANNELS, STREAM_SAMPLE_RATE};
#[cfg(windows)]
pub use wasapi::WasapiCapture;

/// Sample encoding of captured PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// IEEE 754 32-bit float, the usual shared-mode mix format
    F32,
    /// Signed 16-bit little-endian integer
    I16,
}

impl SampleFormat {
    /// Bytes occupied by one sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::I16 => 2,
        }
    }
}

/// Audio format information
#[derive(Debug, Clone)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Build an interleaved format, deriving bit depth and block alignment
    pub fn interleaved(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        let bytes = sample_format.bytes_per_sample() as u16;
        Self {
            sample_rate,
            channels,
            bits_per_sample: bytes * 8,
            block_align: bytes * channels,
            sample_format,
        }
    }

    /// Calculate bytes per second
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.block_align as u32
    }

    /// Calculate buffer size in bytes for given milliseconds
    pub fn buffer_size_for_ms(&self, ms: u32) -> usize {
        ((self.bytes_per_second() as u64 * ms as u64) / 1000) as usize
    }

    /// Calculate number of frames for given bytes
    pub fn bytes_to_frames(&self, bytes: usize) -> u32 {
        (bytes / self.block_align as usize) as u32
    }

    /// Calculate bytes for given number of frames
    pub fn frames_to_bytes(&self, frames: u32) -> usize {
        frames as usize * self.block_align as usize
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sizes() {
        let format = AudioFormat::interleaved(48000, 2, SampleFormat::F32);
        assert_eq!(format.block_align, 8);
        assert_eq!(format.bits_per_sample, 32);
        assert_eq!(format.bytes_per_second(), 384_000);
        assert_eq!(format.buffer_size_for_ms(32), 12_288);
        assert_eq!(format.bytes_to_frames(12_288), 1536);
        assert_eq!(format.frames_to_bytes(480), 3840);
        assert_eq!(format.to_string(), "48000Hz 2ch 32bit");
    }
}

//! Capture sources feeding the streaming pipeline

use crate::audio::{AudioFormat, SampleFormat};
use crate::error::{Result, StreamerError};

/// Callback receiving interleaved PCM bytes in the source's format
///
/// Called on the capture thread; the slice is only valid for the call.
pub type CaptureHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Something that delivers captured PCM to a handler
pub trait CaptureSource: Send {
    /// Format of the bytes passed to the handler
    fn format(&self) -> &AudioFormat;

    /// Begin delivering audio to `handler`
    fn start(&mut self, handler: CaptureHandler) -> Result<()>;

    /// Stop delivering audio
    ///
    /// The handler is kept until the source is dropped.
    fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Which endpoint to capture from
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Capture what the default output device plays instead of the default input
    pub loopback: bool,
    /// Shared-mode device buffer length
    pub device_buffer_ms: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            loopback: true,
            device_buffer_ms: 50,
        }
    }
}

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Map a wave format tag and bit depth to a sample format the pipeline reads
pub fn sample_format_for(format_tag: u16, bits_per_sample: u16) -> Result<SampleFormat> {
    match (format_tag, bits_per_sample) {
        (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(SampleFormat::F32),
        (WAVE_FORMAT_PCM, 16) => Ok(SampleFormat::I16),
        // Shared-mode mix formats are extensible float in practice
        (WAVE_FORMAT_EXTENSIBLE, 32) => Ok(SampleFormat::F32),
        (WAVE_FORMAT_EXTENSIBLE, 16) => Ok(SampleFormat::I16),
        (tag, bits) => Err(StreamerError::UnsupportedFormat(format!(
            "format tag {:#06x} with {} bits per sample",
            tag, bits
        ))),
    }
}

/// Open the platform capture source for the default endpoint
#[cfg(windows)]
pub fn open_capture(options: &CaptureOptions) -> Result<Box<dyn CaptureSource>> {
    Ok(Box::new(crate::audio::WasapiCapture::open(options)?))
}

#[cfg(not(windows))]
pub fn open_capture(_options: &CaptureOptions) -> Result<Box<dyn CaptureSource>> {
    Err(StreamerError::Unsupported(
        "audio capture is only available on Windows".to_string(),
    ))
}

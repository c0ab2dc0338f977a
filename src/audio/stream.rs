//! Capture-to-frames pipeline
//!
//! Runs on the capture thread: every captured block is converted to stereo
//! 16-bit PCM at the codec rate, encoded into SBC frames, and appended to a
//! frame ring buffer that the HID router drains.

use crate::audio::convert::{bytes_to_f32, f32_slice_to_i16};
use crate::audio::downmix::downmix_to_stereo;
use crate::audio::resample::{SampleRateConverter, SincConverter};
use crate::audio::{AudioFormat, RingBuffer};
use crate::error::{Result, StreamerError};
use crate::sbc::{FrameEncoder, SbcConfig, SbcEncoder};
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Codec sample rate expected by the controller
pub const STREAM_SAMPLE_RATE: u32 = 32000;

/// Channels fed to the encoder
pub const STREAM_CHANNELS: u16 = 2;

/// Counters shared between the pipeline and the router
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_encoded: AtomicU64,
    frames_dropped: AtomicU64,
    encode_failures: AtomicU64,
    resample_mismatches: AtomicU64,
    reports_sent: AtomicU64,
}

impl StreamStats {
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }

    /// Frames discarded because the router fell behind
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn encode_failures(&self) -> u64 {
        self.encode_failures.load(Ordering::Relaxed)
    }

    pub fn resample_mismatches(&self) -> u64 {
        self.resample_mismatches.load(Ordering::Relaxed)
    }

    pub fn reports_sent(&self) -> u64 {
        self.reports_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn record_report(&self) {
        self.reports_sent.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames encoded, {} reports sent, {} frames dropped, ",
            self.frames_encoded(),
            self.reports_sent(),
            self.frames_dropped()
        )?;
        write!(
            f,
            "{} encode failures, {} resampler mismatches",
            self.encode_failures(),
            self.resample_mismatches()
        )
    }
}

/// Pipeline sizing and codec options
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Ring buffer length, in milliseconds of the capture format
    pub buffer_ms: u32,
    /// Frames that must be buffered before the router is signalled
    pub min_buffered_frames: usize,
    /// Fold captures with more than two channels down to stereo
    pub downmix: bool,
    pub sbc: SbcConfig,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_ms: 32,
            min_buffered_frames: 4,
            downmix: true,
            sbc: SbcConfig::default(),
        }
    }
}

/// Captured PCM in, SBC frames out
pub struct SbcAudioStream {
    source_format: AudioFormat,
    // Field order is drop order: encoder, then converter
    encoder: Box<dyn FrameEncoder>,
    converter: Option<Box<dyn SampleRateConverter>>,
    pcm: RingBuffer<i16>,
    frames: Arc<RingBuffer<u8>>,
    frame_size: usize,
    min_buffered_frames: usize,
    signal: Sender<()>,
    stats: Arc<StreamStats>,
    // Scratch reused across capture events
    decoded: Vec<f32>,
    stereo: Vec<f32>,
    resampled: Vec<f32>,
    converted: Vec<i16>,
    block: Vec<i16>,
    frame: Vec<u8>,
}

impl SbcAudioStream {
    /// Build the pipeline for `source_format` with the native SBC encoder
    ///
    /// A rate converter is inserted when the capture rate differs from the
    /// codec rate.
    pub fn new(
        source_format: AudioFormat,
        options: &StreamOptions,
        signal: Sender<()>,
    ) -> Result<Self> {
        if options.sbc.channel_mode.channels() != STREAM_CHANNELS as usize {
            return Err(StreamerError::InvalidConfig(
                "the controller stream needs a two-channel SBC mode".to_string(),
            ));
        }

        let encoder = SbcEncoder::new(options.sbc.clone())?;
        let target_rate = options.sbc.sample_rate;

        let converter: Option<Box<dyn SampleRateConverter>> =
            if source_format.sample_rate != target_rate {
                Some(Box::new(SincConverter::new(
                    source_format.sample_rate,
                    target_rate,
                    STREAM_CHANNELS,
                )?))
            } else {
                None
            };

        Self::with_components(source_format, Box::new(encoder), converter, options, signal)
    }

    /// Build the pipeline around an existing encoder and converter
    pub fn with_components(
        source_format: AudioFormat,
        encoder: Box<dyn FrameEncoder>,
        converter: Option<Box<dyn SampleRateConverter>>,
        options: &StreamOptions,
        signal: Sender<()>,
    ) -> Result<Self> {
        let channels = source_format.channels;
        if channels == 0 || source_format.block_align == 0 {
            return Err(StreamerError::UnsupportedFormat(format!(
                "invalid capture format {}",
                source_format
            )));
        }
        if channels > STREAM_CHANNELS && !options.downmix {
            return Err(StreamerError::UnsupportedFormat(format!(
                "{} channel capture needs downmix enabled",
                channels
            )));
        }

        let block_samples = encoder.input_block_size() / 2;
        let frame_size = encoder.output_frame_size();
        if block_samples == 0 || frame_size == 0 {
            return Err(StreamerError::Encoder(
                "encoder reported an empty block or frame size".to_string(),
            ));
        }

        let buffer_bytes = source_format.buffer_size_for_ms(options.buffer_ms);

        let pcm_capacity = (buffer_bytes / 2).max(block_samples * 4);
        let pcm = RingBuffer::new(pcm_capacity)?;

        // Whole frames only, so overflow never splits one
        let frame_capacity = buffer_bytes.max(frame_size * 8).div_ceil(frame_size) * frame_size;
        let frames = Arc::new(RingBuffer::new(frame_capacity)?);

        info!(
            "Audio stream: {}, resampler {}, {} byte blocks, {} byte frames, {} frame buffer",
            source_format,
            if converter.is_some() { "on" } else { "off" },
            block_samples * 2,
            frame_size,
            frame_capacity / frame_size
        );

        Ok(Self {
            source_format,
            encoder,
            converter,
            pcm,
            frames,
            frame_size,
            min_buffered_frames: options.min_buffered_frames.max(1),
            signal,
            stats: Arc::new(StreamStats::default()),
            decoded: Vec::new(),
            stereo: Vec::new(),
            resampled: Vec::new(),
            converted: Vec::new(),
            block: vec![0; block_samples],
            frame: vec![0; frame_size],
        })
    }

    pub fn source_format(&self) -> &AudioFormat {
        &self.source_format
    }

    /// Encoded frame buffer drained by the router
    pub fn frames(&self) -> Arc<RingBuffer<u8>> {
        self.frames.clone()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Whole frames currently buffered
    pub fn current_frame_count(&self) -> usize {
        self.frames.current_length() / self.frame_size
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Feed one captured block of raw bytes in the source format
    ///
    /// Trailing bytes that do not make a whole frame are ignored.
    pub fn process_capture(&mut self, data: &[u8]) {
        let block_align = self.source_format.block_align as usize;
        let channels = self.source_format.channels;
        let input_frames = data.len() / block_align;
        if input_frames == 0 {
            return;
        }

        bytes_to_f32(
            &data[..input_frames * block_align],
            self.source_format.sample_format,
            &mut self.decoded,
        );

        let stereo: &[f32] = match channels {
            1 => {
                self.stereo.clear();
                self.stereo
                    .extend(self.decoded.iter().flat_map(|&sample| [sample, sample]));
                &self.stereo
            }
            2 => &self.decoded,
            _ => {
                self.stereo.resize(input_frames * 2, 0.0);
                if let Err(e) =
                    downmix_to_stereo(&self.decoded, &mut self.stereo, input_frames, channels)
                {
                    warn!("Downmix failed: {}", e);
                    return;
                }
                &self.stereo
            }
        };

        let samples: &[f32] = match self.converter.as_mut() {
            Some(converter) => {
                self.resampled.clear();
                self.resampled
                    .reserve(converter.output_frames_for(input_frames) * STREAM_CHANNELS as usize);
                match converter.process(stereo, &mut self.resampled) {
                    Ok(outcome) => {
                        if outcome.frames_used != input_frames {
                            warn!(
                                "Resampler consumed {} of {} frames",
                                outcome.frames_used, input_frames
                            );
                            self.stats
                                .resample_mismatches
                                .fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        error!("Resampling failed, dropping {} frames: {}", input_frames, e);
                        return;
                    }
                }
                &self.resampled
            }
            None => stereo,
        };

        self.converted.resize(samples.len(), 0);
        f32_slice_to_i16(samples, &mut self.converted);

        // Encode between writes so the PCM buffer never overflows
        let step = self.pcm.capacity() - self.block.len();
        let mut offset = 0;
        while offset < self.converted.len() {
            let end = (offset + step).min(self.converted.len());
            if let Err(e) = self.pcm.copy_from(&self.converted[offset..end]) {
                warn!("PCM buffer write failed: {}", e);
                break;
            }
            self.encode_available();
            offset = end;
        }

        let available = self.current_frame_count();
        trace!(
            "Captured {} frames, {} encoded frames buffered",
            input_frames,
            available
        );
        if available >= self.min_buffered_frames {
            // A pending signal already covers this one
            let _ = self.signal.try_send(());
        }
    }

    /// Encode every whole block in the PCM buffer
    fn encode_available(&mut self) {
        let block_samples = self.block.len();

        while self.pcm.current_length() >= block_samples {
            self.pcm.copy_to(&mut self.block);

            let written = self.encoder.encode(&self.block, &mut self.frame);
            if written == 0 {
                debug!("Encoder produced no output for a {} sample block", block_samples);
                self.stats.encode_failures.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            match self.frames.copy_from(&self.frame[..written]) {
                Ok(0) => {}
                Ok(dropped) => {
                    let frames = dropped.div_ceil(self.frame_size) as u64;
                    debug!("Frame buffer full, dropped {} oldest frame(s)", frames);
                    self.stats.frames_dropped.fetch_add(frames, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Frame buffer write failed: {}", e);
                    continue;
                }
            }
            self.stats.frames_encoded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

//! Controller output report layouts
//!
//! Audio reports carry 2 or 4 SBC frames:
//!
//! | offset | content                                   |
//! |--------|-------------------------------------------|
//! | 0      | protocol byte, `0x14` (2 frames) / `0x17` (4 frames) |
//! | 1      | `0x40`                                    |
//! | 2      | `0xA2`                                    |
//! | 3..5   | packet counter, little-endian             |
//! | 5      | output mode                               |
//! | 6..    | concatenated SBC frames, zero padded      |
//! | last 4 | CRC32, little-endian                      |
//!
//! The audio report CRC also covers the Bluetooth HID transaction header
//! `0xA2`, which precedes the report on the wire but is not part of the
//! buffer handed to the device.

use crate::audio::RingBuffer;
use crate::error::{Result, StreamerError};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Bluetooth HID "DATA | Output" transaction header
pub const BT_OUTPUT_HEADER: u8 = 0xA2;

/// Offset of the first frame byte in an audio report
pub const AUDIO_PAYLOAD_OFFSET: usize = 6;

/// Size of the reusable report buffer
pub const REPORT_BUFFER_SIZE: usize = 640;

/// Report id of the controller configuration report
pub const CONTROL_REPORT_ID: u8 = 0x11;

/// Length of the controller configuration report
pub const CONTROL_REPORT_SIZE: usize = 78;

const CRC_SIZE: usize = 4;

/// Shape of an audio report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioReportKind {
    /// Two frames, protocol `0x14`, 270 bytes
    TwoFrames,
    /// Four frames, protocol `0x17`, 462 bytes
    FourFrames,
}

impl AudioReportKind {
    /// Pick the largest shape the buffered frames can fill
    pub fn for_available(frames: usize) -> Option<Self> {
        if frames >= 4 {
            Some(AudioReportKind::FourFrames)
        } else if frames >= 2 {
            Some(AudioReportKind::TwoFrames)
        } else {
            None
        }
    }

    pub fn protocol(&self) -> u8 {
        match self {
            AudioReportKind::TwoFrames => 0x14,
            AudioReportKind::FourFrames => 0x17,
        }
    }

    /// Total report length including the checksum
    pub fn size(&self) -> usize {
        match self {
            AudioReportKind::TwoFrames => 270,
            AudioReportKind::FourFrames => 462,
        }
    }

    pub fn frames(&self) -> usize {
        match self {
            AudioReportKind::TwoFrames => 2,
            AudioReportKind::FourFrames => 4,
        }
    }
}

/// Where the controller plays the audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Built-in speaker
    #[default]
    Speaker,
    /// Headset jack
    Headset,
}

impl OutputMode {
    pub fn flag(&self) -> u8 {
        match self {
            OutputMode::Speaker => 0x02,
            OutputMode::Headset => 0x24,
        }
    }
}

/// CRC32 (IEEE, reflected) over an optional prefix byte followed by `body`
pub fn report_crc(prefix: Option<u8>, body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    if let Some(prefix) = prefix {
        hasher.update(&[prefix]);
    }
    hasher.update(body);
    hasher.finalize()
}

/// Checksum an audio report would carry: CRC32 of `0xA2` + `report[..len - 4]`
pub fn audio_report_crc(report: &[u8]) -> u32 {
    report_crc(Some(BT_OUTPUT_HEADER), &report[..report.len() - CRC_SIZE])
}

/// Write the CRC of `report[..len - 4]` into the last four bytes
fn seal(report: &mut [u8], prefix: Option<u8>) {
    let split = report.len() - CRC_SIZE;
    let crc = report_crc(prefix, &report[..split]);
    report[split..].copy_from_slice(&crc.to_le_bytes());
}

/// Check the trailing CRC of a finished audio report
pub fn verify_audio_report(report: &[u8]) -> bool {
    if report.len() <= CRC_SIZE {
        return false;
    }
    let split = report.len() - CRC_SIZE;
    let stored = u32::from_le_bytes([
        report[split],
        report[split + 1],
        report[split + 2],
        report[split + 3],
    ]);
    stored == audio_report_crc(report)
}

/// Builds audio reports from buffered SBC frames
///
/// Owns the packet counter and a reusable report buffer. Only the first
/// `kind.size()` bytes of the buffer are ever handed out.
pub struct AudioReportFramer {
    buffer: [u8; REPORT_BUFFER_SIZE],
    counter: u16,
    mode: OutputMode,
    frame_size: usize,
}

impl AudioReportFramer {
    /// Create a framer for frames of `frame_size` bytes
    pub fn new(mode: OutputMode, frame_size: usize) -> Result<Self> {
        let needed = AUDIO_PAYLOAD_OFFSET + 4 * frame_size + CRC_SIZE;
        if frame_size == 0 || needed > AudioReportKind::FourFrames.size() {
            return Err(StreamerError::InvalidConfig(format!(
                "SBC frame size {} does not fit the audio report",
                frame_size
            )));
        }

        Ok(Self {
            buffer: [0; REPORT_BUFFER_SIZE],
            counter: 0,
            mode,
            frame_size,
        })
    }

    /// Counter value the next report will carry
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Pop the next report's frames from `frames` and build it
    ///
    /// Returns `None` while fewer than two whole frames are buffered.
    pub fn next_report(&mut self, frames: &RingBuffer<u8>) -> Option<&[u8]> {
        let available = frames.current_length() / self.frame_size;
        let kind = AudioReportKind::for_available(available)?;
        let size = kind.size();

        self.buffer.fill(0);
        self.buffer[0] = kind.protocol();
        self.buffer[1] = 0x40;
        self.buffer[2] = BT_OUTPUT_HEADER;
        self.buffer[3..5].copy_from_slice(&self.counter.to_le_bytes());
        self.buffer[5] = self.mode.flag();

        self.counter = self.counter.wrapping_add(kind.frames() as u16);

        let payload = kind.frames() * self.frame_size;
        let copied = frames.copy_to_offset(&mut self.buffer, AUDIO_PAYLOAD_OFFSET, payload);
        if copied < payload {
            debug!(
                "Audio report underflow: {} of {} frame bytes",
                copied, payload
            );
        }

        seal(&mut self.buffer[..size], Some(BT_OUTPUT_HEADER));
        Some(&self.buffer[..size])
    }
}

/// Lightbar and volume state sent once before audio starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub led: [u8; 3],
    pub volume_left: u8,
    pub volume_right: u8,
    pub volume_mic: u8,
    pub volume_speaker: u8,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            led: [0x00, 0x00, 0x40],
            volume_left: 0x50,
            volume_right: 0x50,
            volume_mic: 0x00,
            volume_speaker: 0x50,
        }
    }
}

/// Build the 0x11 configuration report
///
/// Its CRC covers the report bytes only, without the `0xA2` prefix.
pub fn control_report(settings: &ControllerSettings) -> [u8; CONTROL_REPORT_SIZE] {
    let mut report = [0u8; CONTROL_REPORT_SIZE];
    report[0] = CONTROL_REPORT_ID;
    report[1] = 0xC0;
    report[2] = 0xA0;
    // rumble | lightbar | flash | volume left/right/mic/speaker
    report[3] = 0xF7;
    report[8..11].copy_from_slice(&settings.led);
    report[21] = settings.volume_left;
    report[22] = settings.volume_right;
    report[23] = settings.volume_mic;
    report[24] = settings.volume_speaker;
    seal(&mut report, None);
    report
}

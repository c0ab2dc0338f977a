//! Low-complexity subband codec (SBC) used by the controller's audio reports

mod encoder;
mod tables;

pub use encoder::SbcEncoder;

use crate::error::{Result, StreamerError};

/// Frame synchronization byte
pub const SBC_SYNCWORD: u8 = 0x9C;

/// Block-based audio encoder producing fixed-size frames
pub trait FrameEncoder: Send {
    /// Bytes of 16-bit PCM consumed per frame
    fn input_block_size(&self) -> usize;

    /// Bytes produced per frame
    fn output_frame_size(&self) -> usize;

    /// Encode one block of interleaved PCM into `frame`
    ///
    /// Returns the number of bytes written, or 0 when the block or the
    /// output slice has the wrong size.
    fn encode(&mut self, block: &[i16], frame: &mut [u8]) -> usize;
}

/// Number of subbands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBands {
    Four,
    Eight,
}

impl SubBands {
    pub fn count(&self) -> usize {
        match self {
            SubBands::Four => 4,
            SubBands::Eight => 8,
        }
    }
}

/// Number of blocks per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCount {
    Four,
    Eight,
    Twelve,
    Sixteen,
}

impl BlockCount {
    pub fn count(&self) -> usize {
        match self {
            BlockCount::Four => 4,
            BlockCount::Eight => 8,
            BlockCount::Twelve => 12,
            BlockCount::Sixteen => 16,
        }
    }

    fn code(&self) -> u8 {
        match self {
            BlockCount::Four => 0,
            BlockCount::Eight => 1,
            BlockCount::Twelve => 2,
            BlockCount::Sixteen => 3,
        }
    }
}

/// Channel coding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Mono,
    DualChannel,
    Stereo,
    JointStereo,
}

impl ChannelMode {
    pub fn channels(&self) -> usize {
        match self {
            ChannelMode::Mono => 1,
            _ => 2,
        }
    }

    fn code(&self) -> u8 {
        match self {
            ChannelMode::Mono => 0,
            ChannelMode::DualChannel => 1,
            ChannelMode::Stereo => 2,
            ChannelMode::JointStereo => 3,
        }
    }
}

/// Bit allocation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMethod {
    Loudness,
    Snr,
}

/// Encoder parameters
#[derive(Debug, Clone)]
pub struct SbcConfig {
    pub sample_rate: u32,
    pub subbands: SubBands,
    pub blocks: BlockCount,
    pub channel_mode: ChannelMode,
    pub allocation: AllocationMethod,
    pub bitpool: u8,
}

impl Default for SbcConfig {
    /// Settings the controller's speaker stream expects
    fn default() -> Self {
        Self {
            sample_rate: 32000,
            subbands: SubBands::Eight,
            blocks: BlockCount::Sixteen,
            channel_mode: ChannelMode::JointStereo,
            allocation: AllocationMethod::Snr,
            bitpool: 48,
        }
    }
}

impl SbcConfig {
    /// Check the rate and bitpool against the codec limits
    pub fn validate(&self) -> Result<()> {
        self.frequency_code()?;

        let max_bitpool = match self.channel_mode {
            ChannelMode::Mono | ChannelMode::DualChannel => 16 * self.subbands.count(),
            ChannelMode::Stereo | ChannelMode::JointStereo => 32 * self.subbands.count(),
        };
        let max_bitpool = max_bitpool.min(250);

        if self.bitpool < 2 || self.bitpool as usize > max_bitpool {
            return Err(StreamerError::Encoder(format!(
                "bitpool {} outside 2..={} for {:?}",
                self.bitpool, max_bitpool, self.channel_mode
            )));
        }

        Ok(())
    }

    pub(crate) fn frequency_code(&self) -> Result<u8> {
        match self.sample_rate {
            16000 => Ok(0),
            32000 => Ok(1),
            44100 => Ok(2),
            48000 => Ok(3),
            other => Err(StreamerError::Encoder(format!(
                "unsupported SBC sample rate {}",
                other
            ))),
        }
    }

    /// Header byte following the syncword
    pub(crate) fn header_byte(&self) -> Result<u8> {
        let allocation = match self.allocation {
            AllocationMethod::Loudness => 0,
            AllocationMethod::Snr => 1,
        };
        let subbands = match self.subbands {
            SubBands::Four => 0,
            SubBands::Eight => 1,
        };

        Ok((self.frequency_code()? << 6)
            | (self.blocks.code() << 4)
            | (self.channel_mode.code() << 2)
            | (allocation << 1)
            | subbands)
    }

    /// Interleaved 16-bit samples per frame
    pub fn samples_per_frame(&self) -> usize {
        self.subbands.count() * self.blocks.count() * self.channel_mode.channels()
    }

    /// PCM bytes per frame
    pub fn code_size(&self) -> usize {
        self.samples_per_frame() * 2
    }

    /// Encoded bytes per frame
    pub fn frame_length(&self) -> usize {
        let subbands = self.subbands.count();
        let blocks = self.blocks.count();
        let channels = self.channel_mode.channels();
        let bitpool = self.bitpool as usize;

        let header = 4 + (4 * subbands * channels) / 8;
        let data_bits = match self.channel_mode {
            ChannelMode::Mono | ChannelMode::DualChannel => blocks * channels * bitpool,
            ChannelMode::Stereo => blocks * bitpool,
            ChannelMode::JointStereo => subbands + blocks * bitpool,
        };

        header + data_bits.div_ceil(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizes() {
        let config = SbcConfig::default();
        config.validate().unwrap();
        assert_eq!(config.code_size(), 512);
        assert_eq!(config.frame_length(), 109);
        assert_eq!(config.header_byte().unwrap(), 0x7F);
    }

    #[test]
    fn test_frame_length_per_mode() {
        let mut config = SbcConfig {
            sample_rate: 44100,
            subbands: SubBands::Eight,
            blocks: BlockCount::Sixteen,
            channel_mode: ChannelMode::Mono,
            allocation: AllocationMethod::Loudness,
            bitpool: 31,
        };
        // 4 + 4 + ceil(16 * 31 / 8)
        assert_eq!(config.frame_length(), 70);

        config.channel_mode = ChannelMode::DualChannel;
        assert_eq!(config.frame_length(), 4 + 8 + 124);

        config.channel_mode = ChannelMode::Stereo;
        assert_eq!(config.frame_length(), 4 + 8 + 62);

        config.subbands = SubBands::Four;
        config.blocks = BlockCount::Four;
        config.channel_mode = ChannelMode::JointStereo;
        // 4 + 4 + ceil((4 + 4 * 31) / 8)
        assert_eq!(config.frame_length(), 24);
    }

    #[test]
    fn test_validate_limits() {
        let mut config = SbcConfig::default();
        config.sample_rate = 22050;
        assert!(config.validate().is_err());

        let mut config = SbcConfig::default();
        config.bitpool = 1;
        assert!(config.validate().is_err());

        config.channel_mode = ChannelMode::Mono;
        config.bitpool = 129;
        assert!(config.validate().is_err());
        config.bitpool = 128;
        assert!(config.validate().is_ok());
    }
}

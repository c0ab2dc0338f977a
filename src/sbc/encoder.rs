//! SBC frame encoder
//!
//! Floating-point implementation of the A2DP reference encoder: polyphase
//! analysis filterbank, scale factors, joint-stereo decision, bit allocation,
//! quantization, and frame packing with the header CRC-8.

use super::tables::{LOUDNESS_OFFSET_4, LOUDNESS_OFFSET_8, PROTO_4_40, PROTO_8_80};
use super::{AllocationMethod, ChannelMode, FrameEncoder, SbcConfig, SBC_SYNCWORD};
use crate::error::Result;
use tracing::{debug, trace};

const MAX_SUBBANDS: usize = 8;
const MAX_BLOCKS: usize = 16;
const MAX_CHANNELS: usize = 2;
const MAX_SCALE_FACTOR: u8 = 15;

/// Per-frame working state, indexed `[channel][subband]`
struct FrameData {
    samples: [[[f32; MAX_SUBBANDS]; MAX_CHANNELS]; MAX_BLOCKS],
    scale_factors: [[u8; MAX_SUBBANDS]; MAX_CHANNELS],
    bits: [[u32; MAX_SUBBANDS]; MAX_CHANNELS],
    join: [bool; MAX_SUBBANDS],
}

impl FrameData {
    fn new() -> Self {
        Self {
            samples: [[[0.0; MAX_SUBBANDS]; MAX_CHANNELS]; MAX_BLOCKS],
            scale_factors: [[0; MAX_SUBBANDS]; MAX_CHANNELS],
            bits: [[0; MAX_SUBBANDS]; MAX_CHANNELS],
            join: [false; MAX_SUBBANDS],
        }
    }
}

/// Stateful SBC encoder
///
/// The analysis filter keeps history across frames, so one encoder must be
/// fed one continuous stream.
pub struct SbcEncoder {
    config: SbcConfig,
    header: u8,
    subbands: usize,
    blocks: usize,
    channels: usize,
    /// Analysis input history per channel, newest sample at index 0
    history: [[f32; 10 * MAX_SUBBANDS]; MAX_CHANNELS],
    /// Cosine modulation matrix, `subbands` rows of `2 * subbands`
    matrix: Vec<f32>,
    frame: FrameData,
}

impl SbcEncoder {
    /// Create an encoder for the given parameters
    pub fn new(config: SbcConfig) -> Result<Self> {
        config.validate()?;
        let header = config.header_byte()?;

        let subbands = config.subbands.count();
        let blocks = config.blocks.count();
        let channels = config.channel_mode.channels();

        let mut matrix = Vec::with_capacity(subbands * 2 * subbands);
        for k in 0..subbands {
            for i in 0..2 * subbands {
                let phase = (k as f64 + 0.5) * (i as f64 - subbands as f64 / 2.0)
                    * std::f64::consts::PI
                    / subbands as f64;
                matrix.push(phase.cos() as f32);
            }
        }

        debug!(
            "SBC encoder: {} Hz, {} subbands, {} blocks, {:?}, bitpool {} -> {} byte frames",
            config.sample_rate,
            subbands,
            blocks,
            config.channel_mode,
            config.bitpool,
            config.frame_length()
        );

        Ok(Self {
            config,
            header,
            subbands,
            blocks,
            channels,
            history: [[0.0; 10 * MAX_SUBBANDS]; MAX_CHANNELS],
            matrix,
            frame: FrameData::new(),
        })
    }

    /// Encoder parameters
    pub fn config(&self) -> &SbcConfig {
        &self.config
    }

    /// Run one block of `subbands` new samples through the analysis filter
    fn analyze(&mut self, channel: usize, input: &[f32], output: &mut [f32; MAX_SUBBANDS]) {
        let sb = self.subbands;
        let taps = 10 * sb;
        let window: &[f32] = if sb == 4 { &PROTO_4_40 } else { &PROTO_8_80 };

        let x = &mut self.history[channel];
        x.copy_within(0..taps - sb, sb);
        for (i, &sample) in input.iter().enumerate() {
            x[sb - 1 - i] = sample;
        }

        let mut y = [0.0f32; 2 * MAX_SUBBANDS];
        for (i, acc) in y.iter_mut().enumerate().take(2 * sb) {
            *acc = (0..5)
                .map(|j| {
                    let idx = i + j * 2 * sb;
                    x[idx] * window[idx]
                })
                .sum();
        }

        for (k, out) in output.iter_mut().enumerate().take(sb) {
            let row = &self.matrix[k * 2 * sb..(k + 1) * 2 * sb];
            *out = row.iter().zip(&y).map(|(m, y)| m * y).sum();
        }
    }

    fn scale_factor(max_abs: f32) -> u8 {
        let mut sf = 0u8;
        let mut limit = 2.0f32;
        while sf < MAX_SCALE_FACTOR && max_abs >= limit {
            sf += 1;
            limit *= 2.0;
        }
        sf
    }

    fn compute_scale_factors(&mut self) {
        for ch in 0..self.channels {
            for sb in 0..self.subbands {
                let max_abs = (0..self.blocks)
                    .map(|blk| self.frame.samples[blk][ch][sb].abs())
                    .fold(0.0f32, f32::max);
                self.frame.scale_factors[ch][sb] = Self::scale_factor(max_abs);
            }
        }
    }

    /// Switch subbands to mid/side where that needs smaller scale factors
    fn apply_joint_stereo(&mut self) {
        self.frame.join = [false; MAX_SUBBANDS];

        // The last subband is never joined
        for sb in 0..self.subbands - 1 {
            let mut max_mid = 0.0f32;
            let mut max_side = 0.0f32;
            for blk in 0..self.blocks {
                let left = self.frame.samples[blk][0][sb];
                let right = self.frame.samples[blk][1][sb];
                max_mid = max_mid.max(((left + right) / 2.0).abs());
                max_side = max_side.max(((left - right) / 2.0).abs());
            }

            let sf_mid = Self::scale_factor(max_mid);
            let sf_side = Self::scale_factor(max_side);
            let sf_lr = self.frame.scale_factors[0][sb] + self.frame.scale_factors[1][sb];

            if sf_mid + sf_side < sf_lr {
                self.frame.join[sb] = true;
                self.frame.scale_factors[0][sb] = sf_mid;
                self.frame.scale_factors[1][sb] = sf_side;
                for blk in 0..self.blocks {
                    let left = self.frame.samples[blk][0][sb];
                    let right = self.frame.samples[blk][1][sb];
                    self.frame.samples[blk][0][sb] = (left + right) / 2.0;
                    self.frame.samples[blk][1][sb] = (left - right) / 2.0;
                }
            }
        }
    }

    fn bitneed(&self, channel: usize, freq: usize) -> [i32; MAX_SUBBANDS] {
        let mut need = [0i32; MAX_SUBBANDS];
        for (sb, slot) in need.iter_mut().enumerate().take(self.subbands) {
            let sf = self.frame.scale_factors[channel][sb] as i32;
            *slot = match self.config.allocation {
                AllocationMethod::Snr => sf,
                AllocationMethod::Loudness => {
                    if sf == 0 {
                        -5
                    } else {
                        let offset = if self.subbands == 4 {
                            LOUDNESS_OFFSET_4[freq][sb]
                        } else {
                            LOUDNESS_OFFSET_8[freq][sb]
                        };
                        let loudness = sf - offset;
                        if loudness > 0 {
                            loudness / 2
                        } else {
                            loudness
                        }
                    }
                }
            };
        }
        need
    }

    /// Distribute the bitpool over `channels` (both channels share one pool
    /// in stereo modes, each channel has its own otherwise)
    fn allocate(&mut self, channels: &[usize], freq: usize) {
        let bitpool = self.config.bitpool as i32;
        let sb_count = self.subbands;

        let needs: Vec<[i32; MAX_SUBBANDS]> =
            channels.iter().map(|&ch| self.bitneed(ch, freq)).collect();

        let max_bitneed = needs
            .iter()
            .flat_map(|n| n[..sb_count].iter().copied())
            .max()
            .unwrap_or(0);
        let min_bitneed = needs
            .iter()
            .flat_map(|n| n[..sb_count].iter().copied())
            .min()
            .unwrap_or(0);

        let mut bitcount = 0i32;
        let mut slicecount = 0i32;
        let mut bitslice = max_bitneed + 1;

        loop {
            bitslice -= 1;
            bitcount += slicecount;
            slicecount = 0;
            for need in &needs {
                for &n in &need[..sb_count] {
                    if n > bitslice + 1 && n < bitslice + 16 {
                        slicecount += 1;
                    } else if n == bitslice + 1 {
                        slicecount += 2;
                    }
                }
            }
            if bitcount + slicecount >= bitpool || bitslice < min_bitneed - 16 {
                break;
            }
        }

        if bitcount + slicecount == bitpool {
            bitcount += slicecount;
            bitslice -= 1;
        }

        let mut bits = [[0i32; MAX_SUBBANDS]; MAX_CHANNELS];
        for (c, need) in needs.iter().enumerate() {
            for sb in 0..sb_count {
                bits[c][sb] = if need[sb] < bitslice + 2 {
                    0
                } else {
                    (need[sb] - bitslice).min(16)
                };
            }
        }

        // Hand out the remaining bits in subband order, alternating channels
        let mut c = 0;
        let mut sb = 0;
        while bitcount < bitpool && sb < sb_count {
            if bits[c][sb] >= 2 && bits[c][sb] < 16 {
                bits[c][sb] += 1;
                bitcount += 1;
            } else if needs[c][sb] == bitslice + 1 && bitpool > bitcount + 1 {
                bits[c][sb] = 2;
                bitcount += 2;
            }
            c += 1;
            if c == needs.len() {
                c = 0;
                sb += 1;
            }
        }

        let mut c = 0;
        let mut sb = 0;
        while bitcount < bitpool && sb < sb_count {
            if bits[c][sb] < 16 {
                bits[c][sb] += 1;
                bitcount += 1;
            }
            c += 1;
            if c == needs.len() {
                c = 0;
                sb += 1;
            }
        }

        for (c, &ch) in channels.iter().enumerate() {
            for sb in 0..sb_count {
                self.frame.bits[ch][sb] = bits[c][sb] as u32;
            }
        }
    }

    fn pack(&self, out: &mut [u8]) -> usize {
        let length = self.config.frame_length();
        out[..length].fill(0);

        out[0] = SBC_SYNCWORD;
        out[1] = self.header;
        out[2] = self.config.bitpool;

        let mut writer = BitWriter::new(&mut out[4..length]);

        if self.config.channel_mode == ChannelMode::JointStereo {
            for sb in 0..self.subbands {
                writer.put(self.frame.join[sb] as u32, 1);
            }
        }
        for ch in 0..self.channels {
            for sb in 0..self.subbands {
                writer.put(self.frame.scale_factors[ch][sb] as u32, 4);
            }
        }
        let crc_bits = writer.position();

        for blk in 0..self.blocks {
            for ch in 0..self.channels {
                for sb in 0..self.subbands {
                    let bits = self.frame.bits[ch][sb];
                    if bits == 0 {
                        continue;
                    }
                    let levels = ((1u32 << bits) - 1) as f32;
                    let scale = (1u32 << (self.frame.scale_factors[ch][sb] as u32 + 1)) as f32;
                    let normalized = self.frame.samples[blk][ch][sb] / scale;
                    let quantized = ((normalized + 1.0) * levels / 2.0)
                        .floor()
                        .clamp(0.0, levels - 1.0) as u32;
                    writer.put(quantized, bits);
                }
            }
        }

        out[3] = header_crc(out, crc_bits);
        length
    }
}

impl FrameEncoder for SbcEncoder {
    fn input_block_size(&self) -> usize {
        self.config.code_size()
    }

    fn output_frame_size(&self) -> usize {
        self.config.frame_length()
    }

    fn encode(&mut self, block: &[i16], frame: &mut [u8]) -> usize {
        if block.len() != self.config.samples_per_frame()
            || frame.len() < self.config.frame_length()
        {
            trace!(
                "SBC encode rejected: {} samples in, {} bytes out",
                block.len(),
                frame.len()
            );
            return 0;
        }

        let sb = self.subbands;
        let channels = self.channels;
        let mut input = [0.0f32; MAX_SUBBANDS];
        let mut output = [0.0f32; MAX_SUBBANDS];

        for blk in 0..self.blocks {
            let frames = &block[blk * sb * channels..(blk + 1) * sb * channels];
            for ch in 0..channels {
                for (i, slot) in input.iter_mut().enumerate().take(sb) {
                    *slot = frames[i * channels + ch] as f32;
                }
                self.analyze(ch, &input[..sb], &mut output);
                self.frame.samples[blk][ch] = output;
            }
        }

        self.compute_scale_factors();

        if self.config.channel_mode == ChannelMode::JointStereo {
            self.apply_joint_stereo();
        }

        // frequency_code was validated in new()
        let freq = (self.header >> 6) as usize;
        match self.config.channel_mode {
            ChannelMode::Mono => self.allocate(&[0], freq),
            ChannelMode::DualChannel => {
                self.allocate(&[0], freq);
                self.allocate(&[1], freq);
            }
            ChannelMode::Stereo | ChannelMode::JointStereo => self.allocate(&[0, 1], freq),
        }

        self.pack(frame)
    }
}

/// MSB-first bit writer over a byte slice
struct BitWriter<'a> {
    data: &'a mut [u8],
    bit: usize,
}

impl<'a> BitWriter<'a> {
    fn new(data: &'a mut [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn put(&mut self, value: u32, bits: u32) {
        for i in (0..bits).rev() {
            if (value >> i) & 1 == 1 {
                self.data[self.bit / 8] |= 0x80 >> (self.bit % 8);
            }
            self.bit += 1;
        }
    }

    fn position(&self) -> usize {
        self.bit
    }
}

/// CRC-8 (x^8 + x^4 + x^3 + x^2 + 1, seed 0x0F) over the first `bits` bits
pub(crate) fn crc8(data: &[u8], bits: usize) -> u8 {
    let mut crc = 0x0Fu8;
    for i in 0..bits {
        let bit = (data[i / 8] >> (7 - i % 8)) & 1;
        let top = crc >> 7;
        crc <<= 1;
        if bit ^ top == 1 {
            crc ^= 0x1D;
        }
    }
    crc
}

/// Frame check: header bytes 1..3 plus the join and scale-factor bits
fn header_crc(frame: &[u8], payload_bits: usize) -> u8 {
    let payload_bytes = payload_bits.div_ceil(8);
    let mut covered = Vec::with_capacity(2 + payload_bytes);
    covered.extend_from_slice(&frame[1..3]);
    covered.extend_from_slice(&frame[4..4 + payload_bytes]);
    crc8(&covered, 16 + payload_bits)
}

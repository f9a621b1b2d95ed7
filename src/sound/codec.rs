//! Codec seam plus the built-in PCM stream format.
//!
//! One compressed interval is one self-contained stream:
//!
//! ```text
//! header  "IJPC" | version u8 | channels u8 | sample width u8 | sample rate u32
//! frame   frame count u16 | frame count * channels interleaved samples
//! ...
//! tail    frame count 0
//! ```
//!
//! Everything is network byte order.  Samples are signed 8 bit below [`QUALITY_NORMAL`] and
//! signed 16 bit otherwise.  The decoder accepts the stream in arbitrary slices, which is what
//! voice chat delivers.
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use std::{error::Error, fmt, io::Cursor};

use crate::common::box_error::BoxError;

use super::samples_buffer::SamplesBuffer;

pub const QUALITY_LOW: f32 = 0.1;
pub const QUALITY_NORMAL: f32 = 0.5;
pub const QUALITY_HIGH: f32 = 1.0;

const MAGIC: &[u8; 4] = b"IJPC";
const VERSION: u8 = 1;
const HEADER_SIZE: usize = 11;
const MAX_FRAMES_PER_BLOCK: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    BadMagic,
    UnsupportedVersion(u8),
    BadHeader(String),
    ChannelMismatch { expected: usize, got: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::BadMagic => write!(f, "stream does not start with a codec header"),
            CodecError::UnsupportedVersion(v) => write!(f, "unsupported stream version {}", v),
            CodecError::BadHeader(why) => write!(f, "bad stream header: {}", why),
            CodecError::ChannelMismatch { expected, got } => {
                write!(f, "encoder has {} channels, got {}", expected, got)
            }
        }
    }
}

impl Error for CodecError {}

/// Turns blocks of samples into stream bytes, one stream per interval
pub trait AudioEncoder: Send {
    fn channels(&self) -> usize;
    fn sample_rate(&self) -> u32;
    fn quality(&self) -> f32;
    fn encode(&mut self, samples: &SamplesBuffer) -> Result<Vec<u8>, BoxError>;
    /// close the current stream, returning the tail bytes
    fn finish_interval(&mut self) -> Result<Vec<u8>, BoxError>;
}

pub trait EncoderFactory: Send + Sync {
    fn create_encoder(&self, channels: usize, sample_rate: u32, quality: f32) -> Result<Box<dyn AudioEncoder>, BoxError>;
}

/// Incremental stream decoder
pub trait AudioDecoder: Send {
    fn add_input(&mut self, bytes: &[u8]);
    /// decode at most `max_frames`.  Returns fewer (maybe none) when input runs out.
    fn decode(&mut self, max_frames: usize) -> Result<SamplesBuffer, BoxError>;
    /// known once the header arrived
    fn sample_rate(&self) -> Option<u32>;
    fn channels(&self) -> Option<usize>;
    /// the tail was seen, nothing more will come out
    fn is_finished(&self) -> bool;
}

pub trait DecoderFactory: Send + Sync {
    fn create_decoder(&self) -> Box<dyn AudioDecoder>;
}

fn sample_width(quality: f32) -> u8 {
    if quality < QUALITY_NORMAL {
        1
    } else {
        2
    }
}

pub struct PcmEncoder {
    channels: usize,
    sample_rate: u32,
    quality: f32,
    width: u8,
    header_pending: bool,
}

impl PcmEncoder {
    pub fn new(channels: usize, sample_rate: u32, quality: f32) -> Result<PcmEncoder, BoxError> {
        if channels == 0 || channels > u8::MAX as usize {
            return Err(Box::new(CodecError::BadHeader(format!("{} channels", channels))));
        }
        Ok(PcmEncoder {
            channels,
            sample_rate,
            quality,
            width: sample_width(quality),
            header_pending: true,
        })
    }

    fn write_header(&mut self, out: &mut Vec<u8>) -> Result<(), BoxError> {
        out.extend_from_slice(MAGIC);
        out.write_u8(VERSION)?;
        out.write_u8(self.channels as u8)?;
        out.write_u8(self.width)?;
        out.write_u32::<NetworkEndian>(self.sample_rate)?;
        self.header_pending = false;
        Ok(())
    }

    fn write_sample(&self, out: &mut Vec<u8>, sample: f32) -> Result<(), BoxError> {
        let s = sample.clamp(-1.0, 1.0);
        if self.width == 1 {
            out.write_i8((s * i8::MAX as f32).round() as i8)?;
        } else {
            out.write_i16::<NetworkEndian>((s * i16::MAX as f32).round() as i16)?;
        }
        Ok(())
    }
}

impl AudioEncoder for PcmEncoder {
    fn channels(&self) -> usize {
        self.channels
    }
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn quality(&self) -> f32 {
        self.quality
    }

    fn encode(&mut self, samples: &SamplesBuffer) -> Result<Vec<u8>, BoxError> {
        let mut out = vec![];
        if samples.is_empty() {
            return Ok(out);
        }
        if samples.channels() != self.channels {
            return Err(Box::new(CodecError::ChannelMismatch {
                expected: self.channels,
                got: samples.channels(),
            }));
        }
        if self.header_pending {
            self.write_header(&mut out)?;
        }
        let mut start = 0;
        while start < samples.frames() {
            let count = (samples.frames() - start).min(MAX_FRAMES_PER_BLOCK);
            out.write_u16::<NetworkEndian>(count as u16)?;
            for i in start..start + count {
                for c in 0..self.channels {
                    self.write_sample(&mut out, samples.channel(c)[i])?;
                }
            }
            start += count;
        }
        Ok(out)
    }

    fn finish_interval(&mut self) -> Result<Vec<u8>, BoxError> {
        let mut out = vec![];
        if self.header_pending {
            self.write_header(&mut out)?;
        }
        out.write_u16::<NetworkEndian>(0)?;
        self.header_pending = true;
        Ok(out)
    }
}

#[derive(Clone, Copy, Debug)]
struct StreamHeader {
    channels: usize,
    width: usize,
    sample_rate: u32,
}

pub struct PcmDecoder {
    pending: Vec<u8>,
    header: Option<StreamHeader>,
    frames_left_in_block: usize,
    finished: bool,
}

impl PcmDecoder {
    pub fn new() -> PcmDecoder {
        PcmDecoder {
            pending: vec![],
            header: None,
            frames_left_in_block: 0,
            finished: false,
        }
    }

    fn parse_header(&mut self) -> Result<Option<StreamHeader>, BoxError> {
        if let Some(h) = self.header {
            return Ok(Some(h));
        }
        let check = self.pending.len().min(MAGIC.len());
        if self.pending[..check] != MAGIC[..check] {
            return Err(Box::new(CodecError::BadMagic));
        }
        if self.pending.len() < HEADER_SIZE {
            return Ok(None);
        }
        let mut rdr = Cursor::new(&self.pending[MAGIC.len()..HEADER_SIZE]);
        let version = rdr.read_u8()?;
        if version != VERSION {
            return Err(Box::new(CodecError::UnsupportedVersion(version)));
        }
        let channels = rdr.read_u8()? as usize;
        let width = rdr.read_u8()? as usize;
        let sample_rate = rdr.read_u32::<NetworkEndian>()?;
        if channels == 0 || !(width == 1 || width == 2) || sample_rate == 0 {
            return Err(Box::new(CodecError::BadHeader(format!(
                "channels {} width {} rate {}",
                channels, width, sample_rate
            ))));
        }
        self.pending.drain(..HEADER_SIZE);
        let header = StreamHeader {
            channels,
            width,
            sample_rate,
        };
        self.header = Some(header);
        Ok(Some(header))
    }
}

impl AudioDecoder for PcmDecoder {
    fn add_input(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn decode(&mut self, max_frames: usize) -> Result<SamplesBuffer, BoxError> {
        let header = match self.parse_header()? {
            Some(h) => h,
            None => return Ok(SamplesBuffer::stereo(0)),
        };
        let mut out = SamplesBuffer::new(header.channels, 0);
        let frame_bytes = header.channels * header.width;
        let mut decoded: Vec<f32> = Vec::with_capacity(max_frames * header.channels);
        let mut pos = 0;
        let mut produced = 0;
        while produced < max_frames && !self.finished {
            if self.frames_left_in_block == 0 {
                if self.pending.len() - pos < 2 {
                    break;
                }
                let count = Cursor::new(&self.pending[pos..pos + 2]).read_u16::<NetworkEndian>()?;
                pos += 2;
                if count == 0 {
                    self.finished = true;
                    break;
                }
                self.frames_left_in_block = count as usize;
            }
            let available = (self.pending.len() - pos) / frame_bytes;
            let take = available.min(self.frames_left_in_block).min(max_frames - produced);
            if take == 0 {
                break;
            }
            let mut rdr = Cursor::new(&self.pending[pos..pos + take * frame_bytes]);
            for _ in 0..take * header.channels {
                let s = if header.width == 1 {
                    rdr.read_i8()? as f32 / i8::MAX as f32
                } else {
                    rdr.read_i16::<NetworkEndian>()? as f32 / i16::MAX as f32
                };
                decoded.push(s);
            }
            pos += take * frame_bytes;
            produced += take;
            self.frames_left_in_block -= take;
        }
        self.pending.drain(..pos);
        if !decoded.is_empty() {
            out = SamplesBuffer::from_interleaved(&decoded, header.channels);
        }
        Ok(out)
    }

    fn sample_rate(&self) -> Option<u32> {
        self.header.map(|h| h.sample_rate)
    }
    fn channels(&self) -> Option<usize> {
        self.header.map(|h| h.channels)
    }
    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Factory for the built-in stream format
#[derive(Clone, Copy, Debug, Default)]
pub struct PcmCodec;

impl EncoderFactory for PcmCodec {
    fn create_encoder(&self, channels: usize, sample_rate: u32, quality: f32) -> Result<Box<dyn AudioEncoder>, BoxError> {
        Ok(Box::new(PcmEncoder::new(channels, sample_rate, quality)?))
    }
}

impl DecoderFactory for PcmCodec {
    fn create_decoder(&self) -> Box<dyn AudioDecoder> {
        Box::new(PcmDecoder::new())
    }
}

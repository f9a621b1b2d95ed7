//! One remote interval on its way from compressed bytes to samples.
//!
//! Shared between the remote channel node (audio thread) and the pre-decode pool.  Every
//! call the audio thread makes is non-blocking: metadata lives in atomics and the decoder
//! itself is only ever `try_lock`ed from [`IntervalDecoder::read`].
use log::{trace, warn};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    Mutex, TryLockError,
};

use super::{codec::AudioDecoder, samples_buffer::SamplesBuffer};

static NEXT_DECODER_ID: AtomicU64 = AtomicU64::new(1);

struct DecodeState {
    decoder: Box<dyn AudioDecoder>,
    decoded: SamplesBuffer,
}

pub struct IntervalDecoder {
    id: u64,
    state: Mutex<DecodeState>,
    valid: AtomicBool,
    stopped: AtomicBool,
    fully_decoded: AtomicBool,
    sample_rate: AtomicU32,
    encoded_len: AtomicUsize,
}

impl IntervalDecoder {
    pub fn new(decoder: Box<dyn AudioDecoder>) -> IntervalDecoder {
        IntervalDecoder {
            id: NEXT_DECODER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(DecodeState {
                decoder,
                decoded: SamplesBuffer::stereo(0),
            }),
            valid: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            fully_decoded: AtomicBool::new(false),
            sample_rate: AtomicU32::new(0),
            encoded_len: AtomicUsize::new(0),
        }
    }
    /// a decoder that already holds a complete interval
    pub fn with_bytes(decoder: Box<dyn AudioDecoder>, bytes: &[u8]) -> IntervalDecoder {
        let d = IntervalDecoder::new(decoder);
        d.add_encoded(bytes);
        d
    }

    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
    /// compressed bytes received so far
    pub fn encoded_len(&self) -> usize {
        self.encoded_len.load(Ordering::Acquire)
    }
    /// native rate of the stream, `None` until the header was decoded
    pub fn sample_rate(&self) -> Option<u32> {
        match self.sample_rate.load(Ordering::Acquire) {
            0 => None,
            rate => Some(rate),
        }
    }
    /// the end of the stream was reached and every sample handed out
    pub fn is_fully_decoded(&self) -> bool {
        self.fully_decoded.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn add_encoded(&self, bytes: &[u8]) {
        if bytes.is_empty() || self.stopped.load(Ordering::Acquire) {
            return;
        }
        match self.state.lock() {
            Ok(mut state) => {
                state.decoder.add_input(bytes);
                self.encoded_len.fetch_add(bytes.len(), Ordering::AcqRel);
                self.fully_decoded.store(false, Ordering::Release);
            }
            Err(_) => self.invalidate("poisoned decoder lock"),
        }
    }

    fn invalidate(&self, why: &str) {
        if self.valid.swap(false, Ordering::AcqRel) {
            warn!("interval decoder {} is invalid: {}", self.id, why);
        }
    }

    /// decode until `frames` are buffered or the input runs dry
    fn fill(&self, state: &mut DecodeState, frames: usize) {
        while state.decoded.frames() < frames && !state.decoder.is_finished() {
            match state.decoder.decode(frames - state.decoded.frames()) {
                Ok(block) => {
                    if let Some(rate) = state.decoder.sample_rate() {
                        self.sample_rate.store(rate, Ordering::Release);
                    }
                    if block.is_empty() {
                        break;
                    }
                    if state.decoded.is_empty() {
                        state.decoded.set_channels(block.channels());
                    }
                    state.decoded.append(&block);
                }
                Err(e) => {
                    self.invalidate(&e.to_string());
                    break;
                }
            }
        }
    }

    /// Decode ahead so the first reads on the audio thread are served from memory.  Runs on
    /// the pre-decode pool and is allowed to block.
    pub fn pre_decode(&self, frames: usize) {
        if self.stopped.load(Ordering::Acquire) || !self.is_valid() {
            return;
        }
        match self.state.lock() {
            Ok(mut state) => self.fill(&mut state, frames),
            Err(_) => self.invalidate("poisoned decoder lock"),
        }
    }

    /// Copy up to `frames` decoded frames into `out` (resized to what was copied).  Never
    /// blocks: while the pre-decode pool holds the decoder nothing is returned.
    pub fn read(&self, out: &mut SamplesBuffer, frames: usize) -> usize {
        out.set_frames(0);
        if self.stopped.load(Ordering::Acquire) || !self.is_valid() {
            return 0;
        }
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => {
                trace!("interval decoder {} busy", self.id);
                return 0;
            }
            Err(TryLockError::Poisoned(_)) => {
                self.invalidate("poisoned decoder lock");
                return 0;
            }
        };
        self.fill(&mut state, frames);
        let got = frames.min(state.decoded.frames());
        out.set_channels(state.decoded.channels());
        out.set_frames(got);
        out.copy_from(&state.decoded, 0, 0, got);
        state.decoded.discard_first(got);
        if state.decoder.is_finished() && state.decoded.is_empty() {
            self.fully_decoded.store(true, Ordering::Release);
        }
        got
    }

    /// stop decoding for good and drop what was buffered
    pub fn stop_decoding(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Ok(mut state) = self.state.try_lock() {
            state.decoded.set_frames(0);
        }
    }
}

#[cfg(test)]
mod test_interval_decoder {
    use super::*;
    use crate::sound::codec::{AudioEncoder, PcmDecoder, PcmEncoder, QUALITY_HIGH};

    fn interval_bytes(frames: usize, rate: u32) -> Vec<u8> {
        let mut encoder = PcmEncoder::new(2, rate, QUALITY_HIGH).unwrap();
        let block = SamplesBuffer::from_channels(vec![vec![0.5; frames], vec![-0.5; frames]]);
        let mut bytes = encoder.encode(&block).unwrap();
        bytes.extend(encoder.finish_interval().unwrap());
        bytes
    }

    #[test]
    fn reads_until_fully_decoded() {
        let bytes = interval_bytes(300, 48_000);
        let decoder = IntervalDecoder::with_bytes(Box::new(PcmDecoder::new()), &bytes);
        assert_eq!(decoder.encoded_len(), bytes.len());
        assert_eq!(decoder.sample_rate(), None);
        decoder.pre_decode(256);
        assert_eq!(decoder.sample_rate(), Some(48_000));
        let mut out = SamplesBuffer::stereo(0);
        let mut total = 0;
        while !decoder.is_fully_decoded() {
            let got = decoder.read(&mut out, 128);
            assert_eq!(out.frames(), got);
            if got > 0 {
                assert!((out.channel(1)[0] + 0.5).abs() < 1.0e-4);
            }
            total += got;
        }
        assert_eq!(total, 300);
        assert!(decoder.is_valid());
    }

    #[test]
    fn garbage_invalidates() {
        let decoder = IntervalDecoder::with_bytes(Box::new(PcmDecoder::new()), b"definitely not audio");
        let mut out = SamplesBuffer::stereo(0);
        assert_eq!(decoder.read(&mut out, 64), 0);
        assert!(!decoder.is_valid());
    }

    #[test]
    fn stopped_decoder_gives_nothing() {
        let bytes = interval_bytes(64, 44_100);
        let decoder = IntervalDecoder::with_bytes(Box::new(PcmDecoder::new()), &bytes);
        decoder.stop_decoding();
        let mut out = SamplesBuffer::stereo(0);
        assert_eq!(decoder.read(&mut out, 64), 0);
        decoder.add_encoded(&bytes);
        assert_eq!(decoder.encoded_len(), bytes.len());
    }

    #[test]
    fn ids_are_unique() {
        let a = IntervalDecoder::new(Box::new(PcmDecoder::new()));
        let b = IntervalDecoder::new(Box::new(PcmDecoder::new()));
        assert_ne!(a.id(), b.id());
    }
}

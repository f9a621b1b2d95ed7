//! Playback node for one channel of one remote user.
//!
//! Downloaded intervals queue up in a jitter buffer of [`IntervalDecoder`]s.  At every
//! interval boundary the controller calls [`RemoteChannelNode::start_new_interval`] and the
//! head of the queue becomes the current decoder.  In voice chat mode chunks are appended as
//! they arrive and the node moves to the next decoder as soon as the current one runs dry.
//!
//! The node lives on the audio thread.  The only things it shares are the decoders (with the
//! pre-decode pool) and the current decoder slot.
use arc_swap::ArcSwapOption;
use log::{debug, trace, warn};
use rayon::ThreadPool;
use serde_json::json;
use std::{collections::VecDeque, fmt, sync::Arc};

use crate::common::stream_time_stat::StreamTimeStat;

use super::{
    audio_node::{AudioNode, NodeCore, NodeId},
    codec::DecoderFactory,
    interval_decoder::IntervalDecoder,
    low_cut::{LowCutFilter, LowCutState},
    midi_message::MidiMessage,
    resampler::{LinearResampler, ResamplingCorrector},
    samples_buffer::SamplesBuffer,
};

/// frames decoded in the background as soon as an interval arrives
pub const PRE_DECODE_FRAMES: usize = 256;
pub const DEFAULT_MAX_BUFFERED_INTERVALS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    Intervalic,
    VoiceChat,
    /// switching, silent until the next interval boundary
    Changing,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ChannelMode::Intervalic => "intervalic",
            ChannelMode::VoiceChat => "voice_chat",
            ChannelMode::Changing => "changing",
        };
        write!(f, "{}", name)
    }
}

pub struct RemoteChannelNode {
    core: NodeCore,
    mode: ChannelMode,
    pending_mode: Option<ChannelMode>,
    receive: bool,
    decoders: VecDeque<Arc<IntervalDecoder>>,
    current: ArcSwapOption<IntervalDecoder>,
    decoder_factory: Arc<dyn DecoderFactory>,
    decode_pool: Option<Arc<ThreadPool>>,
    max_buffered: usize,
    low_cut: LowCutFilter,
    resampler: LinearResampler,
    corrector: ResamplingCorrector,
    decoded: SamplesBuffer,
    input: SamplesBuffer,
    overruns: u64,
    depth_stat: StreamTimeStat,
}

impl RemoteChannelNode {
    pub fn new(
        id: NodeId,
        sample_rate: u32,
        voice_chat: bool,
        decoder_factory: Arc<dyn DecoderFactory>,
    ) -> RemoteChannelNode {
        RemoteChannelNode {
            core: NodeCore::new(id, sample_rate),
            mode: if voice_chat {
                ChannelMode::VoiceChat
            } else {
                ChannelMode::Intervalic
            },
            pending_mode: None,
            receive: true,
            decoders: VecDeque::new(),
            current: ArcSwapOption::empty(),
            decoder_factory,
            decode_pool: None,
            max_buffered: DEFAULT_MAX_BUFFERED_INTERVALS,
            low_cut: LowCutFilter::new(LowCutState::Off, sample_rate),
            resampler: LinearResampler::new(),
            corrector: ResamplingCorrector::new(),
            decoded: SamplesBuffer::stereo(0),
            input: SamplesBuffer::stereo(0),
            overruns: 0,
            depth_stat: StreamTimeStat::with_peak_decay(50, 0.1),
        }
    }
    /// pre-decode on this pool instead of inline
    pub fn with_decode_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.decode_pool = Some(pool);
        self
    }
    pub fn with_max_buffered(mut self, max_buffered: usize) -> Self {
        self.max_buffered = max_buffered.max(1);
        self
    }
    pub fn with_low_cut(mut self, state: LowCutState) -> Self {
        self.low_cut.set_state(state);
        self
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }
    pub fn is_voice_chat(&self) -> bool {
        self.mode == ChannelMode::VoiceChat
    }
    pub fn is_playing(&self) -> bool {
        self.current.load().is_some() || self.mode == ChannelMode::VoiceChat
    }
    pub fn is_receiving(&self) -> bool {
        self.receive
    }
    pub fn low_cut(&self) -> LowCutState {
        self.low_cut.state()
    }
    pub fn set_low_cut(&mut self, state: LowCutState) {
        self.low_cut.set_state(state);
    }
    /// Off -> Normal -> Drastic -> Off
    pub fn next_low_cut(&mut self) -> LowCutState {
        let next = self.low_cut.state().next();
        self.low_cut.set_state(next);
        next
    }
    pub fn buffered_intervals(&self) -> usize {
        self.decoders.len()
    }
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
    pub fn depth_stat(&self) -> &StreamTimeStat {
        &self.depth_stat
    }
    pub fn current_decoder(&self) -> Option<Arc<IntervalDecoder>> {
        self.current.load_full()
    }
    pub fn buffered_decoders(&self) -> impl Iterator<Item = &Arc<IntervalDecoder>> {
        self.decoders.iter()
    }

    /// Switch between intervalic and voice chat.  The node goes silent, drops everything it
    /// downloaded and takes the new mode at the next interval boundary.
    pub fn schedule_mode(&mut self, mode: ChannelMode) {
        if mode == ChannelMode::Changing {
            return;
        }
        let target = self.pending_mode.unwrap_or(self.mode);
        if target == mode {
            return;
        }
        debug!("node {} switching {} -> {}", self.core.id(), self.mode, mode);
        self.mode = ChannelMode::Changing;
        self.pending_mode = Some(mode);
        self.discard_downloaded_intervals();
    }

    /// Turning receive off stops decoding right away, not at the boundary
    pub fn set_receive(&mut self, receive: bool) {
        if receive == self.receive {
            return;
        }
        self.receive = receive;
        if !receive {
            self.discard_downloaded_intervals();
        }
    }

    pub fn discard_downloaded_intervals(&mut self) {
        if let Some(current) = self.current.swap(None) {
            current.stop_decoding();
        }
        for d in self.decoders.drain(..) {
            d.stop_decoding();
        }
    }

    fn push_decoder(&mut self, decoder: Arc<IntervalDecoder>) {
        while self.decoders.len() >= self.max_buffered {
            if let Some(oldest) = self.decoders.pop_front() {
                oldest.stop_decoding();
                // voice chat plays from the front of the queue, skip ahead to the next stream
                if self.current_decoder().map(|d| d.id()) == Some(oldest.id()) {
                    self.current.store(None);
                }
                self.overruns += 1;
                warn!(
                    "node {} jitter buffer full ({}), dropped interval {}",
                    self.core.id(),
                    self.max_buffered,
                    oldest.id()
                );
            }
        }
        self.decoders.push_back(decoder);
        self.depth_stat.add_sample(self.decoders.len() as f64);
    }

    fn push_empty_decoder(&mut self) {
        let decoder = IntervalDecoder::new(self.decoder_factory.create_decoder());
        self.push_decoder(Arc::new(decoder));
    }

    /// A complete interval arrived.  Ignored unless the node is intervalic.
    pub fn enqueue_full_interval(&mut self, bytes: &[u8]) -> bool {
        if self.mode != ChannelMode::Intervalic || !self.receive {
            trace!("node {} ignoring full interval in {} mode", self.core.id(), self.mode);
            return false;
        }
        let decoder = Arc::new(IntervalDecoder::with_bytes(
            self.decoder_factory.create_decoder(),
            bytes,
        ));
        self.push_decoder(decoder.clone());
        match &self.decode_pool {
            Some(pool) => pool.spawn(move || decoder.pre_decode(PRE_DECODE_FRAMES)),
            None => decoder.pre_decode(PRE_DECODE_FRAMES),
        }
        true
    }

    /// A voice chat chunk arrived.  Ignored unless the node is in voice chat mode.
    pub fn enqueue_chunk(&mut self, bytes: &[u8], is_first: bool, is_last: bool) -> bool {
        if self.mode != ChannelMode::VoiceChat || !self.receive {
            trace!("node {} ignoring chunk in {} mode", self.core.id(), self.mode);
            return false;
        }
        if self.decoders.is_empty() {
            if !is_first {
                trace!("node {} dropped a chunk from the middle of a stream", self.core.id());
                return false;
            }
            self.push_empty_decoder();
        }
        if let Some(tail) = self.decoders.back() {
            tail.add_encoded(bytes);
        }
        if is_last {
            self.push_empty_decoder();
        }
        true
    }

    /// interval boundary: finish a mode switch, then take the next interval
    pub fn start_new_interval(&mut self) {
        if self.mode == ChannelMode::Changing {
            if let Some(mode) = self.pending_mode.take() {
                debug!("node {} now in {} mode", self.core.id(), mode);
                self.mode = mode;
            }
        }
        if self.mode == ChannelMode::Intervalic {
            self.current.store(self.decoders.pop_front());
        }
    }

    fn drop_invalid(&mut self, decoder: &IntervalDecoder) {
        warn!(
            "node {} dropping invalid decoder {} and {} buffered intervals",
            self.core.id(),
            decoder.id(),
            self.decoders.len()
        );
        self.discard_downloaded_intervals();
    }

    /// Fill `self.input` with `frames` of playable audio.  Returns false for silence.
    fn pull_samples(&mut self, frames: usize) -> bool {
        if !self.receive || self.mode == ChannelMode::Changing {
            return false;
        }
        let decoder = match self.current.load_full() {
            Some(d) if !d.is_stopped() => d,
            _ => {
                self.current.store(None);
                if self.mode != ChannelMode::VoiceChat {
                    return false;
                }
                match self.decoders.front() {
                    Some(front) => {
                        self.current.store(Some(front.clone()));
                        front.clone()
                    }
                    None => return false,
                }
            }
        };
        if !decoder.is_valid() {
            self.drop_invalid(&decoder);
            return false;
        }

        let graph_rate = self.core.sample_rate();
        let native_rate = decoder.sample_rate().unwrap_or(graph_rate);
        let to_read = if native_rate != graph_rate {
            self.corrector.input_length(native_rate, graph_rate, frames)
        } else {
            frames
        };
        let got = decoder.read(&mut self.decoded, to_read);
        if !decoder.is_valid() {
            self.drop_invalid(&decoder);
            return false;
        }

        if self.mode == ChannelMode::VoiceChat && decoder.is_fully_decoded() {
            self.current.store(None);
            if self.decoders.front().map(|d| d.id()) == Some(decoder.id()) {
                self.decoders.pop_front();
            }
        }
        if got == 0 {
            return false;
        }

        self.input.set_channels(self.decoded.channels());
        self.input.set_frames(frames);
        self.input.zero();
        let native_rate = decoder.sample_rate().unwrap_or(graph_rate);
        if native_rate != graph_rate {
            let out_frames = if got == to_read {
                frames
            } else {
                (got * frames + to_read / 2) / to_read.max(1)
            };
            let resampled = self.resampler.resample(&self.decoded, out_frames);
            self.input.copy_from(resampled, 0, 0, out_frames);
        } else {
            self.input.copy_from(&self.decoded, 0, 0, got);
        }
        self.low_cut.process(&mut self.input);
        true
    }

    pub fn as_json(&self) -> serde_json::Value {
        let mut value = self.core.as_json();
        value["mode"] = json!(self.mode.to_string());
        value["lowCut"] = json!(self.low_cut.state().to_string());
        value["receive"] = json!(self.receive);
        value["playing"] = json!(self.is_playing());
        value["depth"] = json!(self.decoders.len());
        value["overruns"] = json!(self.overruns);
        value
    }
}

impl AudioNode for RemoteChannelNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_replacing(
        &mut self,
        _input: &SamplesBuffer,
        out: &mut SamplesBuffer,
        midi: &[MidiMessage],
    ) {
        let frames = out.frames();
        if !self.pull_samples(frames) {
            self.input.set_frames(frames);
            self.input.zero();
        }
        self.core.render_plain(&self.input, out, midi);
    }

    fn set_sample_rate(&mut self, rate: u32) {
        if self.core.set_sample_rate(rate) {
            self.low_cut.set_sample_rate(rate);
            self.corrector.reset();
        }
    }
}

#[cfg(test)]
mod test_remote_channel {
    use super::*;
    use crate::sound::codec::{AudioEncoder, PcmCodec, PcmEncoder, QUALITY_HIGH};

    const RATE: u32 = 44_100;

    fn node(voice_chat: bool) -> RemoteChannelNode {
        RemoteChannelNode::new(3, RATE, voice_chat, Arc::new(PcmCodec))
    }

    fn interval(value: f32, frames: usize, rate: u32) -> Vec<u8> {
        let mut encoder = PcmEncoder::new(1, rate, QUALITY_HIGH).unwrap();
        let mut bytes = encoder
            .encode(&SamplesBuffer::from_channels(vec![vec![value; frames]]))
            .unwrap();
        bytes.extend(encoder.finish_interval().unwrap());
        bytes
    }

    fn render(node: &mut RemoteChannelNode, frames: usize) -> SamplesBuffer {
        let mut out = SamplesBuffer::stereo(frames);
        node.process_replacing(&SamplesBuffer::stereo(frames), &mut out, &[]);
        out
    }

    #[test]
    fn empty_buffer_is_silent() {
        let mut n = node(false);
        assert!(!n.is_playing());
        let out = render(&mut n, 64);
        assert!(out.channel(0).iter().all(|s| *s == 0.0));
        n.start_new_interval();
        assert!(!n.is_playing());
        assert!(render(&mut n, 64).channel(1).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn intervals_play_in_order() {
        let mut n = node(false);
        let sizes = [1000, 2000, 3000];
        for (i, frames) in sizes.iter().enumerate() {
            assert!(n.enqueue_full_interval(&interval(0.1 * (i + 1) as f32, *frames, RATE)));
        }
        assert_eq!(n.buffered_intervals(), 3);
        let mut seen = vec![];
        for _ in 0..3 {
            n.start_new_interval();
            let current = n.current_decoder().unwrap();
            seen.push(current.id());
            let out = render(&mut n, 32);
            assert!(out.channel(0)[0] > 0.0);
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        n.start_new_interval();
        assert!(n.current_decoder().is_none());
        assert!(!n.is_playing());
    }

    #[test]
    fn invalid_decoder_clears_everything() {
        let mut n = node(false);
        n.enqueue_full_interval(b"this is not a stream");
        n.enqueue_full_interval(&interval(0.5, 100, RATE));
        n.start_new_interval();
        let out = render(&mut n, 32);
        assert!(out.channel(0).iter().all(|s| *s == 0.0));
        assert!(n.current_decoder().is_none());
        assert_eq!(n.buffered_intervals(), 0);
    }

    #[test]
    fn receive_off_drops_downloads() {
        let mut n = node(false);
        n.enqueue_full_interval(&interval(0.5, 100, RATE));
        n.enqueue_full_interval(&interval(0.5, 100, RATE));
        n.start_new_interval();
        n.set_receive(false);
        assert!(n.current_decoder().is_none());
        assert_eq!(n.buffered_intervals(), 0);
        assert!(!n.enqueue_full_interval(&interval(0.5, 100, RATE)));
        assert!(render(&mut n, 16).channel(0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn voice_chat_chunks_accumulate() {
        let mut n = node(true);
        assert!(n.is_playing());
        assert!(!n.enqueue_chunk(&[0u8; 30], false, false));
        assert!(n.enqueue_chunk(&[0u8; 20], true, false));
        assert!(n.enqueue_chunk(&[0u8; 30], false, false));
        assert!(n.enqueue_chunk(&[0u8; 10], false, true));
        let lens: Vec<usize> = n.buffered_decoders().map(|d| d.encoded_len()).collect();
        assert_eq!(lens, vec![60, 0]);
        // full intervals are not for voice chat nodes
        assert!(!n.enqueue_full_interval(&interval(0.5, 100, RATE)));
    }

    #[test]
    fn voice_chat_moves_on_when_exhausted() {
        let mut n = node(true);
        let bytes = interval(0.25, 64, RATE);
        n.enqueue_chunk(&bytes[..20], true, false);
        n.enqueue_chunk(&bytes[20..], false, true);
        let out = render(&mut n, 64);
        assert!(out.channel(0)[10] > 0.0);
        // exhausted: the next render takes the fresh decoder
        render(&mut n, 64);
        assert_eq!(n.buffered_intervals(), 1);
        assert_eq!(n.buffered_decoders().next().unwrap().encoded_len(), 0);
    }

    #[test]
    fn voice_chat_overrun_skips_to_the_newest_stream() {
        let mut n = node(true).with_max_buffered(2);
        let old = interval(0.1, 1024, RATE);
        n.enqueue_chunk(&old, true, true);
        let out = render(&mut n, 16);
        assert!(out.channel(0)[0] > 0.0);

        // the fresh stream pushes out the one being played
        let fresh = interval(0.9, 4096, RATE);
        n.enqueue_chunk(&fresh, true, true);
        assert_eq!(n.overruns(), 1);
        assert_eq!(n.buffered_intervals(), 2);
        let loud = (0..50)
            .filter(|_| render(&mut n, 64).channel(0).iter().all(|s| *s > 0.3))
            .count();
        assert_eq!(loud, 50);
    }

    #[test]
    fn mode_change_waits_for_boundary() {
        let mut n = node(false);
        n.enqueue_full_interval(&interval(0.5, 100, RATE));
        n.schedule_mode(ChannelMode::VoiceChat);
        assert_eq!(n.mode(), ChannelMode::Changing);
        assert_eq!(n.buffered_intervals(), 0);
        assert!(!n.enqueue_chunk(&[1, 2, 3], true, false));
        n.start_new_interval();
        assert_eq!(n.mode(), ChannelMode::VoiceChat);
        assert!(n.enqueue_chunk(&[1, 2, 3], true, false));
    }

    #[test]
    fn resamples_other_rates() {
        let mut n = node(false);
        n.enqueue_full_interval(&interval(0.5, 4800, 48_000));
        n.start_new_interval();
        let out = render(&mut n, 128);
        assert_eq!(out.frames(), 128);
        assert!(out.channel(0)[127] > 0.0);
    }

    #[test]
    fn bounded_jitter_buffer_drops_oldest() {
        let mut n = node(false).with_max_buffered(2);
        for _ in 0..3 {
            n.enqueue_full_interval(&interval(0.5, 10, RATE));
        }
        assert_eq!(n.buffered_intervals(), 2);
        assert_eq!(n.overruns(), 1);
    }

    #[test]
    fn low_cut_cycles() {
        let mut n = node(false).with_low_cut(LowCutState::Normal);
        assert_eq!(n.next_low_cut(), LowCutState::Drastic);
        assert_eq!(n.next_low_cut(), LowCutState::Off);
        assert_eq!(n.as_json()["lowCut"], "off");
    }
}

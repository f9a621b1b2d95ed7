//! A local input channel: device audio or MIDI in, effects, looper, fader.
use log::debug;
use serde_json::json;
use std::fmt;

use super::{
    audio_node::{AudioNode, FaderHooks, NodeCore, NodeId},
    looper::{Looper, LooperMode},
    midi_message::MidiMessage,
    samples_buffer::SamplesBuffer,
};

/// Where the node takes its signal from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    Audio {
        first_channel: usize,
        /// 1 (mono) or 2 (stereo)
        channels: usize,
    },
    Midi {
        /// -1 for every device
        device: i32,
        /// None for every channel
        channel: Option<u8>,
        lower_note: u8,
        higher_note: u8,
        transpose: i8,
    },
    NoInput,
}

impl InputMode {
    pub fn mono(channel: usize) -> InputMode {
        InputMode::Audio {
            first_channel: channel,
            channels: 1,
        }
    }
    pub fn stereo(first_channel: usize) -> InputMode {
        InputMode::Audio {
            first_channel,
            channels: 2,
        }
    }
    pub fn midi_all() -> InputMode {
        InputMode::Midi {
            device: -1,
            channel: None,
            lower_note: 0,
            higher_note: 127,
            transpose: 0,
        }
    }

    fn accepts(&self, msg: &MidiMessage) -> bool {
        match *self {
            InputMode::Midi {
                device,
                channel,
                lower_note,
                higher_note,
                ..
            } => {
                if device >= 0 && msg.source_device != device {
                    return false;
                }
                if let Some(ch) = channel {
                    if msg.channel() != Some(ch) {
                        return false;
                    }
                }
                !msg.is_note() || (lower_note..=higher_note).contains(&msg.note())
            }
            _ => false,
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputMode::Audio {
                first_channel,
                channels: 1,
            } => write!(f, "mono {}", first_channel),
            InputMode::Audio { first_channel, .. } => write!(f, "stereo {}", first_channel),
            InputMode::Midi { device, .. } => write!(f, "midi {}", device),
            InputMode::NoInput => write!(f, "none"),
        }
    }
}

/// capture before the fader, loop playback after it
struct LooperHooks<'a> {
    looper: &'a mut Looper,
    inverted: bool,
}

impl FaderHooks for LooperHooks<'_> {
    fn pre_fader(&mut self, buffer: &mut SamplesBuffer) {
        self.looper.add_buffer(buffer);
        if self.inverted {
            buffer.invert_stereo();
        }
    }
    fn post_fader(&mut self, buffer: &mut SamplesBuffer) {
        self.looper.mix_to(buffer);
    }
}

pub struct LocalInputNode {
    core: NodeCore,
    group_index: u8,
    mode: InputMode,
    stereo_inverted: bool,
    transmitting: bool,
    voice_chat: bool,
    looper: Looper,
    captured: SamplesBuffer,
    midi: Vec<MidiMessage>,
}

impl LocalInputNode {
    pub fn new(id: NodeId, group_index: u8, sample_rate: u32, mode: InputMode) -> LocalInputNode {
        LocalInputNode {
            core: NodeCore::new(id, sample_rate),
            group_index,
            mode,
            stereo_inverted: false,
            transmitting: true,
            voice_chat: false,
            looper: Looper::new(super::looper::DEFAULT_LOOP_LAYERS, LooperMode::Sequence),
            captured: SamplesBuffer::stereo(0),
            midi: vec![],
        }
    }

    pub fn group_index(&self) -> u8 {
        self.group_index
    }
    pub fn set_group_index(&mut self, group_index: u8) {
        self.group_index = group_index;
    }
    pub fn mode(&self) -> InputMode {
        self.mode
    }
    pub fn set_mode(&mut self, mode: InputMode) {
        debug!("input {} mode {} -> {}", self.core.id(), self.mode, mode);
        self.mode = mode;
    }
    /// contributes two channels to its group
    pub fn is_stereo(&self) -> bool {
        match self.mode {
            InputMode::Audio { channels, .. } => channels > 1,
            // instruments render in stereo
            InputMode::Midi { .. } => true,
            InputMode::NoInput => false,
        }
    }
    pub fn is_stereo_inverted(&self) -> bool {
        self.stereo_inverted
    }
    pub fn set_stereo_inverted(&mut self, inverted: bool) {
        self.stereo_inverted = inverted;
    }
    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }
    pub fn set_transmitting(&mut self, transmitting: bool) {
        self.transmitting = transmitting;
    }
    pub fn is_voice_chat(&self) -> bool {
        self.voice_chat
    }
    pub fn set_voice_chat(&mut self, voice_chat: bool) {
        self.voice_chat = voice_chat;
    }
    pub fn looper(&self) -> &Looper {
        &self.looper
    }
    pub fn looper_mut(&mut self) -> &mut Looper {
        &mut self.looper
    }

    fn capture(&mut self, input: &SamplesBuffer, frames: usize, midi: &[MidiMessage]) {
        self.midi.clear();
        match self.mode {
            InputMode::Audio {
                first_channel,
                channels,
            } => {
                self.captured.set_channels(channels.clamp(1, 2));
                self.captured.set_frames(frames);
                self.captured.zero();
                for c in 0..self.captured.channels() {
                    let src = first_channel + c;
                    if src < input.channels() {
                        let n = frames.min(input.frames());
                        self.captured.channel_mut(c)[..n].copy_from_slice(&input.channel(src)[..n]);
                    }
                }
            }
            InputMode::Midi { transpose, .. } => {
                self.captured.set_channels(2);
                self.captured.set_frames(frames);
                self.captured.zero();
                let mode = self.mode;
                self.midi.extend(
                    midi.iter()
                        .filter(|m| mode.accepts(m))
                        .map(|m| m.transposed(transpose)),
                );
            }
            InputMode::NoInput => {
                self.captured.set_frames(frames);
                self.captured.zero();
            }
        }
    }

    pub fn as_json(&self) -> serde_json::Value {
        let mut value = self.core.as_json();
        value["group"] = json!(self.group_index);
        value["input"] = json!(self.mode.to_string());
        value["transmit"] = json!(self.transmitting);
        value["voiceChat"] = json!(self.voice_chat);
        value["inverted"] = json!(self.stereo_inverted);
        value["looper"] = self.looper.as_json();
        value
    }
}

impl AudioNode for LocalInputNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_replacing(&mut self, input: &SamplesBuffer, out: &mut SamplesBuffer, midi: &[MidiMessage]) {
        self.capture(input, out.frames(), midi);
        let mut hooks = LooperHooks {
            looper: &mut self.looper,
            inverted: self.stereo_inverted,
        };
        self.core.render(&self.captured, out, &self.midi, &mut hooks);
    }

    fn reset(&mut self) {
        self.core.reset();
        self.looper.stop();
    }
}

#[cfg(test)]
mod test_local_input {
    use super::*;
    use crate::sound::midi_message::MIDI_CLOCK;

    fn device(frames: usize) -> SamplesBuffer {
        SamplesBuffer::from_channels(vec![
            vec![0.1; frames],
            vec![0.2; frames],
            vec![0.3; frames],
        ])
    }

    #[test]
    fn picks_its_device_channels() {
        let mut node = LocalInputNode::new(1, 0, 44_100, InputMode::stereo(1));
        node.core_mut().set_pan(-1.0);
        let mut out = SamplesBuffer::stereo(4);
        node.process_replacing(&device(4), &mut out, &[]);
        assert!((out.channel(0)[0] - 0.2).abs() < 1.0e-6);
        assert!(node.is_stereo());
    }

    #[test]
    fn channel_past_the_device_is_silent() {
        let mut node = LocalInputNode::new(1, 0, 44_100, InputMode::mono(7));
        let mut out = SamplesBuffer::stereo(4);
        node.process_replacing(&device(4), &mut out, &[]);
        assert!(out.channel(0).iter().all(|s| *s == 0.0));
        assert!(!node.is_stereo());
    }

    #[test]
    fn inverted_stereo_swaps_sides() {
        let mut node = LocalInputNode::new(1, 0, 44_100, InputMode::stereo(0));
        node.set_stereo_inverted(true);
        node.core_mut().set_pan(-1.0);
        let mut out = SamplesBuffer::stereo(2);
        node.process_replacing(&device(2), &mut out, &[]);
        assert!((out.channel(0)[0] - 0.2).abs() < 1.0e-6);
    }

    #[test]
    fn midi_filter() {
        let mode = InputMode::Midi {
            device: 2,
            channel: Some(0),
            lower_note: 60,
            higher_note: 72,
            transpose: 12,
        };
        assert!(mode.accepts(&MidiMessage::new(2, 0x90, 64, 100)));
        assert!(!mode.accepts(&MidiMessage::new(1, 0x90, 64, 100)));
        assert!(!mode.accepts(&MidiMessage::new(2, 0x91, 64, 100)));
        assert!(!mode.accepts(&MidiMessage::new(2, 0x90, 80, 100)));
        assert!(!mode.accepts(&MidiMessage::system(MIDI_CLOCK)));
        let mut node = LocalInputNode::new(1, 0, 44_100, mode);
        let mut out = SamplesBuffer::stereo(2);
        node.process_replacing(&device(2), &mut out, &[MidiMessage::new(2, 0x90, 64, 100)]);
        assert_eq!(node.midi[0].note(), 76);
    }

    #[test]
    fn looper_records_pre_fader_and_plays_post_fader() {
        let mut node = LocalInputNode::new(1, 0, 44_100, InputMode::mono(0));
        node.core_mut().set_gain(0.0);
        node.looper_mut().set_mode(LooperMode::SelectedLayer);
        node.looper_mut().start_recording();
        node.looper_mut().handle_new_cycle(4);
        let mut out = SamplesBuffer::stereo(4);
        node.process_replacing(&device(4), &mut out, &[]);
        assert!(out.channel(0).iter().all(|s| *s == 0.0));
        node.looper_mut().handle_new_cycle(4);
        let mut out = SamplesBuffer::stereo(4);
        node.process_replacing(&SamplesBuffer::stereo(4), &mut out, &[]);
        // captured at unity gain, played after the fader
        assert!((out.channel(0)[0] - 0.1).abs() < 1.0e-6);
    }
}

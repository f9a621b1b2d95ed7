//!
//! Metronome node, clicks on every beat of the interval
//!
use serde_json::json;
use std::{f32::consts::PI, fmt};

use super::{
    audio_node::{AudioNode, NodeCore, NodeId},
    midi_message::MidiMessage,
    samples_buffer::SamplesBuffer,
};

/// click length in milliseconds
const CLICK_MS: u32 = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetronomeSound {
    Sine,
    Click,
    High,
}

impl MetronomeSound {
    pub fn from_name(name: &str) -> Option<MetronomeSound> {
        match name {
            "sine" => Some(MetronomeSound::Sine),
            "click" => Some(MetronomeSound::Click),
            "high" => Some(MetronomeSound::High),
            _ => None,
        }
    }
    // (first beat, accent, other beats)
    fn frequencies(self) -> (f32, f32, f32) {
        match self {
            MetronomeSound::Sine => (880.0, 660.0, 440.0),
            MetronomeSound::Click => (1200.0, 1000.0, 800.0),
            MetronomeSound::High => (1760.0, 1320.0, 1100.0),
        }
    }
}

impl fmt::Display for MetronomeSound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MetronomeSound::Sine => "sine",
            MetronomeSound::Click => "click",
            MetronomeSound::High => "high",
        };
        write!(f, "{}", name)
    }
}

fn make_click(sound: MetronomeSound, freq: f32, sample_rate: u32) -> Vec<f32> {
    let len = (sample_rate * CLICK_MS / 1000) as usize;
    let rate = sample_rate as f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / rate;
            let decay = (-(i as f32) * 6.0 / len as f32).exp();
            let phase = 2.0 * PI * freq * t;
            let s = match sound {
                // square-ish, sharper attack
                MetronomeSound::Click => phase.sin().signum() * 0.5,
                MetronomeSound::Sine | MetronomeSound::High => phase.sin(),
            };
            s * decay
        })
        .collect()
}

pub struct MetronomeNode {
    core: NodeCore,
    sound: MetronomeSound,
    first: Vec<f32>,
    accent: Vec<f32>,
    other: Vec<f32>,
    accent_beats: Vec<usize>,
    // beat grid of the block about to be rendered
    position: usize,
    samples_per_beat: usize,
    beats_per_interval: usize,
    enabled: bool,
    playing: Option<(usize, usize)>, // (which click, offset)
    block: SamplesBuffer,
}

impl MetronomeNode {
    pub fn new(id: NodeId, sample_rate: u32, sound: MetronomeSound) -> MetronomeNode {
        let mut node = MetronomeNode {
            core: NodeCore::new(id, sample_rate),
            sound,
            first: vec![],
            accent: vec![],
            other: vec![],
            accent_beats: vec![],
            position: 0,
            samples_per_beat: 0,
            beats_per_interval: 0,
            enabled: true,
            playing: None,
            block: SamplesBuffer::new(1, 0),
        };
        node.build_clicks();
        node
    }

    fn build_clicks(&mut self) {
        let (first, accent, other) = self.sound.frequencies();
        let rate = self.core.sample_rate();
        self.first = make_click(self.sound, first, rate);
        self.accent = make_click(self.sound, accent, rate);
        self.other = make_click(self.sound, other, rate);
        self.playing = None;
    }

    pub fn sound(&self) -> MetronomeSound {
        self.sound
    }
    pub fn set_sound(&mut self, sound: MetronomeSound) {
        if sound != self.sound {
            self.sound = sound;
            self.build_clicks();
        }
    }
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.playing = None;
        }
    }
    /// zero based beats that get the accent sound
    pub fn set_accent_beats(&mut self, beats: Vec<usize>) {
        self.accent_beats = beats;
    }
    pub fn accent_beats(&self) -> &[usize] {
        &self.accent_beats
    }

    /// where the next block starts inside the interval
    pub fn set_position(&mut self, position: usize, samples_per_beat: usize, beats_per_interval: usize) {
        self.position = position;
        self.samples_per_beat = samples_per_beat;
        self.beats_per_interval = beats_per_interval;
    }

    fn click(&self, which: usize) -> &[f32] {
        match which {
            0 => &self.first,
            1 => &self.accent,
            _ => &self.other,
        }
    }

    fn fill_block(&mut self, frames: usize) {
        self.block.set_frames(frames);
        self.block.zero();
        if !self.enabled || self.samples_per_beat == 0 {
            return;
        }
        for i in 0..frames {
            let pos = self.position + i;
            if pos % self.samples_per_beat == 0 {
                let beat = pos / self.samples_per_beat;
                let which = if beat == 0 {
                    0
                } else if self.accent_beats.contains(&beat) {
                    1
                } else {
                    2
                };
                self.playing = Some((which, 0));
            }
            if let Some((which, offset)) = self.playing {
                match self.click(which).get(offset).copied() {
                    Some(s) => {
                        self.block.channel_mut(0)[i] = s;
                        self.playing = Some((which, offset + 1));
                    }
                    None => self.playing = None,
                }
            }
        }
        self.position += frames;
    }

    pub fn as_json(&self) -> serde_json::Value {
        let mut value = self.core.as_json();
        value["sound"] = json!(self.sound.to_string());
        value["enabled"] = json!(self.enabled);
        value["accentBeats"] = json!(self.accent_beats);
        value
    }
}

impl AudioNode for MetronomeNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
    fn process_replacing(&mut self, _input: &SamplesBuffer, out: &mut SamplesBuffer, midi: &[MidiMessage]) {
        self.fill_block(out.frames());
        self.core.render_plain(&self.block, out, midi);
    }
    fn set_sample_rate(&mut self, rate: u32) {
        if self.core.set_sample_rate(rate) {
            self.build_clicks();
        }
    }
}

#[cfg(test)]
mod test_metronome {
    use super::*;

    fn render(node: &mut MetronomeNode, frames: usize) -> SamplesBuffer {
        let mut out = SamplesBuffer::stereo(frames);
        node.process_replacing(&SamplesBuffer::stereo(frames), &mut out, &[]);
        out
    }

    #[test]
    fn names_round_trip() {
        for s in [MetronomeSound::Sine, MetronomeSound::Click, MetronomeSound::High] {
            assert_eq!(MetronomeSound::from_name(&s.to_string()), Some(s));
        }
        assert_eq!(MetronomeSound::from_name("cowbell"), None);
    }

    #[test]
    fn clicks_start_on_beats() {
        let mut node = MetronomeNode::new(1, 44_100, MetronomeSound::Click);
        node.set_position(0, 4000, 4);
        let out = render(&mut node, 4000);
        // square click, first sample after the zero crossing is loud
        assert!(out.channel(0)[1].abs() > 0.1);
        // click is over long before the next beat
        assert_eq!(out.channel(0)[3999], 0.0);
        let out = render(&mut node, 10);
        assert!(out.channel(0)[1].abs() > 0.1);
    }

    #[test]
    fn first_beat_sounds_different() {
        let mut node = MetronomeNode::new(1, 44_100, MetronomeSound::Sine);
        node.set_accent_beats(vec![2]);
        node.set_position(0, 2000, 4);
        let first = render(&mut node, 2000).channel(0).to_vec();
        let second = render(&mut node, 2000).channel(0).to_vec();
        let third = render(&mut node, 2000).channel(0).to_vec();
        assert_ne!(first[5], second[5]);
        assert_ne!(second[5], third[5]);
    }

    #[test]
    fn disabled_or_muted_mixer_slot_is_silent() {
        let mut node = MetronomeNode::new(1, 44_100, MetronomeSound::High);
        node.set_enabled(false);
        node.set_position(0, 100, 4);
        assert!(render(&mut node, 200).channel(1).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn clicks_follow_the_rate() {
        let mut node = MetronomeNode::new(1, 44_100, MetronomeSound::Sine);
        node.set_sample_rate(48_000);
        assert_eq!(node.first.len(), 48_000 * CLICK_MS as usize / 1000);
    }
}

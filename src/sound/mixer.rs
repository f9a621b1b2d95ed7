//!
//! mixer used to combine every node of the session into the stereo output
//!
//! Nodes live in an arena and are addressed by [`NodeId`].  Solo wins over mute: when any
//! node is soloed only soloed nodes are heard.  Nodes that are not heard still render (into a
//! scratch buffer) so meters, loopers and the transmitted mix keep running.
use log::debug;
use std::fmt;

use crate::dsp::power_meter::PowerMeter;

use super::{
    audio_node::{AudioNode, NodeId},
    local_input::LocalInputNode,
    metronome::MetronomeNode,
    midi_message::MidiMessage,
    midi_sync::MidiSyncNode,
    remote_channel::RemoteChannelNode,
    samples_buffer::{AudioPeak, SamplesBuffer},
};

pub enum Node {
    LocalInput(LocalInputNode),
    RemoteChannel(RemoteChannelNode),
    Metronome(MetronomeNode),
    MidiSync(MidiSyncNode),
}

impl Node {
    pub fn audio(&self) -> &dyn AudioNode {
        match self {
            Node::LocalInput(n) => n,
            Node::RemoteChannel(n) => n,
            Node::Metronome(n) => n,
            Node::MidiSync(n) => n,
        }
    }
    pub fn audio_mut(&mut self) -> &mut dyn AudioNode {
        match self {
            Node::LocalInput(n) => n,
            Node::RemoteChannel(n) => n,
            Node::Metronome(n) => n,
            Node::MidiSync(n) => n,
        }
    }
    pub fn id(&self) -> NodeId {
        self.audio().core().id()
    }
    pub fn as_json(&self) -> serde_json::Value {
        match self {
            Node::LocalInput(n) => n.as_json(),
            Node::RemoteChannel(n) => n.as_json(),
            Node::Metronome(n) => n.as_json(),
            Node::MidiSync(n) => n.core().as_json(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self {
            Node::LocalInput(_) => "input",
            Node::RemoteChannel(_) => "remote",
            Node::Metronome(_) => "metronome",
            Node::MidiSync(_) => "midi sync",
        };
        write!(f, "{} {}", kind, self.audio().core())
    }
}

pub struct Mixer {
    nodes: Vec<Node>,
    next_id: NodeId,
    master_gain: f32,
    master_level: PowerMeter,
    master_peak: AudioPeak,
    discard: SamplesBuffer,
}

impl Mixer {
    pub fn build() -> Mixer {
        Mixer {
            nodes: vec![],
            next_id: 1,
            master_gain: 1.0,
            master_level: PowerMeter::new(),
            master_peak: AudioPeak::default(),
            discard: SamplesBuffer::stereo(0),
        }
    }

    /// `make` gets the id the new node must use
    pub fn add_node<F>(&mut self, make: F) -> NodeId
    where
        F: FnOnce(NodeId) -> Node,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.push(make(id));
        debug!("mixer added node {}", id);
        id
    }
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| n.id() == id)?;
        debug!("mixer removed node {}", id);
        Some(self.nodes.remove(idx))
    }
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id() == id)
    }
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn local_inputs(&self) -> impl Iterator<Item = &LocalInputNode> {
        self.nodes.iter().filter_map(|n| match n {
            Node::LocalInput(l) => Some(l),
            _ => None,
        })
    }
    pub fn local_inputs_mut(&mut self) -> impl Iterator<Item = &mut LocalInputNode> {
        self.nodes.iter_mut().filter_map(|n| match n {
            Node::LocalInput(l) => Some(l),
            _ => None,
        })
    }
    pub fn remote_channels_mut(&mut self) -> impl Iterator<Item = &mut RemoteChannelNode> {
        self.nodes.iter_mut().filter_map(|n| match n {
            Node::RemoteChannel(r) => Some(r),
            _ => None,
        })
    }
    pub fn remote_channel_mut(&mut self, id: NodeId) -> Option<&mut RemoteChannelNode> {
        match self.node_mut(id) {
            Some(Node::RemoteChannel(r)) => Some(r),
            _ => None,
        }
    }

    pub fn get_master(&self) -> f32 {
        self.master_gain
    }
    pub fn set_master(&mut self, gain: f32) {
        self.master_gain = gain.max(0.0);
    }
    pub fn get_master_level_avg(&self) -> f64 {
        self.master_level.get_avg()
    }
    pub fn get_master_level_peak(&self) -> f64 {
        self.master_level.get_peak()
    }
    pub fn master_peak(&self) -> AudioPeak {
        self.master_peak
    }
    pub fn reset_master_peak(&mut self) {
        self.master_peak.zero();
    }

    pub fn has_solo(&self) -> bool {
        self.nodes.iter().any(|n| n.audio().core().is_soloed())
    }

    /// Render every node and sum the audible ones into `out`
    pub fn process(&mut self, input: &SamplesBuffer, out: &mut SamplesBuffer, midi: &[MidiMessage]) {
        out.zero();
        let frames = out.frames();
        let has_solo = self.has_solo();
        for node in self.nodes.iter_mut() {
            let core = node.audio().core();
            let audible = if has_solo {
                core.is_soloed()
            } else {
                !core.is_muted()
            };
            if audible {
                node.audio_mut().process_replacing(input, out, midi);
            } else {
                self.discard.set_channels(out.channels());
                self.discard.set_frames(frames);
                self.discard.zero();
                node.audio_mut().process_replacing(input, &mut self.discard, midi);
            }
        }
        if (self.master_gain - 1.0).abs() > f32::EPSILON {
            out.scale(self.master_gain);
        }
        let peak = out.compute_peak();
        self.master_peak.update(&peak);
        self.master_level.add_frame(out.channel(0), 1.0);
    }

    /// Stereo if any input of the group is stereo, mono otherwise
    pub fn group_channels(&self, group: u8) -> usize {
        if self
            .local_inputs()
            .any(|l| l.group_index() == group && l.is_stereo())
        {
            2
        } else {
            1
        }
    }

    /// Groups with at least one transmitting input, in ascending order
    pub fn transmitting_groups(&self) -> Vec<u8> {
        let mut groups: Vec<u8> = self
            .local_inputs()
            .filter(|l| l.is_transmitting())
            .map(|l| l.group_index())
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    /// Sum the last rendered block of every transmitting input of `group` into `out`.
    /// Returns false when the group has nothing to send.
    pub fn mix_input_subchannels(&self, group: u8, frames: usize, out: &mut SamplesBuffer) -> bool {
        out.set_channels(self.group_channels(group));
        out.set_frames(frames);
        out.zero();
        let mut found = false;
        for input in self
            .local_inputs()
            .filter(|l| l.group_index() == group && l.is_transmitting() && l.core().is_activated())
        {
            out.add_from(input.core().last_output(), 0, 0, frames);
            found = true;
        }
        found
    }

    /// voice chat if any transmitting input of the group is in voice chat mode
    pub fn group_is_voice_chat(&self, group: u8) -> bool {
        self.local_inputs()
            .any(|l| l.group_index() == group && l.is_transmitting() && l.is_voice_chat())
    }

    /// interval boundary for every looper
    pub fn start_new_loop_cycle(&mut self, cycle_length: usize) {
        for input in self.local_inputs_mut() {
            input.looper_mut().handle_new_cycle(cycle_length);
        }
    }

    pub fn stop_loopers(&mut self) {
        for input in self.local_inputs_mut() {
            input.looper_mut().stop();
        }
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        for node in self.nodes.iter_mut() {
            node.audio_mut().set_sample_rate(rate);
        }
        self.master_level = PowerMeter::with_frame_rate(rate as f64 / 128.0);
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "master": self.master_gain,
            "masterLevel": self.get_master_level_avg().round(),
            "masterPeak": self.get_master_level_peak().round(),
            "nodes": self.nodes.iter().map(|n| n.as_json()).collect::<Vec<serde_json::Value>>(),
        })
    }
}

impl fmt::Display for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "master: {:.2}", self.master_gain)?;
        for n in &self.nodes {
            writeln!(f, " {}", n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_mixer {
    use super::*;
    use crate::sound::local_input::InputMode;

    fn device(frames: usize) -> SamplesBuffer {
        SamplesBuffer::from_channels(vec![vec![0.5; frames], vec![0.25; frames]])
    }

    fn mixer_with_inputs() -> (Mixer, NodeId, NodeId) {
        let mut mixer = Mixer::build();
        let a = mixer.add_node(|id| Node::LocalInput(LocalInputNode::new(id, 0, 44_100, InputMode::mono(0))));
        let b = mixer.add_node(|id| Node::LocalInput(LocalInputNode::new(id, 1, 44_100, InputMode::mono(1))));
        (mixer, a, b)
    }

    fn set_pan_left(mixer: &mut Mixer, id: NodeId) {
        mixer.node_mut(id).unwrap().audio_mut().core_mut().set_pan(-1.0);
    }

    #[test]
    fn build_mixer() {
        let mut mixer = Mixer::build();
        assert_eq!(mixer.get_master(), 1.0);
        mixer.set_master(0.5);
        assert_eq!(mixer.get_master(), 0.5);
        assert!(mixer.is_empty());
    }

    #[test]
    fn ids_are_stable() {
        let (mut mixer, a, b) = mixer_with_inputs();
        assert_ne!(a, b);
        assert!(mixer.remove_node(a).is_some());
        assert!(mixer.remove_node(a).is_none());
        assert_eq!(mixer.node(b).unwrap().id(), b);
        let c = mixer.add_node(|id| Node::Metronome(MetronomeNode::new(id, 44_100, crate::sound::metronome::MetronomeSound::Sine)));
        assert!(c > b);
    }

    #[test]
    fn mute_and_solo() {
        let (mut mixer, a, b) = mixer_with_inputs();
        set_pan_left(&mut mixer, a);
        set_pan_left(&mut mixer, b);
        let mut out = SamplesBuffer::stereo(4);
        mixer.process(&device(4), &mut out, &[]);
        assert!((out.channel(0)[0] - 0.75).abs() < 1.0e-6);

        mixer.node_mut(a).unwrap().audio_mut().core_mut().set_mute(true);
        mixer.process(&device(4), &mut out, &[]);
        assert!((out.channel(0)[0] - 0.25).abs() < 1.0e-6);

        // solo wins over mute
        mixer.node_mut(a).unwrap().audio_mut().core_mut().set_solo(true);
        mixer.process(&device(4), &mut out, &[]);
        assert!((out.channel(0)[0] - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn muted_nodes_keep_rendering() {
        let (mut mixer, a, _) = mixer_with_inputs();
        mixer.node_mut(a).unwrap().audio_mut().core_mut().set_mute(true);
        let mut out = SamplesBuffer::stereo(4);
        mixer.process(&device(4), &mut out, &[]);
        let core = mixer.node(a).unwrap().audio().core();
        assert!(core.last_peak().max_peak() > 0.0);
        assert_eq!(core.last_output().frames(), 4);
    }

    #[test]
    fn master_gain_scales_output() {
        let (mut mixer, a, b) = mixer_with_inputs();
        mixer.remove_node(b);
        set_pan_left(&mut mixer, a);
        mixer.set_master(0.5);
        let mut out = SamplesBuffer::stereo(2);
        mixer.process(&device(2), &mut out, &[]);
        assert!((out.channel(0)[0] - 0.25).abs() < 1.0e-6);
        assert!(mixer.master_peak().left_peak > 0.2);
    }

    #[test]
    fn group_mix_channels() {
        let (mut mixer, a, _) = mixer_with_inputs();
        let mut out = SamplesBuffer::stereo(0);
        mixer.process(&device(4), &mut SamplesBuffer::stereo(4), &[]);
        assert!(mixer.mix_input_subchannels(0, 4, &mut out));
        assert_eq!(out.channels(), 1);
        assert!(!mixer.mix_input_subchannels(5, 4, &mut out));
        if let Some(Node::LocalInput(l)) = mixer.node_mut(a) {
            l.set_mode(InputMode::stereo(0));
        }
        mixer.process(&device(4), &mut SamplesBuffer::stereo(4), &[]);
        assert!(mixer.mix_input_subchannels(0, 4, &mut out));
        assert_eq!(out.channels(), 2);
        assert_eq!(mixer.transmitting_groups(), vec![0, 1]);
        if let Some(Node::LocalInput(l)) = mixer.node_mut(a) {
            l.set_transmitting(false);
        }
        assert_eq!(mixer.transmitting_groups(), vec![1]);
    }
}

//!
//! MIDI clock generator locked to the interval
//!
//! Sends 24 clock pulses per beat.  A start message goes out at the first interval boundary
//! after [`MidiSyncNode::start`], a stop message when the session stops.
use log::debug;

use super::{
    audio_node::{AudioNode, NodeCore, NodeId},
    midi_message::{MidiMessage, MIDI_CLOCK, MIDI_START, MIDI_STOP},
    samples_buffer::SamplesBuffer,
};

pub const PULSES_PER_BEAT: usize = 24;

pub struct MidiSyncNode {
    core: NodeCore,
    pulses_per_interval: usize,
    samples_per_pulse: f64,
    position: usize,
    current_pulse: i64,
    last_pulse: i64,
    running: bool,
    sent_start: bool,
    outgoing: Vec<MidiMessage>,
}

impl MidiSyncNode {
    pub fn new(id: NodeId, sample_rate: u32) -> MidiSyncNode {
        MidiSyncNode {
            core: NodeCore::new(id, sample_rate),
            pulses_per_interval: 0,
            samples_per_pulse: 0.0,
            position: 0,
            current_pulse: 0,
            last_pulse: -1,
            running: false,
            sent_start: false,
            outgoing: vec![],
        }
    }

    pub fn set_timing(&mut self, samples_per_beat: usize, beats_per_interval: usize) {
        let pulses = beats_per_interval * PULSES_PER_BEAT;
        let per_pulse = samples_per_beat as f64 / PULSES_PER_BEAT as f64;
        if pulses != self.pulses_per_interval || per_pulse != self.samples_per_pulse {
            self.pulses_per_interval = pulses;
            self.samples_per_pulse = per_pulse;
            self.position = 0;
            self.last_pulse = -1;
        }
    }

    pub fn set_position(&mut self, position: usize) {
        if self.samples_per_pulse <= 0.0 {
            return;
        }
        self.position = position;
        self.current_pulse = (position as f64 / self.samples_per_pulse) as i64;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        if self.sent_start {
            debug!("midi clock stopped");
            self.outgoing.push(MidiMessage::system(MIDI_STOP));
        }
        self.running = false;
        self.sent_start = false;
    }

    /// messages generated since the last call
    pub fn pull_messages(&mut self) -> Vec<MidiMessage> {
        std::mem::take(&mut self.outgoing)
    }
}

impl AudioNode for MidiSyncNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    /// no audio, only clock messages
    fn process_replacing(&mut self, _input: &SamplesBuffer, _out: &mut SamplesBuffer, _midi: &[MidiMessage]) {
        if self.pulses_per_interval == 0 || self.samples_per_pulse <= 0.0 || !self.running {
            return;
        }
        if self.current_pulse == 0 && self.last_pulse != 0 {
            if !self.sent_start {
                debug!("midi clock started");
                self.outgoing.push(MidiMessage::system(MIDI_START));
                self.sent_start = true;
            }
            self.last_pulse = -1;
        }
        while self.current_pulse < self.pulses_per_interval as i64 && self.current_pulse > self.last_pulse {
            self.outgoing.push(MidiMessage::system(MIDI_CLOCK));
            self.last_pulse += 1;
        }
    }
}

#[cfg(test)]
mod test_midi_sync {
    use super::*;

    fn count(msgs: &[MidiMessage], status: u8) -> usize {
        msgs.iter().filter(|m| m.status() == status).count()
    }

    #[test]
    fn one_interval_of_pulses() {
        let mut node = MidiSyncNode::new(1, 44_100);
        let spb = 22_050;
        node.set_timing(spb, 4);
        node.start();
        let mut out = SamplesBuffer::stereo(128);
        let input = SamplesBuffer::stereo(128);
        let mut pos = 0;
        while pos < spb * 4 {
            node.set_position(pos);
            node.process_replacing(&input, &mut out, &[]);
            pos += 128;
        }
        let msgs = node.pull_messages();
        assert_eq!(msgs[0].status(), MIDI_START);
        assert_eq!(count(&msgs, MIDI_START), 1);
        assert_eq!(count(&msgs, MIDI_CLOCK), 4 * PULSES_PER_BEAT);
        node.stop();
        assert_eq!(node.pull_messages().len(), 1);
    }

    #[test]
    fn silent_until_started() {
        let mut node = MidiSyncNode::new(1, 44_100);
        node.set_timing(1000, 4);
        node.set_position(0);
        node.process_replacing(&SamplesBuffer::stereo(64), &mut SamplesBuffer::stereo(64), &[]);
        assert!(node.pull_messages().is_empty());
        node.stop();
        assert!(node.pull_messages().is_empty());
    }
}

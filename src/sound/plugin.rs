//! The narrow contract a hosted plugin exposes to a node, and the ordered chain of them that
//! runs pre-fader inside every node.
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use super::{midi_message::MidiMessage, samples_buffer::SamplesBuffer};

/// Anything that can sit in a node's effect chain.  Instruments and effects alike.
#[cfg_attr(test, automock)]
pub trait PluginProcessor: Send {
    fn name(&self) -> String;
    /// render `input` into `output`.  `output` arrives zeroed and sized like `input`.
    fn process(&mut self, input: &SamplesBuffer, output: &mut SamplesBuffer, midi: &[MidiMessage]);
    fn is_bypassed(&self) -> bool;
    /// midi produced by the last `process` call (arpeggiators and the like)
    fn pull_generated_midi_messages(&mut self) -> Vec<MidiMessage>;
}

pub type BoxedPlugin = Box<dyn PluginProcessor>;

pub struct EffectChain {
    plugins: Vec<BoxedPlugin>,
    scratch: SamplesBuffer,
    midi: Vec<MidiMessage>,
}

impl EffectChain {
    pub fn new() -> EffectChain {
        EffectChain {
            plugins: vec![],
            scratch: SamplesBuffer::stereo(0),
            midi: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// out of range indexes append
    pub fn insert(&mut self, plugin: BoxedPlugin, idx: usize) {
        if idx >= self.plugins.len() {
            self.plugins.push(plugin)
        } else {
            self.plugins.insert(idx, plugin)
        }
    }
    pub fn remove(&mut self, idx: usize) -> Option<BoxedPlugin> {
        if idx < self.plugins.len() {
            Some(self.plugins.remove(idx))
        } else {
            None
        }
    }
    pub fn swap(&mut self, a: usize, b: usize) {
        if a < self.plugins.len() && b < self.plugins.len() {
            self.plugins.swap(a, b);
        }
    }

    /// run every active plugin in order over `buffer`, in place.  Midi generated by one plugin
    /// is handed to the ones after it.
    pub fn process(&mut self, buffer: &mut SamplesBuffer, midi: &[MidiMessage]) {
        if self.plugins.is_empty() {
            return;
        }
        self.midi.clear();
        self.midi.extend_from_slice(midi);
        for plugin in self.plugins.iter_mut() {
            if plugin.is_bypassed() {
                continue;
            }
            self.scratch.set_channels(buffer.channels());
            self.scratch.set_frames(buffer.frames());
            self.scratch.zero();
            plugin.process(buffer, &mut self.scratch, &self.midi);
            std::mem::swap(buffer, &mut self.scratch);
            self.midi.extend(plugin.pull_generated_midi_messages());
        }
    }

    pub fn as_json(&self) -> serde_json::Value {
        let names: Vec<serde_json::Value> = self
            .plugins
            .iter()
            .enumerate()
            .map(|(i, p)| json!({ "index": i, "name": p.name(), "bypassed": p.is_bypassed() }))
            .collect();
        json!({ "plugins": names })
    }
}

#[cfg(test)]
mod test_plugin {
    use super::*;

    fn doubler(bypassed: bool) -> MockPluginProcessor {
        let mut plugin = MockPluginProcessor::new();
        plugin.expect_is_bypassed().return_const(bypassed);
        plugin.expect_name().return_const(String::from("doubler"));
        plugin.expect_process().returning(|input, output, _| {
            output.set(input);
            output.scale(2.0);
        });
        plugin.expect_pull_generated_midi_messages().returning(Vec::new);
        plugin
    }

    #[test]
    fn runs_in_order_and_skips_bypassed() {
        let mut chain = EffectChain::new();
        chain.insert(Box::new(doubler(false)), 0);
        chain.insert(Box::new(doubler(true)), 5);
        chain.insert(Box::new(doubler(false)), 5);
        assert_eq!(chain.len(), 3);
        let mut buf = SamplesBuffer::from_channels(vec![vec![0.25], vec![0.5]]);
        chain.process(&mut buf, &[]);
        assert_eq!(buf.channel(0), &[1.0]);
        assert_eq!(buf.channel(1), &[2.0]);
        assert_eq!(chain.as_json()["plugins"][1]["bypassed"], true);
    }

    #[test]
    fn generated_midi_reaches_next_plugin() {
        let note = MidiMessage::new(-1, 0x90, 64, 100);
        let mut arp = MockPluginProcessor::new();
        arp.expect_is_bypassed().return_const(false);
        arp.expect_process().returning(|input, output, _| output.set(input));
        arp.expect_pull_generated_midi_messages().returning(move || vec![note]);

        let mut synth = MockPluginProcessor::new();
        synth.expect_is_bypassed().return_const(false);
        synth
            .expect_process()
            .withf(move |_, _, midi| midi.len() == 1 && midi[0] == note)
            .times(1)
            .returning(|input, output, _| output.set(input));
        synth.expect_pull_generated_midi_messages().returning(Vec::new);

        let mut chain = EffectChain::new();
        chain.insert(Box::new(arp), 0);
        chain.insert(Box::new(synth), 1);
        let mut buf = SamplesBuffer::stereo(4);
        chain.process(&mut buf, &[]);
    }

    #[test]
    fn remove_and_swap() {
        let mut chain = EffectChain::new();
        chain.insert(Box::new(doubler(false)), 0);
        assert!(chain.remove(3).is_none());
        chain.swap(0, 4);
        assert!(chain.remove(0).is_some());
        assert!(chain.is_empty());
    }
}

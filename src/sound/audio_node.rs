//! The gain stage every node in the mixing graph shares.
//!
//! A block goes through the stage in this order:
//!
//! 1. the node's input is copied into an internal (stereo) buffer
//! 2. the effect chain runs, pre-fader
//! 3. the node's pre-fader hook (local inputs capture into their looper here)
//! 4. gain, boost and pan are applied
//! 5. the peak snapshot and the dB meter are updated
//! 6. the node's post-fader hook (looper playback)
//! 7. the result is summed into the output handed in by the mixer
//!
//! Mute and solo are not applied here, the [`crate::sound::mixer::Mixer`] decides which
//! output a node renders into so the stage above always runs.
use std::fmt;

use serde_json::json;

use crate::dsp::power_meter::PowerMeter;

use super::{
    fader::Fader,
    midi_message::MidiMessage,
    plugin::EffectChain,
    samples_buffer::{AudioPeak, SamplesBuffer},
};

/// Stable handle of a node inside the mixer arena
pub type NodeId = u32;

pub const MAX_GAIN: f32 = 2.0;
pub const MIN_BOOST: f32 = 0.25;
pub const MAX_BOOST: f32 = 4.0;

pub struct NodeCore {
    id: NodeId,
    sample_rate: u32,
    gain: f32,
    boost: f32,
    fader: Fader,
    muted: bool,
    soloed: bool,
    activated: bool,
    last_peak: AudioPeak,
    meter: PowerMeter,
    effects: EffectChain,
    internal: SamplesBuffer,
}

impl NodeCore {
    pub fn new(id: NodeId, sample_rate: u32) -> NodeCore {
        NodeCore {
            id,
            sample_rate,
            gain: 1.0,
            boost: 1.0,
            fader: Fader::new(),
            muted: false,
            soloed: false,
            activated: true,
            last_peak: AudioPeak::default(),
            meter: PowerMeter::new(),
            effects: EffectChain::new(),
            internal: SamplesBuffer::stereo(0),
        }
    }
    pub fn id(&self) -> NodeId {
        self.id
    }
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    /// returns true when the rate actually changed
    pub fn set_sample_rate(&mut self, rate: u32) -> bool {
        if rate == 0 || rate == self.sample_rate {
            return false;
        }
        self.sample_rate = rate;
        true
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, MAX_GAIN);
    }
    pub fn boost(&self) -> f32 {
        self.boost
    }
    /// linear multiplier
    pub fn set_boost(&mut self, boost: f32) {
        self.boost = boost.clamp(MIN_BOOST, MAX_BOOST);
    }
    pub fn pan(&self) -> f32 {
        self.fader.get()
    }
    pub fn set_pan(&mut self, pan: f32) {
        self.fader.set(pan);
    }
    pub fn left_gain(&self) -> f32 {
        self.fader.left()
    }
    pub fn right_gain(&self) -> f32 {
        self.fader.right()
    }
    pub fn is_muted(&self) -> bool {
        self.muted
    }
    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }
    pub fn is_soloed(&self) -> bool {
        self.soloed
    }
    pub fn set_solo(&mut self, soloed: bool) {
        self.soloed = soloed;
    }
    pub fn is_activated(&self) -> bool {
        self.activated
    }
    pub fn set_activated(&mut self, activated: bool) {
        self.activated = activated;
    }

    /// back to unity gain, centered, no mute or solo
    pub fn reset(&mut self) {
        self.set_gain(1.0);
        self.set_boost(1.0);
        self.set_pan(0.0);
        self.muted = false;
        self.soloed = false;
    }

    pub fn last_peak(&self) -> AudioPeak {
        self.last_peak
    }
    pub fn reset_last_peak(&mut self) {
        self.last_peak.zero();
    }
    pub fn level_db(&self) -> f64 {
        self.meter.get_avg()
    }
    pub fn peak_db(&self) -> f64 {
        self.meter.get_peak()
    }

    pub fn effects(&self) -> &EffectChain {
        &self.effects
    }
    pub fn effects_mut(&mut self) -> &mut EffectChain {
        &mut self.effects
    }

    /// post-fader samples of the last rendered block
    pub fn last_output(&self) -> &SamplesBuffer {
        &self.internal
    }

    /// Run the gain stage over `input` and sum the result into `out`.  The hooks receive the
    /// internal buffer before and after the fader.
    pub fn render(
        &mut self,
        input: &SamplesBuffer,
        out: &mut SamplesBuffer,
        midi: &[MidiMessage],
        hooks: &mut dyn FaderHooks,
    ) {
        if !self.activated {
            return;
        }
        self.internal.set_channels(out.channels());
        self.internal.set_frames(out.frames());
        self.internal.zero();
        self.internal.copy_from(input, 0, 0, input.frames());

        self.effects.process(&mut self.internal, midi);

        hooks.pre_fader(&mut self.internal);

        self.internal
            .apply_gain(self.gain, self.fader.left(), self.fader.right(), self.boost);

        let peak = self.internal.compute_peak();
        self.last_peak.update(&peak);
        self.meter.add_frame(self.internal.channel(0), 1.0);

        hooks.post_fader(&mut self.internal);

        out.add(&self.internal);
    }

    /// [`NodeCore::render`] without hooks
    pub fn render_plain(&mut self, input: &SamplesBuffer, out: &mut SamplesBuffer, midi: &[MidiMessage]) {
        self.render(input, out, midi, &mut NoHooks);
    }

    pub fn as_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "gain": self.gain,
            "pan": self.fader.get(),
            "boost": self.boost,
            "mute": self.muted,
            "solo": self.soloed,
            "level": self.level_db().round(),
            "peak": self.peak_db().round(),
            "effects": self.effects.as_json(),
        })
    }
}

impl fmt::Display for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[ id: {}, gain: {:.2}, boost: {:.2}, pan: {}, mute: {}, solo: {} ]",
            self.id, self.gain, self.boost, self.fader, self.muted, self.soloed
        )
    }
}

/// Per-node work around the fader, see [`NodeCore::render`]
pub trait FaderHooks {
    fn pre_fader(&mut self, _buffer: &mut SamplesBuffer) {}
    fn post_fader(&mut self, _buffer: &mut SamplesBuffer) {}
}

pub struct NoHooks;

impl FaderHooks for NoHooks {}

/// One kind of node in the mixing graph.  Implementations own a [`NodeCore`] and decide what
/// they feed into it.
pub trait AudioNode {
    fn core(&self) -> &NodeCore;
    fn core_mut(&mut self) -> &mut NodeCore;
    /// render one block and sum it into `out`.  `input` holds every device input channel.
    fn process_replacing(&mut self, input: &SamplesBuffer, out: &mut SamplesBuffer, midi: &[MidiMessage]);
    fn set_sample_rate(&mut self, rate: u32) {
        self.core_mut().set_sample_rate(rate);
    }
    fn reset(&mut self) {
        self.core_mut().reset();
    }
}

#[cfg(test)]
mod test_audio_node {
    use super::*;
    use crate::sound::plugin::MockPluginProcessor;

    fn ones(frames: usize) -> SamplesBuffer {
        SamplesBuffer::from_channels(vec![vec![1.0; frames], vec![1.0; frames]])
    }

    #[test]
    fn center_pan_is_equal_power() {
        let mut core = NodeCore::new(1, 44_100);
        let mut out = SamplesBuffer::stereo(4);
        core.render_plain(&ones(4), &mut out, &[]);
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((out.channel(0)[0] - expected).abs() < 1.0e-6);
        assert!((out.channel(1)[3] - expected).abs() < 1.0e-6);
    }

    #[test]
    fn gain_boost_and_hard_pan() {
        let mut core = NodeCore::new(1, 44_100);
        core.set_gain(0.5);
        core.set_boost(2.0);
        core.set_pan(1.0);
        let mut out = SamplesBuffer::stereo(2);
        core.render_plain(&ones(2), &mut out, &[]);
        assert!(out.channel(0)[0].abs() < 1.0e-6);
        assert!((out.channel(1)[0] - 1.0).abs() < 1.0e-6);
        assert!((core.last_peak().right_peak - 1.0).abs() < 1.0e-6);
    }

    #[test]
    fn clamps_and_reset() {
        let mut core = NodeCore::new(7, 44_100);
        core.set_gain(5.0);
        core.set_boost(100.0);
        core.set_mute(true);
        core.set_solo(true);
        assert_eq!(core.gain(), MAX_GAIN);
        assert_eq!(core.boost(), MAX_BOOST);
        core.reset();
        assert_eq!(core.gain(), 1.0);
        assert_eq!(core.boost(), 1.0);
        assert_eq!(core.pan(), 0.0);
        assert!(!core.is_muted() && !core.is_soloed());
    }

    struct Probe {
        pre: f32,
        post: f32,
    }

    impl FaderHooks for Probe {
        fn pre_fader(&mut self, buffer: &mut SamplesBuffer) {
            self.pre = buffer.channel(0)[0];
        }
        fn post_fader(&mut self, buffer: &mut SamplesBuffer) {
            self.post = buffer.channel(0)[0];
        }
    }

    #[test]
    fn hooks_see_pre_and_post_fader() {
        let mut core = NodeCore::new(1, 44_100);
        core.set_gain(0.0);
        let mut probe = Probe { pre: 0.0, post: 1.0 };
        let mut out = SamplesBuffer::stereo(2);
        core.render(&ones(2), &mut out, &[], &mut probe);
        assert_eq!(probe.pre, 1.0);
        assert_eq!(probe.post, 0.0);
    }

    #[test]
    fn effects_run_before_fader() {
        let mut plugin = MockPluginProcessor::new();
        plugin.expect_is_bypassed().return_const(false);
        plugin.expect_process().times(1).returning(|input, output, _| {
            output.set(input);
            output.scale(0.5);
        });
        plugin.expect_pull_generated_midi_messages().returning(Vec::new);
        let mut core = NodeCore::new(1, 44_100);
        core.effects_mut().insert(Box::new(plugin), 0);
        core.set_pan(-1.0);
        let mut out = SamplesBuffer::stereo(1);
        core.render_plain(&ones(1), &mut out, &[]);
        assert!((out.channel(0)[0] - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn deactivated_renders_nothing() {
        let mut core = NodeCore::new(1, 44_100);
        core.set_activated(false);
        let mut out = SamplesBuffer::stereo(2);
        core.render_plain(&ones(2), &mut out, &[]);
        assert_eq!(out.channel(0), &[0.0, 0.0]);
    }
}

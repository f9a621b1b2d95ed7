//! Interval-synced looper attached to each local input.
//!
//! Recording always starts and ends on an interval boundary, one layer per interval.  The
//! controller drives it with [`Looper::handle_new_cycle`] at every boundary and the owning
//! input node feeds it pre-fader samples with [`Looper::add_buffer`].
use log::{debug, warn};
use serde_json::json;
use std::fmt;

use super::samples_buffer::SamplesBuffer;

pub const MIN_LOOP_LAYERS: usize = 1;
pub const MAX_LOOP_LAYERS: usize = 8;
pub const DEFAULT_LOOP_LAYERS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LooperMode {
    /// layers recorded one after another and played back in turn
    Sequence,
    /// layers stacked on top of each other
    AllLayers,
    /// one layer is recorded and played
    SelectedLayer,
}

impl LooperMode {
    pub fn from_name(name: &str) -> Option<LooperMode> {
        match name {
            "sequence" => Some(LooperMode::Sequence),
            "all_layers" => Some(LooperMode::AllLayers),
            "selected_layer" => Some(LooperMode::SelectedLayer),
            _ => None,
        }
    }
}

impl fmt::Display for LooperMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LooperMode::Sequence => "sequence",
            LooperMode::AllLayers => "all_layers",
            LooperMode::SelectedLayer => "selected_layer",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LooperState {
    Stopped,
    /// armed, recording begins at the next boundary
    WaitingToRecord,
    Recording { layer: usize, first_layer: usize },
    Playing,
}

impl fmt::Display for LooperState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LooperState::Stopped => write!(f, "stopped"),
            LooperState::WaitingToRecord => write!(f, "waiting"),
            LooperState::Recording { layer, .. } => write!(f, "recording {}", layer),
            LooperState::Playing => write!(f, "playing"),
        }
    }
}

pub struct Looper {
    mode: LooperMode,
    state: LooperState,
    layers: Vec<SamplesBuffer>,
    current_layer: usize,
    cycle_length: usize,
    play_pos: usize,
}

impl Looper {
    pub fn new(max_layers: usize, mode: LooperMode) -> Looper {
        let max_layers = max_layers.clamp(MIN_LOOP_LAYERS, MAX_LOOP_LAYERS);
        Looper {
            mode,
            state: LooperState::Stopped,
            layers: (0..max_layers).map(|_| SamplesBuffer::stereo(0)).collect(),
            current_layer: 0,
            cycle_length: 0,
            play_pos: 0,
        }
    }

    pub fn mode(&self) -> LooperMode {
        self.mode
    }
    pub fn set_mode(&mut self, mode: LooperMode) {
        if self.is_recording() {
            warn!("looper mode change ignored while recording");
            return;
        }
        self.mode = mode;
    }
    pub fn state(&self) -> LooperState {
        self.state
    }
    pub fn is_recording(&self) -> bool {
        matches!(self.state, LooperState::Recording { .. })
    }
    pub fn is_playing(&self) -> bool {
        self.state == LooperState::Playing
    }
    pub fn max_layers(&self) -> usize {
        self.layers.len()
    }
    /// Only while stopped.  Layers past the new count are lost.
    pub fn set_max_layers(&mut self, max_layers: usize) {
        if self.state != LooperState::Stopped {
            warn!("looper layer count change ignored while {}", self.state);
            return;
        }
        let max_layers = max_layers.clamp(MIN_LOOP_LAYERS, MAX_LOOP_LAYERS);
        self.layers.resize_with(max_layers, || SamplesBuffer::stereo(0));
        self.current_layer = self.current_layer.min(max_layers - 1);
    }
    pub fn current_layer(&self) -> usize {
        self.current_layer
    }
    pub fn select_layer(&mut self, layer: usize) {
        if layer >= self.layers.len() || self.is_recording() {
            return;
        }
        self.current_layer = layer;
        self.play_pos = 0;
    }
    pub fn layer(&self, layer: usize) -> Option<&SamplesBuffer> {
        self.layers.get(layer)
    }
    pub fn has_audio(&self) -> bool {
        self.layers.iter().any(|l| !l.is_empty())
    }

    /// arm recording, it starts at the next interval boundary
    pub fn start_recording(&mut self) {
        if self.is_recording() {
            return;
        }
        self.state = LooperState::WaitingToRecord;
    }

    pub fn play(&mut self) {
        if !self.has_audio() {
            warn!("nothing recorded, looper stays {}", self.state);
            return;
        }
        if !self.is_playing() {
            self.play_pos = 0;
            self.state = LooperState::Playing;
        }
    }

    pub fn stop(&mut self) {
        self.state = LooperState::Stopped;
        self.play_pos = 0;
    }

    pub fn clear_layer(&mut self, layer: usize) {
        if let Some(l) = self.layers.get_mut(layer) {
            l.set_frames(0);
        }
    }

    pub fn clear_all(&mut self) {
        self.stop();
        for l in self.layers.iter_mut() {
            l.set_frames(0);
        }
        self.current_layer = 0;
    }

    fn next_layer_with_audio(&self, from: usize) -> usize {
        let count = self.layers.len();
        (1..=count)
            .map(|step| (from + step) % count)
            .find(|l| !self.layers[*l].is_empty())
            .unwrap_or(from)
    }

    /// Interval boundary.  `cycle_length` is the length of the interval that starts now.
    pub fn handle_new_cycle(&mut self, cycle_length: usize) {
        self.cycle_length = cycle_length;
        self.play_pos = 0;
        match self.state {
            LooperState::Stopped => {}
            LooperState::WaitingToRecord => {
                let layer = self.current_layer;
                self.clear_layer(layer);
                debug!("looper recording layer {}", layer);
                self.state = LooperState::Recording {
                    layer,
                    first_layer: layer,
                };
            }
            LooperState::Recording { layer, first_layer } => {
                if self.mode == LooperMode::SelectedLayer {
                    self.current_layer = layer;
                    self.state = LooperState::Playing;
                    return;
                }
                let next = (layer + 1) % self.layers.len();
                if next == first_layer {
                    debug!("looper recorded all layers, playing");
                    self.current_layer = first_layer;
                    self.state = LooperState::Playing;
                } else {
                    self.clear_layer(next);
                    self.current_layer = next;
                    self.state = LooperState::Recording {
                        layer: next,
                        first_layer,
                    };
                }
            }
            LooperState::Playing => {
                if self.mode == LooperMode::Sequence {
                    self.current_layer = self.next_layer_with_audio(self.current_layer);
                }
            }
        }
    }

    /// Capture pre-fader samples while recording.  Nothing past the cycle length is kept.
    pub fn add_buffer(&mut self, samples: &SamplesBuffer) {
        let layer = match self.state {
            LooperState::Recording { layer, .. } => layer,
            _ => return,
        };
        let cycle_length = self.cycle_length;
        let target = &mut self.layers[layer];
        let room = cycle_length.saturating_sub(target.frames());
        let frames = samples.frames().min(room);
        if frames == 0 {
            return;
        }
        if target.is_empty() {
            target.set_channels(samples.channels());
        }
        let start = target.frames();
        target.set_frames(start + frames);
        target.copy_from(samples, 0, start, frames);
    }

    fn mix_layer(layer: &SamplesBuffer, pos: usize, out: &mut SamplesBuffer) {
        if pos >= layer.frames() {
            return;
        }
        let frames = out.frames().min(layer.frames() - pos);
        out.add_from(layer, pos, 0, frames);
    }

    /// Sum the loop into `out` (post-fader)
    pub fn mix_to(&mut self, out: &mut SamplesBuffer) {
        let pos = self.play_pos;
        match self.state {
            LooperState::Playing => match self.mode {
                LooperMode::AllLayers => {
                    for l in self.layers.iter() {
                        Looper::mix_layer(l, pos, out);
                    }
                }
                LooperMode::Sequence | LooperMode::SelectedLayer => {
                    Looper::mix_layer(&self.layers[self.current_layer], pos, out);
                }
            },
            LooperState::Recording { layer, .. } if self.mode == LooperMode::AllLayers => {
                for (i, l) in self.layers.iter().enumerate() {
                    if i != layer {
                        Looper::mix_layer(l, pos, out);
                    }
                }
            }
            _ => {}
        }
        self.play_pos += out.frames();
    }

    pub fn as_json(&self) -> serde_json::Value {
        json!({
            "mode": self.mode.to_string(),
            "state": self.state.to_string(),
            "layer": self.current_layer,
            "layers": self.layers.iter().map(|l| l.frames()).collect::<Vec<usize>>(),
        })
    }
}

#[cfg(test)]
mod test_looper {
    use super::*;

    fn block(value: f32, frames: usize) -> SamplesBuffer {
        SamplesBuffer::from_channels(vec![vec![value; frames], vec![value; frames]])
    }

    /// run one whole cycle of `frames` in blocks of 4, returning what the looper played
    fn run_cycle(looper: &mut Looper, value: f32, frames: usize) -> Vec<f32> {
        looper.handle_new_cycle(frames);
        let mut played = vec![];
        for _ in 0..frames / 4 {
            looper.add_buffer(&block(value, 4));
            let mut out = SamplesBuffer::stereo(4);
            looper.mix_to(&mut out);
            played.extend_from_slice(out.channel(0));
        }
        played
    }

    #[test]
    fn names() {
        for m in [LooperMode::Sequence, LooperMode::AllLayers, LooperMode::SelectedLayer] {
            assert_eq!(LooperMode::from_name(&m.to_string()), Some(m));
        }
        assert_eq!(LooperMode::from_name("bogus"), None);
    }

    #[test]
    fn selected_layer_records_one_interval() {
        let mut looper = Looper::new(4, LooperMode::SelectedLayer);
        looper.select_layer(2);
        looper.start_recording();
        assert_eq!(looper.state(), LooperState::WaitingToRecord);
        let played = run_cycle(&mut looper, 0.5, 16);
        assert!(played.iter().all(|s| *s == 0.0));
        assert!(looper.is_recording());
        assert_eq!(looper.layer(2).unwrap().frames(), 16);
        let played = run_cycle(&mut looper, 0.0, 16);
        assert!(looper.is_playing());
        assert_eq!(looper.current_layer(), 2);
        assert!(played.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn recorded_cycle_plays_back_bit_for_bit() {
        let cycle: usize = 100;
        let left: Vec<f32> = (0..cycle).map(|i| i as f32 / cycle as f32 - 0.5).collect();
        let right: Vec<f32> = left.iter().map(|s| -0.5 * s).collect();
        let mut looper = Looper::new(1, LooperMode::SelectedLayer);
        looper.start_recording();
        looper.handle_new_cycle(cycle);
        let mut pos = 0;
        for size in [5usize, 7, 13].iter().cycle() {
            if pos >= cycle {
                break;
            }
            let n = (*size).min(cycle - pos);
            looper.add_buffer(&SamplesBuffer::from_channels(vec![
                left[pos..pos + n].to_vec(),
                right[pos..pos + n].to_vec(),
            ]));
            looper.mix_to(&mut SamplesBuffer::stereo(n));
            pos += n;
        }

        // every cycle after that is the same
        for _ in 0..2 {
            looper.handle_new_cycle(cycle);
            assert!(looper.is_playing());
            let (mut played_left, mut played_right) = (vec![], vec![]);
            let mut pos = 0;
            while pos < cycle {
                let n = 11usize.min(cycle - pos);
                let mut out = SamplesBuffer::stereo(n);
                looper.mix_to(&mut out);
                played_left.extend_from_slice(out.channel(0));
                played_right.extend_from_slice(out.channel(1));
                pos += n;
            }
            assert_eq!(played_left, left);
            assert_eq!(played_right, right);
        }
    }

    #[test]
    fn sequence_records_every_layer_then_plays_in_turn() {
        let mut looper = Looper::new(2, LooperMode::Sequence);
        looper.start_recording();
        looper.handle_new_cycle(8);
        // layer 0 then layer 1
        for value in [0.1, 0.2] {
            for _ in 0..2 {
                looper.add_buffer(&block(value, 4));
                looper.mix_to(&mut SamplesBuffer::stereo(4));
            }
            looper.handle_new_cycle(8);
        }
        assert!(looper.is_playing());
        assert_eq!(looper.current_layer(), 0);
        let played = run_cycle(&mut looper, 0.0, 8);
        assert!(played.iter().all(|s| (*s - 0.2).abs() < 1.0e-6));
        let played = run_cycle(&mut looper, 0.0, 8);
        assert!(played.iter().all(|s| (*s - 0.1).abs() < 1.0e-6));
    }

    #[test]
    fn all_layers_overdubs() {
        let mut looper = Looper::new(2, LooperMode::AllLayers);
        looper.start_recording();
        looper.handle_new_cycle(8);
        for _ in 0..2 {
            looper.add_buffer(&block(0.25, 4));
            looper.mix_to(&mut SamplesBuffer::stereo(4));
        }
        let played = run_cycle(&mut looper, 0.5, 8);
        // while recording layer 1, layer 0 is heard
        assert!(played.iter().all(|s| (*s - 0.25).abs() < 1.0e-6));
        let played = run_cycle(&mut looper, 0.0, 8);
        assert!(looper.is_playing());
        assert!(played.iter().all(|s| (*s - 0.75).abs() < 1.0e-6));
    }

    #[test]
    fn capture_stops_at_cycle_length() {
        let mut looper = Looper::new(1, LooperMode::SelectedLayer);
        looper.start_recording();
        looper.handle_new_cycle(6);
        looper.add_buffer(&block(1.0, 4));
        looper.add_buffer(&block(1.0, 4));
        assert_eq!(looper.layer(0).unwrap().frames(), 6);
    }

    #[test]
    fn play_without_audio_stays_stopped() {
        let mut looper = Looper::new(3, LooperMode::Sequence);
        looper.play();
        assert_eq!(looper.state(), LooperState::Stopped);
        looper.set_max_layers(100);
        assert_eq!(looper.max_layers(), MAX_LOOP_LAYERS);
        looper.clear_all();
        assert!(!looper.has_audio());
    }
}

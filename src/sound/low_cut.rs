//! High pass applied to remote channels to take out rumble
use std::fmt;

use crate::dsp::biquad::{BiQuadFilter, FilterType};

use super::samples_buffer::SamplesBuffer;

pub const NORMAL_CUTOFF: f64 = 120.0;
pub const DRASTIC_CUTOFF: f64 = 220.0;
const LOW_CUT_Q: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LowCutState {
    Off,
    Normal,
    Drastic,
}

impl LowCutState {
    /// Off -> Normal -> Drastic -> Off
    pub fn next(self) -> LowCutState {
        match self {
            LowCutState::Off => LowCutState::Normal,
            LowCutState::Normal => LowCutState::Drastic,
            LowCutState::Drastic => LowCutState::Off,
        }
    }
    pub fn cutoff(self) -> Option<f64> {
        match self {
            LowCutState::Off => None,
            LowCutState::Normal => Some(NORMAL_CUTOFF),
            LowCutState::Drastic => Some(DRASTIC_CUTOFF),
        }
    }
    pub fn from_name(name: &str) -> Option<LowCutState> {
        match name.trim().to_lowercase().as_str() {
            "off" => Some(LowCutState::Off),
            "normal" => Some(LowCutState::Normal),
            "drastic" => Some(LowCutState::Drastic),
            _ => None,
        }
    }
}

impl fmt::Display for LowCutState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LowCutState::Off => "off",
            LowCutState::Normal => "normal",
            LowCutState::Drastic => "drastic",
        };
        write!(f, "{}", name)
    }
}

pub struct LowCutFilter {
    state: LowCutState,
    sample_rate: u32,
    filters: [BiQuadFilter; 2],
}

impl LowCutFilter {
    pub fn new(state: LowCutState, sample_rate: u32) -> LowCutFilter {
        let mut filter = LowCutFilter {
            state,
            sample_rate,
            filters: [BiQuadFilter::new(), BiQuadFilter::new()],
        };
        filter.update_coefficients();
        filter
    }
    pub fn state(&self) -> LowCutState {
        self.state
    }
    pub fn set_state(&mut self, state: LowCutState) {
        if state != self.state {
            self.state = state;
            self.update_coefficients();
        }
    }
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.sample_rate && sample_rate > 0 {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
    }
    fn update_coefficients(&mut self) {
        if let Some(cutoff) = self.state.cutoff() {
            for f in self.filters.iter_mut() {
                f.init(FilterType::HighPass, cutoff, LOW_CUT_Q, self.sample_rate as f64);
            }
        }
    }

    pub fn process(&mut self, buffer: &mut SamplesBuffer) {
        if self.state == LowCutState::Off {
            return;
        }
        for c in 0..buffer.channels().min(self.filters.len()) {
            self.filters[c].process_block(buffer.channel_mut(c));
        }
    }
}

#[cfg(test)]
mod test_low_cut {
    use super::*;

    #[test]
    fn cycles() {
        let mut state = LowCutState::Off;
        state = state.next();
        assert_eq!(state, LowCutState::Normal);
        state = state.next();
        assert_eq!(state, LowCutState::Drastic);
        assert_eq!(state.next(), LowCutState::Off);
        assert_eq!(LowCutState::from_name(" Normal "), Some(LowCutState::Normal));
        assert_eq!(LowCutState::from_name("loud"), None);
    }

    #[test]
    fn off_leaves_samples_alone() {
        let mut filter = LowCutFilter::new(LowCutState::Off, 44_100);
        let mut buf = SamplesBuffer::from_channels(vec![vec![1.0; 8], vec![0.5; 8]]);
        let copy = buf.clone();
        filter.process(&mut buf);
        assert_eq!(buf, copy);
    }

    #[test]
    fn drastic_kills_dc() {
        let mut filter = LowCutFilter::new(LowCutState::Drastic, 44_100);
        let mut buf = SamplesBuffer::from_channels(vec![vec![1.0; 44_100]]);
        filter.process(&mut buf);
        assert!(buf.channel(0)[44_099].abs() < 1.0e-3);
    }
}

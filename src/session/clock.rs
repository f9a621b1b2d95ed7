//! The interval clock every participant of a session follows.
//!
//! `samples_per_interval = round(sample_rate * (60000 / bpm * bpi) / 1000)` and
//! `samples_per_beat = samples_per_interval / bpi`.
use log::warn;
use std::fmt;

pub const MIN_BPM: u16 = 40;
pub const MAX_BPM: u16 = 400;
pub const MIN_BPI: u16 = 2;
pub const MAX_BPI: u16 = 192;

/// A tempo change from the server, applied at the next interval boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduledChange {
    Bpm(u16),
    Bpi(u16),
}

impl ScheduledChange {
    /// None for values the clock cannot run at
    pub fn bpm(value: i32) -> Option<ScheduledChange> {
        positive(value).map(ScheduledChange::Bpm)
    }
    pub fn bpi(value: i32) -> Option<ScheduledChange> {
        positive(value).map(ScheduledChange::Bpi)
    }
}

fn positive(value: i32) -> Option<u16> {
    if value <= 0 {
        None
    } else {
        Some(value.min(u16::MAX as i32) as u16)
    }
}

pub fn samples_per_interval(sample_rate: u32, bpm: u16, bpi: u16) -> usize {
    if bpm == 0 {
        return 0;
    }
    let interval_ms = 60_000.0 / bpm as f64 * bpi as f64;
    (sample_rate as f64 * interval_ms / 1000.0).round() as usize
}

#[derive(Debug, Clone)]
pub struct SessionClock {
    sample_rate: u32,
    bpm: u16,
    bpi: u16,
    samples_per_interval: usize,
    position: usize,
}

impl SessionClock {
    pub fn new(sample_rate: u32, bpm: u16, bpi: u16) -> SessionClock {
        SessionClock {
            sample_rate,
            bpm,
            bpi,
            samples_per_interval: samples_per_interval(sample_rate, bpm, bpi),
            position: 0,
        }
    }

    fn recompute(&mut self) {
        self.samples_per_interval = samples_per_interval(self.sample_rate, self.bpm, self.bpi);
        if self.position >= self.samples_per_interval {
            self.position = 0;
        }
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }
    pub fn bpi(&self) -> u16 {
        self.bpi
    }
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    pub fn samples_per_interval(&self) -> usize {
        self.samples_per_interval
    }
    pub fn samples_per_beat(&self) -> usize {
        if self.bpi == 0 {
            return 0;
        }
        self.samples_per_interval / self.bpi as usize
    }
    pub fn position(&self) -> usize {
        self.position
    }
    pub fn at_boundary(&self) -> bool {
        self.position == 0
    }
    /// frames left before the next boundary
    pub fn remaining(&self) -> usize {
        self.samples_per_interval - self.position
    }
    pub fn current_beat(&self) -> usize {
        match self.samples_per_beat() {
            0 => 0,
            spb => self.position / spb,
        }
    }

    /// returns false when the value was rejected
    pub fn set_bpm(&mut self, bpm: u16) -> bool {
        if bpm == 0 {
            warn!("ignoring bpm {}", bpm);
            return false;
        }
        self.bpm = bpm;
        self.recompute();
        true
    }
    pub fn set_bpi(&mut self, bpi: u16) -> bool {
        if bpi == 0 {
            warn!("ignoring bpi {}", bpi);
            return false;
        }
        self.bpi = bpi;
        self.recompute();
        true
    }
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == 0 {
            return;
        }
        self.sample_rate = sample_rate;
        self.recompute();
    }
    pub fn apply(&mut self, change: ScheduledChange) -> bool {
        match change {
            ScheduledChange::Bpm(v) => self.set_bpm(v),
            ScheduledChange::Bpi(v) => self.set_bpi(v),
        }
    }

    pub fn advance(&mut self, frames: usize) {
        if self.samples_per_interval == 0 {
            return;
        }
        self.position = (self.position + frames) % self.samples_per_interval;
    }
    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl fmt::Display for SessionClock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[ bpm: {}, bpi: {}, rate: {}, interval: {}, pos: {} ]",
            self.bpm, self.bpi, self.sample_rate, self.samples_per_interval, self.position
        )
    }
}

#[cfg(test)]
mod test_clock {
    use super::*;

    #[test]
    fn interval_length() {
        let clock = SessionClock::new(44_100, 120, 8);
        assert_eq!(clock.samples_per_interval(), 176_400);
        assert_eq!(clock.samples_per_beat(), 22_050);
        assert_eq!(samples_per_interval(48_000, 90, 16), 512_000);
    }

    #[test]
    fn beat_lengths_add_up_across_the_range() {
        for bpm in [MIN_BPM, 97, 120, 333, MAX_BPM] {
            for bpi in [MIN_BPI, 7, 16, 32, MAX_BPI] {
                let clock = SessionClock::new(44_100, bpm, bpi);
                let exact = 44_100.0 * 60.0 / bpm as f64 * bpi as f64;
                assert!((clock.samples_per_interval() as f64 - exact).abs() <= 0.5 + 1.0e-6);
                assert!(clock.samples_per_beat() * bpi as usize <= clock.samples_per_interval());
            }
        }
    }

    #[test]
    fn advance_wraps() {
        let mut clock = SessionClock::new(44_100, 120, 8);
        clock.advance(176_000);
        assert_eq!(clock.current_beat(), 7);
        assert_eq!(clock.remaining(), 400);
        clock.advance(400);
        assert!(clock.at_boundary());
    }

    #[test]
    fn shorter_interval_rewinds() {
        let mut clock = SessionClock::new(44_100, 120, 8);
        clock.advance(100_000);
        assert!(clock.set_bpi(4));
        assert_eq!(clock.position(), 0);
        clock.advance(1000);
        assert!(clock.set_bpm(100));
        assert_eq!(clock.position(), 1000);
    }

    #[test]
    fn rejects_zero() {
        let mut clock = SessionClock::new(44_100, 120, 8);
        assert!(!clock.set_bpm(0));
        assert!(!clock.apply(ScheduledChange::Bpi(0)));
        assert_eq!(clock.bpm(), 120);
        assert_eq!(ScheduledChange::bpm(-3), None);
        assert_eq!(ScheduledChange::bpi(16), Some(ScheduledChange::Bpi(16)));
    }
}

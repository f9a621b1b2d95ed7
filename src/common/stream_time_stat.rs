//! Running statistics and a coarse microsecond timer.
//!
//! The encode worker feeds [`StreamTimeStat`] with per-chunk encode times and every remote
//! channel feeds one with its jitter buffer depth.  The controller uses [`MicroTimer`] to pace
//! level reports.
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamTimeStat {
    peak: f64,
    mean: f64,
    sigma: f64,
    window: u64,
    peak_decay: f64,
}

impl StreamTimeStat {
    pub fn build(window_size: u64) -> StreamTimeStat {
        Self::with_peak_decay(window_size, 0.05)
    }
    /// `peak_decay` is how much the held peak drops for every sample below it
    pub fn with_peak_decay(window_size: u64, peak_decay: f64) -> StreamTimeStat {
        StreamTimeStat {
            peak: 0.0,
            mean: 0.0,
            sigma: 0.0,
            window: window_size.max(1),
            peak_decay: peak_decay.abs(),
        }
    }
    pub fn clear(&mut self) {
        self.peak = 0.0;
        self.mean = 0.0;
        self.sigma = 0.0;
    }
    pub fn get_peak(&self) -> f64 {
        self.peak
    }
    pub fn get_mean(&self) -> f64 {
        self.mean
    }
    pub fn get_sigma(&self) -> f64 {
        self.sigma
    }
    pub fn get_window(&self) -> u64 {
        self.window
    }

    pub fn add_sample(&mut self, sample: f64) {
        if sample > self.peak {
            self.peak = sample;
        } else {
            self.peak = (self.peak - self.peak_decay).max(sample);
        }
        let scale: f64 = (self.window as f64 - 1.0) / self.window as f64;
        self.mean = scale * (self.mean + sample / self.window as f64);
        self.sigma = scale * (self.sigma + (self.mean - sample).abs() / self.window as f64);
    }
}

impl fmt::Display for StreamTimeStat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ peak: {:.2}, mean: {:.2}, sigma: {:.2} window: {} }}",
            self.peak, self.mean, self.sigma, self.window
        )
    }
}

#[cfg(test)]
mod test_stream_time_stat {
    use super::*;

    #[test]
    fn build() {
        let stat = StreamTimeStat::build(100);
        assert_eq!(stat.get_mean(), 0.0);
        assert_eq!(stat.get_window(), 100);
    }
    #[test]
    fn add_sample() {
        let mut stat = StreamTimeStat::build(2);
        stat.add_sample(1.0);
        assert_eq!(stat.get_mean(), 0.25);
        stat.add_sample(1.0);
        stat.add_sample(1.0);
        assert!(stat.get_mean() > 0.25);
    }
    #[test]
    fn peak_decays_but_not_below_sample() {
        let mut stat = StreamTimeStat::with_peak_decay(10, 1.0);
        stat.add_sample(5.0);
        stat.add_sample(0.0);
        assert_eq!(stat.get_peak(), 4.0);
        stat.add_sample(3.9);
        assert_eq!(stat.get_peak(), 3.9);
        stat.clear();
        assert_eq!(stat.get_peak(), 0.0);
    }
}

pub struct MicroTimer {
    last_time: u128,
    interval: u128,
}

impl MicroTimer {
    pub fn build(now: u128, interval: u128) -> MicroTimer {
        MicroTimer {
            last_time: now,
            interval,
        }
    }
    pub fn set_interval(&mut self, interval: u128) {
        self.interval = interval;
    }
    pub fn expired(&self, now: u128) -> bool {
        (self.last_time + self.interval) < now
    }
    pub fn reset(&mut self, now: u128) {
        self.last_time = now;
    }
    pub fn since(&self, now: u128) -> u128 {
        now.saturating_sub(self.last_time)
    }
}

#[cfg(test)]
mod test_micro_timer {
    use super::*;

    #[test]
    fn test_expiration() {
        let mut now = 1000;
        let mut mt = MicroTimer::build(now, 100);
        assert!(!mt.expired(now));
        now += 99;
        assert!(!mt.expired(now));
        now += 2;
        assert!(mt.expired(now));
        mt.reset(now);
        assert!(!mt.expired(now));
        assert_eq!(mt.since(now + 10), 10);
        assert_eq!(mt.since(now - 10), 0);
        mt.set_interval(9);
        now += 10;
        assert!(mt.expired(now));
    }
}

//! calculates peak and average power of data frames in dB
//!
//! used by [`crate::sound::audio_node::NodeCore`] and the mixer master bus
use crate::utils::get_frame_power_in_db;

use super::{peak_detector::PeakDetector, smoothing_filter::SmoothingFilter};

pub const METER_FLOOR_DB: f64 = -60.0;

/// Meter rate is one reading per block, not per sample
pub struct PowerMeter {
    peak: PeakDetector<f64>,
    avg: SmoothingFilter<f64>,
    last_peak: f64,
    last_avg: f64,
}

impl PowerMeter {
    pub fn new() -> PowerMeter {
        Self::with_frame_rate(44_100.0 / 128.0)
    }
    /// `frame_rate` is how many frames per second will be added
    pub fn with_frame_rate(frame_rate: f64) -> PowerMeter {
        let mut meter = PowerMeter {
            peak: PeakDetector::build(0.01, 0.1, frame_rate),
            avg: SmoothingFilter::build(0.01, frame_rate),
            last_peak: METER_FLOOR_DB,
            last_avg: METER_FLOOR_DB,
        };
        meter.peak.reset(METER_FLOOR_DB);
        meter.avg.reset(METER_FLOOR_DB);
        meter
    }
    pub fn get_peak(&self) -> f64 {
        self.last_peak.max(METER_FLOOR_DB)
    }
    pub fn get_avg(&self) -> f64 {
        self.last_avg.max(METER_FLOOR_DB)
    }
    pub fn add_frame(&mut self, data: &[f32], gain: f64) {
        if data.is_empty() {
            return;
        }
        let p = get_frame_power_in_db(data, gain);
        self.last_peak = self.peak.get(p);
        self.last_avg = self.avg.get(p);
    }
}

#[cfg(test)]
mod test_power_meter {
    use super::*;

    #[test]
    fn silence_reads_floor() {
        let mut meter = PowerMeter::new();
        meter.add_frame(&[0.0; 128], 1.0);
        assert_eq!(meter.get_avg(), METER_FLOOR_DB);
        assert_eq!(meter.get_peak(), METER_FLOOR_DB);
    }
    #[test]
    fn full_scale_rises() {
        let mut meter = PowerMeter::new();
        for _ in 0..200 {
            meter.add_frame(&[1.0; 128], 1.0);
        }
        assert!(meter.get_avg() > -1.0);
        assert!(meter.get_peak() > -1.0);
    }
}

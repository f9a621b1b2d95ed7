//! Envelope follower with separate attack and release time constants
use num::{Float, FromPrimitive, Zero};
use std::fmt::{self, Display};

use crate::utils::get_coef;

#[derive(Clone)]
pub struct PeakDetector<T> {
    attack_coef: T,
    release_coef: T,
    last_output: T,
}

impl<T: Float + FromPrimitive> PeakDetector<T> {
    pub fn build(attack: T, release: T, sample_rate: T) -> PeakDetector<T> {
        PeakDetector {
            attack_coef: get_coef(attack, sample_rate),
            release_coef: get_coef(release, sample_rate),
            last_output: Zero::zero(),
        }
    }

    pub fn get(&mut self, input: T) -> T {
        let coef = if self.last_output < input {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.last_output = input * coef + (T::one() - coef) * self.last_output;
        self.last_output
    }

    pub fn reset(&mut self, value: T) {
        self.last_output = value;
    }
}

impl<T: Float + FromPrimitive + Display> Display for PeakDetector<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ attack: {}, release: {}, peak: {} }}",
            self.attack_coef, self.release_coef, self.last_output
        )
    }
}

#[cfg(test)]
mod test_peak_detector {
    use super::*;

    #[test]
    fn attack_is_faster_than_release() {
        let mut detector: PeakDetector<f32> = PeakDetector::build(0.01, 2.5, 2666.6);
        assert_eq!(detector.get(0.0), 0.0);
        for _ in 0..50 {
            detector.get(1.0);
        }
        let up = detector.get(1.0);
        assert!(up > 0.8);
        for _ in 0..50 {
            detector.get(0.0);
        }
        // still holding most of the peak
        assert!(detector.get(0.0) > 0.5 * up);
        detector.reset(0.0);
        assert_eq!(detector.get(0.0), 0.0);
    }
}

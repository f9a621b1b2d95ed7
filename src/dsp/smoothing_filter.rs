use num::{Float, FromPrimitive, Zero};
use std::fmt::{self, Display};

use crate::utils::get_coef;

/// one pole low pass used to average meter readings
#[derive(Clone)]
pub struct SmoothingFilter<T> {
    coef: T,
    last_output: T,
}

impl<T: Float + FromPrimitive> SmoothingFilter<T> {
    pub fn build(time_const: T, sample_rate: T) -> SmoothingFilter<T> {
        SmoothingFilter {
            coef: get_coef(time_const, sample_rate),
            last_output: Zero::zero(),
        }
    }

    pub fn get(&mut self, input: T) -> T {
        self.last_output = input * self.coef + (T::one() - self.coef) * self.last_output;
        self.last_output
    }
    pub fn get_last_output(&self) -> T {
        self.last_output
    }
    pub fn reset(&mut self, value: T) {
        self.last_output = value;
    }
}

impl<T: Float + FromPrimitive + Display> Display for SmoothingFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ coef: {}, last_output: {} }}", self.coef, self.last_output)
    }
}

#[cfg(test)]
mod test_smoothing_filter {
    use super::*;

    #[test]
    fn converges_on_input() {
        let mut filter = SmoothingFilter::build(0.01, 2666.6);
        assert_eq!(filter.get(0.0), 0.0);
        for _ in 0..500 {
            filter.get(0.6);
        }
        assert!((filter.get_last_output() - 0.6).abs() < 1.0e-3);
    }
}

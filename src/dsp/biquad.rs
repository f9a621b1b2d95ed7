//! BiQuad filter (RBJ cookbook).  Only the pass types the engine uses are kept.

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FilterType {
    LowPass,
    HighPass,
}

#[derive(Clone, Debug)]
pub struct BiQuadFilter {
    pub filter_type: FilterType,
    pub sample_rate: f64,
    pub cutoff_freq: f64,
    pub q: f64,
    // normalized coefficients (a0 == 1)
    a1: f64,
    a2: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    // previous inputs and outputs
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiQuadFilter {
    pub fn new() -> BiQuadFilter {
        let mut filter = BiQuadFilter {
            filter_type: FilterType::LowPass,
            sample_rate: 48_000.0,
            cutoff_freq: 1_000.0,
            q: 1.0,
            a1: 0.0,
            a2: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        filter.init(FilterType::LowPass, 1_000.0, 1.0, 48_000.0);
        filter
    }
    pub fn get_type(&self) -> FilterType {
        self.filter_type
    }
    /// recompute the coefficients.  history is cleared.
    pub fn init(&mut self, filter_type: FilterType, cutoff: f64, q: f64, sample_rate: f64) {
        self.filter_type = filter_type;
        self.cutoff_freq = cutoff;
        self.q = q;
        self.sample_rate = sample_rate;
        self.reset();

        let omega = 2.0 * std::f64::consts::PI * (cutoff / sample_rate);
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        let (b0, b1, b2) = match filter_type {
            FilterType::LowPass => ((1.0 - cos_omega) / 2.0, 1.0 - cos_omega, (1.0 - cos_omega) / 2.0),
            FilterType::HighPass => ((1.0 + cos_omega) / 2.0, -(1.0 + cos_omega), (1.0 + cos_omega) / 2.0),
        };
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = (-2.0 * cos_omega) / a0;
        self.a2 = (1.0 - alpha) / a0;
    }
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    pub fn get_sample(&mut self, input: f32) -> f32 {
        let value: f64 = self.b0 * input as f64 + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input as f64;
        self.y2 = self.y1;
        self.y1 = value;
        value as f32
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.get_sample(*s);
        }
    }
}

#[cfg(test)]
mod test_biquad {
    use super::*;

    fn settle(filter: &mut BiQuadFilter, value: f32) -> f32 {
        let mut last = 0.0;
        for _ in 0..48_000 {
            last = filter.get_sample(value);
        }
        last
    }

    #[test]
    fn high_pass_blocks_dc() {
        let mut filter = BiQuadFilter::new();
        filter.init(FilterType::HighPass, 120.0, 1.0, 48_000.0);
        assert!(settle(&mut filter, 1.0).abs() < 1.0e-3);
    }
    #[test]
    fn low_pass_passes_dc() {
        let mut filter = BiQuadFilter::new();
        filter.init(FilterType::LowPass, 400.0, 1.0, 48_000.0);
        assert!((settle(&mut filter, 1.0) - 1.0).abs() < 1.0e-3);
        assert_eq!(filter.get_type(), FilterType::LowPass);
    }
}

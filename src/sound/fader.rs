//! Equal power left/right pan

use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_4};
use std::fmt;

#[derive(Clone, Copy, Debug)]
pub struct Fader {
    left: f32,
    right: f32,
    val: f32,
}

impl Fader {
    pub fn new() -> Fader {
        let mut f = Fader {
            left: 1.0,
            right: 1.0,
            val: 0.0,
        };
        f.set(0.0);
        f
    }
    /// call this with a value from -1.0 (hard pan left) to +1.0 (hard pan right)
    /// 0.0 means pan center, both sides at -3dB.
    pub fn set(&mut self, v: f32) {
        self.val = v.clamp(-1.0, 1.0);
        let angle = self.val * FRAC_PI_4;
        let (sin, cos) = angle.sin_cos();
        self.left = FRAC_1_SQRT_2 * (cos - sin);
        self.right = FRAC_1_SQRT_2 * (cos + sin);
    }

    pub fn get(&self) -> f32 {
        self.val
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn right(&self) -> f32 {
        self.right
    }
}

impl fmt::Display for Fader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ left: {:.3}, right: {:.3} ]", self.left, self.right)
    }
}

#[cfg(test)]
mod test_fader {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1.0e-6
    }

    #[test]
    fn center_is_minus_three_db() {
        let fader = Fader::new();
        assert!(close(fader.left(), FRAC_1_SQRT_2));
        assert!(close(fader.right(), FRAC_1_SQRT_2));
    }
    #[test]
    fn hard_pans() {
        let mut fader = Fader::new();
        fader.set(-1.0);
        assert!(close(fader.left(), 1.0));
        assert!(close(fader.right(), 0.0));
        fader.set(5.0);
        assert_eq!(fader.get(), 1.0);
        assert!(close(fader.right(), 1.0));
        assert!(close(fader.left(), 0.0));
    }
    #[test]
    fn power_is_constant() {
        let mut fader = Fader::new();
        for v in [-0.75, -0.2, 0.0, 0.4, 0.9] {
            fader.set(v);
            let power = fader.left().powi(2) + fader.right().powi(2);
            assert!(close(power, 1.0));
        }
    }
}

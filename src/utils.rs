// utility functions

use num::{Float, FromPrimitive};

pub const DB_FLOOR: f64 = -100.0;

/// one pole coefficient for a time constant in seconds
pub fn get_coef<T: Float + FromPrimitive>(time_const: T, sample_rate: T) -> T {
    let denom = time_const * sample_rate;
    if denom <= T::zero() {
        return T::one();
    }
    T::one() - (-T::one() / denom).exp()
}

/// mean square power of the frame after applying `gain`, in dB
pub fn get_frame_power_in_db(frame: &[f32], gain: f64) -> f64 {
    if frame.is_empty() {
        return DB_FLOOR;
    }
    let sum: f64 = frame.iter().map(|s| (*s as f64 * gain).powi(2)).sum();
    to_db(sum / frame.len() as f64).max(DB_FLOOR)
}

/// power ratio to dB
pub fn to_db(power: f64) -> f64 {
    if power <= 0.0 {
        return DB_FLOOR;
    }
    10.0 * power.log10()
}

pub fn clip_float(v: f32) -> f32 {
    v.clamp(-1.0, 1.0)
}

//! Plumbing shared by every part of the engine: errors, configuration, timing stats.
use std::time::{SystemTime, UNIX_EPOCH};

pub mod box_error;
pub mod config;
pub mod settings;
pub mod stream_time_stat;

/// microseconds since the epoch, used to drive the [`stream_time_stat::MicroTimer`]s
pub fn get_micro_time() -> u128 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros(),
        Err(_) => 0,
    }
}

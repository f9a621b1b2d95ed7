//! Typed engine settings read once at start
use json::JsonValue;
use log::warn;
use std::fmt;

use crate::{
    common::config::Config,
    session::clock::{MAX_BPI, MAX_BPM, MIN_BPI, MIN_BPM},
    sound::{
        codec::{QUALITY_LOW, QUALITY_NORMAL},
        looper::{LooperMode, MAX_LOOP_LAYERS, MIN_LOOP_LAYERS},
        low_cut::LowCutState,
        metronome::MetronomeSound,
    },
};

pub const MIN_SAMPLE_RATE: u32 = 44_100;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MIN_BUFFER_SIZE: u32 = 16;
pub const MAX_BUFFER_SIZE: u32 = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub bpm: u16,
    pub bpi: u16,
    pub audio_quality: f32,
    pub voice_quality: f32,
    pub metronome_sound: MetronomeSound,
    pub metronome_gain: f32,
    pub low_cut: LowCutState,
    pub looper_mode: LooperMode,
    pub looper_layers: usize,
    pub max_buffered_intervals: usize,
    pub decode_threads: usize,
    pub bot_names: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            sample_rate: MIN_SAMPLE_RATE,
            buffer_size: 128,
            bpm: 120,
            bpi: 16,
            audio_quality: QUALITY_NORMAL,
            voice_quality: QUALITY_LOW,
            metronome_sound: MetronomeSound::Sine,
            metronome_gain: 1.0,
            low_cut: LowCutState::Off,
            looper_mode: LooperMode::Sequence,
            looper_layers: 4,
            max_buffered_intervals: 8,
            decode_threads: 2,
            bot_names: vec![String::from("Jambot"), String::from("ninbot")],
        }
    }
}

/// keeps `fallback` (and says so) when `value` is outside `[min, max]`
fn in_range<T: PartialOrd + fmt::Display + Copy>(key: &str, value: T, min: T, max: T, fallback: T) -> T {
    if value < min || value > max {
        warn!("setting {} = {} is outside [{}, {}], keeping {}", key, value, min, max, fallback);
        fallback
    } else {
        value
    }
}

impl EngineSettings {
    /// The defaults as json, suitable for [`Config::build`]
    pub fn default_json() -> JsonValue {
        let d = EngineSettings::default();
        json::object! {
            "sample_rate": d.sample_rate,
            "buffer_size": d.buffer_size,
            "bpm": d.bpm,
            "bpi": d.bpi,
            "audio_quality": d.audio_quality,
            "voice_quality": d.voice_quality,
            "metronome_sound": d.metronome_sound.to_string(),
            "metronome_gain": d.metronome_gain,
            "low_cut": d.low_cut.to_string(),
            "looper_mode": d.looper_mode.to_string(),
            "looper_layers": d.looper_layers,
            "max_buffered_intervals": d.max_buffered_intervals,
            "decode_threads": d.decode_threads,
            "bot_names": d.bot_names.join(","),
        }
    }

    /// Pull every setting out of `config`.  Anything invalid is reported and replaced by
    /// the default.
    pub fn from_config(config: &Config) -> EngineSettings {
        let d = EngineSettings::default();
        let u32_or = |key: &str, def: u32| config.get_u32_value(key, None).unwrap_or(def);
        let f32_or = |key: &str, def: f32| config.get_f32_value(key, None).unwrap_or(def);
        let str_or = |key: &str, def: String| config.get_str_value(key, None).unwrap_or(def);

        let metronome_sound = str_or("metronome_sound", d.metronome_sound.to_string());
        let low_cut = str_or("low_cut", d.low_cut.to_string());
        let looper_mode = str_or("looper_mode", d.looper_mode.to_string());

        EngineSettings {
            sample_rate: in_range(
                "sample_rate",
                u32_or("sample_rate", d.sample_rate),
                MIN_SAMPLE_RATE,
                MAX_SAMPLE_RATE,
                d.sample_rate,
            ),
            buffer_size: in_range(
                "buffer_size",
                u32_or("buffer_size", d.buffer_size),
                MIN_BUFFER_SIZE,
                MAX_BUFFER_SIZE,
                d.buffer_size,
            ),
            bpm: in_range("bpm", u32_or("bpm", d.bpm as u32), MIN_BPM as u32, MAX_BPM as u32, d.bpm as u32) as u16,
            bpi: in_range("bpi", u32_or("bpi", d.bpi as u32), MIN_BPI as u32, MAX_BPI as u32, d.bpi as u32) as u16,
            audio_quality: in_range("audio_quality", f32_or("audio_quality", d.audio_quality), 0.0, 1.0, d.audio_quality),
            voice_quality: in_range("voice_quality", f32_or("voice_quality", d.voice_quality), 0.0, 1.0, d.voice_quality),
            metronome_sound: MetronomeSound::from_name(&metronome_sound).unwrap_or_else(|| {
                warn!("unknown metronome sound {}", metronome_sound);
                d.metronome_sound
            }),
            metronome_gain: in_range("metronome_gain", f32_or("metronome_gain", d.metronome_gain), 0.0, 2.0, d.metronome_gain),
            low_cut: LowCutState::from_name(&low_cut).unwrap_or_else(|| {
                warn!("unknown low cut setting {}", low_cut);
                d.low_cut
            }),
            looper_mode: LooperMode::from_name(&looper_mode).unwrap_or_else(|| {
                warn!("unknown looper mode {}", looper_mode);
                d.looper_mode
            }),
            looper_layers: in_range(
                "looper_layers",
                u32_or("looper_layers", d.looper_layers as u32) as usize,
                MIN_LOOP_LAYERS,
                MAX_LOOP_LAYERS,
                d.looper_layers,
            ),
            max_buffered_intervals: in_range(
                "max_buffered_intervals",
                u32_or("max_buffered_intervals", d.max_buffered_intervals as u32) as usize,
                1,
                64,
                d.max_buffered_intervals,
            ),
            decode_threads: in_range(
                "decode_threads",
                u32_or("decode_threads", d.decode_threads as u32) as usize,
                1,
                16,
                d.decode_threads,
            ),
            bot_names: config.get_list_value("bot_names", None).unwrap_or(d.bot_names),
        }
    }
}

impl fmt::Display for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ rate: {}, buffer: {}, bpm: {}, bpi: {}, quality: {}/{}, metronome: {}, low_cut: {}, looper: {} x{} }}",
            self.sample_rate,
            self.buffer_size,
            self.bpm,
            self.bpi,
            self.audio_quality,
            self.voice_quality,
            self.metronome_sound,
            self.low_cut,
            self.looper_mode,
            self.looper_layers
        )
    }
}

#[cfg(test)]
mod test_settings {
    use super::*;

    #[test]
    fn defaults_round_trip_through_config() {
        let config = Config::from_defaults(EngineSettings::default_json());
        assert_eq!(EngineSettings::from_config(&config), EngineSettings::default());
    }

    #[test]
    fn out_of_range_keeps_default() {
        let mut config = Config::from_defaults(EngineSettings::default_json());
        config.set_value("sample_rate", 8000).unwrap();
        config.set_value("looper_layers", 12).unwrap();
        config.set_value("bpm", 300).unwrap();
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.sample_rate, 44_100);
        assert_eq!(settings.looper_layers, 4);
        assert_eq!(settings.bpm, 300);
    }

    #[test]
    fn named_values() {
        let mut config = Config::from_defaults(EngineSettings::default_json());
        config.set_value("low_cut", "drastic").unwrap();
        config.set_value("metronome_sound", "bogus").unwrap();
        config.set_value("looper_mode", "all_layers").unwrap();
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.low_cut, LowCutState::Drastic);
        assert_eq!(settings.metronome_sound, MetronomeSound::Sine);
        assert_eq!(settings.looper_mode, LooperMode::AllLayers);
    }
}

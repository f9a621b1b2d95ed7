//! Audio side of the engine: buffers, nodes, the mixer and the codec plumbing

use log::error;

use crate::common::box_error::BoxError;

pub trait SoundCallback {
    fn process(&mut self, in_a: &[f32], in_b: &[f32], out_a: &mut [f32], out_b: &mut [f32]) -> Result<(), BoxError>;
}

/// Call `engine` from a device callback.  An error or panic here leaves the session in an
/// unknown state so the process goes down.
pub fn drive_callback<T: SoundCallback + ?Sized>(
    engine: &mut T,
    in_a: &[f32],
    in_b: &[f32],
    out_a: &mut [f32],
    out_b: &mut [f32],
) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        engine.process(in_a, in_b, out_a, out_b)
    }));
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("audio callback failed: {}", e);
            std::process::abort();
        }
        Err(_) => {
            error!("audio callback panicked");
            std::process::abort();
        }
    }
}

pub mod audio_node;
pub mod codec;
pub mod encoder;
pub mod fader;
pub mod interval_decoder;
pub mod local_input;
pub mod looper;
pub mod low_cut;
pub mod metronome;
pub mod midi_message;
pub mod midi_sync;
pub mod mixer;
pub mod param_message;
pub mod plugin;
pub mod remote_channel;
pub mod resampler;
pub mod samples_buffer;

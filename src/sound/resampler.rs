//! Rate conversion for remote streams recorded at a different sample rate than ours.
use super::samples_buffer::SamplesBuffer;

/// Works out how many source frames are needed to produce a block of output frames.
///
/// The exact ratio is rarely a whole number.  The fractional part is carried from call to call
/// and once it adds up to more than one frame the request grows or shrinks by one.  Over time
/// the frames pulled from the source match the ideal count to within one frame.
#[derive(Debug, Default, Clone)]
pub struct ResamplingCorrector {
    correction: f64,
}

impl ResamplingCorrector {
    pub fn new() -> ResamplingCorrector {
        ResamplingCorrector { correction: 0.0 }
    }
    pub fn input_length(&mut self, source_rate: u32, target_rate: u32, out_frames: usize) -> usize {
        if target_rate == 0 {
            return out_frames;
        }
        let exact = source_rate as f64 * out_frames as f64 / target_rate as f64;
        let mut frames = exact.trunc() as i64;
        self.correction += exact - frames as f64;
        if self.correction.abs() > 1.0 {
            frames += self.correction.trunc() as i64;
            self.correction -= self.correction.signum();
        }
        frames.max(0) as usize
    }
    pub fn reset(&mut self) {
        self.correction = 0.0;
    }
}

/// Linear interpolation resampler.  Always produces exactly the number of frames asked for.
pub struct LinearResampler {
    output: SamplesBuffer,
}

impl LinearResampler {
    pub fn new() -> LinearResampler {
        LinearResampler {
            output: SamplesBuffer::stereo(0),
        }
    }

    pub fn resample(&mut self, input: &SamplesBuffer, out_frames: usize) -> &SamplesBuffer {
        self.output.set_channels(input.channels());
        self.output.set_frames(out_frames);
        self.output.zero();
        let in_frames = input.frames();
        if in_frames == 0 || out_frames == 0 {
            return &self.output;
        }
        let ratio = in_frames as f64 / out_frames as f64;
        for c in 0..input.channels() {
            let src = input.channel(c);
            let dst = self.output.channel_mut(c);
            for (i, d) in dst.iter_mut().enumerate() {
                let pos = i as f64 * ratio;
                let idx = pos.floor() as usize;
                let frac = (pos - idx as f64) as f32;
                let a = src[idx.min(in_frames - 1)];
                let b = src[(idx + 1).min(in_frames - 1)];
                *d = a + (b - a) * frac;
            }
        }
        &self.output
    }
}

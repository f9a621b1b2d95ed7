//! Planar multi channel sample storage shared by every node.
//!
//! Mono buffers mixed into stereo ones are copied to both sides, stereo buffers mixed into
//! mono ones are averaged.
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub struct SamplesBuffer {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

/// peak and rms of the last rendered block, per side
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AudioPeak {
    pub left_peak: f32,
    pub right_peak: f32,
    pub left_rms: f32,
    pub right_rms: f32,
}

impl AudioPeak {
    /// keep the larger of the two readings
    pub fn update(&mut self, other: &AudioPeak) {
        self.left_peak = self.left_peak.max(other.left_peak);
        self.right_peak = self.right_peak.max(other.right_peak);
        self.left_rms = self.left_rms.max(other.left_rms);
        self.right_rms = self.right_rms.max(other.right_rms);
    }
    pub fn max_peak(&self) -> f32 {
        self.left_peak.max(self.right_peak)
    }
    pub fn zero(&mut self) {
        *self = AudioPeak::default();
    }
}

impl fmt::Display for AudioPeak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[ peak: {:.3}/{:.3} rms: {:.3}/{:.3} ]",
            self.left_peak, self.right_peak, self.left_rms, self.right_rms
        )
    }
}

impl SamplesBuffer {
    pub fn new(channels: usize, frames: usize) -> SamplesBuffer {
        let channels = channels.max(1);
        SamplesBuffer {
            channels: vec![vec![0.0; frames]; channels],
            frames,
        }
    }
    pub fn stereo(frames: usize) -> SamplesBuffer {
        Self::new(2, frames)
    }
    /// one vector per channel, all the same length
    pub fn from_channels(channels: Vec<Vec<f32>>) -> SamplesBuffer {
        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        let mut channels = channels;
        if channels.is_empty() {
            channels.push(vec![]);
        }
        for c in channels.iter_mut() {
            c.truncate(frames);
        }
        SamplesBuffer { channels, frames }
    }
    pub fn channels(&self) -> usize {
        self.channels.len()
    }
    pub fn frames(&self) -> usize {
        self.frames
    }
    pub fn is_mono(&self) -> bool {
        self.channels.len() == 1
    }
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
    pub fn channel(&self, idx: usize) -> &[f32] {
        let idx = idx.min(self.channels.len() - 1);
        &self.channels[idx][..self.frames]
    }
    pub fn channel_mut(&mut self, idx: usize) -> &mut [f32] {
        let idx = idx.min(self.channels.len() - 1);
        let frames = self.frames;
        &mut self.channels[idx][..frames]
    }

    /// resize, keeping existing samples and zeroing new ones
    pub fn set_frames(&mut self, frames: usize) {
        for c in self.channels.iter_mut() {
            c.resize(frames, 0.0);
        }
        self.frames = frames;
    }
    pub fn set_channels(&mut self, channels: usize) {
        let channels = channels.max(1);
        self.channels.resize(channels, vec![0.0; self.frames]);
    }
    pub fn zero(&mut self) {
        for c in self.channels.iter_mut() {
            c.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    fn source_channel(src: &SamplesBuffer, dst_channel: usize, dst_channels: usize) -> SourceSide {
        if src.channels() == dst_channels {
            SourceSide::Channel(dst_channel)
        } else if src.is_mono() {
            SourceSide::Channel(0)
        } else if dst_channels == 1 {
            SourceSide::Average
        } else {
            SourceSide::Channel(dst_channel.min(src.channels() - 1))
        }
    }

    fn read(src: &SamplesBuffer, side: SourceSide, frame: usize) -> f32 {
        match side {
            SourceSide::Channel(c) => src.channels[c][frame],
            SourceSide::Average => {
                src.channels.iter().map(|c| c[frame]).sum::<f32>() / src.channels() as f32
            }
        }
    }

    /// overwrite `frames` samples starting at `dst_offset` with samples of `src` starting at
    /// `src_offset`.  Out of range requests are clipped.
    pub fn copy_from(&mut self, src: &SamplesBuffer, src_offset: usize, dst_offset: usize, frames: usize) {
        let frames = frames
            .min(src.frames.saturating_sub(src_offset))
            .min(self.frames.saturating_sub(dst_offset));
        let dst_channels = self.channels();
        for c in 0..dst_channels {
            let side = Self::source_channel(src, c, dst_channels);
            for i in 0..frames {
                self.channels[c][dst_offset + i] = Self::read(src, side, src_offset + i);
            }
        }
    }

    /// like [`SamplesBuffer::copy_from`] but sums into the existing samples
    pub fn add_from(&mut self, src: &SamplesBuffer, src_offset: usize, dst_offset: usize, frames: usize) {
        let frames = frames
            .min(src.frames.saturating_sub(src_offset))
            .min(self.frames.saturating_sub(dst_offset));
        let dst_channels = self.channels();
        for c in 0..dst_channels {
            let side = Self::source_channel(src, c, dst_channels);
            for i in 0..frames {
                self.channels[c][dst_offset + i] += Self::read(src, side, src_offset + i);
            }
        }
    }

    /// take the length of `src` and copy it
    pub fn set(&mut self, src: &SamplesBuffer) {
        self.set_frames(src.frames);
        self.copy_from(src, 0, 0, src.frames);
    }
    pub fn add(&mut self, src: &SamplesBuffer) {
        self.add_from(src, 0, 0, src.frames);
    }

    /// grow by the frames of `src`
    pub fn append(&mut self, src: &SamplesBuffer) {
        let start = self.frames;
        self.set_frames(start + src.frames);
        self.copy_from(src, 0, start, src.frames);
    }
    /// drop the first `frames` samples of every channel
    pub fn discard_first(&mut self, frames: usize) {
        let frames = frames.min(self.frames);
        for c in self.channels.iter_mut() {
            c.drain(..frames);
        }
        self.frames -= frames;
    }

    /// `gain * boost` on every channel, with the pan gains on left/right of stereo buffers
    pub fn apply_gain(&mut self, gain: f32, left_gain: f32, right_gain: f32, boost: f32) {
        let master = gain * boost;
        if self.is_mono() {
            self.scale_channel(0, master);
            return;
        }
        self.scale_channel(0, master * left_gain);
        self.scale_channel(1, master * right_gain);
        for c in 2..self.channels() {
            self.scale_channel(c, master);
        }
    }
    pub fn scale(&mut self, gain: f32) {
        for c in 0..self.channels() {
            self.scale_channel(c, gain);
        }
    }
    fn scale_channel(&mut self, c: usize, gain: f32) {
        self.channels[c].iter_mut().for_each(|s| *s *= gain);
    }

    pub fn invert_stereo(&mut self) {
        if self.channels() >= 2 {
            self.channels.swap(0, 1);
        }
    }

    pub fn compute_peak(&self) -> AudioPeak {
        let stats = |c: &[f32]| {
            if c.is_empty() {
                return (0.0, 0.0);
            }
            let peak = c.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            let rms = (c.iter().map(|s| s * s).sum::<f32>() / c.len() as f32).sqrt();
            (peak, rms)
        };
        let (left_peak, left_rms) = stats(self.channel(0));
        let (right_peak, right_rms) = if self.is_mono() {
            (left_peak, left_rms)
        } else {
            stats(self.channel(1))
        };
        AudioPeak {
            left_peak,
            right_peak,
            left_rms,
            right_rms,
        }
    }

    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames * self.channels());
        for i in 0..self.frames {
            for c in self.channels.iter() {
                out.push(c[i]);
            }
        }
        out
    }
    pub fn from_interleaved(data: &[f32], channels: usize) -> SamplesBuffer {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let mut buffer = SamplesBuffer::new(channels, frames);
        for (i, s) in data.iter().take(frames * channels).enumerate() {
            buffer.channels[i % channels][i / channels] = *s;
        }
        buffer
    }
}

#[derive(Clone, Copy)]
enum SourceSide {
    Channel(usize),
    Average,
}

impl fmt::Display for SamplesBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ channels: {}, frames: {} ]", self.channels(), self.frames)
    }
}

#[cfg(test)]
mod test_samples_buffer {
    use super::*;

    #[test]
    fn mono_into_stereo_goes_both_sides() {
        let mono = SamplesBuffer::from_channels(vec![vec![0.5, 0.25]]);
        let mut out = SamplesBuffer::stereo(2);
        out.add(&mono);
        out.add(&mono);
        assert_eq!(out.channel(0), &[1.0, 0.5]);
        assert_eq!(out.channel(1), &[1.0, 0.5]);
    }
    #[test]
    fn stereo_into_mono_averages() {
        let stereo = SamplesBuffer::from_channels(vec![vec![1.0], vec![0.0]]);
        let mut out = SamplesBuffer::new(1, 1);
        out.set(&stereo);
        assert_eq!(out.channel(0), &[0.5]);
    }
    #[test]
    fn offsets_are_clipped() {
        let src = SamplesBuffer::from_channels(vec![vec![1.0; 4], vec![2.0; 4]]);
        let mut out = SamplesBuffer::stereo(6);
        out.copy_from(&src, 2, 3, 10);
        assert_eq!(out.channel(0), &[0.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
        assert_eq!(out.channel(1), &[0.0, 0.0, 0.0, 2.0, 2.0, 0.0]);
    }
    #[test]
    fn append_and_discard() {
        let mut buf = SamplesBuffer::new(1, 0);
        buf.append(&SamplesBuffer::from_channels(vec![vec![1.0, 2.0, 3.0]]));
        buf.discard_first(2);
        assert_eq!(buf.channel(0), &[3.0]);
        buf.discard_first(5);
        assert!(buf.is_empty());
    }
    #[test]
    fn gain_and_pan() {
        let mut buf = SamplesBuffer::from_channels(vec![vec![1.0], vec![1.0]]);
        buf.apply_gain(0.5, 1.0, 0.0, 2.0);
        assert_eq!(buf.channel(0), &[1.0]);
        assert_eq!(buf.channel(1), &[0.0]);
    }
    #[test]
    fn peak_and_rms() {
        let buf = SamplesBuffer::from_channels(vec![vec![-1.0, 1.0], vec![0.5, 0.0]]);
        let peak = buf.compute_peak();
        assert_eq!(peak.left_peak, 1.0);
        assert_eq!(peak.right_peak, 0.5);
        assert_eq!(peak.left_rms, 1.0);
        let mut held = AudioPeak::default();
        held.update(&peak);
        held.update(&AudioPeak::default());
        assert_eq!(held.max_peak(), 1.0);
    }
    #[test]
    fn interleave() {
        let buf = SamplesBuffer::from_interleaved(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(buf.frames(), 2);
        assert_eq!(buf.channel(1), &[2.0, 4.0]);
        assert_eq!(buf.interleaved(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}

//! Background encoding of the local channels.
//!
//! The audio thread hands finished blocks to [`EncodePipeline::schedule`], which only pushes
//! onto a queue and signals a condvar.  A worker thread pops the queue in order, keeps one
//! encoder per local channel and passes the compressed bytes to an [`EncodedSink`].
use log::{debug, error, trace, warn};
#[cfg(test)]
use mockall::automock;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
};
use thread_priority::ThreadBuilder;

use crate::common::{box_error::BoxError, get_micro_time, stream_time_stat::StreamTimeStat};

use super::{
    codec::{AudioEncoder, EncoderFactory},
    samples_buffer::SamplesBuffer,
};

/// A block of one local channel waiting to be encoded
#[derive(Debug, Clone)]
pub struct OutgoingChunk {
    pub channel_id: u8,
    pub samples: SamplesBuffer,
    pub sample_rate: u32,
    pub is_voice_chat: bool,
    pub is_first_part: bool,
    pub is_last_part: bool,
}

/// Compressed bytes ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub channel_id: u8,
    pub is_first_part: bool,
    pub is_last_part: bool,
    pub is_voice_chat: bool,
    pub bytes: Vec<u8>,
}

/// Receives the encoder output on the worker thread
#[cfg_attr(test, automock)]
pub trait EncodedSink: Send {
    fn on_encoded(&mut self, chunk: EncodedChunk);
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderQuality {
    pub audio: f32,
    pub voice: f32,
}

struct WorkQueue {
    chunks: VecDeque<OutgoingChunk>,
    quality: EncoderQuality,
    stop: bool,
}

struct Shared {
    queue: Mutex<WorkQueue>,
    wakeup: Condvar,
    encode_stat: Mutex<StreamTimeStat>,
}

pub struct EncodePipeline {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

struct ChannelEncoder {
    encoder: Box<dyn AudioEncoder>,
    // quality asked for, before the factory had a say
    quality: f32,
    // a stream was started and not finished yet
    open: bool,
}

struct Worker {
    shared: Arc<Shared>,
    factory: Arc<dyn EncoderFactory>,
    sink: Box<dyn EncodedSink>,
    encoders: HashMap<u8, ChannelEncoder>,
}

impl Worker {
    fn run(mut self) {
        debug!("encoder worker started");
        while let Some((chunk, quality)) = self.next_chunk() {
            let start = get_micro_time();
            if let Err(e) = self.encode(chunk, quality) {
                error!("encoding failed: {}", e);
            }
            if let Ok(mut stat) = self.shared.encode_stat.lock() {
                stat.add_sample(get_micro_time().saturating_sub(start) as f64);
            }
        }
        self.encoders.clear();
        debug!("encoder worker stopped");
    }

    /// blocks until there is work, None once stopped
    fn next_chunk(&self) -> Option<(OutgoingChunk, EncoderQuality)> {
        let mut queue = match self.shared.queue.lock() {
            Ok(q) => q,
            Err(_) => return None,
        };
        loop {
            if queue.stop {
                return None;
            }
            if let Some(chunk) = queue.chunks.pop_front() {
                return Some((chunk, queue.quality));
            }
            queue = match self.shared.wakeup.wait(queue) {
                Ok(q) => q,
                Err(_) => return None,
            };
        }
    }

    fn encoder_for(
        &mut self,
        chunk: &OutgoingChunk,
        quality: f32,
    ) -> Result<&mut ChannelEncoder, BoxError> {
        let channels = chunk.samples.channels();
        let stale = match self.encoders.get(&chunk.channel_id) {
            Some(e) => {
                e.encoder.channels() != channels
                    || e.encoder.sample_rate() != chunk.sample_rate
                    || e.quality != quality
            }
            None => true,
        };
        if stale {
            trace!(
                "new encoder for channel {}: {} channels {} Hz quality {}",
                chunk.channel_id,
                channels,
                chunk.sample_rate,
                quality
            );
            let encoder = self.factory.create_encoder(channels, chunk.sample_rate, quality)?;
            self.encoders.insert(
                chunk.channel_id,
                ChannelEncoder {
                    encoder,
                    quality,
                    open: false,
                },
            );
        }
        match self.encoders.get_mut(&chunk.channel_id) {
            Some(e) => Ok(e),
            None => simple_error::bail!("no encoder for channel {}", chunk.channel_id),
        }
    }

    fn encode(&mut self, chunk: OutgoingChunk, quality: EncoderQuality) -> Result<(), BoxError> {
        if chunk.samples.is_empty() {
            return self.close_stream(&chunk);
        }
        let q = if chunk.is_voice_chat {
            quality.voice
        } else {
            quality.audio
        };
        let e = self.encoder_for(&chunk, q)?;
        let mut bytes = e.encoder.encode(&chunk.samples)?;
        e.open = true;
        if chunk.is_last_part {
            bytes.extend(e.encoder.finish_interval()?);
            e.open = false;
        }
        self.emit(&chunk, bytes);
        Ok(())
    }

    /// An empty last part only closes the stream of its channel, if one is open
    fn close_stream(&mut self, chunk: &OutgoingChunk) -> Result<(), BoxError> {
        if !chunk.is_last_part {
            return Ok(());
        }
        let bytes = match self.encoders.get_mut(&chunk.channel_id) {
            Some(e) if e.open => {
                e.open = false;
                e.encoder.finish_interval()?
            }
            _ => return Ok(()),
        };
        self.emit(chunk, bytes);
        Ok(())
    }

    fn emit(&mut self, chunk: &OutgoingChunk, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.sink.on_encoded(EncodedChunk {
            channel_id: chunk.channel_id,
            is_first_part: chunk.is_first_part,
            is_last_part: chunk.is_last_part,
            is_voice_chat: chunk.is_voice_chat,
            bytes,
        });
    }
}

impl EncodePipeline {
    pub fn build(
        factory: Arc<dyn EncoderFactory>,
        sink: Box<dyn EncodedSink>,
        quality: EncoderQuality,
    ) -> Result<EncodePipeline, BoxError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(WorkQueue {
                chunks: VecDeque::new(),
                quality,
                stop: false,
            }),
            wakeup: Condvar::new(),
            encode_stat: Mutex::new(StreamTimeStat::build(100)),
        });
        let worker = Worker {
            shared: shared.clone(),
            factory,
            sink,
            encoders: HashMap::new(),
        };
        let handle = ThreadBuilder::default()
            .name("interval encoder".to_string())
            .spawn(move |_result| worker.run())?;
        Ok(EncodePipeline {
            shared,
            handle: Some(handle),
        })
    }

    /// Queue a block.  Called from the audio thread, so this only takes the queue lock.
    pub fn schedule(&self, chunk: OutgoingChunk) {
        match self.shared.queue.lock() {
            Ok(mut queue) => {
                if queue.stop {
                    return;
                }
                queue.chunks.push_back(chunk);
            }
            Err(_) => {
                warn!("encoder queue poisoned, dropping chunk");
                return;
            }
        }
        self.shared.wakeup.notify_one();
    }

    /// applies to chunks encoded from now on
    pub fn set_quality(&self, quality: EncoderQuality) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.quality = quality;
        }
    }

    pub fn pending(&self) -> usize {
        match self.shared.queue.lock() {
            Ok(queue) => queue.chunks.len(),
            Err(_) => 0,
        }
    }

    /// microseconds spent per chunk: (mean, peak)
    pub fn encode_time(&self) -> (f64, f64) {
        match self.shared.encode_stat.lock() {
            Ok(stat) => (stat.get_mean(), stat.get_peak()),
            Err(_) => (0.0, 0.0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the worker and wait for it.  Chunks still queued are discarded.
    pub fn stop(&mut self) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.stop = true;
            queue.chunks.clear();
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("encoder worker panicked");
            }
        }
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

//! The session server as the engine sees it.
//!
//! Everything protocol related lives behind [`SessionService`].  The engine only votes,
//! uploads encoded intervals and disconnects.
use log::{trace, warn};
#[cfg(test)]
use mockall::automock;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    common::box_error::BoxError,
    sound::encoder::{EncodedChunk, EncodedSink},
};

pub type IntervalGuid = [u8; 16];

#[derive(Debug, Clone, PartialEq)]
pub enum UploadMessage {
    IntervalBegin {
        guid: IntervalGuid,
        channel_index: u8,
        is_audio: bool,
    },
    IntervalPart {
        guid: IntervalGuid,
        bytes: Vec<u8>,
        is_last: bool,
    },
    IntervalEnd {
        guid: IntervalGuid,
        channel_index: u8,
    },
}

impl fmt::Display for UploadMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UploadMessage::IntervalBegin {
                guid, channel_index, ..
            } => write!(f, "begin {} ch {}", guid_string(guid), channel_index),
            UploadMessage::IntervalPart {
                guid, bytes, is_last,
            } => write!(f, "part {} {} bytes last: {}", guid_string(guid), bytes.len(), is_last),
            UploadMessage::IntervalEnd {
                guid, channel_index,
            } => write!(f, "end {} ch {}", guid_string(guid), channel_index),
        }
    }
}

pub fn guid_string(guid: &IntervalGuid) -> String {
    guid.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg_attr(test, automock)]
pub trait SessionService: Send + Sync {
    fn vote_bpm(&self, bpm: u16) -> Result<(), BoxError>;
    fn vote_bpi(&self, bpi: u16) -> Result<(), BoxError>;
    fn send_upload(&self, msg: UploadMessage) -> Result<(), BoxError>;
    /// `emit_disconnected` asks the service to report the disconnect to its listeners
    fn disconnect(&self, emit_disconnected: bool);
}

struct OpenInterval {
    guid: IntervalGuid,
    begun: bool,
}

/// Turns encoded chunks into upload messages, one GUID per interval and channel
pub struct IntervalUploader {
    service: Arc<dyn SessionService>,
    open: HashMap<u8, OpenInterval>,
}

impl IntervalUploader {
    pub fn new(service: Arc<dyn SessionService>) -> IntervalUploader {
        IntervalUploader {
            service,
            open: HashMap::new(),
        }
    }

    fn send(&self, msg: UploadMessage) {
        trace!("upload {}", msg);
        if let Err(e) = self.service.send_upload(msg) {
            warn!("upload failed: {}", e);
        }
    }
}

impl EncodedSink for IntervalUploader {
    fn on_encoded(&mut self, chunk: EncodedChunk) {
        let channel = chunk.channel_id;
        if chunk.is_first_part || !self.open.contains_key(&channel) {
            self.open.insert(
                channel,
                OpenInterval {
                    guid: rand::random(),
                    begun: false,
                },
            );
        }
        let (guid, begun) = match self.open.get_mut(&channel) {
            Some(open) => {
                let begun = open.begun;
                open.begun = true;
                (open.guid, begun)
            }
            None => return,
        };
        if !begun {
            self.send(UploadMessage::IntervalBegin {
                guid,
                channel_index: channel,
                is_audio: true,
            });
        }
        self.send(UploadMessage::IntervalPart {
            guid,
            bytes: chunk.bytes,
            is_last: chunk.is_last_part,
        });
        if chunk.is_last_part {
            self.open.remove(&channel);
            self.send(UploadMessage::IntervalEnd {
                guid,
                channel_index: channel,
            });
        }
    }
}

//! Messages flowing in and out of the session controller.
//!
//! [`SessionEvent`]s come from the session server side, [`SessionCommand`]s from the control
//! thread and [`SessionNotice`]s go back out to whoever drives the controller.
use serde_json::json;
use std::fmt;

use crate::sound::{
    audio_node::NodeId,
    local_input::InputMode,
    looper::LooperMode,
    low_cut::LowCutState,
    metronome::MetronomeSound,
};

/// set in [`UserChannel::flags`] when the channel streams voice chat
pub const VOICE_CHAT_FLAG: u8 = 0x02;

/// (user full name, channel index)
pub type RemoteChannelKey = (String, u8);

#[derive(Debug, Clone, PartialEq)]
pub struct UserChannel {
    pub name: String,
    pub index: u8,
    pub flags: u8,
    pub active: bool,
}

impl UserChannel {
    pub fn new(name: &str, index: u8, flags: u8) -> UserChannel {
        UserChannel {
            name: String::from(name),
            index,
            flags,
            active: true,
        }
    }
    pub fn is_voice_chat(&self) -> bool {
        self.flags & VOICE_CHAT_FLAG != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// `name@address` as the server reports it
    pub full_name: String,
    pub channels: Vec<UserChannel>,
}

impl User {
    pub fn new(full_name: &str, channels: Vec<UserChannel>) -> User {
        User {
            full_name: String::from(full_name),
            channels,
        }
    }
    /// the part before the `@`
    pub fn name(&self) -> &str {
        match self.full_name.split_once('@') {
            Some((name, _)) => name,
            None => &self.full_name,
        }
    }
    pub fn is_bot(&self, bot_names: &[String]) -> bool {
        is_bot(&self.full_name, bot_names)
    }
}

pub fn is_bot(full_name: &str, bot_names: &[String]) -> bool {
    let name = match full_name.split_once('@') {
        Some((name, _)) => name,
        None => full_name,
    };
    bot_names.iter().any(|b| b.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub bpm: i32,
    pub bpi: i32,
    pub users: Vec<User>,
}

impl ServerInfo {
    pub fn new(host: &str, port: u16, bpm: i32, bpi: i32) -> ServerInfo {
        ServerInfo {
            host: String::from(host),
            port,
            bpm,
            bpi,
            users: vec![],
        }
    }
    pub fn with_user(mut self, user: User) -> ServerInfo {
        self.users.push(user);
        self
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{} bpm {} bpi {} users {}",
            self.host,
            self.port,
            self.bpm,
            self.bpi,
            self.users.len()
        )
    }
}

/// Things the session server tells us
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ServerBpmChanged(i32),
    ServerBpiChanged(i32),
    UserEntered(User),
    UserLeft(String),
    ChannelCreated { user: String, channel: UserChannel },
    ChannelChanged { user: String, channel: UserChannel },
    ChannelRemoved { user: String, channel_index: u8 },
    IntervalDownloaded { user: String, channel_index: u8, bytes: Vec<u8> },
    ChunkDownloaded {
        user: String,
        channel_index: u8,
        bytes: Vec<u8>,
        is_first: bool,
        is_last: bool,
    },
}

/// Requests from the control thread, executed at the start of the next audio block
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Start(ServerInfo),
    Stop { emit_disconnect: bool },
    Reset,
    Event(SessionEvent),
    SetBpm(i32),
    SetBpi(i32),
    /// handled on the control thread by the session handle
    VoteBpm(i32),
    VoteBpi(i32),
    SetSampleRate(u32),
    SetMasterGain(f32),
    SetGain(NodeId, f32),
    SetPan(NodeId, f32),
    SetBoost(NodeId, f32),
    SetMute(NodeId, bool),
    SetSolo(NodeId, bool),
    ResetNode(NodeId),
    SetLowCut(NodeId, LowCutState),
    NextLowCut(NodeId),
    SetReceive(NodeId, bool),
    SetInputMode(NodeId, InputMode),
    SetTransmit(NodeId, bool),
    SetInputVoiceChat(NodeId, bool),
    SetStereoInverted(NodeId, bool),
    LooperRecord(NodeId),
    LooperPlay(NodeId),
    LooperStop(NodeId),
    LooperClear(NodeId),
    LooperSelectLayer(NodeId, usize),
    LooperMode(NodeId, LooperMode),
    LooperLayers(NodeId, usize),
    MetronomeSound(MetronomeSound),
    MetronomeEnabled(bool),
    MetronomeGain(f32),
    MetronomeAccents(Vec<usize>),
    MidiSync(bool),
    AudioQuality(f32),
    VoiceQuality(f32),
}

/// What the controller reports back
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Started,
    PreparingTransmission,
    PreparedToTransmit,
    BpmChanged(u16),
    BpiChanged(u16),
    IntervalBeatChanged(usize),
    StartingNewInterval { samples_per_interval: usize },
    ChannelAdded { key: RemoteChannelKey, node: NodeId },
    ChannelChanged { key: RemoteChannelKey, node: NodeId },
    ChannelRemoved { key: RemoteChannelKey, node: NodeId },
    UserEntered(String),
    UserLeft(String),
    LevelEvent(serde_json::Value),
    Disconnected,
}

impl SessionNotice {
    pub fn as_json(&self) -> serde_json::Value {
        match self {
            SessionNotice::BpmChanged(v) => json!({ "bpm": v }),
            SessionNotice::BpiChanged(v) => json!({ "bpi": v }),
            SessionNotice::IntervalBeatChanged(b) => json!({ "beat": b }),
            SessionNotice::LevelEvent(v) => v.clone(),
            other => json!({ "notice": format!("{:?}", other) }),
        }
    }
}

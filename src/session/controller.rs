//! The interval-synchronized session controller.
//!
//! The controller lives on the audio thread and owns the clock, the mixer and every node.  The
//! control thread talks to it through a [`SessionHandle`]: commands are drained at the start of
//! each block, server tempo changes go straight into the scheduled queue and are applied at the
//! next interval boundary.  Everything the controller has to say comes back as
//! [`SessionNotice`]s.
use log::{debug, error, info, trace, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use simple_error::bail;
use std::{
    collections::{HashMap, VecDeque},
    sync::{mpsc, Arc, Mutex},
};

use crate::{
    common::{
        box_error::BoxError, get_micro_time, settings::EngineSettings,
        stream_time_stat::MicroTimer,
    },
    sound::{
        audio_node::{AudioNode, NodeCore, NodeId},
        codec::{DecoderFactory, EncoderFactory},
        encoder::{EncodePipeline, EncoderQuality, OutgoingChunk},
        local_input::{InputMode, LocalInputNode},
        looper::Looper,
        metronome::MetronomeNode,
        midi_message::MidiMessage,
        midi_sync::MidiSyncNode,
        mixer::{Mixer, Node},
        remote_channel::{ChannelMode, RemoteChannelNode},
        samples_buffer::SamplesBuffer,
        SoundCallback,
    },
    utils::clip_float,
};

use super::{
    clock::{ScheduledChange, SessionClock, MAX_BPI, MAX_BPM, MIN_BPI, MIN_BPM},
    events::{
        is_bot, RemoteChannelKey, ServerInfo, SessionCommand, SessionEvent, SessionNotice,
        User, UserChannel,
    },
    service::{IntervalUploader, SessionService},
};

/// full intervals heard before we start transmitting
pub const TOTAL_PREPARED_INTERVALS: usize = 2;
/// microseconds between level events
pub const LEVEL_EVENT_INTERVAL: u128 = 100_000;

type ScheduledQueue = Arc<Mutex<VecDeque<ScheduledChange>>>;

fn push_scheduled(queue: &ScheduledQueue, change: ScheduledChange) -> Result<(), BoxError> {
    match queue.lock() {
        Ok(mut q) => {
            q.push_back(change);
            Ok(())
        }
        Err(_) => bail!("scheduled change queue poisoned"),
    }
}

/// Server tempo events go to the scheduled queue.  Returns false for any other event.
fn schedule_server_change(queue: &ScheduledQueue, event: &SessionEvent) -> Result<bool, BoxError> {
    let change = match *event {
        SessionEvent::ServerBpmChanged(v) => ScheduledChange::bpm(v).ok_or(v),
        SessionEvent::ServerBpiChanged(v) => ScheduledChange::bpi(v).ok_or(v),
        _ => return Ok(false),
    };
    match change {
        Ok(c) => push_scheduled(queue, c)?,
        Err(v) => warn!("ignoring server tempo value {}", v),
    }
    Ok(true)
}

/// Control thread side of a [`SessionController`]
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    scheduled: ScheduledQueue,
    service: Arc<dyn SessionService>,
}

impl SessionHandle {
    /// Votes are sent from here, every other command goes to the audio thread
    pub fn command(&self, cmd: SessionCommand) -> Result<(), BoxError> {
        match cmd {
            SessionCommand::VoteBpm(v) => self.vote_bpm(v).map(|_| ()),
            SessionCommand::VoteBpi(v) => self.vote_bpi(v).map(|_| ()),
            SessionCommand::Event(event) => self.handle_event(event),
            cmd => self.send(cmd),
        }
    }

    fn send(&self, cmd: SessionCommand) -> Result<(), BoxError> {
        if self.commands.send(cmd).is_err() {
            bail!("session controller is gone");
        }
        Ok(())
    }

    pub fn start(&self, server: ServerInfo) -> Result<(), BoxError> {
        self.send(SessionCommand::Start(server))
    }
    pub fn stop(&self, emit_disconnect: bool) -> Result<(), BoxError> {
        self.send(SessionCommand::Stop { emit_disconnect })
    }
    pub fn reset(&self) -> Result<(), BoxError> {
        self.send(SessionCommand::Reset)
    }
    pub fn set_bpm(&self, bpm: i32) -> Result<(), BoxError> {
        self.send(SessionCommand::SetBpm(bpm))
    }
    pub fn set_bpi(&self, bpi: i32) -> Result<(), BoxError> {
        self.send(SessionCommand::SetBpi(bpi))
    }

    /// protocol sourced, applied at the next interval boundary
    pub fn schedule_bpm(&self, bpm: i32) -> Result<(), BoxError> {
        self.handle_event(SessionEvent::ServerBpmChanged(bpm))
    }
    pub fn schedule_bpi(&self, bpi: i32) -> Result<(), BoxError> {
        self.handle_event(SessionEvent::ServerBpiChanged(bpi))
    }

    /// Returns false when the value was out of range and nothing was sent
    pub fn vote_bpm(&self, bpm: i32) -> Result<bool, BoxError> {
        if bpm < MIN_BPM as i32 || bpm > MAX_BPM as i32 {
            warn!("bpm vote {} out of range {}..={}", bpm, MIN_BPM, MAX_BPM);
            return Ok(false);
        }
        self.service.vote_bpm(bpm as u16)?;
        Ok(true)
    }
    pub fn vote_bpi(&self, bpi: i32) -> Result<bool, BoxError> {
        if bpi < MIN_BPI as i32 || bpi > MAX_BPI as i32 {
            warn!("bpi vote {} out of range {}..={}", bpi, MIN_BPI, MAX_BPI);
            return Ok(false);
        }
        self.service.vote_bpi(bpi as u16)?;
        Ok(true)
    }

    pub fn handle_event(&self, event: SessionEvent) -> Result<(), BoxError> {
        if schedule_server_change(&self.scheduled, &event)? {
            return Ok(());
        }
        self.send(SessionCommand::Event(event))
    }
}

pub struct SessionController {
    settings: EngineSettings,
    clock: SessionClock,
    mixer: Mixer,
    metronome_id: NodeId,
    midi_sync_id: NodeId,
    midi_sync_enabled: bool,
    remote_nodes: HashMap<RemoteChannelKey, NodeId>,
    commands: mpsc::Receiver<SessionCommand>,
    notices: mpsc::Sender<SessionNotice>,
    scheduled: ScheduledQueue,
    service: Arc<dyn SessionService>,
    encoder_factory: Arc<dyn EncoderFactory>,
    decoder_factory: Arc<dyn DecoderFactory>,
    decode_pool: Option<Arc<ThreadPool>>,
    encoder: Option<EncodePipeline>,
    quality: EncoderQuality,
    running: bool,
    prepared: bool,
    waiting_intervals: usize,
    last_beat: Option<usize>,
    server: Option<ServerInfo>,
    level_timer: MicroTimer,
    // scratch, audio thread only
    block_in: SamplesBuffer,
    block_out: SamplesBuffer,
    group_mix: SamplesBuffer,
    callback_in: SamplesBuffer,
    callback_out: SamplesBuffer,
}

impl SessionController {
    /// Build a stopped controller.  Returns the controller (move it to the audio thread), the
    /// handle for the control thread and the notice receiver.
    pub fn build(
        settings: EngineSettings,
        service: Arc<dyn SessionService>,
        encoder_factory: Arc<dyn EncoderFactory>,
        decoder_factory: Arc<dyn DecoderFactory>,
    ) -> Result<(SessionController, SessionHandle, mpsc::Receiver<SessionNotice>), BoxError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (notice_tx, notice_rx) = mpsc::channel();
        let scheduled: ScheduledQueue = Arc::new(Mutex::new(VecDeque::new()));
        let decode_pool = if settings.decode_threads > 0 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(settings.decode_threads)
                .thread_name(|i| format!("interval decoder {}", i))
                .build()?;
            Some(Arc::new(pool))
        } else {
            None
        };
        let rate = settings.sample_rate;
        let mut mixer = Mixer::build();
        let sound = settings.metronome_sound;
        let metronome_id =
            mixer.add_node(|id| Node::Metronome(MetronomeNode::new(id, rate, sound)));
        if let Some(node) = mixer.node_mut(metronome_id) {
            node.audio_mut().core_mut().set_gain(settings.metronome_gain);
        }
        let midi_sync_id = mixer.add_node(|id| Node::MidiSync(MidiSyncNode::new(id, rate)));
        let mut controller = SessionController {
            clock: SessionClock::new(rate, settings.bpm, settings.bpi),
            quality: EncoderQuality {
                audio: settings.audio_quality,
                voice: settings.voice_quality,
            },
            settings,
            mixer,
            metronome_id,
            midi_sync_id,
            midi_sync_enabled: false,
            remote_nodes: HashMap::new(),
            commands: cmd_rx,
            notices: notice_tx,
            scheduled: scheduled.clone(),
            service: service.clone(),
            encoder_factory,
            decoder_factory,
            decode_pool,
            encoder: None,
            running: false,
            prepared: false,
            waiting_intervals: 0,
            last_beat: None,
            server: None,
            level_timer: MicroTimer::build(get_micro_time(), LEVEL_EVENT_INTERVAL),
            block_in: SamplesBuffer::stereo(0),
            block_out: SamplesBuffer::stereo(0),
            group_mix: SamplesBuffer::stereo(0),
            callback_in: SamplesBuffer::stereo(0),
            callback_out: SamplesBuffer::stereo(0),
        };
        controller.update_beat_nodes();
        let handle = SessionHandle {
            commands: cmd_tx,
            scheduled,
            service,
        };
        Ok((controller, handle, notice_rx))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }
    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }
    pub fn is_running(&self) -> bool {
        self.running
    }
    pub fn is_prepared_to_transmit(&self) -> bool {
        self.prepared
    }
    pub fn metronome_id(&self) -> NodeId {
        self.metronome_id
    }
    pub fn midi_sync_id(&self) -> NodeId {
        self.midi_sync_id
    }
    pub fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }
    pub fn remote_node_id(&self, user: &str, channel_index: u8) -> Option<NodeId> {
        self.remote_nodes
            .get(&(String::from(user), channel_index))
            .copied()
    }
    pub fn remote_node_count(&self) -> usize {
        self.remote_nodes.len()
    }
    pub fn remote_node(&self, user: &str, channel_index: u8) -> Option<&RemoteChannelNode> {
        let id = self.remote_node_id(user, channel_index)?;
        match self.mixer.node(id) {
            Some(Node::RemoteChannel(r)) => Some(r),
            _ => None,
        }
    }

    /// Add a local input.  Group index is the outgoing channel it is mixed into.
    pub fn add_local_input(&mut self, group_index: u8, mode: InputMode) -> NodeId {
        let rate = self.clock.sample_rate();
        let layers = self.settings.looper_layers;
        let looper_mode = self.settings.looper_mode;
        self.mixer.add_node(|id| {
            let mut node = LocalInputNode::new(id, group_index, rate, mode);
            node.looper_mut().set_max_layers(layers);
            node.looper_mut().set_mode(looper_mode);
            Node::LocalInput(node)
        })
    }

    pub fn remove_local_input(&mut self, id: NodeId) -> bool {
        match self.mixer.node(id) {
            Some(Node::LocalInput(_)) => self.mixer.remove_node(id).is_some(),
            _ => false,
        }
    }

    fn notify(&self, notice: SessionNotice) {
        trace!("notice {:?}", notice);
        // nobody listening is fine
        let _ = self.notices.send(notice);
    }

    fn update_beat_nodes(&mut self) {
        let spb = self.clock.samples_per_beat();
        let bpi = self.clock.bpi() as usize;
        let pos = self.clock.position();
        if let Some(Node::Metronome(m)) = self.mixer.node_mut(self.metronome_id) {
            m.set_position(pos, spb, bpi);
        }
        if let Some(Node::MidiSync(s)) = self.mixer.node_mut(self.midi_sync_id) {
            s.set_timing(spb, bpi);
            s.set_position(pos);
        }
    }

    fn apply_change(&mut self, change: ScheduledChange) {
        let mut next = self.clock.clone();
        if !next.apply(change) {
            return;
        }
        self.retime(next);
        debug!("tempo change {:?} -> {}", change, self.clock);
        match change {
            ScheduledChange::Bpm(v) => self.notify(SessionNotice::BpmChanged(v)),
            ScheduledChange::Bpi(v) => self.notify(SessionNotice::BpiChanged(v)),
        }
        self.update_beat_nodes();
    }

    /// Swap in a retimed clock.  When the position wraps mid-interval the open streams are
    /// closed first, the next block starts a new interval.
    fn retime(&mut self, next: SessionClock) {
        if next.position() < self.clock.position() && self.prepared {
            debug!("interval cut short at {}", self.clock.position());
            self.close_open_streams();
        }
        self.clock = next;
    }

    fn close_open_streams(&mut self) {
        let encoder = match &self.encoder {
            Some(e) => e,
            None => return,
        };
        for group in self.mixer.transmitting_groups() {
            encoder.schedule(OutgoingChunk {
                channel_id: group,
                samples: SamplesBuffer::new(self.mixer.group_channels(group), 0),
                sample_rate: self.clock.sample_rate(),
                is_voice_chat: self.mixer.group_is_voice_chat(group),
                is_first_part: false,
                is_last_part: true,
            });
        }
    }

    fn drain_scheduled(&mut self) {
        let changes: Vec<ScheduledChange> = match self.scheduled.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => {
                error!("scheduled change queue poisoned");
                vec![]
            }
        };
        for change in changes {
            self.apply_change(change);
        }
    }

    pub fn set_bpm(&mut self, bpm: i32) {
        match ScheduledChange::bpm(bpm) {
            Some(change) => self.apply_change(change),
            None => warn!("ignoring bpm {}", bpm),
        }
    }
    pub fn set_bpi(&mut self, bpi: i32) {
        match ScheduledChange::bpi(bpi) {
            Some(change) => self.apply_change(change),
            None => warn!("ignoring bpi {}", bpi),
        }
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        if rate == 0 || rate == self.clock.sample_rate() {
            return;
        }
        info!("sample rate {} -> {}", self.clock.sample_rate(), rate);
        let mut next = self.clock.clone();
        next.set_sample_rate(rate);
        self.retime(next);
        self.mixer.set_sample_rate(rate);
        self.settings.sample_rate = rate;
        self.update_beat_nodes();
    }

    pub fn set_audio_quality(&mut self, quality: f32) {
        self.quality.audio = quality.clamp(0.0, 1.0);
        if let Some(e) = &self.encoder {
            e.set_quality(self.quality);
        }
    }
    pub fn set_voice_quality(&mut self, quality: f32) {
        self.quality.voice = quality.clamp(0.0, 1.0);
        if let Some(e) = &self.encoder {
            e.set_quality(self.quality);
        }
    }

    pub fn start(&mut self, server: ServerInfo) -> Result<(), BoxError> {
        if self.running {
            warn!("start while running, stopping first");
            self.stop(false);
        }
        info!("starting session {}", server);
        for change in [ScheduledChange::bpm(server.bpm), ScheduledChange::bpi(server.bpi)] {
            match change {
                Some(c) => push_scheduled(&self.scheduled, c)?,
                None => warn!("server advertised an unusable tempo: {}", server),
            }
        }
        self.drain_scheduled();
        self.clock.rewind();
        self.last_beat = None;

        let uploader = IntervalUploader::new(self.service.clone());
        self.encoder = Some(EncodePipeline::build(
            self.encoder_factory.clone(),
            Box::new(uploader),
            self.quality,
        )?);

        for user in server.users.iter() {
            self.add_user(user);
        }
        self.server = Some(server);
        self.running = true;
        self.prepared = false;
        self.waiting_intervals = 0;
        if self.midi_sync_enabled {
            if let Some(Node::MidiSync(s)) = self.mixer.node_mut(self.midi_sync_id) {
                s.start();
            }
        }
        self.notify(SessionNotice::Started);
        self.notify(SessionNotice::PreparingTransmission);
        Ok(())
    }

    /// Disconnect, join the encoder and drop every remote node.  Does nothing when stopped.
    pub fn stop(&mut self, emit_disconnect: bool) {
        if !self.running {
            return;
        }
        info!("stopping session");
        self.running = false;
        self.service.disconnect(emit_disconnect);
        if let Some(mut encoder) = self.encoder.take() {
            encoder.stop();
        }
        self.mixer.stop_loopers();
        let keys: Vec<RemoteChannelKey> = self.remote_nodes.keys().cloned().collect();
        for key in keys {
            self.remove_channel(&key);
        }
        if let Ok(mut q) = self.scheduled.lock() {
            q.clear();
        }
        self.prepared = false;
        self.waiting_intervals = 0;
        self.last_beat = None;
        self.clock.rewind();
        self.server = None;
        if let Some(Node::MidiSync(s)) = self.mixer.node_mut(self.midi_sync_id) {
            s.stop();
        }
        if emit_disconnect {
            self.notify(SessionNotice::Disconnected);
        }
    }

    /// drop every downloaded interval and go back to the start of the interval
    pub fn reset(&mut self) {
        debug!("reset");
        for node in self.mixer.remote_channels_mut() {
            node.discard_downloaded_intervals();
        }
        self.clock.rewind();
        self.last_beat = None;
    }

    fn add_channel(&mut self, user: &str, channel: &UserChannel) {
        if is_bot(user, &self.settings.bot_names) {
            trace!("skipping bot channel {}:{}", user, channel.index);
            return;
        }
        let key = (String::from(user), channel.index);
        if self.remote_nodes.contains_key(&key) {
            debug!("channel {}:{} already exists", user, channel.index);
            return;
        }
        let rate = self.clock.sample_rate();
        let voice_chat = channel.is_voice_chat();
        let factory = self.decoder_factory.clone();
        let pool = self.decode_pool.clone();
        let max_buffered = self.settings.max_buffered_intervals;
        let low_cut = self.settings.low_cut;
        let id = self.mixer.add_node(|id| {
            let mut node = RemoteChannelNode::new(id, rate, voice_chat, factory)
                .with_max_buffered(max_buffered)
                .with_low_cut(low_cut);
            if let Some(pool) = pool {
                node = node.with_decode_pool(pool);
            }
            Node::RemoteChannel(node)
        });
        debug!("channel {}:{} '{}' is node {}", user, channel.index, channel.name, id);
        self.remote_nodes.insert(key.clone(), id);
        self.notify(SessionNotice::ChannelAdded { key, node: id });
    }

    fn remove_channel(&mut self, key: &RemoteChannelKey) {
        if let Some(id) = self.remote_nodes.remove(key) {
            if let Some(Node::RemoteChannel(mut node)) = self.mixer.remove_node(id) {
                node.discard_downloaded_intervals();
            }
            self.notify(SessionNotice::ChannelRemoved {
                key: key.clone(),
                node: id,
            });
        }
    }

    fn add_user(&mut self, user: &User) {
        if user.is_bot(&self.settings.bot_names) {
            trace!("skipping bot {}", user.full_name);
            return;
        }
        for channel in user.channels.iter() {
            self.add_channel(&user.full_name, channel);
        }
    }

    fn remote_for(&mut self, user: &str, channel_index: u8) -> Option<&mut RemoteChannelNode> {
        let key = (String::from(user), channel_index);
        match self.remote_nodes.get(&key) {
            Some(id) => self.mixer.remote_channel_mut(*id),
            None => {
                debug!("no node for {}:{}, dropping", user, channel_index);
                None
            }
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Result<(), BoxError> {
        if schedule_server_change(&self.scheduled, &event)? {
            return Ok(());
        }
        match event {
            SessionEvent::UserEntered(user) => {
                self.add_user(&user);
                self.notify(SessionNotice::UserEntered(user.full_name));
            }
            SessionEvent::UserLeft(name) => {
                let keys: Vec<RemoteChannelKey> = self
                    .remote_nodes
                    .keys()
                    .filter(|k| k.0 == name)
                    .cloned()
                    .collect();
                for key in keys {
                    self.remove_channel(&key);
                }
                self.notify(SessionNotice::UserLeft(name));
            }
            SessionEvent::ChannelCreated { user, channel } => self.add_channel(&user, &channel),
            SessionEvent::ChannelRemoved {
                user,
                channel_index,
            } => self.remove_channel(&(user, channel_index)),
            SessionEvent::ChannelChanged { user, channel } => {
                let key = (user, channel.index);
                let id = match self.remote_nodes.get(&key) {
                    Some(id) => *id,
                    None => {
                        debug!("update for unknown channel {}:{}", key.0, key.1);
                        return Ok(());
                    }
                };
                let mode = if channel.is_voice_chat() {
                    ChannelMode::VoiceChat
                } else {
                    ChannelMode::Intervalic
                };
                if let Some(node) = self.mixer.remote_channel_mut(id) {
                    node.schedule_mode(mode);
                }
                self.notify(SessionNotice::ChannelChanged { key, node: id });
            }
            SessionEvent::IntervalDownloaded {
                user,
                channel_index,
                bytes,
            } => {
                if let Some(node) = self.remote_for(&user, channel_index) {
                    node.enqueue_full_interval(&bytes);
                }
            }
            SessionEvent::ChunkDownloaded {
                user,
                channel_index,
                bytes,
                is_first,
                is_last,
            } => {
                if let Some(node) = self.remote_for(&user, channel_index) {
                    node.enqueue_chunk(&bytes, is_first, is_last);
                }
            }
            SessionEvent::ServerBpmChanged(_) | SessionEvent::ServerBpiChanged(_) => {}
        }
        Ok(())
    }

    fn with_node<F>(&mut self, id: NodeId, f: F)
    where
        F: FnOnce(&mut Node),
    {
        match self.mixer.node_mut(id) {
            Some(node) => f(node),
            None => debug!("no node {}", id),
        }
    }

    fn with_core<F>(&mut self, id: NodeId, f: F)
    where
        F: FnOnce(&mut NodeCore),
    {
        self.with_node(id, |n| f(n.audio_mut().core_mut()))
    }

    fn with_looper<F>(&mut self, id: NodeId, f: F)
    where
        F: FnOnce(&mut Looper),
    {
        self.with_local_input(id, |l| f(l.looper_mut()))
    }

    fn with_local_input<F>(&mut self, id: NodeId, f: F)
    where
        F: FnOnce(&mut LocalInputNode),
    {
        match self.mixer.node_mut(id) {
            Some(Node::LocalInput(l)) => f(l),
            _ => debug!("node {} is not a local input", id),
        }
    }

    fn with_metronome<F>(&mut self, f: F)
    where
        F: FnOnce(&mut MetronomeNode),
    {
        if let Some(Node::Metronome(m)) = self.mixer.node_mut(self.metronome_id) {
            f(m);
        }
    }

    pub fn set_midi_sync(&mut self, enabled: bool) {
        self.midi_sync_enabled = enabled;
        let running = self.running;
        if let Some(Node::MidiSync(s)) = self.mixer.node_mut(self.midi_sync_id) {
            if enabled && running {
                s.start();
            } else if !enabled {
                s.stop();
            }
        }
    }

    /// MIDI clock messages generated since the last call
    pub fn pull_midi_clock_messages(&mut self) -> Vec<MidiMessage> {
        match self.mixer.node_mut(self.midi_sync_id) {
            Some(Node::MidiSync(s)) => s.pull_messages(),
            _ => vec![],
        }
    }

    pub fn execute(&mut self, cmd: SessionCommand) -> Result<(), BoxError> {
        trace!("command {:?}", cmd);
        match cmd {
            SessionCommand::Start(server) => self.start(server)?,
            SessionCommand::Stop { emit_disconnect } => self.stop(emit_disconnect),
            SessionCommand::Reset => self.reset(),
            SessionCommand::Event(event) => self.handle_event(event)?,
            SessionCommand::SetBpm(v) => self.set_bpm(v),
            SessionCommand::SetBpi(v) => self.set_bpi(v),
            SessionCommand::VoteBpm(_) | SessionCommand::VoteBpi(_) => {
                warn!("votes go through the session handle");
            }
            SessionCommand::SetSampleRate(rate) => self.set_sample_rate(rate),
            SessionCommand::SetMasterGain(g) => self.mixer.set_master(g),
            SessionCommand::SetGain(id, g) => self.with_core(id, |c| c.set_gain(g)),
            SessionCommand::SetPan(id, p) => self.with_core(id, |c| c.set_pan(p)),
            SessionCommand::SetBoost(id, b) => self.with_core(id, |c| c.set_boost(b)),
            SessionCommand::SetMute(id, m) => self.with_core(id, |c| c.set_mute(m)),
            SessionCommand::SetSolo(id, s) => self.with_core(id, |c| c.set_solo(s)),
            SessionCommand::ResetNode(id) => self.with_node(id, |n| n.audio_mut().reset()),
            SessionCommand::SetLowCut(id, state) => {
                if let Some(r) = self.mixer.remote_channel_mut(id) {
                    r.set_low_cut(state);
                }
            }
            SessionCommand::NextLowCut(id) => {
                if let Some(r) = self.mixer.remote_channel_mut(id) {
                    r.next_low_cut();
                }
            }
            SessionCommand::SetReceive(id, on) => {
                if let Some(r) = self.mixer.remote_channel_mut(id) {
                    r.set_receive(on);
                }
            }
            SessionCommand::SetInputMode(id, mode) => {
                self.with_local_input(id, |l| l.set_mode(mode))
            }
            SessionCommand::SetTransmit(id, on) => {
                self.with_local_input(id, |l| l.set_transmitting(on))
            }
            SessionCommand::SetInputVoiceChat(id, on) => {
                self.with_local_input(id, |l| l.set_voice_chat(on))
            }
            SessionCommand::SetStereoInverted(id, on) => {
                self.with_local_input(id, |l| l.set_stereo_inverted(on))
            }
            SessionCommand::LooperRecord(id) => self.with_looper(id, |l| l.start_recording()),
            SessionCommand::LooperPlay(id) => self.with_looper(id, |l| l.play()),
            SessionCommand::LooperStop(id) => self.with_looper(id, |l| l.stop()),
            SessionCommand::LooperClear(id) => self.with_looper(id, |l| l.clear_all()),
            SessionCommand::LooperSelectLayer(id, layer) => {
                self.with_looper(id, |l| l.select_layer(layer))
            }
            SessionCommand::LooperMode(id, mode) => self.with_looper(id, |l| l.set_mode(mode)),
            SessionCommand::LooperLayers(id, layers) => {
                self.with_looper(id, |l| l.set_max_layers(layers))
            }
            SessionCommand::MetronomeSound(sound) => self.with_metronome(|m| m.set_sound(sound)),
            SessionCommand::MetronomeEnabled(on) => self.with_metronome(|m| m.set_enabled(on)),
            SessionCommand::MetronomeGain(g) => self.with_metronome(|m| m.core_mut().set_gain(g)),
            SessionCommand::MetronomeAccents(beats) => {
                self.with_metronome(|m| m.set_accent_beats(beats))
            }
            SessionCommand::MidiSync(on) => self.set_midi_sync(on),
            SessionCommand::AudioQuality(q) => self.set_audio_quality(q),
            SessionCommand::VoiceQuality(q) => self.set_voice_quality(q),
        }
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            if let Err(e) = self.execute(cmd) {
                error!("command failed: {}", e);
            }
        }
    }

    fn handle_new_interval(&mut self) {
        if !self.prepared {
            if self.waiting_intervals >= TOTAL_PREPARED_INTERVALS {
                info!("prepared to transmit");
                self.prepared = true;
                self.notify(SessionNotice::PreparedToTransmit);
            } else {
                self.waiting_intervals += 1;
            }
        }
        self.drain_scheduled();
        for node in self.mixer.remote_channels_mut() {
            node.start_new_interval();
        }
        let spi = self.clock.samples_per_interval();
        self.notify(SessionNotice::StartingNewInterval {
            samples_per_interval: spi,
        });
        self.mixer.start_new_loop_cycle(spi);
        self.update_beat_nodes();
    }

    fn transmit(&mut self, frames: usize, is_first: bool, is_last: bool) {
        let encoder = match &self.encoder {
            Some(e) => e,
            None => return,
        };
        for group in self.mixer.transmitting_groups() {
            if !self.mixer.mix_input_subchannels(group, frames, &mut self.group_mix) {
                continue;
            }
            encoder.schedule(OutgoingChunk {
                channel_id: group,
                samples: self.group_mix.clone(),
                sample_rate: self.clock.sample_rate(),
                is_voice_chat: self.mixer.group_is_voice_chat(group),
                is_first_part: is_first,
                is_last_part: is_last,
            });
        }
    }

    fn send_levels(&mut self) {
        let now = get_micro_time();
        if !self.level_timer.expired(now) {
            return;
        }
        self.level_timer.reset(now);
        let mut levels = self.mixer.as_json();
        levels["beat"] = serde_json::json!(self.clock.current_beat());
        levels["running"] = serde_json::json!(self.running);
        if let Some(e) = &self.encoder {
            let (mean, peak) = e.encode_time();
            levels["encodeTime"] =
                serde_json::json!({ "mean": mean.round(), "peak": peak.round() });
        }
        self.mixer.reset_master_peak();
        for node in self.mixer.nodes_mut() {
            node.audio_mut().core_mut().reset_last_peak();
        }
        self.notify(SessionNotice::LevelEvent(levels));
    }

    /// Render one block.  `input` holds every device input channel, `output` is overwritten.
    pub fn process(
        &mut self,
        input: &SamplesBuffer,
        output: &mut SamplesBuffer,
        midi: &[MidiMessage],
    ) -> Result<(), BoxError> {
        self.drain_commands();
        output.zero();
        let frames = output.frames();
        if input.frames() < frames {
            bail!("input block of {} frames for {} output frames", input.frames(), frames);
        }
        if !self.running || self.clock.samples_per_interval() == 0 {
            return Ok(());
        }
        let mut offset = 0;
        while offset < frames {
            if self.clock.at_boundary() {
                self.handle_new_interval();
            }
            let pos = self.clock.position();
            let spi = self.clock.samples_per_interval();
            let step = (spi - pos).min(frames - offset);

            let beat = self.clock.current_beat();
            if self.last_beat != Some(beat) {
                self.last_beat = Some(beat);
                self.notify(SessionNotice::IntervalBeatChanged(beat));
            }

            self.block_in.set_channels(input.channels());
            self.block_in.set_frames(step);
            self.block_in.copy_from(input, offset, 0, step);
            self.block_out.set_channels(output.channels());
            self.block_out.set_frames(step);
            self.block_out.zero();
            self.update_beat_nodes();
            let block_midi = if offset == 0 { midi } else { &[] };
            self.mixer.process(&self.block_in, &mut self.block_out, block_midi);
            output.copy_from(&self.block_out, 0, offset, step);

            if self.prepared {
                self.transmit(step, pos == 0, pos + step >= spi);
            }
            self.clock.advance(step);
            offset += step;
        }
        self.send_levels();
        Ok(())
    }
}

/// Driver entry point with split stereo buffers.  Only the first two input channels exist.
impl SoundCallback for SessionController {
    fn process(
        &mut self,
        in_a: &[f32],
        in_b: &[f32],
        out_a: &mut [f32],
        out_b: &mut [f32],
    ) -> Result<(), BoxError> {
        let frames = out_a.len().min(out_b.len());
        let mut input = std::mem::replace(&mut self.callback_in, SamplesBuffer::stereo(0));
        let mut output = std::mem::replace(&mut self.callback_out, SamplesBuffer::stereo(0));
        input.set_channels(2);
        input.set_frames(frames);
        input.zero();
        let n = frames.min(in_a.len()).min(in_b.len());
        input.channel_mut(0)[..n].copy_from_slice(&in_a[..n]);
        input.channel_mut(1)[..n].copy_from_slice(&in_b[..n]);
        output.set_channels(2);
        output.set_frames(frames);
        let result = SessionController::process(self, &input, &mut output, &[]);
        for (dst, src) in out_a.iter_mut().zip(output.channel(0)) {
            *dst = clip_float(*src);
        }
        for (dst, src) in out_b.iter_mut().zip(output.channel(1)) {
            *dst = clip_float(*src);
        }
        self.callback_in = input;
        self.callback_out = output;
        result
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop(false);
    }
}

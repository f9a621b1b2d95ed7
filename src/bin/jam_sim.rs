//! Offline session simulator.
//!
//! Runs the session controller against a loopback server: whatever is uploaded comes back as
//! the intervals of a remote user, so after the warm up you hear your own sine wave one
//! interval late.
use clap::Parser;
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    f32::consts::PI,
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};
use thread_priority::*;

use interval_jam::{
    common::{box_error::BoxError, config::Config, settings::EngineSettings},
    session::{
        controller::SessionController,
        events::{ServerInfo, SessionEvent, SessionNotice, User, UserChannel},
        service::{IntervalGuid, SessionService, UploadMessage},
    },
    sound::{codec::PcmCodec, drive_callback, local_input::InputMode},
};

const ECHO_USER: &str = "echo@loopback";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// engine settings file
    #[arg(short, long, default_value = "settings.json")]
    config: String,

    /// seconds of audio to render
    #[arg(short, long, default_value_t = 20)]
    seconds: u32,

    #[arg(long, default_value_t = 120)]
    bpm: i32,

    #[arg(long, default_value_t = 8)]
    bpi: i32,

    /// frequency of the test tone
    #[arg(short, long, default_value_t = 440.0)]
    tone: f32,
}

struct LoopbackService {
    uploads: Mutex<mpsc::Sender<UploadMessage>>,
}

impl SessionService for LoopbackService {
    fn vote_bpm(&self, bpm: u16) -> Result<(), BoxError> {
        info!("vote bpm {}", bpm);
        Ok(())
    }
    fn vote_bpi(&self, bpi: u16) -> Result<(), BoxError> {
        info!("vote bpi {}", bpi);
        Ok(())
    }
    fn send_upload(&self, msg: UploadMessage) -> Result<(), BoxError> {
        match self.uploads.lock() {
            Ok(tx) => tx.send(msg)?,
            Err(_) => warn!("upload channel poisoned"),
        }
        Ok(())
    }
    fn disconnect(&self, emit_disconnected: bool) {
        info!("disconnect, notify: {}", emit_disconnected);
    }
}

/// turn our own uploads back into whole interval downloads
struct Echo {
    pending: HashMap<IntervalGuid, (u8, Vec<u8>)>,
}

impl Echo {
    fn downloaded(&mut self, msg: UploadMessage) -> Option<SessionEvent> {
        match msg {
            UploadMessage::IntervalBegin {
                guid, channel_index, ..
            } => {
                self.pending.insert(guid, (channel_index, vec![]));
                None
            }
            UploadMessage::IntervalPart { guid, bytes, .. } => {
                if let Some((_, data)) = self.pending.get_mut(&guid) {
                    data.extend(bytes);
                }
                None
            }
            UploadMessage::IntervalEnd { guid, .. } => {
                let (channel_index, bytes) = self.pending.remove(&guid)?;
                Some(SessionEvent::IntervalDownloaded {
                    user: String::from(ECHO_USER),
                    channel_index,
                    bytes,
                })
            }
        }
    }
}

fn main() -> Result<(), BoxError> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::build(args.config.clone(), EngineSettings::default_json())?;
    let settings = EngineSettings::from_config(&config);
    info!("settings: {}", settings);
    let sample_rate = settings.sample_rate;
    let block = settings.buffer_size as usize;

    let (upload_tx, upload_rx) = mpsc::channel();
    let service = Arc::new(LoopbackService {
        uploads: Mutex::new(upload_tx),
    });
    let codec = Arc::new(PcmCodec);
    let (mut controller, handle, notices) =
        SessionController::build(settings, service, codec.clone(), codec)?;
    controller.add_local_input(0, InputMode::mono(0));

    let server = ServerInfo::new("loopback", 2049, args.bpm, args.bpi)
        .with_user(User::new(ECHO_USER, vec![UserChannel::new("echo", 0, 0)]));
    handle.start(server)?;

    let total_blocks = (args.seconds as usize * sample_rate as usize) / block.max(1);
    let tone = args.tone;
    let audio_handle = ThreadBuilder::default()
        .name("Real-Time Thread".to_string())
        .priority(ThreadPriority::Max)
        .spawn(move |_result| {
            let mut in_a = vec![0.0; block];
            let in_b = vec![0.0; block];
            let mut out_a = vec![0.0; block];
            let mut out_b = vec![0.0; block];
            let mut phase = 0.0f32;
            let step = 2.0 * PI * tone / sample_rate as f32;
            let mut loudest = 0.0f32;
            for _ in 0..total_blocks {
                for s in in_a.iter_mut() {
                    *s = 0.25 * phase.sin();
                    phase = (phase + step) % (2.0 * PI);
                }
                drive_callback(&mut controller, &in_a, &in_b, &mut out_a, &mut out_b);
                loudest = out_a.iter().fold(loudest, |m, s| m.max(s.abs()));
            }
            controller.stop(true);
            info!("rendered {} blocks, loudest sample {:.3}", total_blocks, loudest);
        })?;

    let mut echo = Echo {
        pending: HashMap::new(),
    };
    loop {
        if let Ok(msg) = upload_rx.recv_timeout(Duration::from_millis(50)) {
            debug!("{}", msg);
            if let Some(event) = echo.downloaded(msg) {
                if let Err(e) = handle.handle_event(event) {
                    warn!("dropping download: {}", e);
                }
            }
        }
        for notice in notices.try_iter() {
            match notice {
                SessionNotice::LevelEvent(_) | SessionNotice::IntervalBeatChanged(_) => {}
                SessionNotice::Disconnected => info!("session over"),
                other => info!("{}", other.as_json()),
            }
        }
        if audio_handle.is_finished() {
            break;
        }
    }
    if audio_handle.join().is_err() {
        warn!("audio thread panicked");
    }
    Ok(())
}

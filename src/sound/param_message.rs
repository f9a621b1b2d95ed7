//! Flat json messages from a control surface, turned into [`SessionCommand`]s
//!
//! A message is a param number plus integer, float and string values.  Which values
//! matter depends on the param.  `iValue1` is the node id for every per-node param.
use num::{FromPrimitive, ToPrimitive};
use serde_json::json;
use simple_error::bail;
use std::fmt;

use crate::{
    common::box_error::BoxError,
    session::events::SessionCommand,
    sound::{
        audio_node::NodeId, local_input::InputMode, looper::LooperMode, low_cut::LowCutState,
        metronome::MetronomeSound,
    },
};

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy)]
pub enum JamParam {
    Stop = 0,
    Reset,
    SetBpm,
    SetBpi,
    VoteBpm,
    VoteBpi,
    SampleRate,
    MasterGain,
    Gain = 100,
    Pan,
    Boost,
    Mute,
    Solo,
    ResetNode,
    LowCut,
    NextLowCut,
    Receive,
    InputMono = 200,
    InputStereo,
    InputMidi,
    NoInput,
    Transmit,
    InputVoiceChat,
    StereoInverted,
    LooperRecord = 300,
    LooperPlay,
    LooperStop,
    LooperClear,
    LooperSelectLayer,
    LooperMode,
    LooperLayers,
    MetronomeSound = 400,
    MetronomeEnabled,
    MetronomeGain,
    MetronomeAccents,
    MidiSync,
    AudioQuality = 500,
    VoiceQuality,
}

pub struct ParamMessage {
    pub param: JamParam,
    pub ivalue_1: i64,
    pub ivalue_2: i64,
    pub fvalue: f64,
    pub svalue: String,
}

fn int_field(raw: &serde_json::Value, key: &str) -> Result<Option<i64>, BoxError> {
    let value = &raw[key];
    if let Some(v) = value.as_i64() {
        return Ok(Some(v));
    }
    match value.as_str() {
        Some(s) => Ok(Some(str::parse(s.trim())?)),
        None => Ok(None),
    }
}

fn float_field(raw: &serde_json::Value, key: &str) -> Result<Option<f64>, BoxError> {
    let value = &raw[key];
    if let Some(v) = value.as_f64() {
        return Ok(Some(v));
    }
    match value.as_str() {
        Some(s) => Ok(Some(str::parse(s.trim())?)),
        None => Ok(None),
    }
}

impl ParamMessage {
    pub fn new(param: JamParam, ival1: i64, ival2: i64, fval: f64, sval: &str) -> ParamMessage {
        ParamMessage {
            param,
            ivalue_1: ival1,
            ivalue_2: ival2,
            fvalue: fval,
            svalue: String::from(sval),
        }
    }
    pub fn as_json(&self) -> serde_json::Value {
        json!({
          "param": ToPrimitive::to_i64(&self.param),
          "iValue1": self.ivalue_1,
          "iValue2": self.ivalue_2,
          "fValue": self.fvalue,
          "sValue": self.svalue,
        })
    }
    pub fn from_string(data: &str) -> Result<ParamMessage, BoxError> {
        let raw = serde_json::from_str(data)?;
        Self::from_json(&raw)
    }
    pub fn from_json(raw: &serde_json::Value) -> Result<ParamMessage, BoxError> {
        let param_num = match int_field(raw, "param")? {
            Some(p) => p,
            None => bail!("no param in message"),
        };
        let param: JamParam = match FromPrimitive::from_i64(param_num) {
            Some(p) => p,
            None => bail!("unknown param {}", param_num),
        };
        let mut msg = ParamMessage::new(param, 0, 0, 0.0, "");
        if let Some(v) = int_field(raw, "iValue1")? {
            msg.ivalue_1 = v;
        }
        if let Some(v) = int_field(raw, "iValue2")? {
            msg.ivalue_2 = v;
        }
        if let Some(v) = float_field(raw, "fValue")? {
            msg.fvalue = v;
        }
        if let Some(s) = raw["sValue"].as_str() {
            msg.svalue = String::from(s);
        }
        Ok(msg)
    }

    fn node(&self) -> Result<NodeId, BoxError> {
        match NodeId::try_from(self.ivalue_1) {
            Ok(id) => Ok(id),
            Err(_) => bail!("bad node id {}", self.ivalue_1),
        }
    }
    fn flag(&self) -> bool {
        self.ivalue_2 != 0
    }
    fn level(&self) -> f32 {
        self.fvalue as f32
    }
    fn int(&self) -> Result<i32, BoxError> {
        Ok(i32::try_from(self.ivalue_1)?)
    }
    fn usize_2(&self) -> Result<usize, BoxError> {
        Ok(usize::try_from(self.ivalue_2)?)
    }

    /// The session command this message asks for
    pub fn to_command(&self) -> Result<SessionCommand, BoxError> {
        let cmd = match self.param {
            JamParam::Stop => SessionCommand::Stop {
                emit_disconnect: true,
            },
            JamParam::Reset => SessionCommand::Reset,
            JamParam::SetBpm => SessionCommand::SetBpm(self.int()?),
            JamParam::SetBpi => SessionCommand::SetBpi(self.int()?),
            JamParam::VoteBpm => SessionCommand::VoteBpm(self.int()?),
            JamParam::VoteBpi => SessionCommand::VoteBpi(self.int()?),
            JamParam::SampleRate => SessionCommand::SetSampleRate(u32::try_from(self.ivalue_1)?),
            JamParam::MasterGain => SessionCommand::SetMasterGain(self.level()),
            JamParam::Gain => SessionCommand::SetGain(self.node()?, self.level()),
            JamParam::Pan => SessionCommand::SetPan(self.node()?, self.level()),
            JamParam::Boost => SessionCommand::SetBoost(self.node()?, self.level()),
            JamParam::Mute => SessionCommand::SetMute(self.node()?, self.flag()),
            JamParam::Solo => SessionCommand::SetSolo(self.node()?, self.flag()),
            JamParam::ResetNode => SessionCommand::ResetNode(self.node()?),
            JamParam::LowCut => match LowCutState::from_name(&self.svalue) {
                Some(state) => SessionCommand::SetLowCut(self.node()?, state),
                None => bail!("unknown low cut '{}'", self.svalue),
            },
            JamParam::NextLowCut => SessionCommand::NextLowCut(self.node()?),
            JamParam::Receive => SessionCommand::SetReceive(self.node()?, self.flag()),
            JamParam::InputMono => {
                SessionCommand::SetInputMode(self.node()?, InputMode::mono(self.usize_2()?))
            }
            JamParam::InputStereo => {
                SessionCommand::SetInputMode(self.node()?, InputMode::stereo(self.usize_2()?))
            }
            JamParam::InputMidi => {
                // iValue2 is the device, sValue an optional channel
                let channel = match self.svalue.trim() {
                    "" => None,
                    s => Some(str::parse::<u8>(s)?),
                };
                SessionCommand::SetInputMode(
                    self.node()?,
                    InputMode::Midi {
                        device: i32::try_from(self.ivalue_2)?,
                        channel,
                        lower_note: 0,
                        higher_note: 127,
                        transpose: 0,
                    },
                )
            }
            JamParam::NoInput => SessionCommand::SetInputMode(self.node()?, InputMode::NoInput),
            JamParam::Transmit => SessionCommand::SetTransmit(self.node()?, self.flag()),
            JamParam::InputVoiceChat => SessionCommand::SetInputVoiceChat(self.node()?, self.flag()),
            JamParam::StereoInverted => SessionCommand::SetStereoInverted(self.node()?, self.flag()),
            JamParam::LooperRecord => SessionCommand::LooperRecord(self.node()?),
            JamParam::LooperPlay => SessionCommand::LooperPlay(self.node()?),
            JamParam::LooperStop => SessionCommand::LooperStop(self.node()?),
            JamParam::LooperClear => SessionCommand::LooperClear(self.node()?),
            JamParam::LooperSelectLayer => {
                SessionCommand::LooperSelectLayer(self.node()?, self.usize_2()?)
            }
            JamParam::LooperMode => match LooperMode::from_name(&self.svalue) {
                Some(mode) => SessionCommand::LooperMode(self.node()?, mode),
                None => bail!("unknown looper mode '{}'", self.svalue),
            },
            JamParam::LooperLayers => SessionCommand::LooperLayers(self.node()?, self.usize_2()?),
            JamParam::MetronomeSound => match MetronomeSound::from_name(&self.svalue) {
                Some(sound) => SessionCommand::MetronomeSound(sound),
                None => bail!("unknown metronome sound '{}'", self.svalue),
            },
            JamParam::MetronomeEnabled => SessionCommand::MetronomeEnabled(self.ivalue_1 != 0),
            JamParam::MetronomeGain => SessionCommand::MetronomeGain(self.level()),
            JamParam::MetronomeAccents => {
                // "1,3" style, 1 based like a musician counts
                let mut beats = vec![];
                for part in self.svalue.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let beat: usize = str::parse(part)?;
                    if beat == 0 {
                        bail!("beats count from 1");
                    }
                    beats.push(beat - 1);
                }
                SessionCommand::MetronomeAccents(beats)
            }
            JamParam::MidiSync => SessionCommand::MidiSync(self.ivalue_1 != 0),
            JamParam::AudioQuality => SessionCommand::AudioQuality(self.level()),
            JamParam::VoiceQuality => SessionCommand::VoiceQuality(self.level()),
        };
        Ok(cmd)
    }
}

impl fmt::Display for ParamMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ param: {:?}, ival_1: {}, ival_2: {}, fval: {} sval: {} }}",
            self.param, self.ivalue_1, self.ivalue_2, self.fvalue, self.svalue
        )
    }
}

#[cfg(test)]
mod test_param_message {
    use super::*;

    #[test]
    fn can_json() {
        let msg = ParamMessage::new(JamParam::Gain, 1, 2, 0.5, "bob");
        let value = msg.as_json();
        assert_eq!(value["param"], 100);
        assert_eq!(value["sValue"], "bob");
    }
    #[test]
    fn numbers_or_strings() {
        let data = r#"
        {
            "param": "101",
            "iValue1": "3",
            "iValue2": 100,
            "fValue": -1,
            "sValue": "left"
        }"#;
        let msg = ParamMessage::from_string(data).unwrap();
        assert_eq!(msg.param, JamParam::Pan);
        assert_eq!(msg.ivalue_1, 3);
        assert_eq!(msg.fvalue, -1.0);
        assert_eq!(msg.to_command().unwrap(), SessionCommand::SetPan(3, -1.0));
    }
    #[test]
    fn missing_or_unknown_param() {
        assert!(ParamMessage::from_string("{\"iValue1\":150}").is_err());
        assert!(ParamMessage::from_string("{\"param\":9999}").is_err());
        assert!(ParamMessage::from_string("{\"param\":\"abc\"}").is_err());
    }
    #[test]
    fn tempo_commands() {
        let msg = ParamMessage::from_string("{\"param\":2,\"iValue1\":150}").unwrap();
        assert_eq!(msg.to_command().unwrap(), SessionCommand::SetBpm(150));
        let msg = ParamMessage::new(JamParam::VoteBpi, 32, 0, 0.0, "");
        assert_eq!(msg.to_command().unwrap(), SessionCommand::VoteBpi(32));
    }
    #[test]
    fn node_commands() {
        let msg = ParamMessage::new(JamParam::Mute, 7, 1, 0.0, "");
        assert_eq!(msg.to_command().unwrap(), SessionCommand::SetMute(7, true));
        let msg = ParamMessage::new(JamParam::LowCut, 7, 0, 0.0, "Drastic");
        assert_eq!(
            msg.to_command().unwrap(),
            SessionCommand::SetLowCut(7, LowCutState::Drastic)
        );
        let msg = ParamMessage::new(JamParam::Gain, -1, 0, 0.0, "");
        assert!(msg.to_command().is_err());
    }
    #[test]
    fn input_commands() {
        let msg = ParamMessage::new(JamParam::InputStereo, 4, 2, 0.0, "");
        assert_eq!(
            msg.to_command().unwrap(),
            SessionCommand::SetInputMode(4, InputMode::stereo(2))
        );
        let msg = ParamMessage::new(JamParam::InputMidi, 4, -1, 0.0, "9");
        match msg.to_command().unwrap() {
            SessionCommand::SetInputMode(4, InputMode::Midi { device, channel, .. }) => {
                assert_eq!(device, -1);
                assert_eq!(channel, Some(9));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    #[test]
    fn metronome_commands() {
        let msg = ParamMessage::new(JamParam::MetronomeAccents, 0, 0, 0.0, "1, 3");
        assert_eq!(
            msg.to_command().unwrap(),
            SessionCommand::MetronomeAccents(vec![0, 2])
        );
        let msg = ParamMessage::new(JamParam::MetronomeAccents, 0, 0, 0.0, "0");
        assert!(msg.to_command().is_err());
        let msg = ParamMessage::new(JamParam::MetronomeSound, 0, 0, 0.0, "woodblock");
        assert!(msg.to_command().is_err());
        let msg = ParamMessage::new(JamParam::LooperMode, 5, 0, 0.0, "all_layers");
        assert_eq!(
            msg.to_command().unwrap(),
            SessionCommand::LooperMode(5, LooperMode::AllLayers)
        );
    }
}

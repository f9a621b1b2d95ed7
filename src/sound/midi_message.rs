//! Raw short MIDI messages as delivered by the driver
use std::fmt;

pub const MIDI_CLOCK: u8 = 0xF8;
pub const MIDI_START: u8 = 0xFA;
pub const MIDI_CONTINUE: u8 = 0xFB;
pub const MIDI_STOP: u8 = 0xFC;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiMessage {
    /// index of the input device the message came from, -1 for generated messages
    pub source_device: i32,
    pub data: [u8; 3],
}

impl MidiMessage {
    pub fn new(source_device: i32, status: u8, data1: u8, data2: u8) -> MidiMessage {
        MidiMessage {
            source_device,
            data: [status, data1, data2],
        }
    }
    pub fn system(status: u8) -> MidiMessage {
        MidiMessage::new(-1, status, 0, 0)
    }
    pub fn status(&self) -> u8 {
        self.data[0]
    }
    /// 0 based channel of channel voice messages
    pub fn channel(&self) -> Option<u8> {
        if self.data[0] < 0xF0 {
            Some(self.data[0] & 0x0F)
        } else {
            None
        }
    }
    pub fn is_note(&self) -> bool {
        matches!(self.data[0] & 0xF0, 0x80 | 0x90)
    }
    pub fn note(&self) -> u8 {
        self.data[1]
    }
    pub fn transposed(&self, semitones: i8) -> MidiMessage {
        if !self.is_note() {
            return *self;
        }
        let note = (self.data[1] as i16 + semitones as i16).clamp(0, 127) as u8;
        MidiMessage {
            source_device: self.source_device,
            data: [self.data[0], note, self.data[2]],
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[ dev: {} {:02X} {:02X} {:02X} ]",
            self.source_device, self.data[0], self.data[1], self.data[2]
        )
    }
}

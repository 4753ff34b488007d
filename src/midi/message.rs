// MIDI wire messages - channel voice, system real-time, MTC and MMC
//
// Everything here is `Copy` and encodes into a fixed-size buffer so the
// dispatch thread never allocates to talk to a port.

use crate::sync::timecode::Timecode;

pub const TIMING_CLOCK: u8 = 0xF8;
pub const START: u8 = 0xFA;
pub const CONTINUE: u8 = 0xFB;
pub const STOP: u8 = 0xFC;
pub const ACTIVE_SENSING: u8 = 0xFE;
pub const SONG_POSITION: u8 = 0xF2;
pub const QUARTER_FRAME: u8 = 0xF1;
pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Universal real-time SysEx id
const UNIVERSAL_REALTIME: u8 = 0x7F;
const SUB_ID_MTC: u8 = 0x01;
const SUB_ID_MTC_FULL_FRAME: u8 = 0x01;
const SUB_ID_MMC_COMMAND: u8 = 0x06;
const MMC_LOCATE: u8 = 0x44;
const MMC_LOCATE_TARGET: u8 = 0x01;

/// CC 123
pub const ALL_NOTES_OFF: u8 = 123;

/// MIDI Machine Control commands we send and understand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcCommand {
    Stop,
    Play,
    DeferredPlay,
    FastForward,
    Rewind,
    RecordStrobe,
    RecordExit,
    Pause,
    Locate(Timecode),
}

impl MmcCommand {
    fn code(&self) -> u8 {
        match self {
            MmcCommand::Stop => 0x01,
            MmcCommand::Play => 0x02,
            MmcCommand::DeferredPlay => 0x03,
            MmcCommand::FastForward => 0x04,
            MmcCommand::Rewind => 0x05,
            MmcCommand::RecordStrobe => 0x06,
            MmcCommand::RecordExit => 0x07,
            MmcCommand::Pause => 0x09,
            MmcCommand::Locate(_) => MMC_LOCATE,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(MmcCommand::Stop),
            0x02 => Some(MmcCommand::Play),
            0x03 => Some(MmcCommand::DeferredPlay),
            0x04 => Some(MmcCommand::FastForward),
            0x05 => Some(MmcCommand::Rewind),
            0x06 => Some(MmcCommand::RecordStrobe),
            0x07 => Some(MmcCommand::RecordExit),
            0x09 => Some(MmcCommand::Pause),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    PitchBend { channel: u8, value: u16 },
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    /// Position in MIDI beats (sixteenth notes)
    SongPosition(u16),
    /// Quarter-frame: piece index 0-7 and its data nibble
    QuarterFrame { piece: u8, nibble: u8 },
    MtcFullFrame(Timecode),
    Mmc { device_id: u8, command: MmcCommand },
}

/// Encoded message, at most 13 bytes (MMC locate)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawMidi {
    bytes: [u8; 16],
    len: u8,
}

impl RawMidi {
    /// Copy of `data`, truncated to 16 bytes
    pub fn from_slice(data: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        let len = data.len().min(16);
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for RawMidi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawMidi(")?;
        for (i, b) in self.as_slice().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, ")")
    }
}

impl MidiMessage {
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            MidiMessage::TimingClock
                | MidiMessage::Start
                | MidiMessage::Continue
                | MidiMessage::Stop
                | MidiMessage::ActiveSensing
        )
    }

    /// Messages that drive synchronization rather than carry music
    pub fn is_sync(&self) -> bool {
        self.is_realtime()
            || matches!(
                self,
                MidiMessage::SongPosition(_)
                    | MidiMessage::QuarterFrame { .. }
                    | MidiMessage::MtcFullFrame(_)
                    | MidiMessage::Mmc { .. }
            )
    }

    pub fn all_notes_off(channel: u8) -> Self {
        MidiMessage::ControlChange {
            channel,
            controller: ALL_NOTES_OFF,
            value: 0,
        }
    }

    pub fn quarter_frame(timecode: &Timecode, piece: u8) -> Self {
        MidiMessage::QuarterFrame {
            piece: piece & 0x07,
            nibble: timecode.quarter_frame_nibble(piece),
        }
    }

    /// Song Position Pointer for a position in sixteenths (14 bits)
    pub fn song_position(sixteenths: u64) -> Self {
        MidiMessage::SongPosition(sixteenths.min(0x3FFF) as u16)
    }

    pub fn encode(&self) -> RawMidi {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => RawMidi::from_slice(&[0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]),
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => RawMidi::from_slice(&[0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => RawMidi::from_slice(&[0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F]),
            MidiMessage::ProgramChange { channel, program } => {
                RawMidi::from_slice(&[0xC0 | (channel & 0x0F), program & 0x7F])
            }
            MidiMessage::PitchBend { channel, value } => RawMidi::from_slice(&[
                0xE0 | (channel & 0x0F),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ]),
            MidiMessage::TimingClock => RawMidi::from_slice(&[TIMING_CLOCK]),
            MidiMessage::Start => RawMidi::from_slice(&[START]),
            MidiMessage::Continue => RawMidi::from_slice(&[CONTINUE]),
            MidiMessage::Stop => RawMidi::from_slice(&[STOP]),
            MidiMessage::ActiveSensing => RawMidi::from_slice(&[ACTIVE_SENSING]),
            MidiMessage::SongPosition(beats) => RawMidi::from_slice(&[
                SONG_POSITION,
                (beats & 0x7F) as u8,
                ((beats >> 7) & 0x7F) as u8,
            ]),
            MidiMessage::QuarterFrame { piece, nibble } => {
                RawMidi::from_slice(&[QUARTER_FRAME, ((piece & 0x07) << 4) | (nibble & 0x0F)])
            }
            MidiMessage::MtcFullFrame(tc) => RawMidi::from_slice(&[
                SYSEX_START,
                UNIVERSAL_REALTIME,
                0x7F,
                SUB_ID_MTC,
                SUB_ID_MTC_FULL_FRAME,
                tc.hours_with_rate(),
                tc.minutes,
                tc.seconds,
                tc.frames,
                SYSEX_END,
            ]),
            MidiMessage::Mmc { device_id, command } => match command {
                MmcCommand::Locate(tc) => RawMidi::from_slice(&[
                    SYSEX_START,
                    UNIVERSAL_REALTIME,
                    device_id & 0x7F,
                    SUB_ID_MMC_COMMAND,
                    MMC_LOCATE,
                    0x06,
                    MMC_LOCATE_TARGET,
                    tc.hours_with_rate(),
                    tc.minutes,
                    tc.seconds,
                    tc.frames,
                    tc.subframes,
                    SYSEX_END,
                ]),
                other => RawMidi::from_slice(&[
                    SYSEX_START,
                    UNIVERSAL_REALTIME,
                    device_id & 0x7F,
                    SUB_ID_MMC_COMMAND,
                    other.code(),
                    SYSEX_END,
                ]),
            },
        }
    }

    /// Parse one complete message; unknown or truncated input yields `None`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status >= 0xF0 {
            return Self::parse_system(status, bytes);
        }

        let channel = status & 0x0F;
        let data = |i: usize| bytes.get(i).copied().map(|b| b & 0x7F);

        match status & 0xF0 {
            0x90 => {
                let note = data(1)?;
                let velocity = data(2)?;
                // Velocity 0 = Note Off
                if velocity == 0 {
                    Some(MidiMessage::NoteOff {
                        channel,
                        note,
                        velocity: 0,
                    })
                } else {
                    Some(MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: data(1)?,
                velocity: data(2)?,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                controller: data(1)?,
                value: data(2)?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange {
                channel,
                program: data(1)?,
            }),
            0xE0 => {
                let lsb = data(1)? as u16;
                let msb = data(2)? as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    fn parse_system(status: u8, bytes: &[u8]) -> Option<Self> {
        match status {
            TIMING_CLOCK => Some(MidiMessage::TimingClock),
            START => Some(MidiMessage::Start),
            CONTINUE => Some(MidiMessage::Continue),
            STOP => Some(MidiMessage::Stop),
            ACTIVE_SENSING => Some(MidiMessage::ActiveSensing),
            SONG_POSITION => {
                let lsb = (*bytes.get(1)? & 0x7F) as u16;
                let msb = (*bytes.get(2)? & 0x7F) as u16;
                Some(MidiMessage::SongPosition((msb << 7) | lsb))
            }
            QUARTER_FRAME => {
                let data = *bytes.get(1)?;
                Some(MidiMessage::QuarterFrame {
                    piece: (data >> 4) & 0x07,
                    nibble: data & 0x0F,
                })
            }
            SYSEX_START => Self::parse_sysex(bytes),
            _ => None,
        }
    }

    fn parse_sysex(bytes: &[u8]) -> Option<Self> {
        if bytes.last() != Some(&SYSEX_END) || bytes.get(1) != Some(&UNIVERSAL_REALTIME) {
            return None;
        }
        let device_id = *bytes.get(2)?;
        match (*bytes.get(3)?, *bytes.get(4)?) {
            (SUB_ID_MTC, SUB_ID_MTC_FULL_FRAME) if bytes.len() == 10 => {
                Some(MidiMessage::MtcFullFrame(Timecode::from_hours_with_rate(
                    bytes[5], bytes[6], bytes[7], bytes[8],
                )))
            }
            (SUB_ID_MMC_COMMAND, MMC_LOCATE) => {
                // 44 06 01 hr mn sc fr st
                if bytes.len() < 13 || bytes[5] != 0x06 || bytes[6] != MMC_LOCATE_TARGET {
                    return None;
                }
                let mut tc =
                    Timecode::from_hours_with_rate(bytes[7], bytes[8], bytes[9], bytes[10]);
                tc.subframes = bytes[11].min(99);
                Some(MidiMessage::Mmc {
                    device_id,
                    command: MmcCommand::Locate(tc),
                })
            }
            (SUB_ID_MMC_COMMAND, code) => Some(MidiMessage::Mmc {
                device_id,
                command: MmcCommand::from_code(code)?,
            }),
            _ => None,
        }
    }
}

// MIDI Clock master - 24 PPQN pulses and Start/Stop/Continue/SPP
// Pulse times come from the tempo map, so they follow ramps exactly

use crate::midi::MidiMessage;
use crate::timeline::{Position, Seconds, TICKS_PER_QUARTER, TempoMap};

pub const PULSES_PER_QUARTER: u64 = 24;
pub const TICKS_PER_PULSE: u64 = TICKS_PER_QUARTER / PULSES_PER_QUARTER;
/// One MIDI beat (Song Position Pointer unit) is a sixteenth note
pub const TICKS_PER_MIDI_BEAT: u64 = TICKS_PER_QUARTER / 4;

/// Upper bound of pulses emitted by one call to `pulses_until`
const MAX_PULSES_PER_TICK: usize = 96;

#[derive(Debug, Clone, Default)]
pub struct MidiClockMaster {
    /// Index of the next pulse to send, `None` while stopped
    next_pulse: Option<u64>,
}

impl MidiClockMaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.next_pulse.is_some()
    }

    /// Song position pointer value for a position (next sixteenth at or after it)
    pub fn song_position(position: Position) -> u64 {
        position.ticks().div_ceil(TICKS_PER_MIDI_BEAT)
    }

    /// A slave resumes counting at the pointer, so the first pulse must
    /// land exactly there
    fn first_pulse_from(position: Position) -> u64 {
        Self::song_position(position) * (TICKS_PER_MIDI_BEAT / TICKS_PER_PULSE)
    }

    /// Transport started at `position`
    pub fn start(&mut self, position: Position, emit: &mut impl FnMut(MidiMessage)) {
        if position == Position::ZERO {
            emit(MidiMessage::Start);
        } else {
            emit(MidiMessage::song_position(Self::song_position(position)));
            emit(MidiMessage::Continue);
        }
        self.next_pulse = Some(Self::first_pulse_from(position));
    }

    pub fn stop(&mut self, emit: &mut impl FnMut(MidiMessage)) {
        if self.next_pulse.take().is_some() {
            emit(MidiMessage::Stop);
        }
    }

    /// Position changed (seek, loop wrap)
    pub fn locate(&mut self, position: Position, running: bool, emit: &mut impl FnMut(MidiMessage)) {
        let spp = MidiMessage::song_position(Self::song_position(position));
        if running {
            emit(MidiMessage::Stop);
            emit(spp);
            emit(MidiMessage::Continue);
            self.next_pulse = Some(Self::first_pulse_from(position));
        } else {
            emit(spp);
            self.next_pulse = None;
        }
    }

    /// Emit every pulse due at or before `until`, with its song time
    pub fn pulses_until(
        &mut self,
        map: &TempoMap,
        until: Seconds,
        emit: &mut impl FnMut(MidiMessage, Seconds),
    ) -> usize {
        let Some(mut pulse) = self.next_pulse else {
            return 0;
        };
        let mut sent = 0;
        while sent < MAX_PULSES_PER_TICK {
            let at = map.time_at(Position(pulse * TICKS_PER_PULSE));
            if at > until {
                break;
            }
            emit(MidiMessage::TimingClock, at);
            pulse += 1;
            sent += 1;
        }
        self.next_pulse = Some(pulse);
        sent
    }
}

// MIDI Time Code - quarter-frame generation and reassembly
//
// Quarter frame `i` of the song runs at i / (4 * fps) song seconds. A cycle
// of eight pieces starts on an even frame and describes the frame in which
// piece 0 went out, so a receiver that completes a cycle is 7 quarter
// frames (1.75 frames) behind.

use super::timecode::{FrameRate, Timecode};
use crate::midi::MidiMessage;
use crate::timeline::Seconds;
use std::time::Instant;

/// Quarter frames between the start of a cycle and its last piece
pub const CYCLE_DELAY_QUARTER_FRAMES: f64 = 7.0;

const MAX_QUARTER_FRAMES_PER_TICK: usize = 32;

#[derive(Debug, Clone)]
pub struct MtcMaster {
    rate: FrameRate,
    next_index: Option<u64>,
}

impl MtcMaster {
    pub fn new(rate: FrameRate) -> Self {
        Self {
            rate,
            next_index: None,
        }
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    pub fn set_rate(&mut self, rate: FrameRate) {
        self.rate = rate;
    }

    pub fn is_running(&self) -> bool {
        self.next_index.is_some()
    }

    fn quarter_frame_rate(&self) -> f64 {
        self.rate.fps() * 4.0
    }

    /// Full frame for `seconds`, then quarter frames from the next cycle
    pub fn start(&mut self, seconds: Seconds, emit: &mut impl FnMut(MidiMessage)) {
        emit(MidiMessage::MtcFullFrame(Timecode::from_seconds(seconds, self.rate)));
        let index = (seconds.max(0.0) * self.quarter_frame_rate()).ceil() as u64;
        self.next_index = Some(index.div_ceil(8) * 8);
    }

    /// Position changed; the full frame is sent in every state
    pub fn locate(&mut self, seconds: Seconds, running: bool, emit: &mut impl FnMut(MidiMessage)) {
        if running {
            self.start(seconds, emit);
        } else {
            emit(MidiMessage::MtcFullFrame(Timecode::from_seconds(seconds, self.rate)));
            self.next_index = None;
        }
    }

    pub fn stop(&mut self) {
        self.next_index = None;
    }

    /// Emit every quarter frame due at or before `until`, with its song time
    pub fn quarter_frames_until(
        &mut self,
        until: Seconds,
        emit: &mut impl FnMut(MidiMessage, Seconds),
    ) -> usize {
        let Some(mut index) = self.next_index else {
            return 0;
        };
        let qf_rate = self.quarter_frame_rate();
        let mut sent = 0;
        while sent < MAX_QUARTER_FRAMES_PER_TICK {
            let at = index as f64 / qf_rate;
            if at > until {
                break;
            }
            let piece = (index % 8) as u8;
            let frame = (index - piece as u64) / 4;
            let tc = Timecode::from_frames(frame, self.rate);
            emit(MidiMessage::quarter_frame(&tc, piece), at);
            index += 1;
            sent += 1;
        }
        self.next_index = Some(index);
        sent
    }
}

/// Collects eight in-order quarter-frame pieces into a timecode
#[derive(Debug, Clone, Default)]
pub struct QuarterFrameAssembler {
    nibbles: [u8; 8],
    expected: u8,
}

impl QuarterFrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.expected = 0;
    }

    /// Feed one piece; returns the timecode when piece 7 completes a cycle
    pub fn push(&mut self, piece: u8, nibble: u8) -> Option<Timecode> {
        let piece = piece & 0x07;
        if piece != self.expected {
            // Out of order (reverse play, dropped byte): wait for a fresh cycle
            self.expected = 0;
            if piece != 0 {
                return None;
            }
        }
        self.nibbles[piece as usize] = nibble & 0x0F;
        if piece < 7 {
            self.expected = piece + 1;
            return None;
        }
        self.expected = 0;

        let n = &self.nibbles;
        let tc = Timecode::new(
            n[6] | ((n[7] & 0x01) << 4),
            n[4] | ((n[5] & 0x03) << 4),
            n[2] | ((n[3] & 0x03) << 4),
            n[0] | ((n[1] & 0x01) << 4),
            FrameRate::from_rate_bits((n[7] >> 1) & 0x03),
        );
        tc.is_valid().then_some(tc)
    }
}

/// What an MTC receiver learned from one message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimecodeFix {
    /// Song seconds at `at`
    pub seconds: Seconds,
    pub at: Instant,
    /// Quarter frames are running; a lone full frame is a locate
    pub running: bool,
    pub rate: FrameRate,
}

#[derive(Debug, Clone, Default)]
pub struct MtcSlave {
    assembler: QuarterFrameAssembler,
    last_signal: Option<Instant>,
}

impl MtcSlave {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_signal(&self) -> Option<Instant> {
        self.last_signal
    }

    /// Start counting the signal timeout from `now` if nothing was received yet
    pub fn arm_timeout(&mut self, now: Instant) {
        self.last_signal.get_or_insert(now);
    }

    pub fn reset(&mut self) {
        self.assembler.reset();
        self.last_signal = None;
    }

    pub fn signal_lost(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.last_signal
            .is_some_and(|last| now.saturating_duration_since(last) > timeout)
    }

    pub fn handle_quarter_frame(&mut self, piece: u8, nibble: u8, at: Instant) -> Option<TimecodeFix> {
        self.last_signal = Some(at);
        let tc = self.assembler.push(piece, nibble)?;
        let delay = CYCLE_DELAY_QUARTER_FRAMES / 4.0 * tc.rate.frame_duration();
        Some(TimecodeFix {
            seconds: tc.to_seconds() + delay,
            at,
            running: true,
            rate: tc.rate,
        })
    }

    pub fn handle_full_frame(&mut self, tc: Timecode, at: Instant) -> TimecodeFix {
        self.last_signal = Some(at);
        self.assembler.reset();
        TimecodeFix {
            seconds: tc.to_seconds(),
            at,
            running: false,
            rate: tc.rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run_master(rate: FrameRate, from: Seconds, until: Seconds) -> Vec<(MidiMessage, Seconds)> {
        let mut master = MtcMaster::new(rate);
        master.start(from, &mut |_| {});
        let mut out = Vec::new();
        master.quarter_frames_until(until, &mut |m, at| out.push((m, at)));
        out
    }

    #[test]
    fn test_start_sends_full_frame() {
        let mut master = MtcMaster::new(FrameRate::Fps25);
        let mut out = Vec::new();
        master.start(3723.16, &mut |m| out.push(m));
        assert_eq!(
            out,
            vec![MidiMessage::MtcFullFrame(Timecode::new(1, 2, 3, 4, FrameRate::Fps25))]
        );
    }

    #[test]
    fn test_cycles_start_on_piece_zero() {
        // 0.05s at 25fps is quarter frame 5; the first cycle starts at 8
        let out = run_master(FrameRate::Fps25, 0.05, 0.2);
        match out[0].0 {
            MidiMessage::QuarterFrame { piece, .. } => assert_eq!(piece, 0),
            ref other => panic!("unexpected {:?}", other),
        }
        assert!((out[0].1 - 0.08).abs() < 1e-9);
        // 0.08..=0.2 s: quarter frames 8..=20
        assert_eq!(out.len(), 13);
    }

    #[test]
    fn test_master_output_reassembles_for_every_rate() {
        for rate in FrameRate::ALL {
            let start = 754.3;
            let mut master = MtcMaster::new(rate);
            master.start(start, &mut |_| {});
            let mut assembler = QuarterFrameAssembler::new();
            let mut decoded = Vec::new();
            master.quarter_frames_until(start + 0.2, &mut |m, at| {
                if let MidiMessage::QuarterFrame { piece, nibble } = m
                    && let Some(tc) = assembler.push(piece, nibble)
                {
                    decoded.push((tc, at));
                }
            });
            assert!(!decoded.is_empty(), "{:?}", rate);
            for (tc, at) in decoded {
                assert_eq!(tc.rate, rate);
                // Timecode names the frame of piece 0, sent 7 quarter frames earlier
                let piece_zero = at - 7.0 / (4.0 * rate.fps());
                assert!((tc.to_seconds() - piece_zero).abs() < 1e-6, "{:?}", rate);
            }
        }
    }

    #[test]
    fn test_assembler_needs_in_order_pieces() {
        let tc = Timecode::new(0, 1, 2, 3, FrameRate::Fps30);
        let mut assembler = QuarterFrameAssembler::new();
        // Start mid-cycle: ignored until piece 0
        for piece in 4..8 {
            assert_eq!(assembler.push(piece, tc.quarter_frame_nibble(piece)), None);
        }
        let mut result = None;
        for piece in 0..8 {
            result = assembler.push(piece, tc.quarter_frame_nibble(piece));
        }
        assert_eq!(result, Some(tc));

        // A skipped piece drops the cycle
        for piece in [0, 1, 2, 4, 5, 6, 7] {
            assert_eq!(assembler.push(piece, tc.quarter_frame_nibble(piece)), None);
        }
    }

    #[test]
    fn test_slave_adds_transmission_delay() {
        let tc = Timecode::new(0, 0, 10, 0, FrameRate::Fps25);
        let mut slave = MtcSlave::new();
        let at = Instant::now();
        let mut fix = None;
        for piece in 0..8 {
            fix = slave.handle_quarter_frame(piece, tc.quarter_frame_nibble(piece), at);
        }
        let fix = fix.unwrap();
        assert!(fix.running);
        assert!((fix.seconds - (10.0 + 1.75 / 25.0)).abs() < 1e-9);
    }

    #[test]
    fn test_signal_timeout() {
        let mut slave = MtcSlave::new();
        let t0 = Instant::now();
        let timeout = Duration::from_secs(3);
        assert!(!slave.signal_lost(t0 + Duration::from_secs(10), timeout));
        slave.arm_timeout(t0);
        assert!(!slave.signal_lost(t0 + Duration::from_secs(2), timeout));
        assert!(slave.signal_lost(t0 + Duration::from_secs(4), timeout));

        let fix = slave.handle_full_frame(Timecode::new(0, 0, 5, 0, FrameRate::Fps24), t0);
        assert!(!fix.running);
        assert!((fix.seconds - 5.0).abs() < 1e-9);
    }
}

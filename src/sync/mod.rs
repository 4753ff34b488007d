// Sync - MIDI Clock, MIDI Time Code and MIDI Machine Control
//
// The three protocol classes are independent: each has its own role, and
// a master role on one class can run next to the slave role on another.
// At most one class is slave at any time.

pub mod controller;
pub mod midi_clock;
pub mod mmc;
pub mod mtc;
pub mod timecode;

pub use controller::{SyncContext, SyncController};
pub use timecode::{FrameRate, Timecode};

use crate::timeline::Seconds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-facing sync selections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// Run from the internal clock and send MIDI Clock
    InternalClockMaster,
    /// Run from the internal clock, follow nobody, send no MIDI Clock
    InternalClockSlaveNone,
    MtcMaster,
    MtcSlave,
    MmcMaster,
    MmcSlave,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Off,
    Master,
    Slave,
}

/// Protocol class a role applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncClass {
    MidiClock,
    Mtc,
    Mmc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub midi_clock_master: bool,
    pub mtc: Role,
    pub mmc: Role,
}

impl SyncSettings {
    /// Apply one selection; choosing a slave demotes any other slave
    pub fn apply(&mut self, mode: SyncMode) {
        match mode {
            SyncMode::InternalClockMaster => self.midi_clock_master = true,
            SyncMode::InternalClockSlaveNone => {
                self.midi_clock_master = false;
                if self.mtc == Role::Slave {
                    self.mtc = Role::Off;
                }
                if self.mmc == Role::Slave {
                    self.mmc = Role::Off;
                }
            }
            SyncMode::MtcMaster => self.mtc = Role::Master,
            SyncMode::MtcSlave => {
                self.mtc = Role::Slave;
                if self.mmc == Role::Slave {
                    self.mmc = Role::Off;
                }
            }
            SyncMode::MmcMaster => self.mmc = Role::Master,
            SyncMode::MmcSlave => {
                self.mmc = Role::Slave;
                if self.mtc == Role::Slave {
                    self.mtc = Role::Off;
                }
            }
        }
    }

    pub fn switch_off(&mut self, class: SyncClass) {
        match class {
            SyncClass::MidiClock => self.midi_clock_master = false,
            SyncClass::Mtc => self.mtc = Role::Off,
            SyncClass::Mmc => self.mmc = Role::Off,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.mtc == Role::Slave && self.mmc == Role::Slave {
            return Err("MTC and MMC cannot both be slave".to_string());
        }
        Ok(())
    }

    pub fn is_mtc_slave(&self) -> bool {
        self.mtc == Role::Slave
    }

    pub fn is_mmc_slave(&self) -> bool {
        self.mmc == Role::Slave
    }

    /// Slave class in use, if any
    pub fn slave_class(&self) -> Option<SyncClass> {
        if self.is_mtc_slave() {
            Some(SyncClass::Mtc)
        } else if self.is_mmc_slave() {
            Some(SyncClass::Mmc)
        } else {
            None
        }
    }
}

impl fmt::Display for SyncSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clock {}, MTC {:?}, MMC {:?}",
            if self.midi_clock_master { "master" } else { "off" },
            self.mtc,
            self.mmc
        )
    }
}

/// How well we follow an external time source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncLockState {
    /// Running from the internal clock
    #[default]
    Internal,
    /// Slave mode, no signal yet
    Waiting,
    /// Receiving, still correcting
    Syncing,
    Locked,
    /// Signal timed out
    Lost,
}

impl fmt::Display for SyncLockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncLockState::Internal => "Internal",
            SyncLockState::Waiting => "Waiting",
            SyncLockState::Syncing => "Syncing",
            SyncLockState::Locked => "Locked",
            SyncLockState::Lost => "Sync lost",
        };
        write!(f, "{}", text)
    }
}

/// What the transport must do after sync input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction {
    Play,
    Stop,
    Pause,
    Record,
    /// Seek to song seconds
    Locate(Seconds),
    /// Seek to song seconds and start playing
    Chase(Seconds),
    /// Correct the running clock by this many seconds
    Slew(Seconds),
    SignalLost,
}

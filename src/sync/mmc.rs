// MIDI Machine Control - transport commands without positional correction

use super::SyncAction;
use super::timecode::{FrameRate, Timecode};
use crate::midi::{MidiMessage, MmcCommand};
use crate::timeline::Seconds;

/// Device id every receiver answers to
pub const ALL_CALL: u8 = 0x7F;

#[derive(Debug, Clone)]
pub struct MmcMaster {
    device_id: u8,
    rate: FrameRate,
}

impl MmcMaster {
    pub fn new(device_id: u8, rate: FrameRate) -> Self {
        Self {
            device_id: device_id & 0x7F,
            rate,
        }
    }

    pub fn command(&self, command: MmcCommand) -> MidiMessage {
        MidiMessage::Mmc {
            device_id: self.device_id,
            command,
        }
    }

    pub fn locate(&self, seconds: Seconds) -> MidiMessage {
        self.command(MmcCommand::Locate(Timecode::from_seconds(seconds, self.rate)))
    }
}

#[derive(Debug, Clone)]
pub struct MmcSlave {
    device_id: u8,
}

impl MmcSlave {
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id: device_id & 0x7F,
        }
    }

    pub fn accepts(&self, device_id: u8) -> bool {
        device_id == ALL_CALL || device_id == self.device_id
    }

    /// Transport action for a received command addressed to us
    pub fn handle(&self, device_id: u8, command: MmcCommand) -> Option<SyncAction> {
        if !self.accepts(device_id) {
            log::debug!("Ignoring MMC for device {:#04x}", device_id);
            return None;
        }
        match command {
            MmcCommand::Play | MmcCommand::DeferredPlay => Some(SyncAction::Play),
            MmcCommand::Stop | MmcCommand::RecordExit => Some(SyncAction::Stop),
            MmcCommand::Pause => Some(SyncAction::Pause),
            MmcCommand::RecordStrobe => Some(SyncAction::Record),
            MmcCommand::Locate(tc) => Some(SyncAction::Locate(tc.to_seconds())),
            MmcCommand::FastForward | MmcCommand::Rewind => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_locate_encoding() {
        let master = MmcMaster::new(0x10, FrameRate::Fps30);
        let raw = master.locate(3661.5).encode();
        assert_eq!(
            raw.as_slice(),
            &[0xF0, 0x7F, 0x10, 0x06, 0x44, 0x06, 0x01, 0x61, 0x01, 0x01, 0x0F, 0x00, 0xF7]
        );
    }

    #[test]
    fn test_master_play_encoding() {
        let master = MmcMaster::new(ALL_CALL, FrameRate::Fps25);
        assert_eq!(
            master.command(MmcCommand::Play).encode().as_slice(),
            &[0xF0, 0x7F, 0x7F, 0x06, 0x02, 0xF7]
        );
    }

    #[test]
    fn test_slave_device_filter() {
        let slave = MmcSlave::new(0x05);
        assert_eq!(slave.handle(0x05, MmcCommand::Play), Some(SyncAction::Play));
        assert_eq!(slave.handle(ALL_CALL, MmcCommand::Stop), Some(SyncAction::Stop));
        assert_eq!(slave.handle(0x06, MmcCommand::Play), None);
    }

    #[test]
    fn test_slave_command_mapping() {
        let slave = MmcSlave::new(ALL_CALL);
        assert_eq!(slave.handle(ALL_CALL, MmcCommand::DeferredPlay), Some(SyncAction::Play));
        assert_eq!(slave.handle(ALL_CALL, MmcCommand::Pause), Some(SyncAction::Pause));
        assert_eq!(slave.handle(ALL_CALL, MmcCommand::RecordStrobe), Some(SyncAction::Record));
        assert_eq!(slave.handle(ALL_CALL, MmcCommand::RecordExit), Some(SyncAction::Stop));
        let tc = Timecode::new(0, 0, 12, 0, FrameRate::Fps25);
        assert_eq!(
            slave.handle(ALL_CALL, MmcCommand::Locate(tc)),
            Some(SyncAction::Locate(12.0))
        );
    }
}

// MIDI module - wire messages shared by backends and sync protocols

pub mod message;

pub use message::{MidiMessage, MmcCommand, RawMidi};

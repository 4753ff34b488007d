// Timeline module - musical time representation and the tempo map

pub mod position;
pub mod tempo_map;

pub use position::{MusicalTime, Position, Seconds, TICKS_PER_QUARTER, TimeSignature};
pub use tempo_map::{
    DEFAULT_TEMPO, TempoChange, TempoMap, TempoMapError, TimeSignatureChange,
};

// Composition - The document data the engine plays from
//
// The document model owns the composition. The engine only ever sees
// immutable snapshots: the GUI publishes a new `Arc<Composition>` after
// each edit and the dispatch thread picks it up at the next tick boundary.

pub mod routing;
pub mod track;

pub use routing::{DeviceChannelRoute, DeviceId, DeviceInfo, RoutingTable, SourceFilter};
pub use track::{EventBody, SegmentId, Track, TrackEvent, TrackId, TrackKind};

use crate::timeline::{Position, TempoMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub tempo_map: TempoMap,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub routing: RoutingTable,
    /// Tracks armed for recording
    #[serde(default)]
    pub armed: BTreeSet<TrackId>,
    /// Per-track recording input filters (missing = accept everything)
    #[serde(default)]
    pub source_filters: BTreeMap<TrackId, SourceFilter>,
}

impl Composition {
    pub fn new(tempo_map: TempoMap) -> Self {
        Self {
            tempo_map,
            ..Self::default()
        }
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    pub fn source_filter(&self, id: TrackId) -> SourceFilter {
        self.source_filters.get(&id).copied().unwrap_or_default()
    }

    /// Last sounding position over all tracks
    pub fn end_position(&self) -> Position {
        self.tracks
            .iter()
            .map(Track::end_position)
            .max()
            .unwrap_or(Position::ZERO)
    }

    /// Check every track route against the routing table
    pub fn validate_routing(&self) -> Result<(), String> {
        let problems: Vec<String> = self
            .tracks
            .iter()
            .filter_map(|t| {
                self.routing
                    .check(&t.route)
                    .err()
                    .map(|e| format!("{} '{}': {}", t.id, t.name, e))
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

/// Document-side handle through which snapshots are published
///
/// The mutex is only held for a pointer swap. The dispatch thread uses
/// [`try_snapshot`](Self::try_snapshot) and never waits on it.
#[derive(Debug, Clone, Default)]
pub struct SharedComposition {
    inner: Arc<Mutex<Arc<Composition>>>,
}

impl SharedComposition {
    pub fn new(composition: Composition) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(composition))),
        }
    }

    /// Replace the current snapshot
    pub fn publish(&self, composition: Composition) {
        let next = Arc::new(composition);
        match self.inner.lock() {
            Ok(mut current) => *current = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Clone the current snapshot, edit it, publish the result
    pub fn update(&self, edit: impl FnOnce(&mut Composition)) {
        let mut draft = (*self.snapshot()).clone();
        edit(&mut draft);
        self.publish(draft);
    }

    /// Current snapshot (may wait for a concurrent publish)
    pub fn snapshot(&self) -> Arc<Composition> {
        match self.inner.lock() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Current snapshot, or `None` if a publish is in progress
    pub fn try_snapshot(&self) -> Option<Arc<Composition>> {
        self.inner.try_lock().ok().map(|current| Arc::clone(&current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_routing() {
        let mut comp = Composition::default();
        comp.routing.add_device(DeviceId(0), "Out");
        comp.tracks.push(Track::midi(
            TrackId(1),
            "ok",
            DeviceChannelRoute::new(DeviceId(0), 3),
        ));
        assert!(comp.validate_routing().is_ok());

        comp.tracks.push(Track::midi(
            TrackId(2),
            "bad",
            DeviceChannelRoute::new(DeviceId(9), 0),
        ));
        let err = comp.validate_routing().unwrap_err();
        assert!(err.contains("bad"));
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let shared = SharedComposition::new(Composition::default());
        let before = shared.snapshot();
        shared.update(|c| {
            c.armed.insert(TrackId(4));
        });
        let after = shared.try_snapshot().unwrap();
        assert!(before.armed.is_empty());
        assert!(after.armed.contains(&TrackId(4)));
        assert!(!Arc::ptr_eq(&before, &after));
    }
}

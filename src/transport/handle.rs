// Transport handle - the GUI side of the transport
//
// Every operation is a command pushed onto a lock-free ring buffer and
// applied by the dispatch thread at its next tick. Results come back as
// notifications; the shared state can be polled at any time. Closed
// recording takes come back raw and are finalized here, off the dispatch
// thread.

use super::state::{LoopRange, SharedTransportState, TransportState};
use crate::error::TransportError;
use crate::messaging::{
    CommandProducer, Notification, NotificationConsumer, TakeConsumer, TransportCommand,
};
use crate::recording::RecordedSegment;
use crate::sync::{SyncMode, SyncSettings};
use crate::timeline::{Position, Seconds};
use ringbuf::traits::{Consumer, Producer};
use std::sync::Arc;

pub struct TransportHandle {
    commands: CommandProducer,
    notifications: NotificationConsumer,
    takes: TakeConsumer,
    shared: Arc<SharedTransportState>,
    recorded: Vec<RecordedSegment>,
}

impl TransportHandle {
    pub(crate) fn new(
        commands: CommandProducer,
        notifications: NotificationConsumer,
        takes: TakeConsumer,
        shared: Arc<SharedTransportState>,
    ) -> Self {
        Self {
            commands,
            notifications,
            takes,
            shared,
            recorded: Vec::new(),
        }
    }

    pub fn send(&mut self, command: TransportCommand) -> Result<(), TransportError> {
        self.commands
            .try_push(command)
            .map_err(|_| TransportError::QueueFull)
    }

    pub fn play(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::Play)
    }

    pub fn stop(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::Stop)
    }

    pub fn pause(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::Pause)
    }

    pub fn resume(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::Resume)
    }

    pub fn record(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::Record)
    }

    pub fn seek(&mut self, position: Position) -> Result<(), TransportError> {
        self.send(TransportCommand::Seek(position))
    }

    /// Checked here as well so the caller gets the error right away
    pub fn set_loop(&mut self, range: LoopRange) -> Result<(), TransportError> {
        range.validate()?;
        self.send(TransportCommand::SetLoop(range))
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode) -> Result<(), TransportError> {
        self.send(TransportCommand::SetSyncMode(mode))
    }

    pub fn set_sync_settings(&mut self, settings: SyncSettings) -> Result<(), TransportError> {
        settings.validate().map_err(TransportError::InvalidSync)?;
        self.send(TransportCommand::SetSyncSettings(settings))
    }

    pub fn acknowledge_health(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::AcknowledgeHealth)
    }

    pub fn set_metronome(&mut self, enabled_while_playing: bool) -> Result<(), TransportError> {
        self.send(TransportCommand::SetMetronome(enabled_while_playing))
    }

    /// Everything published since the last call, oldest first
    ///
    /// Takes closed since the last call are finalized here and reported as
    /// `RecordingFinished` after the transport's own notifications.
    pub fn poll_notifications(&mut self) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self.notifications.pop_iter().collect();
        while let Some(take) = self.takes.try_pop() {
            let session = take.id();
            let segments = take.finalize();
            notifications.push(Notification::RecordingFinished {
                session,
                segments: segments.clone(),
            });
            self.recorded = segments;
        }
        notifications
    }

    /// Segments of the last take finalized by `poll_notifications`
    pub fn recorded_segments(&self) -> &[RecordedSegment] {
        &self.recorded
    }

    pub fn take_recorded_segments(&mut self) -> Vec<RecordedSegment> {
        std::mem::take(&mut self.recorded)
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn position(&self) -> Position {
        self.shared.position()
    }

    pub fn seconds(&self) -> Seconds {
        self.shared.seconds()
    }

    pub fn loop_range(&self) -> LoopRange {
        self.shared.loop_range()
    }

    pub fn is_recording_disabled(&self) -> bool {
        self.shared.is_recording_disabled()
    }

    pub fn shared_state(&self) -> Arc<SharedTransportState> {
        Arc::clone(&self.shared)
    }
}

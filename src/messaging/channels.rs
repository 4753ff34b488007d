// Lock-free communication channels

use crate::backend::InputEvent;
use crate::messaging::command::TransportCommand;
use crate::messaging::notification::Notification;
use crate::recording::FinishedTake;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;

pub type CommandProducer = ringbuf::HeapProd<TransportCommand>;
pub type CommandConsumer = ringbuf::HeapCons<TransportCommand>;

pub fn create_command_channel(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let rb = HeapRb::<TransportCommand>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

/// MIDI input from driver callbacks to the dispatch thread
pub type InputProducer = ringbuf::HeapProd<InputEvent>;
pub type InputConsumer = ringbuf::HeapCons<InputEvent>;

pub fn create_input_channel(capacity: usize) -> (InputProducer, InputConsumer) {
    let rb = HeapRb::<InputEvent>::new(capacity);
    rb.split()
}

/// Closed recording takes from the dispatch thread to the GUI side
pub type TakeProducer = ringbuf::HeapProd<FinishedTake>;
pub type TakeConsumer = ringbuf::HeapCons<FinishedTake>;

pub fn create_take_channel(capacity: usize) -> (TakeProducer, TakeConsumer) {
    let rb = HeapRb::<FinishedTake>::new(capacity);
    rb.split()
}

/// Dispatch-thread side of the notification channel
///
/// A full channel drops the notification instead of blocking; drops are
/// counted so the GUI can tell it missed something.
pub struct Notifier {
    producer: NotificationProducer,
    dropped: u64,
}

impl Notifier {
    pub fn new(producer: NotificationProducer) -> Self {
        Self {
            producer,
            dropped: 0,
        }
    }

    pub fn publish(&mut self, notification: Notification) -> bool {
        match self.producer.try_push(notification) {
            Ok(()) => true,
            Err(_) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    log::debug!("Notification channel full, {} dropped so far", self.dropped);
                }
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

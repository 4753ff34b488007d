// Pending event queue - min-heap on dispatch order

use super::event::ScheduledEvent;
use crate::timeline::Seconds;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry(ScheduledEvent);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.dispatch_cmp(&self.0)
    }
}

pub struct EventQueue {
    heap: BinaryHeap<Entry>,
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: ScheduledEvent) {
        self.heap.push(Entry(event));
    }

    pub fn peek(&self) -> Option<&ScheduledEvent> {
        self.heap.peek().map(|e| &e.0)
    }

    /// Next event due at or before `until`
    pub fn pop_due(&mut self, until: Seconds) -> Option<ScheduledEvent> {
        if self.peek()?.dispatch_time <= until {
            self.heap.pop().map(|e| e.0)
        } else {
            None
        }
    }

    /// Drop everything; returns how many events were cancelled
    pub fn clear(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.heap.iter().map(|e| &e.0)
    }
}

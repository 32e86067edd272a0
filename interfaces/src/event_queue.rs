//! Discrete-event scheduler
//!
//! Events are ordered by:
//! 1. Time (earlier first)
//! 2. Sequence number (FIFO for events scheduled at the same instant)
//!
//! The queue owns simulated time: `now()` is the timestamp of the event most
//! recently popped. Nothing runs concurrently; each popped event is handled to
//! completion by the caller before the next one is taken.

use crate::InterfaceError;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use tracing::trace;

/// Handle of a scheduled event, used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

/// Scheduling capability handed to components that need to arm future callbacks
pub trait Scheduler<E> {
    /// Current simulated time
    fn now(&self) -> Duration;

    /// Schedule `event` to fire `delay` after now
    fn schedule_in(&mut self, delay: Duration, event: E) -> EventId;

    /// Cancel a pending event; cancelling a fired or unknown event is a no-op
    fn cancel(&mut self, id: EventId);
}

/// Key for ordering events in the queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct EventKey {
    time: Duration,
    sequence: u64,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Entry<E> {
    key: EventKey,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<E> Eq for Entry<E> {}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest key pops first
        other.key.cmp(&self.key)
    }
}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deterministic event queue
pub struct EventQueue<E> {
    now: Duration,
    next_sequence: u64,
    heap: BinaryHeap<Entry<E>>,
    cancelled: HashSet<u64>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_sequence: 0,
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Schedule an event at an absolute time
    pub fn schedule_at(&mut self, time: Duration, event: E) -> Result<EventId, InterfaceError> {
        if time < self.now {
            return Err(InterfaceError::EventInPast {
                at_ns: time.as_nanos(),
                now_ns: self.now.as_nanos(),
            });
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry {
            key: EventKey { time, sequence },
            event,
        });
        Ok(EventId(sequence))
    }

    /// Time of the next pending event, if any
    pub fn peek_time(&mut self) -> Option<Duration> {
        self.drop_cancelled_head();
        self.heap.peek().map(|entry| entry.key.time)
    }

    /// Pop the next event and advance simulated time to it
    pub fn pop(&mut self) -> Option<(Duration, E)> {
        self.drop_cancelled_head();
        let entry = self.heap.pop()?;
        self.now = entry.key.time;
        trace!("Event #{} fired at {:?}", entry.key.sequence, self.now);
        Some((entry.key.time, entry.event))
    }

    /// Number of pending (not cancelled) events
    pub fn len(&self) -> usize {
        self.heap
            .iter()
            .filter(|entry| !self.cancelled.contains(&entry.key.sequence))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_cancelled_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.cancelled.remove(&head.key.sequence) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }
}

impl<E> Scheduler<E> for EventQueue<E> {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_in(&mut self, delay: Duration, event: E) -> EventId {
        let at = self.now + delay;
        // `at` can never precede `now`
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry {
            key: EventKey { time: at, sequence },
            event,
        });
        EventId(sequence)
    }

    fn cancel(&mut self, id: EventId) {
        if id.0 < self.next_sequence
            && self.heap.iter().any(|entry| entry.key.sequence == id.0)
        {
            self.cancelled.insert(id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_then_insertion_order() {
        let mut queue = EventQueue::new();
        queue.schedule_at(Duration::from_micros(20), "late").unwrap();
        queue.schedule_at(Duration::from_micros(10), "first").unwrap();
        queue.schedule_at(Duration::from_micros(10), "second").unwrap();

        assert_eq!(queue.pop(), Some((Duration::from_micros(10), "first")));
        assert_eq!(queue.pop(), Some((Duration::from_micros(10), "second")));
        assert_eq!(queue.now(), Duration::from_micros(10));
        assert_eq!(queue.pop(), Some((Duration::from_micros(20), "late")));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_schedule_relative_and_cancel() {
        let mut queue = EventQueue::new();
        queue.schedule_at(Duration::from_nanos(5), 0u32).unwrap();
        queue.pop();

        let cancelled = queue.schedule_in(Duration::from_nanos(10), 1);
        queue.schedule_in(Duration::from_nanos(20), 2);
        queue.cancel(cancelled);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some((Duration::from_nanos(25), 2)));
    }

    #[test]
    fn test_rejects_past_events() {
        let mut queue = EventQueue::new();
        queue.schedule_at(Duration::from_millis(1), ()).unwrap();
        queue.pop();
        assert!(queue.schedule_at(Duration::from_micros(1), ()).is_err());
    }
}

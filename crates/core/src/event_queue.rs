//! Event queue with deterministic ordering.

use crate::Event;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Key for ordering events in the queue.
///
/// Events are ordered by time (earlier first), then by sequence number, which
/// is handed out on every insert, so same-time events run FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    /// When this event should be processed.
    pub time: Duration,
    /// Sequence number for deterministic FIFO ordering.
    pub sequence: u64,
}

/// Counters kept by the [`EventQueue`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Events accepted by `schedule`.
    pub scheduled: u64,
    /// Events handed out by `pop_earliest` / `pop_until`.
    pub processed: u64,
    /// Successful `reschedule` calls.
    pub rescheduled: u64,
    /// Successful `cancel` calls.
    pub cancelled: u64,
    /// Events rejected because their time was before the clock.
    pub stale_dropped: u64,
}

/// Time-ordered event queue that owns the simulated clock.
///
/// Keyed by [`EventKey`] in a `BTreeMap`, so an entry can be found again by
/// its key for `reschedule` and `cancel`.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: BTreeMap<EventKey, Event>,
    sequence: u64,
    now: Duration,
    stats: SchedulerStats,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Time of the earliest queued event.
    pub fn peek_time(&self) -> Option<Duration> {
        self.events.first_key_value().map(|(key, _)| key.time)
    }

    /// Queue an event.
    ///
    /// Events timestamped before the current clock are rejected: nothing is
    /// queued, the drop is counted in [`SchedulerStats::stale_dropped`] and
    /// `None` is returned.
    pub fn schedule(&mut self, time: Duration, event: Event) -> Option<EventKey> {
        if time < self.now {
            self.stats.stale_dropped += 1;
            warn!(
                event = event.type_name(),
                time = ?time,
                now = ?self.now,
                "Dropping event scheduled in the past"
            );
            return None;
        }
        self.stats.scheduled += 1;
        Some(self.insert(time, event))
    }

    fn insert(&mut self, time: Duration, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey {
            time,
            sequence: self.sequence,
        };
        self.events.insert(key, event);
        key
    }

    /// Remove the earliest event and advance the clock to its time.
    pub fn pop_earliest(&mut self) -> Option<(EventKey, Event)> {
        let (key, event) = self.events.pop_first()?;
        self.now = key.time;
        self.stats.processed += 1;
        Some((key, event))
    }

    /// Like [`pop_earliest`](Self::pop_earliest), but leaves the queue alone
    /// once the earliest event lies past `horizon`.
    pub fn pop_until(&mut self, horizon: Duration) -> Option<(EventKey, Event)> {
        match self.peek_time() {
            Some(time) if time <= horizon => self.pop_earliest(),
            _ => None,
        }
    }

    /// Move a queued event to a new time.
    ///
    /// The event gets a fresh sequence number, so it runs after anything
    /// already queued for `new_time`. Returns the new key, or `None` when `key`
    /// is no longer queued or `new_time` is before the clock (the event then
    /// stays where it was).
    pub fn reschedule(&mut self, key: EventKey, new_time: Duration) -> Option<EventKey> {
        if new_time < self.now {
            self.stats.stale_dropped += 1;
            warn!(time = ?new_time, now = ?self.now, "Refusing to reschedule into the past");
            return None;
        }
        let event = self.events.remove(&key)?;
        self.stats.rescheduled += 1;
        Some(self.insert(new_time, event))
    }

    /// Remove a queued event.
    pub fn cancel(&mut self, key: EventKey) -> Option<Event> {
        let event = self.events.remove(&key)?;
        self.stats.cancelled += 1;
        Some(event)
    }

    /// Advance the clock without processing anything. Never moves it back.
    pub fn advance_to(&mut self, time: Duration) {
        if self.now < time {
            self.now = time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wakeup(sender: u32) -> Event {
        Event::TrafficWakeup { sender }
    }

    fn sender_of(event: &Event) -> u32 {
        match event {
            Event::TrafficWakeup { sender } => *sender,
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_event_key_ordering() {
        let earlier = EventKey {
            time: secs(1),
            sequence: 9,
        };
        let later = EventKey {
            time: secs(2),
            sequence: 1,
        };
        assert!(earlier < later);
    }

    #[test]
    fn test_pop_in_time_order_with_fifo_ties() {
        let mut queue = EventQueue::new();
        queue.schedule(secs(3), wakeup(0));
        queue.schedule(secs(1), wakeup(1));
        queue.schedule(secs(1), wakeup(2));
        queue.schedule(secs(2), wakeup(3));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_earliest())
            .map(|(_, e)| sender_of(&e))
            .collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
        assert_eq!(queue.now(), secs(3));
        assert_eq!(queue.stats().processed, 4);
    }

    #[test]
    fn test_pop_until_stops_at_horizon() {
        let mut queue = EventQueue::new();
        queue.schedule(secs(1), wakeup(0));
        queue.schedule(secs(5), wakeup(1));

        assert!(queue.pop_until(secs(2)).is_some());
        assert!(queue.pop_until(secs(2)).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.now(), secs(1));

        queue.advance_to(secs(2));
        assert_eq!(queue.now(), secs(2));
        queue.advance_to(secs(1));
        assert_eq!(queue.now(), secs(2));
    }

    #[test]
    fn test_reschedule_earlier_and_later() {
        let mut queue = EventQueue::new();
        let a = queue.schedule(secs(5), wakeup(0)).unwrap();
        queue.schedule(secs(3), wakeup(1));

        let a = queue.reschedule(a, secs(1)).unwrap();
        assert_eq!(a.time, secs(1));
        let (_, first) = queue.pop_earliest().unwrap();
        assert_eq!(sender_of(&first), 0);

        let b = queue.schedule(secs(4), wakeup(2)).unwrap();
        queue.reschedule(b, secs(10)).unwrap();
        let order: Vec<_> = std::iter::from_fn(|| queue.pop_earliest())
            .map(|(k, e)| (k.time, sender_of(&e)))
            .collect();
        assert_eq!(order, vec![(secs(3), 1), (secs(10), 2)]);
        assert_eq!(queue.stats().rescheduled, 2);
    }

    #[test]
    fn test_rescheduled_event_runs_after_existing_same_time_events() {
        let mut queue = EventQueue::new();
        let moved = queue.schedule(secs(1), wakeup(0)).unwrap();
        queue.schedule(secs(2), wakeup(1));
        queue.reschedule(moved, secs(2));

        queue.pop_earliest();
        let (_, second) = queue.pop_earliest().unwrap();
        assert_eq!(sender_of(&second), 0);
    }

    #[test]
    fn test_reschedule_of_popped_key_is_none() {
        let mut queue = EventQueue::new();
        let key = queue.schedule(secs(1), wakeup(0)).unwrap();
        queue.pop_earliest();
        assert_eq!(queue.reschedule(key, secs(2)), None);
        assert!(queue.cancel(key).is_none());
    }

    #[test]
    fn test_cancel_removes_event() {
        let mut queue = EventQueue::new();
        let key = queue.schedule(secs(1), wakeup(7)).unwrap();
        queue.schedule(secs(2), wakeup(8));

        let cancelled = queue.cancel(key).unwrap();
        assert_eq!(sender_of(&cancelled), 7);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().cancelled, 1);
    }

    #[test]
    fn test_events_in_the_past_are_dropped_and_counted() {
        let mut queue = EventQueue::new();
        queue.schedule(secs(5), wakeup(0));
        queue.pop_earliest();

        assert_eq!(queue.schedule(secs(4), wakeup(1)), None);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().stale_dropped, 1);

        // Same-time follow-ups are fine.
        assert!(queue.schedule(secs(5), wakeup(2)).is_some());
        assert_eq!(queue.stats().scheduled, 2);
    }
}

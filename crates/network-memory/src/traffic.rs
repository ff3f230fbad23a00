//! Per-sender fair-queued uplinks.
//!
//! Every sender shares its bandwidth evenly across all packets it currently
//! has queued (processor sharing). The shaper tracks this with a virtual
//! clock measured in bytes:
//!
//! ```text
//!   on every enqueue / dequeue:  virtual += elapsed × bandwidth / queued
//!   enqueued packet finish tag:  virtual + size
//!   next completion:             now + (min_finish − virtual) × queued / bandwidth
//! ```
//!
//! Each sender owns at most one pending [`Event::TrafficWakeup`]; whenever the
//! queue changes the wake-up is moved in place with
//! [`EventQueue::reschedule`].

use pivotsim_core::{Event, EventKey, EventQueue, Packet};
use pivotsim_types::NodeIndex;
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, trace};

/// Counters kept by the [`TrafficShaper`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ShaperStats {
    /// Packets that entered a fair queue.
    pub enqueued: u64,
    /// Packets that finished transmission.
    pub transmitted: u64,
    /// Packets that had to wait for buffer space.
    pub overflowed: u64,
    /// Wake-ups that found nothing to send.
    pub stale_wakeups: u64,
}

#[derive(Debug)]
struct QueuedPacket {
    finish: f64,
    sequence: u64,
    packet: Packet,
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedPacket {}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.finish
            .total_cmp(&other.finish)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// One sender's outbound link.
#[derive(Debug, Default)]
struct Outbound {
    /// Bytes served to each active packet so far.
    virtual_bytes: f64,
    last_update: Duration,
    queue: BinaryHeap<Reverse<QueuedPacket>>,
    /// Packets waiting for buffer space, FIFO.
    waiting: VecDeque<Packet>,
    /// Bytes currently in `queue`.
    buffered: u64,
    wakeup: Option<EventKey>,
}

impl Outbound {
    fn advance(&mut self, now: Duration, bytes_per_sec: f64) {
        if !self.queue.is_empty() {
            let elapsed = now.saturating_sub(self.last_update).as_secs_f64();
            self.virtual_bytes += elapsed * bytes_per_sec / self.queue.len() as f64;
        }
        self.last_update = now;
    }
}

/// Fair-queued outbound links for every sender.
#[derive(Debug)]
pub struct TrafficShaper {
    bytes_per_sec: f64,
    buffer_size: u64,
    links: HashMap<NodeIndex, Outbound>,
    sequence: u64,
    stats: ShaperStats,
}

impl TrafficShaper {
    pub fn new(bytes_per_sec: f64, buffer_size: u64) -> Self {
        Self {
            bytes_per_sec,
            buffer_size,
            links: HashMap::new(),
            sequence: 0,
            stats: ShaperStats::default(),
        }
    }

    pub fn stats(&self) -> &ShaperStats {
        &self.stats
    }

    /// Packets queued or waiting on `sender`'s link.
    pub fn backlog(&self, sender: NodeIndex) -> usize {
        self.links
            .get(&sender)
            .map_or(0, |link| link.queue.len() + link.waiting.len())
    }

    /// Hand a packet to its sender's link.
    ///
    /// Packets that do not fit the outbound buffer wait in FIFO order until
    /// space frees. A packet larger than the whole buffer is admitted once
    /// the link is idle.
    pub fn enqueue(&mut self, events: &mut EventQueue, packet: Packet) {
        let sender = packet.sender;
        let link = self.links.entry(sender).or_default();
        if link.buffered + packet.size <= self.buffer_size || link.queue.is_empty() {
            self.push(events, packet);
        } else {
            trace!(sender, size = packet.size, "Outbound buffer full, packet waits");
            link.waiting.push_back(packet);
            self.stats.overflowed += 1;
        }
    }

    /// Handle the sender's wake-up: the packet with the smallest finish tag
    /// has been fully transmitted. Returns it, or `None` if the wake-up was
    /// stale.
    pub fn on_wakeup(&mut self, events: &mut EventQueue, sender: NodeIndex) -> Option<Packet> {
        let now = events.now();
        let bytes_per_sec = self.bytes_per_sec;
        let Some(link) = self.links.get_mut(&sender) else {
            self.stats.stale_wakeups += 1;
            debug!(sender, "Wake-up for unknown link ignored");
            return None;
        };
        link.wakeup = None;
        link.advance(now, bytes_per_sec);

        let Some(Reverse(done)) = link.queue.pop() else {
            self.stats.stale_wakeups += 1;
            debug!(sender, "Wake-up with an empty queue ignored");
            return None;
        };
        // Keep the clock from lagging the finish tag through float rounding.
        link.virtual_bytes = link.virtual_bytes.max(done.finish);
        link.buffered -= done.packet.size;
        self.stats.transmitted += 1;

        let mut admitted = Vec::new();
        while let Some(next) = link.waiting.front() {
            if link.buffered + next.size > self.buffer_size && !link.queue.is_empty() {
                break;
            }
            if let Some(packet) = link.waiting.pop_front() {
                link.buffered += packet.size;
                admitted.push(packet);
            }
        }
        for packet in admitted {
            self.insert(sender, packet);
        }

        self.update_wakeup(events, sender);
        Some(done.packet)
    }

    fn push(&mut self, events: &mut EventQueue, packet: Packet) {
        let sender = packet.sender;
        let now = events.now();
        let bytes_per_sec = self.bytes_per_sec;
        let link = self.links.entry(sender).or_default();
        link.advance(now, bytes_per_sec);
        link.buffered += packet.size;
        self.insert(sender, packet);
        self.update_wakeup(events, sender);
    }

    /// Add a packet whose bytes are already counted in `buffered`.
    fn insert(&mut self, sender: NodeIndex, packet: Packet) {
        self.sequence += 1;
        self.stats.enqueued += 1;
        let link = self.links.entry(sender).or_default();
        link.queue.push(Reverse(QueuedPacket {
            finish: link.virtual_bytes + packet.size as f64,
            sequence: self.sequence,
            packet,
        }));
    }

    fn update_wakeup(&mut self, events: &mut EventQueue, sender: NodeIndex) {
        let now = events.now();
        let bytes_per_sec = self.bytes_per_sec;
        let Some(link) = self.links.get_mut(&sender) else {
            return;
        };

        let Some(Reverse(head)) = link.queue.peek() else {
            if let Some(key) = link.wakeup.take() {
                events.cancel(key);
            }
            return;
        };

        let remaining = (head.finish - link.virtual_bytes).max(0.0);
        let delay = remaining * link.queue.len() as f64 / bytes_per_sec;
        let at = now + Duration::from_secs_f64(delay);

        let moved = link.wakeup.and_then(|key| events.reschedule(key, at));
        link.wakeup = moved.or_else(|| events.schedule(at, Event::TrafficWakeup { sender }));
        trace!(sender, queued = link.queue.len(), at = ?at, "Traffic wake-up set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotsim_core::PacketKind;
    use pivotsim_types::test_utils::genesis;

    const BYTES_PER_SEC: f64 = 1_000_000.0;

    fn packet(sender: NodeIndex, receiver: NodeIndex, size: u64) -> Packet {
        Packet {
            sender,
            receiver,
            size,
            kind: PacketKind::Block,
            block: genesis(),
        }
    }

    /// Drive the queue until empty, returning `(time, receiver)` per packet.
    fn drain(shaper: &mut TrafficShaper, events: &mut EventQueue) -> Vec<(Duration, NodeIndex)> {
        let mut done = Vec::new();
        while let Some((key, event)) = events.pop_earliest() {
            match event {
                Event::TrafficWakeup { sender } => {
                    if let Some(p) = shaper.on_wakeup(events, sender) {
                        done.push((key.time, p.receiver));
                    }
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        done
    }

    fn assert_close(actual: Duration, expected_secs: f64) {
        let diff = (actual.as_secs_f64() - expected_secs).abs();
        assert!(diff < 1e-6, "expected {expected_secs}s, got {actual:?}");
    }

    #[test]
    fn test_single_transfer_takes_size_over_bandwidth() {
        let mut shaper = TrafficShaper::new(BYTES_PER_SEC, u64::MAX);
        let mut events = EventQueue::new();
        shaper.enqueue(&mut events, packet(0, 1, 500_000));

        let done = drain(&mut shaper, &mut events);
        assert_eq!(done.len(), 1);
        assert_close(done[0].0, 0.5);
    }

    #[test]
    fn test_simultaneous_transfers_share_bandwidth() {
        let mut shaper = TrafficShaper::new(BYTES_PER_SEC, u64::MAX);
        let mut events = EventQueue::new();
        shaper.enqueue(&mut events, packet(0, 1, 500_000));
        shaper.enqueue(&mut events, packet(0, 2, 500_000));

        let done = drain(&mut shaper, &mut events);
        assert_eq!(done.len(), 2);
        // Each gets half the link, so both finish at 2S/B rather than S/B and 2S/B.
        assert_close(done[0].0, 1.0);
        assert_close(done[1].0, 1.0);
        assert_eq!(shaper.stats().transmitted, 2);
    }

    #[test]
    fn test_late_small_packet_overtakes_large_one() {
        let mut shaper = TrafficShaper::new(BYTES_PER_SEC, u64::MAX);
        let mut events = EventQueue::new();
        shaper.enqueue(&mut events, packet(0, 1, 1_000_000));

        // Half a second in, a 100 KB packet joins; both then run at half rate.
        events.schedule(Duration::from_millis(500), Event::TrafficWakeup { sender: 9 });
        let (_, _) = events.pop_earliest().unwrap();
        shaper.enqueue(&mut events, packet(0, 2, 100_000));

        let done = drain(&mut shaper, &mut events);
        assert_eq!(done.iter().map(|d| d.1).collect::<Vec<_>>(), vec![2, 1]);
        assert_close(done[0].0, 0.7);
        assert_close(done[1].0, 1.1);
    }

    #[test]
    fn test_senders_do_not_share_bandwidth() {
        let mut shaper = TrafficShaper::new(BYTES_PER_SEC, u64::MAX);
        let mut events = EventQueue::new();
        shaper.enqueue(&mut events, packet(0, 1, 1_000_000));
        shaper.enqueue(&mut events, packet(1, 0, 1_000_000));

        let done = drain(&mut shaper, &mut events);
        assert_close(done[0].0, 1.0);
        assert_close(done[1].0, 1.0);
    }

    #[test]
    fn test_full_buffer_defers_packets() {
        let mut shaper = TrafficShaper::new(BYTES_PER_SEC, 1_000_000);
        let mut events = EventQueue::new();
        shaper.enqueue(&mut events, packet(0, 1, 1_000_000));
        shaper.enqueue(&mut events, packet(0, 2, 1_000_000));
        assert_eq!(shaper.stats().overflowed, 1);
        assert_eq!(shaper.backlog(0), 2);

        let done = drain(&mut shaper, &mut events);
        // The second packet only starts once the first has left.
        assert_close(done[0].0, 1.0);
        assert_close(done[1].0, 2.0);
        assert_eq!(shaper.backlog(0), 0);
    }

    #[test]
    fn test_one_pending_wakeup_per_sender() {
        let mut shaper = TrafficShaper::new(BYTES_PER_SEC, u64::MAX);
        let mut events = EventQueue::new();
        for receiver in 1..=5 {
            shaper.enqueue(&mut events, packet(0, receiver, 10_000));
        }
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_stale_wakeup_is_ignored() {
        let mut shaper = TrafficShaper::new(BYTES_PER_SEC, u64::MAX);
        let mut events = EventQueue::new();
        assert!(shaper.on_wakeup(&mut events, 3).is_none());
        assert_eq!(shaper.stats().stale_wakeups, 1);
    }
}

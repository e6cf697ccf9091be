//! Fan-out Forwarder: per-mount ring buffer and per-subscriber dispatch with
//! slow-consumer policy (spec §4.4).
//!
//! The "per-mount Forwarder state (one mutex per mount)" requirement (spec
//! §5) is modeled as a `dashmap::DashMap` keyed by mount name (grounded on
//! `burakkonte-sinyalist`'s use of `dashmap` for its per-key connection
//! state), where each entry's internals are guarded by their own
//! `parking_lot::Mutex` rather than one mutex for the whole map. The bounded
//! per-subscriber outbox is a small hand-rolled ring (not a channel) because
//! the "drop oldest chunk" policy needs to reach into the queue from the
//! producer side, which a plain `mpsc` sender cannot do.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::dialect::Dialect;
use crate::subscriber::{Subscriber, SubscriberHandle};

pub const DEFAULT_RING_CAPACITY: usize = 60;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 16;
pub const SLOW_EVENT_THRESHOLD: u32 = 32;
pub const SLOW_EVENT_WINDOW: Duration = Duration::from_secs(60);

/// A bounded per-subscriber queue of byte chunks. On overflow the oldest
/// chunk is dropped rather than rejecting the new one (spec §4.4 policy
/// step 1), so the producer-visible push never blocks or fails.
pub struct Outbox {
    capacity: usize,
    queue: Mutex<VecDeque<Arc<[u8]>>>,
    notify: Notify,
    closed: std::sync::atomic::AtomicBool,
}

impl Outbox {
    fn new(capacity: usize) -> Outbox {
        Outbox {
            capacity,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Push a chunk, dropping the oldest queued chunk if already full.
    /// Returns whether a drop occurred.
    fn push(&self, chunk: Arc<[u8]>) -> bool {
        let mut queue = self.queue.lock();
        let dropped = if queue.len() >= self.capacity {
            queue.pop_front();
            true
        } else {
            false
        };
        queue.push_back(chunk);
        drop(queue);
        self.notify.notify_one();
        dropped
    }

    /// Await the next chunk, or `None` once the outbox has been closed and
    /// drained.
    pub async fn recv(&self) -> Option<Arc<[u8]>> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(chunk) = queue.pop_front() {
                    return Some(chunk);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

struct SlowEventTracker {
    events: VecDeque<Instant>,
}

impl SlowEventTracker {
    fn new() -> SlowEventTracker {
        SlowEventTracker { events: VecDeque::new() }
    }

    /// Record a slow-consumer event and return the count still within the
    /// trailing window (spec §4.4 policy step 3, default 32 within 60 s).
    fn record(&mut self) -> u32 {
        let now = Instant::now();
        self.events.push_back(now);
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) > SLOW_EVENT_WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.len() as u32
    }
}

struct SubscriberSlot {
    outbox: Arc<Outbox>,
    handle: Arc<dyn SubscriberHandle>,
    slow_events: SlowEventTracker,
}

struct MountChannel {
    ring: Mutex<VecDeque<(u64, Arc<[u8]>)>>,
    ring_capacity: usize,
    next_seq: AtomicU64,
    subscribers: Mutex<HashMap<u64, SubscriberSlot>>,
    outbox_capacity: usize,
}

impl MountChannel {
    fn new(ring_capacity: usize, outbox_capacity: usize) -> MountChannel {
        MountChannel {
            ring: Mutex::new(VecDeque::new()),
            ring_capacity,
            next_seq: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            outbox_capacity,
        }
    }
}

/// A subscriber evicted by slow-consumer policy, for the caller to force
/// close and log (spec §7 "Slow consumer → unsubscribe + close socket; emit
/// one log line").
pub struct EvictedSubscriber {
    pub subscriber_id: u64,
    pub handle: Arc<dyn SubscriberHandle>,
}

pub struct Forwarder {
    channels: DashMap<String, Arc<MountChannel>>,
    ring_capacity: usize,
    outbox_capacity: usize,
}

impl Forwarder {
    pub fn new(ring_capacity: usize, outbox_capacity: usize) -> Forwarder {
        Forwarder {
            channels: DashMap::new(),
            ring_capacity,
            outbox_capacity,
        }
    }

    fn channel_for(&self, mount: &str) -> Arc<MountChannel> {
        self.channels
            .entry(mount.to_string())
            .or_insert_with(|| Arc::new(MountChannel::new(self.ring_capacity, self.outbox_capacity)))
            .clone()
    }

    /// Append to the ring buffer, bump the per-mount sequence, and attempt a
    /// non-blocking enqueue to every subscriber (spec §4.4 `publish`). The
    /// publisher never blocks on a subscriber's socket; returns subscribers
    /// evicted by slow-consumer policy so the caller can force-close them.
    pub fn publish(&self, mount: &str, bytes: &[u8]) -> Vec<EvictedSubscriber> {
        let channel = self.channel_for(mount);
        let chunk: Arc<[u8]> = Arc::from(bytes);
        let seq = channel.next_seq.fetch_add(1, Ordering::Relaxed);

        {
            let mut ring = channel.ring.lock();
            ring.push_back((seq, chunk.clone()));
            while ring.len() > channel.ring_capacity {
                ring.pop_front();
            }
        }

        let mut evicted = Vec::new();
        let mut subscribers = channel.subscribers.lock();
        let mut to_remove = Vec::new();
        for (id, slot) in subscribers.iter_mut() {
            if slot.outbox.push(chunk.clone()) {
                let slow_count = slot.slow_events.record();
                if slow_count > SLOW_EVENT_THRESHOLD {
                    to_remove.push(*id);
                }
            }
        }
        for id in to_remove {
            if let Some(slot) = subscribers.remove(&id) {
                slot.outbox.close();
                evicted.push(EvictedSubscriber { subscriber_id: id, handle: slot.handle });
            }
        }
        evicted
    }

    /// Register a subscriber; delivery begins at the current tail, no
    /// historical replay (spec §4.4 `subscribe`).
    pub fn subscribe(&self, subscriber: &Subscriber) -> Arc<Outbox> {
        let channel = self.channel_for(&subscriber.mount_name);
        let outbox = Arc::new(Outbox::new(channel.outbox_capacity));
        channel.subscribers.lock().insert(
            subscriber.id,
            SubscriberSlot {
                outbox: outbox.clone(),
                handle: subscriber.handle.clone(),
                slow_events: SlowEventTracker::new(),
            },
        );
        outbox
    }

    pub fn unsubscribe(&self, mount: &str, subscriber_id: u64) {
        if let Some(channel) = self.channels.get(mount) {
            if let Some(slot) = channel.subscribers.lock().remove(&subscriber_id) {
                slot.outbox.close();
            }
        }
    }

    /// Unsubscribe everyone and discard the ring (spec §4.4 `drop_mount`).
    pub fn drop_mount(&self, mount: &str) {
        if let Some((_, channel)) = self.channels.remove(mount) {
            for (_, slot) in channel.subscribers.lock().drain() {
                slot.outbox.close();
                slot.handle.close();
            }
        }
    }

    pub fn subscriber_count(&self, mount: &str) -> usize {
        self.channels
            .get(mount)
            .map(|c| c.subscribers.lock().len())
            .unwrap_or(0)
    }

    /// Subscribe the Inspector as if it were a download consumer, but feed
    /// its bytes into an internal pipe instead of a socket (spec §4.4
    /// `register_subscriber_pipe`), so the parser sees mount traffic through
    /// the same ring-buffer/outbox/eviction path a real subscriber does.
    /// Returns the subscriber id; the pipe task unsubscribes itself once
    /// `write_end` is dropped or the outbox closes.
    pub fn register_subscriber_pipe(self: &Arc<Forwarder>, mount: &str, write_end: mpsc::UnboundedSender<Arc<[u8]>>) -> u64 {
        let pipe_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let subscriber = Subscriber::new(None, mount, pipe_addr, None, Dialect::V10Native, Arc::new(PipeHandle));
        let id = subscriber.id;
        let outbox = self.subscribe(&subscriber);

        let forwarder = self.clone();
        let mount = mount.to_string();
        tokio::spawn(async move {
            while let Some(chunk) = outbox.recv().await {
                if write_end.send(chunk).is_err() {
                    break;
                }
            }
            forwarder.unsubscribe(&mount, id);
        });

        id
    }
}

/// No-op handle for the Inspector's internal pipe subscriber: closing it
/// means dropping the pipe task's receiver, not closing a socket.
struct PipeHandle;

impl SubscriberHandle for PipeHandle {
    fn close(&self) {}
}

impl Default for Forwarder {
    fn default() -> Self {
        Forwarder::new(DEFAULT_RING_CAPACITY, DEFAULT_OUTBOX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct NoopHandle(AtomicBool);
    impl SubscriberHandle for NoopHandle {
        fn close(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn test_subscriber(mount: &str) -> Subscriber {
        Subscriber::new(
            Some("u1".to_string()),
            mount,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1),
            None,
            Dialect::V10Native,
            Arc::new(NoopHandle(AtomicBool::new(false))),
        )
    }

    #[tokio::test]
    async fn subscriber_receives_published_bytes_in_order() {
        let forwarder = Forwarder::default();
        let subscriber = test_subscriber("BASE1");
        let outbox = forwarder.subscribe(&subscriber);

        forwarder.publish("BASE1", &[1, 2, 3]);
        forwarder.publish("BASE1", &[4, 5]);

        assert_eq!(&*outbox.recv().await.unwrap(), &[1, 2, 3]);
        assert_eq!(&*outbox.recv().await.unwrap(), &[4, 5]);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_chunk() {
        let forwarder = Forwarder::new(DEFAULT_RING_CAPACITY, 2);
        let subscriber = test_subscriber("BASE1");
        let outbox = forwarder.subscribe(&subscriber);

        forwarder.publish("BASE1", &[1]);
        forwarder.publish("BASE1", &[2]);
        forwarder.publish("BASE1", &[3]);

        assert_eq!(&*outbox.recv().await.unwrap(), &[2]);
        assert_eq!(&*outbox.recv().await.unwrap(), &[3]);
    }

    #[test]
    fn slow_consumer_evicted_past_threshold() {
        let forwarder = Forwarder::new(DEFAULT_RING_CAPACITY, 1);
        let subscriber = test_subscriber("BASE1");
        let _outbox = forwarder.subscribe(&subscriber);

        let mut evicted = Vec::new();
        for i in 0..(SLOW_EVENT_THRESHOLD + 2) {
            evicted = forwarder.publish("BASE1", &[i as u8]);
        }

        assert_eq!(evicted.len(), 1);
        assert_eq!(forwarder.subscriber_count("BASE1"), 0);
    }

    #[tokio::test]
    async fn subscriber_pipe_receives_published_bytes() {
        let forwarder = Arc::new(Forwarder::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forwarder.register_subscriber_pipe("BASE1", tx);

        forwarder.publish("BASE1", &[9, 9]);

        assert_eq!(&*rx.recv().await.unwrap(), &[9, 9]);
    }

    #[test]
    fn drop_mount_closes_all_subscribers() {
        let forwarder = Forwarder::default();
        let subscriber = test_subscriber("BASE1");
        let handle = subscriber.handle.clone();
        forwarder.subscribe(&subscriber);
        forwarder.drop_mount("BASE1");
        assert_eq!(forwarder.subscriber_count("BASE1"), 0);
        let _ = handle;
    }
}

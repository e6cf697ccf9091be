//! Subscriber: a live download connection (spec §3).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::dialect::Dialect;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle used to force-close a subscriber's socket, mirroring
/// `mount::ProducerHandle`.
pub trait SubscriberHandle: Send + Sync {
    fn close(&self);
}

pub struct Subscriber {
    pub id: u64,
    pub username: Option<String>,
    pub mount_name: String,
    pub peer_address: SocketAddr,
    pub agent: Option<String>,
    pub dialect: Dialect,
    pub connected_at: Instant,
    pub last_send_at: Option<Instant>,
    pub bytes_sent: u64,
    pub handle: Arc<dyn SubscriberHandle>,
}

impl Subscriber {
    pub fn new(
        username: Option<String>,
        mount_name: &str,
        peer_address: SocketAddr,
        agent: Option<String>,
        dialect: Dialect,
        handle: Arc<dyn SubscriberHandle>,
    ) -> Subscriber {
        Subscriber {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            username,
            mount_name: mount_name.to_string(),
            peer_address,
            agent,
            dialect,
            connected_at: Instant::now(),
            last_send_at: None,
            bytes_sent: 0,
            handle,
        }
    }
}

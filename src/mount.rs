//! Mount Registry: the authoritative map of live mounts (spec §4.3).
//!
//! Grounded on `ConnectionManager` in the original's `src/connection.py`
//! (same admit/evict/reconcile shape) and on the
//! `marmikshah-rtsp-rs` `MountRegistry`'s `parking_lot`-guarded
//! `HashMap<String, Arc<_>>` pattern from the retrieval pack, which fits
//! the "single mutex, O(1) lookups, no I/O under lock" requirement of spec
//! §4.3/§5 directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::dialect::Dialect;
use crate::rtcm::inspector::InspectionResult;
use crate::sourcetable::{CasterDefaults, StrRow};

/// Grace delay after a producer socket closes before the mount is actually
/// torn down, to let in-flight ring-buffer chunks drain (spec §3).
pub const REMOVAL_GRACE_DELAY: Duration = Duration::from_millis(1500);

/// Opaque handle used to force-close a producer connection. The concrete
/// implementation (a oneshot sender, a `CancellationToken`, ...) lives with
/// the connection-handling task; the registry only ever calls `close()`.
pub trait ProducerHandle: Send + Sync {
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted,
    Conflict,
}

pub struct Mount {
    pub name: String,
    pub producer_address: SocketAddr,
    pub producer_agent: Option<String>,
    pub dialect: Dialect,
    pub connected_at: Instant,
    pub last_data_at: Option<Instant>,
    pub total_bytes: u64,
    pub data_rate_bps: f64,
    pub inspection: InspectionResult,
    pub str_row: StrRow,
    producer_handle: Arc<dyn ProducerHandle>,
}

impl Mount {
    fn new(
        name: &str,
        producer_address: SocketAddr,
        producer_agent: Option<String>,
        dialect: Dialect,
        producer_handle: Arc<dyn ProducerHandle>,
        caster: &CasterDefaults,
    ) -> Mount {
        Mount {
            name: name.to_string(),
            producer_address,
            producer_agent,
            dialect,
            connected_at: Instant::now(),
            last_data_at: None,
            total_bytes: 0,
            data_rate_bps: 0.0,
            inspection: InspectionResult::default(),
            str_row: StrRow::initial(name, caster),
            producer_handle,
        }
    }
}

/// The authoritative map of live mounts, behind one mutex (spec §4.3, §5
/// "Registry map (one mutex)").
pub struct MountRegistry {
    caster_defaults: CasterDefaults,
    mounts: Mutex<HashMap<String, Mount>>,
    rejected_admits: Mutex<u64>,
}

impl MountRegistry {
    pub fn new(caster_defaults: CasterDefaults) -> MountRegistry {
        MountRegistry {
            caster_defaults,
            mounts: Mutex::new(HashMap::new()),
            rejected_admits: Mutex::new(0),
        }
    }

    /// Admit a producer onto `name` (spec §4.3 `admit`). Evicts and replaces
    /// a stale entry from the *same* address (self-heal, spec §8); rejects
    /// with `Conflict` when a different address holds the name.
    pub fn admit(
        &self,
        name: &str,
        addr: SocketAddr,
        agent: Option<String>,
        dialect: Dialect,
        handle: Arc<dyn ProducerHandle>,
    ) -> AdmitOutcome {
        let mut mounts = self.mounts.lock();

        if let Some(existing) = mounts.get(name) {
            if existing.producer_address != addr {
                drop(mounts);
                *self.rejected_admits.lock() += 1;
                return AdmitOutcome::Conflict;
            }
            existing.producer_handle.close();
        }

        mounts.insert(
            name.to_string(),
            Mount::new(name, addr, agent, dialect, handle, &self.caster_defaults),
        );
        AdmitOutcome::Admitted
    }

    /// Record a chunk of producer bytes (spec §4.3 `mark_data`).
    pub fn mark_data(&self, name: &str, byte_len: usize) {
        let mut mounts = self.mounts.lock();
        if let Some(mount) = mounts.get_mut(name) {
            let now = Instant::now();
            if let Some(last) = mount.last_data_at {
                let elapsed = now.duration_since(last).as_secs_f64();
                if elapsed > 0.0 {
                    mount.data_rate_bps = (byte_len as f64 * 8.0) / elapsed;
                }
            }
            mount.last_data_at = Some(now);
            mount.total_bytes += byte_len as u64;
        }
    }

    /// Rewrite the STR row from an `InspectionResult` (spec §4.3
    /// `apply_inspection`), under the same lock the row is read from.
    pub fn apply_inspection(&self, name: &str, result: InspectionResult) {
        let mut mounts = self.mounts.lock();
        if let Some(mount) = mounts.get_mut(name) {
            mount.str_row.apply_inspection(&result, &self.caster_defaults);
            mount.inspection = result;
        }
    }

    /// Force-close the producer and remove the mount (spec §4.3 `remove`).
    pub fn remove(&self, name: &str) {
        let mut mounts = self.mounts.lock();
        if let Some(mount) = mounts.remove(name) {
            mount.producer_handle.close();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mounts.lock().contains_key(name)
    }

    pub fn str_row(&self, name: &str) -> Option<String> {
        self.mounts.lock().get(name).map(|m| m.str_row.render())
    }

    /// All live mounts' STR rows, in registration order is not guaranteed
    /// (spec §4.6 only requires each row appear exactly once).
    pub fn str_rows(&self) -> Vec<String> {
        self.mounts.lock().values().map(|m| m.str_row.render()).collect()
    }

    pub fn list_names(&self) -> Vec<String> {
        self.mounts.lock().keys().cloned().collect()
    }

    pub fn producer_address(&self, name: &str) -> Option<SocketAddr> {
        self.mounts.lock().get(name).map(|m| m.producer_address)
    }

    /// Evict any mount whose producer address is not present in
    /// `established_peers` (spec §4.3 `reconcile_with_os`, optional).
    pub fn reconcile_with_os(&self, established_peers: &[SocketAddr]) {
        let mut mounts = self.mounts.lock();
        let stale: Vec<String> = mounts
            .iter()
            .filter(|(_, m)| !established_peers.contains(&m.producer_address))
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            if let Some(mount) = mounts.remove(&name) {
                mount.producer_handle.close();
            }
        }
    }

    pub fn rejected_admit_count(&self) -> u64 {
        *self.rejected_admits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestHandle(AtomicBool);
    impl ProducerHandle for TestHandle {
        fn close(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn defaults() -> CasterDefaults {
        CasterDefaults {
            operator: "2RTK".to_string(),
            network: "2RTK".to_string(),
            generator: "2RTK_NtripCaster".to_string(),
            country: "CHN".to_string(),
            latitude: 39.9,
            longitude: 116.4,
            host: "caster.example.com".to_string(),
            port: 2101,
            website: "https://example.com".to_string(),
            contact: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn exclusivity_rejects_different_address() {
        let registry = MountRegistry::new(defaults());
        let h1 = Arc::new(TestHandle(AtomicBool::new(false)));
        let h2 = Arc::new(TestHandle(AtomicBool::new(false)));

        assert_eq!(
            registry.admit("BASE1", addr(1), None, Dialect::V10Native, h1.clone()),
            AdmitOutcome::Admitted
        );
        assert_eq!(
            registry.admit("BASE1", addr(2), None, Dialect::V10Native, h2),
            AdmitOutcome::Conflict
        );
        assert!(!h1.0.load(Ordering::SeqCst));
        assert_eq!(registry.rejected_admit_count(), 1);
    }

    #[test]
    fn self_heal_evicts_same_address() {
        let registry = MountRegistry::new(defaults());
        let h1 = Arc::new(TestHandle(AtomicBool::new(false)));
        let h2 = Arc::new(TestHandle(AtomicBool::new(false)));

        registry.admit("BASE1", addr(1), None, Dialect::V10Native, h1.clone());
        let outcome = registry.admit("BASE1", addr(1), None, Dialect::V10Native, h2);

        assert_eq!(outcome, AdmitOutcome::Admitted);
        assert!(h1.0.load(Ordering::SeqCst));
    }

    #[test]
    fn initial_str_row_has_no_state() {
        let registry = MountRegistry::new(defaults());
        let h1 = Arc::new(TestHandle(AtomicBool::new(false)));
        registry.admit("BASE1", addr(1), None, Dialect::V10Native, h1);
        let row = registry.str_row("BASE1").unwrap();
        assert!(row.ends_with("NO;"));
    }

    #[test]
    fn remove_closes_handle_and_drops_mount() {
        let registry = MountRegistry::new(defaults());
        let h1 = Arc::new(TestHandle(AtomicBool::new(false)));
        registry.admit("BASE1", addr(1), None, Dialect::V10Native, h1.clone());
        registry.remove("BASE1");
        assert!(h1.0.load(Ordering::SeqCst));
        assert!(!registry.contains("BASE1"));
    }

    #[test]
    fn reconcile_evicts_absent_peers() {
        let registry = MountRegistry::new(defaults());
        let h1 = Arc::new(TestHandle(AtomicBool::new(false)));
        registry.admit("BASE1", addr(1), None, Dialect::V10Native, h1.clone());
        registry.reconcile_with_os(&[]);
        assert!(h1.0.load(Ordering::SeqCst));
        assert!(!registry.contains("BASE1"));
    }
}

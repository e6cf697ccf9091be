//! RTSP facade: DESCRIBE/SETUP/PLAY/PAUSE/TEARDOWN/RECORD handshake
//! emulation (spec §4.5 "RTSP shim"). Only the handshake is emulated; full
//! RTSP media session semantics are an explicit non-goal (spec §1).
//!
//! Grounded on `Session`/`SessionManager` in the `marmikshah-rtsp-rs`
//! example from the retrieval pack: an atomic session-id counter formatted
//! as 16 hex digits, a `parking_lot::RwLock`-guarded session map, and a
//! `{id};timeout={secs}` session header value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

const SESSION_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Playing,
    Recording,
    Paused,
}

#[derive(Debug, Clone)]
pub struct RtspSession {
    pub id: String,
    pub mount_name: String,
    pub client_port: Option<String>,
    pub state: SessionState,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn new_session_id() -> String {
    format!("{:016X}", NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Tracks in-flight RTSP handshakes across the facade's verbs. A session is
/// created at SETUP and consulted/mutated by PLAY/PAUSE/RECORD/TEARDOWN.
#[derive(Default)]
pub struct RtspSessionManager {
    sessions: RwLock<HashMap<String, RtspSession>>,
}

impl RtspSessionManager {
    pub fn new() -> RtspSessionManager {
        RtspSessionManager { sessions: RwLock::new(HashMap::new()) }
    }

    pub fn setup(&self, mount_name: &str, client_port: Option<String>) -> RtspSession {
        let session = RtspSession {
            id: new_session_id(),
            mount_name: mount_name.to_string(),
            client_port,
            state: SessionState::Ready,
        };
        self.sessions.write().insert(session.id.clone(), session.clone());
        session
    }

    pub fn transition(&self, session_id: &str, state: SessionState) -> Option<RtspSession> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id)?;
        session.state = state;
        Some(session.clone())
    }

    pub fn teardown(&self, session_id: &str) -> Option<RtspSession> {
        self.sessions.write().remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<RtspSession> {
        self.sessions.read().get(session_id).cloned()
    }
}

/// `Session` header value sent back on SETUP/PLAY/etc: `"{id};timeout={secs}"`.
pub fn session_header_value(session_id: &str) -> String {
    format!("{session_id};timeout={SESSION_TIMEOUT_SECS}")
}

/// Synthetic SDP body for DESCRIBE (spec §4.5: `m=application 0 RTP/AVP 96`,
/// `rtpmap:96 rtcm/1000`). Real media negotiation is out of scope; this is
/// enough for RTSP-style clients to proceed to SETUP.
pub fn describe_sdp(mount_name: &str) -> String {
    format!(
        "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns={mount_name}\r\nt=0 0\r\na=tool:ntrip-caster\r\nm=application 0 RTP/AVP 96\r\na=rtpmap:96 rtcm/1000\r\na=control:{mount_name}\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_then_play_transitions_state() {
        let manager = RtspSessionManager::new();
        let session = manager.setup("BASE1", Some("4000-4001".to_string()));
        assert_eq!(session.state, SessionState::Ready);

        let played = manager.transition(&session.id, SessionState::Playing).unwrap();
        assert_eq!(played.state, SessionState::Playing);
    }

    #[test]
    fn teardown_removes_session() {
        let manager = RtspSessionManager::new();
        let session = manager.setup("BASE1", None);
        manager.teardown(&session.id);
        assert!(manager.get(&session.id).is_none());
    }

    #[test]
    fn session_ids_are_sixteen_hex_digits() {
        let manager = RtspSessionManager::new();
        let session = manager.setup("BASE1", None);
        assert_eq!(session.id.len(), 16);
        assert!(session.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn describe_sdp_references_mount() {
        let sdp = describe_sdp("BASE1");
        assert!(sdp.contains("rtpmap:96 rtcm/1000"));
        assert!(sdp.contains("BASE1"));
    }
}

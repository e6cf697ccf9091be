//! Acceptor & Limiter: TCP listen, bounded accept queue, per-user and
//! global caps (spec §4.7), wired to the Dispatcher for per-connection
//! handling (spec §4.5) and graceful shutdown (spec §5).
//!
//! One task per accepted connection, blocking-I/O-acceptable per mount
//! (spec §5) — grounded on the teacher's own connection loop in
//! `client.rs`, which drives a single socket inside `tokio::select!` against
//! an exit signal; generalized here to one task per accepted socket instead
//! of one client-initiated connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::dialect::Dialect;
use crate::dispatcher::{
    self, auth_challenge_lines, classify, download_preamble, mount_name_from_path,
    normalize_mount_path, options_response, parse_basic_auth, parse_digest_auth, parse_request,
    render_error_response, route, upload_preamble, upload_target, RequestKind,
};
use crate::error::{AuthError, CasterError};
use crate::forwarder::Forwarder;
use crate::mount::{AdmitOutcome, MountRegistry, ProducerHandle};
use crate::rtcm::inspector::{Inspector, InspectorMode};
use crate::rtsp::{describe_sdp, session_header_value, RtspSessionManager, SessionState};
use crate::sanitizer::sanitize_request;
use crate::sourcetable::{render_body, render_response, SourcetableFraming};
use crate::subscriber::{Subscriber, SubscriberHandle};

const REMOVAL_GRACE_DELAY: Duration = Duration::from_millis(1500);

struct AbortOnClose(AbortHandle);

impl ProducerHandle for AbortOnClose {
    fn close(&self) {
        self.0.abort();
    }
}

impl SubscriberHandle for AbortOnClose {
    fn close(&self) {
        self.0.abort();
    }
}

/// Global/per-user connection counters updated atomically on admit/deadmit
/// (spec §4.7).
#[derive(Default)]
struct Counters {
    global_connections: AtomicU64,
    rejected_connections: AtomicU64,
    per_user: DashMap<String, u32>,
}

impl Counters {
    fn try_admit_user(&self, user: &str, max_per_user: u32) -> bool {
        let mut entry = self.per_user.entry(user.to_string()).or_insert(0);
        if *entry >= max_per_user {
            return false;
        }
        *entry += 1;
        true
    }

    fn release_user(&self, user: &str) {
        if let Some(mut entry) = self.per_user.get_mut(user) {
            *entry = entry.saturating_sub(1);
        }
    }
}

pub struct Acceptor {
    config: AppConfig,
    registry: Arc<MountRegistry>,
    forwarder: Arc<Forwarder>,
    credentials: Arc<dyn CredentialStore>,
    rtsp_sessions: RtspSessionManager,
    counters: Counters,
    accept_semaphore: Arc<Semaphore>,
}

impl Acceptor {
    pub fn new(
        config: AppConfig,
        registry: Arc<MountRegistry>,
        forwarder: Arc<Forwarder>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Acceptor {
        let max_connections = config.network.max_connections as usize;
        Acceptor {
            config,
            registry,
            forwarder,
            credentials,
            rtsp_sessions: RtspSessionManager::new(),
            counters: Counters::default(),
            accept_semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Bind the listening socket and serve connections until `shutdown`
    /// fires (spec §5 "graceful shutdown closes the accept socket...").
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.network.host, self.config.ntrip.port).parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let listener = TcpListener::bind(addr).await?;
        configure_listen_socket(&listener, &self.config)?;
        info!(%addr, "ntrip caster listening");
        self.serve(listener, shutdown).await
    }

    /// Serve connections on an already-bound listener (split out from
    /// `run` so tests can bind an ephemeral port and learn its address
    /// before serving).
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutting down acceptor");
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => { warn!(error = %e, "accept failed"); continue; }
                    };

                    let permit = match self.accept_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.counters.rejected_connections.fetch_add(1, Ordering::Relaxed);
                            debug!(%peer_addr, "accept queue full, rejecting");
                            drop(stream);
                            continue;
                        }
                    };

                    if let Err(e) = configure_accepted_socket(&stream, &self.config) {
                        debug!(error = %e, "failed to tune accepted socket");
                    }

                    let this = self.clone();
                    self.counters.global_connections.fetch_add(1, Ordering::Relaxed);
                    let (abort_tx, abort_rx) = tokio::sync::oneshot::channel();
                    let join_handle = tokio::spawn(async move {
                        let _permit = permit;
                        let abort_handle = match abort_rx.await {
                            Ok(h) => h,
                            Err(_) => return,
                        };
                        if let Err(e) = this.clone().handle_connection(stream, peer_addr, abort_handle).await {
                            debug!(%peer_addr, error = %e, "connection ended with error");
                        }
                        this.counters.global_connections.fetch_sub(1, Ordering::Relaxed);
                    });
                    let _ = abort_tx.send(join_handle.abort_handle());
                }
            }
        }

        Ok(())
    }

    pub fn rejected_connection_count(&self) -> u64 {
        self.counters.rejected_connections.load(Ordering::Relaxed)
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr, abort_handle: AbortHandle) -> Result<(), CasterError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let lines = read_request_head(&mut reader, self.config.tcp.socket_timeout).await?;
        let sanitized = sanitize_request(&lines);
        debug!(%peer_addr, request = ?sanitized, "received request head");

        let parsed = match parse_request(&lines) {
            Ok(p) => p,
            Err(e) => {
                let _ = write_half.write_all(render_error_response(Dialect::V10Http, &e).as_bytes()).await;
                return Err(e);
            }
        };

        let dialect = classify(&parsed);
        let kind = match route(&parsed, dialect) {
            Ok(k) => k,
            Err(e) => {
                let _ = write_half.write_all(render_error_response(dialect, &e).as_bytes()).await;
                return Err(e);
            }
        };

        let result = match kind {
            RequestKind::Sourcetable => self.handle_sourcetable(&mut write_half, dialect).await,
            RequestKind::Options => {
                write_half.write_all(options_response().as_bytes()).await.map_err(CasterError::from)
            }
            RequestKind::Upload => {
                self.handle_upload(reader, &mut write_half, &parsed, dialect, peer_addr, abort_handle.clone()).await
            }
            RequestKind::Download => {
                self.handle_download(&mut reader, &mut write_half, &parsed, dialect, peer_addr, abort_handle.clone()).await
            }
            RequestKind::RtspDescribe => self.handle_rtsp_describe(&mut write_half, &parsed).await,
            RequestKind::RtspSetup => self.handle_rtsp_setup(&mut write_half, &parsed).await,
            RequestKind::RtspPlay | RequestKind::RtspRecord | RequestKind::RtspPause | RequestKind::RtspTeardown => {
                self.handle_rtsp_transition(&mut write_half, &parsed, kind).await
            }
        };

        if let Err(ref e) = result {
            let _ = write_half.write_all(render_error_response(dialect, e).as_bytes()).await;
        }
        result
    }

    async fn handle_sourcetable(&self, write_half: &mut (impl AsyncWriteExt + Unpin), dialect: Dialect) -> Result<(), CasterError> {
        let defaults = self.config.caster_defaults(&self.config.network.host);
        let rows = self.registry.str_rows();
        let body = render_body(&defaults, &rows);
        let framing = match dialect {
            Dialect::V20 | Dialect::V10Http => SourcetableFraming::V20,
            _ => SourcetableFraming::V10,
        };
        let response = render_response(framing, &body);
        write_half.write_all(response.as_bytes()).await?;
        Ok(())
    }

    async fn handle_upload(
        &self,
        mut reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        write_half: &mut tokio::net::tcp::OwnedWriteHalf,
        request: &dispatcher::ParsedRequest,
        dialect: Dialect,
        peer_addr: SocketAddr,
        abort_handle: AbortHandle,
    ) -> Result<(), CasterError> {
        let (raw_mount_path, inline_password) = upload_target(&request.request_line);
        let path = normalize_mount_path(&raw_mount_path);
        let mount_name = mount_name_from_path(&path)
            .ok_or_else(|| CasterError::BadRequest("missing mount name".to_string()))?;

        let basic_auth = request.headers.get("Authorization").and_then(parse_basic_auth);

        // V2.0 uploads authenticate as a user (username/password + mount
        // ownership), never via an inline mount password; every other
        // dialect authenticates via the mount's own shared secret, taken
        // from the request line or an Authorization header (spec §4.1).
        let (mount_password, supplied_user, supplied_user_password) = if dialect == Dialect::V20 {
            match &basic_auth {
                Some((user, pass)) => (String::new(), Some(user.as_str()), Some(pass.as_str())),
                None => {
                    let nonce = crate::digest::generate_nonce();
                    for line in auth_challenge_lines(&nonce) {
                        write_half.write_all(format!("{line}\r\n").as_bytes()).await?;
                    }
                    return Err(CasterError::Unauthorized);
                }
            }
        } else {
            match inline_password.or_else(|| basic_auth.as_ref().map(|(_, p)| p.clone())) {
                Some(password) => (password, None, None),
                None => {
                    let nonce = crate::digest::generate_nonce();
                    for line in auth_challenge_lines(&nonce) {
                        write_half.write_all(format!("{line}\r\n").as_bytes()).await?;
                    }
                    return Err(CasterError::Unauthorized);
                }
            }
        };

        self.credentials
            .verify_mount_producer(&mount_name, dialect, &mount_password, supplied_user, supplied_user_password)
            .map_err(CasterError::from)?;

        let handle: Arc<dyn ProducerHandle> = Arc::new(AbortOnClose(abort_handle));

        match self.registry.admit(&mount_name, peer_addr, None, dialect, handle) {
            AdmitOutcome::Conflict => return Err(CasterError::Conflict(mount_name)),
            AdmitOutcome::Admitted => {}
        }

        write_half.write_all(upload_preamble(dialect).as_bytes()).await?;

        let (pipe_tx, mut pipe_rx) = tokio::sync::mpsc::unbounded_channel::<Arc<[u8]>>();
        self.forwarder.register_subscriber_pipe(&mount_name, pipe_tx);
        let inspection_registry = self.registry.clone();
        let inspection_mount = mount_name.clone();
        let parse_duration = Duration::from_secs(self.config.rtcm.parse_duration);
        tokio::spawn(async move {
            let mut inspector = Inspector::new(InspectorMode::StrFix { duration: parse_duration });
            while !inspector.expired() {
                match pipe_rx.recv().await {
                    Some(chunk) => {
                        inspector.feed(&chunk);
                        inspection_registry.apply_inspection(&inspection_mount, inspector.result());
                    }
                    None => break,
                }
            }
        });

        let mut buf = vec![0u8; self.config.network.buffer_size];
        loop {
            let read_result = tokio::time::timeout(
                Duration::from_secs(self.config.tcp.socket_timeout),
                reader.read(&mut buf),
            )
            .await;

            let n = match read_result {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => n,
                Ok(Err(_)) => break,
            };

            self.forwarder.publish(&mount_name, &buf[..n]);
            self.registry.mark_data(&mount_name, n);
        }

        let registry = self.registry.clone();
        let forwarder = self.forwarder.clone();
        let mount_name_for_grace = mount_name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REMOVAL_GRACE_DELAY).await;
            forwarder.drop_mount(&mount_name_for_grace);
            registry.remove(&mount_name_for_grace);
        });

        Ok(())
    }

    async fn handle_download(
        &self,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        write_half: &mut tokio::net::tcp::OwnedWriteHalf,
        request: &dispatcher::ParsedRequest,
        dialect: Dialect,
        peer_addr: SocketAddr,
        abort_handle: AbortHandle,
    ) -> Result<(), CasterError> {
        let path = normalize_mount_path(&request.request_line.path);
        let mount_name = mount_name_from_path(&path)
            .ok_or_else(|| CasterError::BadRequest("missing mount name".to_string()))?;

        let user = match request.headers.get("Authorization") {
            Some(h) if h.starts_with("Basic ") => {
                let (user, password) = parse_basic_auth(h).ok_or(CasterError::from(AuthError::BadUserPassword))?;
                self.credentials.verify_consumer(&mount_name, &user, &password).map_err(CasterError::from)?;
                user
            }
            Some(h) if h.starts_with("Digest ") => {
                let params = parse_digest_auth(h).ok_or(CasterError::from(AuthError::BadUserPassword))?;
                self.credentials
                    .verify_consumer_digest(&mount_name, &params, "GET")
                    .map_err(CasterError::from)?;
                params.username.clone()
            }
            _ => {
                let nonce = crate::digest::generate_nonce();
                for line in auth_challenge_lines(&nonce) {
                    write_half.write_all(format!("{line}\r\n").as_bytes()).await?;
                }
                return Err(CasterError::Unauthorized);
            }
        };

        if !self.registry.contains(&mount_name) {
            return Err(CasterError::NotFound(mount_name));
        }

        if !self.counters.try_admit_user(&user, self.config.ntrip.max_connections_per_user) {
            return Err(CasterError::Forbidden("per-user connection limit exceeded".to_string()));
        }

        let handle: Arc<dyn SubscriberHandle> = Arc::new(AbortOnClose(abort_handle));
        let subscriber = Subscriber::new(Some(user.clone()), &mount_name, peer_addr, None, dialect, handle);
        let outbox = self.forwarder.subscribe(&subscriber);

        write_half.write_all(download_preamble(dialect).as_bytes()).await?;

        let mut probe = [0u8; 1];
        loop {
            tokio::select! {
                chunk = outbox.recv() => {
                    match chunk {
                        Some(bytes) => {
                            if write_half.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                read_result = reader.read(&mut probe) => {
                    match read_result {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
            }
        }

        self.forwarder.unsubscribe(&mount_name, subscriber.id);
        self.counters.release_user(&user);
        Ok(())
    }

    async fn handle_rtsp_describe(&self, write_half: &mut (impl AsyncWriteExt + Unpin), request: &dispatcher::ParsedRequest) -> Result<(), CasterError> {
        let mount_name = mount_name_from_path(&normalize_mount_path(&request.request_line.path))
            .ok_or_else(|| CasterError::BadRequest("missing mount name".to_string()))?;
        let sdp = describe_sdp(&mount_name);
        let response = format!(
            "RTSP/1.0 200 OK\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
            sdp.len(),
            sdp
        );
        write_half.write_all(response.as_bytes()).await?;
        Ok(())
    }

    async fn handle_rtsp_setup(&self, write_half: &mut (impl AsyncWriteExt + Unpin), request: &dispatcher::ParsedRequest) -> Result<(), CasterError> {
        let mount_name = mount_name_from_path(&normalize_mount_path(&request.request_line.path))
            .ok_or_else(|| CasterError::BadRequest("missing mount name".to_string()))?;
        let client_port = request
            .headers
            .get("Transport")
            .and_then(|t| t.split(';').find_map(|p| p.strip_prefix("client_port=")))
            .map(str::to_string);
        let session = self.rtsp_sessions.setup(&mount_name, client_port.clone());
        let response = format!(
            "RTSP/1.0 200 OK\r\nSession: {}\r\nTransport: RTP/AVP;unicast;client_port={}\r\n\r\n",
            session_header_value(&session.id),
            client_port.unwrap_or_default(),
        );
        write_half.write_all(response.as_bytes()).await?;
        Ok(())
    }

    async fn handle_rtsp_transition(
        &self,
        write_half: &mut (impl AsyncWriteExt + Unpin),
        request: &dispatcher::ParsedRequest,
        kind: RequestKind,
    ) -> Result<(), CasterError> {
        let session_id = request.headers.get("Session").map(|s| s.split(';').next().unwrap_or(s).to_string());

        if kind == RequestKind::RtspTeardown {
            if let Some(id) = &session_id {
                self.rtsp_sessions.teardown(id);
            }
            write_half.write_all(b"RTSP/1.0 200 OK\r\n\r\n").await?;
            return Ok(());
        }

        let state = match kind {
            RequestKind::RtspPlay | RequestKind::RtspRecord => SessionState::Playing,
            RequestKind::RtspPause => SessionState::Paused,
            _ => unreachable!(),
        };

        if let Some(id) = &session_id {
            self.rtsp_sessions.transition(id, state);
        }
        write_half.write_all(b"RTSP/1.0 200 OK\r\n\r\n").await?;
        Ok(())
    }
}

/// Read the request head (request line + headers) up to the first blank
/// line, bounded at `MAX_HEADER_BYTES` (spec §4.5 "total header bytes ≤ 8
/// KiB; body not read before authorization").
async fn read_request_head(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    timeout_secs: u64,
) -> Result<Vec<String>, CasterError> {
    use tokio::io::AsyncBufReadExt;

    let mut lines = Vec::new();
    let mut total_bytes = 0usize;
    loop {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(timeout_secs), reader.read_line(&mut line))
            .await
            .map_err(|_| CasterError::BadRequest("header read timed out".to_string()))?
            .map_err(CasterError::from)?;

        if read == 0 {
            break;
        }

        total_bytes += read;
        if total_bytes > dispatcher::MAX_HEADER_BYTES {
            return Err(CasterError::BadRequest("header block too large".to_string()));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        if trimmed.is_empty() {
            break;
        }
        lines.push(trimmed);
    }
    Ok(lines)
}

fn configure_listen_socket(listener: &TcpListener, _config: &AppConfig) -> std::io::Result<()> {
    let sock_ref = SockRef::from(listener);
    sock_ref.set_reuse_address(true)?;
    Ok(())
}

fn configure_accepted_socket(stream: &TcpStream, config: &AppConfig) -> std::io::Result<()> {
    if !config.tcp.keepalive_enabled {
        return Ok(());
    }
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(config.tcp.keepalive_idle))
        .with_interval(Duration::from_secs(config.tcp.keepalive_interval));
    #[cfg(not(target_os = "windows"))]
    let keepalive = keepalive.with_retries(config.tcp.keepalive_count);
    sock_ref.set_tcp_keepalive(&keepalive)
}

/// Read-only connection statistics (spec §11 "Performance/connection
/// statistics surface").
pub struct AcceptorStats {
    pub global_connections: u64,
    pub rejected_connections: u64,
    pub per_user: HashMap<String, u32>,
}

impl Acceptor {
    pub fn stats(&self) -> AcceptorStats {
        AcceptorStats {
            global_connections: self.counters.global_connections.load(Ordering::Relaxed),
            rejected_connections: self.counters.rejected_connections.load(Ordering::Relaxed),
            per_user: self.counters.per_user.iter().map(|e| (e.key().clone(), *e.value())).collect(),
        }
    }
}


//! DCC Manager (spec.md §4.12): registry of transfers keyed by UUID,
//! offer negotiation over CTCP, listener port allocation, scheduled
//! cleanup, event emission.
//!
//! Grounded on `original_source/dcc_manager.py`'s `DCCManager`. Its
//! passive/reverse-mode handling is a stub there ("Potentially find
//! matching SEND transfer... " with no implementation); this module
//! completes it — see the passive-mode notes below and the matching
//! entry in DESIGN.md.

use std::fs;
use std::net::{Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use log::{info, warn};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::config::ConfigSnapshot;
use crate::connection::ConnectionHandle;
use crate::dcc::protocol::{self, DccRequest};
use crate::dcc::security::{self, OsTarget};
use crate::dcc::transfer::{self, ChecksumState, DccDirection, DccTransfer, TransferSnapshot};
use crate::errors::{DccSecurityError, DccTransferError};
use crate::events::Event;
use crate::message::OutboundMessage;

/// Outcome of one file in an `initiate_send` call, per spec.md §4.12.
#[derive(Debug, Clone)]
pub enum InitiateOutcome {
    Started { id: Uuid, token: Option<String> },
    Queued { id: Uuid, token: String },
    Error { filename: String, error: String },
}

struct IncomingPassiveOffer {
    nick: String,
    userhost: String,
    filename: String,
    size: u64,
}

/// Owns the transfer registry and the sockets each transfer dials or
/// listens on, independent of the IRC Network Transport (spec.md §3's
/// ownership rule). Holds a [`ConnectionHandle`] purely as the capability
/// to relay CTCP replies (offers, ACCEPTs, post-transfer checksums) back
/// over the IRC connection — the same narrow-handle pattern the CAP/SASL/
/// Registration coordinators use.
pub struct DccManager {
    config: ConfigSnapshot,
    connection: ConnectionHandle,
    events: Arc<crate::events::EventBus>,
    transfers: DashMap<Uuid, Arc<DccTransfer>>,
    /// Our own outbound passive (reverse) SEND offers, keyed by the token
    /// we minted, awaiting the peer's `DCC ACCEPT` naming their port.
    pending_passive_sends: DashMap<String, Arc<DccTransfer>>,
    /// Passive SEND offers a peer made to us, keyed by their token,
    /// awaiting the user to `accept_passive_offer_by_token`.
    pending_incoming_offers: DashMap<String, IncomingPassiveOffer>,
}

impl DccManager {
    pub fn new(config: ConfigSnapshot, connection: ConnectionHandle, events: Arc<crate::events::EventBus>) -> Self {
        DccManager {
            config,
            connection,
            events,
            transfers: DashMap::new(),
            pending_passive_sends: DashMap::new(),
            pending_incoming_offers: DashMap::new(),
        }
    }

    fn dcc_config(&self) -> crate::config::DccConfig {
        self.config.current().dcc.clone()
    }

    fn bandwidth_bps(kbps: u64) -> u64 {
        kbps * 1024
    }

    fn checksum_algorithm(&self) -> Option<String> {
        let cfg = self.dcc_config();
        cfg.checksum_verify.then_some(cfg.checksum_algorithm)
    }

    /// `initiate_send(peer, filepaths, passive?)` (spec.md §4.12): one
    /// outcome per requested file. A file-level failure (missing file,
    /// oversize, no free port) doesn't abort the rest of the batch.
    pub async fn initiate_send(&self, peer_nick: &str, filepaths: &[PathBuf], passive: bool) -> Vec<InitiateOutcome> {
        let cfg = self.dcc_config();
        if !cfg.enabled {
            return filepaths
                .iter()
                .map(|p| InitiateOutcome::Error {
                    filename: p.display().to_string(),
                    error: "DCC is disabled".to_string(),
                })
                .collect();
        }

        let mut outcomes = Vec::with_capacity(filepaths.len());
        for path in filepaths {
            outcomes.push(self.initiate_one_send(peer_nick, path, passive, &cfg).await);
        }
        outcomes
    }

    async fn initiate_one_send(
        &self,
        peer_nick: &str,
        path: &Path,
        passive: bool,
        cfg: &crate::config::DccConfig,
    ) -> InitiateOutcome {
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let metadata = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return InitiateOutcome::Error { filename, error: "not a regular file".to_string() };
            }
            Err(e) => return InitiateOutcome::Error { filename, error: format!("cannot read file: {e}") },
        };
        let size = metadata.len();
        if size > cfg.max_file_size {
            return InitiateOutcome::Error {
                filename,
                error: format!("file exceeds configured maximum of {} bytes", cfg.max_file_size),
            };
        }

        let bandwidth = Self::bandwidth_bps(cfg.bandwidth_limit_send_kbps);
        let checksum_algorithm = self.checksum_algorithm();

        if passive {
            let token = Uuid::new_v4().simple().to_string();
            let transfer = Arc::new(DccTransfer::new(
                DccDirection::Send,
                peer_nick.to_string(),
                filename.clone(),
                path.to_path_buf(),
                size,
                bandwidth,
                0,
                Some(token.clone()),
                None,
                None,
            ));
            let ip = determine_advertised_ip(cfg.advertised_ip.as_deref());
            let ctcp = match protocol::format_dcc_send_ctcp(&filename, ip, 0, size, Some(&token)) {
                Ok(ctcp) => ctcp,
                Err(e) => return InitiateOutcome::Error { filename, error: e.to_string() },
            };
            self.connection.send(ctcp_privmsg(peer_nick, &ctcp));
            self.transfers.insert(transfer.id, transfer.clone());
            self.pending_passive_sends.insert(token.clone(), transfer.clone());
            self.connection.emit(Event::DccTransferQueued { id: transfer.id.to_string() });
            info!("dcc: queued passive SEND of '{filename}' to {peer_nick}, awaiting ACCEPT");
            return InitiateOutcome::Queued { id: transfer.id, token };
        }

        let (listener, port) = match bind_listener(cfg.port_range_start, cfg.port_range_end).await {
            Ok(bound) => bound,
            Err(e) => return InitiateOutcome::Error { filename, error: format!("could not bind listener: {e}") },
        };
        let ip = determine_advertised_ip(cfg.advertised_ip.as_deref());
        let transfer = Arc::new(DccTransfer::new(
            DccDirection::Send,
            peer_nick.to_string(),
            filename.clone(),
            path.to_path_buf(),
            size,
            bandwidth,
            0,
            None,
            None,
            None,
        ));
        let ctcp = match protocol::format_dcc_send_ctcp(&filename, ip, port, size, None) {
            Ok(ctcp) => ctcp,
            Err(e) => return InitiateOutcome::Error { filename, error: e.to_string() },
        };
        self.connection.send(ctcp_privmsg(peer_nick, &ctcp));
        self.transfers.insert(transfer.id, transfer.clone());
        self.connection.emit(Event::DccTransferQueued { id: transfer.id.to_string() });

        let accept_timeout = std::time::Duration::from_secs(cfg.timeout);
        let chunk_timeout = std::time::Duration::from_secs(30);
        let events = self.events.clone();
        let connection = self.connection.clone();
        let transfer_for_task = transfer.clone();
        tokio::spawn(async move {
            let result = transfer::run_send_active(
                &transfer_for_task,
                listener,
                &events,
                accept_timeout,
                chunk_timeout,
                checksum_algorithm.as_deref(),
            )
            .await;
            finish_send_task(&connection, &transfer_for_task, result);
        });

        InitiateOutcome::Started { id: transfer.id, token: None }
    }

    /// `handle_incoming_ctcp(source, payload)` (spec.md §4.12). `nick`/
    /// `userhost` come straight from the `PRIVMSG`/`NOTICE` prefix that
    /// carried the CTCP `DCC` tag.
    pub async fn handle_incoming_ctcp(&self, nick: &str, userhost: &str, payload: &str) {
        let cfg = self.dcc_config();
        if !cfg.enabled {
            info!("dcc: DCC disabled, ignoring incoming DCC CTCP from {nick}");
            return;
        }

        let parsed = match protocol::parse_dcc_ctcp(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("dcc: could not parse DCC CTCP from {nick}: {e}");
                return;
            }
        };

        match parsed {
            DccRequest::Send { filename, ip, port, size, token } => {
                self.connection.emit(Event::DccSendOfferIncoming {
                    peer: nick.to_string(),
                    filename: filename.clone(),
                    ip: ip.to_string(),
                    port,
                    size,
                });

                if port == 0 {
                    let Some(token) = token else {
                        warn!("dcc: passive SEND offer from {nick} carried no token, ignoring");
                        return;
                    };
                    let auto_accept = cfg.auto_accept;
                    self.pending_incoming_offers.insert(
                        token.clone(),
                        IncomingPassiveOffer { nick: nick.to_string(), userhost: userhost.to_string(), filename, size },
                    );
                    if auto_accept {
                        self.accept_passive_offer_by_token(nick, &token).await;
                    }
                } else if cfg.auto_accept {
                    if let Err(e) = self.accept_incoming_send_offer(nick, &filename, ip, port, size).await {
                        warn!("dcc: auto-accept of '{filename}' from {nick} rejected: {e}");
                    }
                }
            }
            DccRequest::Accept { filename, port, position, token } => {
                self.handle_passive_send_accept(nick, userhost, &filename, port, position, token).await;
            }
            DccRequest::Resume { filename, port, position, .. } => {
                info!("dcc: received DCC RESUME from {nick} for '{filename}' at {port}/{position}; unsolicited RESUME is not honored by this client");
            }
        }
    }

    async fn handle_passive_send_accept(
        &self,
        nick: &str,
        userhost: &str,
        filename: &str,
        port: u16,
        position: u64,
        token: Option<String>,
    ) {
        let transfer = match &token {
            Some(token) => self.pending_passive_sends.remove(token).map(|(_, t)| t),
            None => {
                // No token: fall back to matching by peer nick + filename
                // among our own pending passive sends (best-effort, since
                // the wire format doesn't guarantee a token round-trips).
                let found = self
                    .pending_passive_sends
                    .iter()
                    .find(|entry| entry.value().peer_nick == nick && entry.value().filename == filename)
                    .map(|entry| entry.key().clone());
                match found {
                    Some(key) => self.pending_passive_sends.remove(&key).map(|(_, t)| t),
                    None => None,
                }
            }
        };
        let Some(transfer) = transfer else {
            info!("dcc: DCC ACCEPT from {nick} for '{filename}' does not match any pending passive SEND");
            return;
        };

        let host = userhost.rsplit('@').next().unwrap_or(userhost);
        let Some(ip) = resolve_ipv4(host).await else {
            warn!("dcc: could not resolve peer address '{host}' for passive SEND ACCEPT from {nick}");
            self.connection.emit(Event::DccTransferError {
                id: transfer.id.to_string(),
                reason: format!("could not resolve peer address '{host}'"),
            });
            return;
        };

        let _ = position; // the sender streams from its own resume_offset, already 0 for a fresh passive SEND
        let chunk_timeout = std::time::Duration::from_secs(30);
        let checksum_algorithm = self.checksum_algorithm();
        let events = self.events.clone();
        let connection = self.connection.clone();
        tokio::spawn(async move {
            let result =
                transfer::run_send_passive(&transfer, ip, port, &events, chunk_timeout, checksum_algorithm.as_deref())
                    .await;
            finish_send_task(&connection, &transfer, result);
        });
    }

    /// `accept_incoming_send_offer(nick, filename, ip, port, size)`
    /// (spec.md §4.12): user accepted a normal (active) SEND offer; we
    /// connect out to the sender.
    pub async fn accept_incoming_send_offer(
        &self,
        peer_nick: &str,
        filename: &str,
        ip: Ipv4Addr,
        port: u16,
        size: u64,
    ) -> Result<Uuid, DccSecurityError> {
        let cfg = self.dcc_config();
        if !cfg.enabled {
            return Err(DccSecurityError::DirectoryUnavailable("DCC is disabled".to_string()));
        }
        let validated = security::validate_download_path(
            filename,
            Path::new(&cfg.download_dir),
            &cfg.blocked_extensions,
            cfg.max_file_size,
            size,
            host_os_target(),
        )?;

        let transfer = Arc::new(DccTransfer::new(
            DccDirection::Receive,
            peer_nick.to_string(),
            filename.to_string(),
            validated.absolute_path,
            size,
            Self::bandwidth_bps(cfg.bandwidth_limit_recv_kbps),
            0,
            None,
            None,
            Some((ip, port)),
        ));
        self.transfers.insert(transfer.id, transfer.clone());
        self.connection.emit(Event::DccTransferQueued { id: transfer.id.to_string() });

        let chunk_timeout = std::time::Duration::from_secs(30);
        let checksum_algorithm = if cfg.checksum_verify { Some(cfg.checksum_algorithm.clone()) } else { None };
        let events = self.events.clone();
        let connection = self.connection.clone();
        let transfer_for_task = transfer.clone();
        tokio::spawn(async move {
            let result = transfer::run_receive_active(
                &transfer_for_task,
                ip,
                port,
                &events,
                chunk_timeout,
                checksum_algorithm.as_deref(),
            )
            .await;
            finish_receive_task(&connection, &transfer_for_task, result);
        });

        Ok(transfer.id)
    }

    /// `accept_passive_offer_by_token(nick, filename, token)` (spec.md
    /// §4.12): a peer's reverse-SEND offer; we listen and reply with our
    /// own `DCC ACCEPT` naming the port.
    pub async fn accept_passive_offer_by_token(&self, peer_nick: &str, token: &str) -> Option<Uuid> {
        let cfg = self.dcc_config();
        let Some((_, offer)) = self.pending_incoming_offers.remove(token) else {
            warn!("dcc: no pending passive offer for token {token} from {peer_nick}");
            return None;
        };
        if !cfg.enabled {
            warn!("dcc: DCC disabled, cannot accept passive offer from {peer_nick}");
            return None;
        }

        let validated = match security::validate_download_path(
            &offer.filename,
            Path::new(&cfg.download_dir),
            &cfg.blocked_extensions,
            cfg.max_file_size,
            offer.size,
            host_os_target(),
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!("dcc: rejected passive offer '{}' from {peer_nick}: {e}", offer.filename);
                return None;
            }
        };

        let (listener, port) = match bind_listener(cfg.port_range_start, cfg.port_range_end).await {
            Ok(bound) => bound,
            Err(e) => {
                warn!("dcc: could not bind listener for passive receive: {e}");
                return None;
            }
        };

        let transfer = Arc::new(DccTransfer::new(
            DccDirection::Receive,
            offer.nick.clone(),
            offer.filename.clone(),
            validated.absolute_path,
            offer.size,
            Self::bandwidth_bps(cfg.bandwidth_limit_recv_kbps),
            0,
            Some(token.to_string()),
            None,
            None,
        ));

        let reply = match protocol::format_dcc_accept_ctcp(&offer.filename, port, 0, Some(token)) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("dcc: could not format DCC ACCEPT reply: {e}");
                return None;
            }
        };
        self.connection.send(ctcp_privmsg(&offer.nick, &reply));
        self.transfers.insert(transfer.id, transfer.clone());
        self.connection.emit(Event::DccTransferQueued { id: transfer.id.to_string() });

        let accept_timeout = std::time::Duration::from_secs(cfg.passive_token_timeout);
        let chunk_timeout = std::time::Duration::from_secs(30);
        let checksum_algorithm = if cfg.checksum_verify { Some(cfg.checksum_algorithm.clone()) } else { None };
        let events = self.events.clone();
        let connection = self.connection.clone();
        let transfer_for_task = transfer.clone();
        let _ = offer.userhost;
        tokio::spawn(async move {
            let result = transfer::run_receive_passive(
                &transfer_for_task,
                listener,
                &events,
                accept_timeout,
                chunk_timeout,
                checksum_algorithm.as_deref(),
            )
            .await;
            finish_receive_task(&connection, &transfer_for_task, result);
        });

        Some(transfer.id)
    }

    /// `attempt_user_resume(identifier)` (spec.md §4.12): locate a
    /// failed/cancelled/timed-out receive by id prefix or filename and
    /// restart it, trusting the on-disk partial file's size as the resume
    /// offset (the documented caveat: "valid only if no other process
    /// writes the file" — see DESIGN.md).
    pub async fn attempt_user_resume(&self, identifier: &str) -> Result<Uuid, DccTransferError> {
        let found = self
            .transfers
            .iter()
            .find(|entry| {
                let snap = entry.value().snapshot();
                snap.status.is_terminal()
                    && snap.direction == DccDirection::Receive
                    && (entry.key().to_string().starts_with(identifier) || snap.filename == identifier)
            })
            .map(|entry| entry.value().clone());

        let previous = found.ok_or_else(|| DccTransferError::NotFound(identifier.to_string()))?;
        let Some((ip, port)) = previous.peer_addr else {
            return Err(DccTransferError::Protocol("no recorded peer address to resume from".to_string()));
        };

        let local_size = fs::metadata(&previous.local_path).map(|m| m.len()).unwrap_or(0);
        if local_size >= previous.size {
            return Err(DccTransferError::Protocol("local file is already complete".to_string()));
        }

        let cfg = self.dcc_config();
        let transfer = Arc::new(DccTransfer::new(
            DccDirection::Receive,
            previous.peer_nick.clone(),
            previous.filename.clone(),
            previous.local_path.clone(),
            previous.size,
            previous.bandwidth_limit_bps,
            local_size,
            None,
            None,
            Some((ip, port)),
        ));
        self.transfers.insert(transfer.id, transfer.clone());
        self.connection.emit(Event::DccTransferQueued { id: transfer.id.to_string() });

        let chunk_timeout = std::time::Duration::from_secs(30);
        let checksum_algorithm = if cfg.checksum_verify { Some(cfg.checksum_algorithm) } else { None };
        let events = self.events.clone();
        let connection = self.connection.clone();
        let transfer_for_task = transfer.clone();
        tokio::spawn(async move {
            let result = transfer::run_receive_active(
                &transfer_for_task,
                ip,
                port,
                &events,
                chunk_timeout,
                checksum_algorithm.as_deref(),
            )
            .await;
            finish_receive_task(&connection, &transfer_for_task, result);
        });

        Ok(transfer.id)
    }

    /// `cancel_transfer(id)` (spec.md §4.12): signals the worker via its
    /// cancellation token; the worker itself transitions to `Cancelled`
    /// and emits the event once its current I/O operation unblocks.
    pub fn cancel_transfer(&self, id: &str) -> bool {
        let key = Uuid::parse_str(id)
            .ok()
            .filter(|uuid| self.transfers.contains_key(uuid))
            .or_else(|| self.transfers.iter().find(|e| e.key().to_string().starts_with(id)).map(|e| *e.key()));
        match key.and_then(|key| self.transfers.get(&key)) {
            Some(transfer) => {
                transfer.request_cancel();
                true
            }
            None => false,
        }
    }

    /// `get_transfer_statuses()` (spec.md §4.12).
    pub fn get_transfer_statuses(&self) -> Vec<TransferSnapshot> {
        self.transfers.iter().map(|entry| entry.value().snapshot()).collect()
    }

    /// Removes terminal transfers older than `transfer_max_age_seconds`.
    /// Intended to be driven by [`spawn_cleanup_task`]'s interval.
    pub fn cleanup_old_transfers(&self) {
        let cfg = self.dcc_config();
        if !cfg.cleanup_enabled {
            return;
        }
        let now = now_unix();
        let stale: Vec<Uuid> = self
            .transfers
            .iter()
            .filter_map(|entry| {
                let snap = entry.value().snapshot();
                let ended = snap.ended_at?;
                if snap.status.is_terminal() && now - ended > cfg.transfer_max_age_seconds as i64 {
                    Some(*entry.key())
                } else {
                    None
                }
            })
            .collect();
        for id in stale {
            self.transfers.remove(&id);
        }
        if !self.transfers.is_empty() {
            debug_log_transfer_count(self.transfers.len());
        }
    }
}

fn debug_log_transfer_count(count: usize) {
    log::debug!("dcc: cleanup pass complete, {count} transfers remain in the registry");
}

/// Spawns the periodic cleanup task spec.md §5 names ("one task for
/// scheduled DCC cleanup"). Returns the handle so the embedding
/// application can abort it on shutdown.
pub fn spawn_cleanup_task(manager: Arc<DccManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval_secs = manager.dcc_config().cleanup_interval_seconds.max(1);
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
            manager.cleanup_old_transfers();
        }
    })
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn ctcp_privmsg(target: &str, ctcp_argument: &str) -> OutboundMessage {
    let framed = crate::dispatch::ctcp::frame_ctcp("DCC", Some(strip_dcc_prefix(ctcp_argument)));
    OutboundMessage::new("PRIVMSG").with_param(target).with_trailing(&framed)
}

/// `frame_ctcp("DCC", Some(argument))` expects the argument *after* the
/// `DCC` tag; our formatters in `dcc::protocol` already produce the whole
/// `DCC SEND ...` string, so strip the leading token back off here rather
/// than threading two separate string shapes through the call sites.
fn strip_dcc_prefix(formatted: &str) -> &str {
    formatted.strip_prefix("DCC ").unwrap_or(formatted)
}

async fn bind_listener(start: u16, end: u16) -> std::io::Result<(TcpListener, u16)> {
    if start == 0 || end == 0 || start > end {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();
        return Ok((listener, port));
    }
    for port in start..=end {
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
            return Ok((listener, port));
        }
    }
    Err(std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free port in configured DCC range"))
}

/// Brief, local, non-blocking-in-practice socket calls — a `connect()` on
/// a UDP socket never touches the network, it just picks the outbound
/// route. Kept synchronous rather than `spawn_blocking`'d for that reason.
fn determine_advertised_ip(override_ip: Option<&str>) -> Ipv4Addr {
    if let Some(raw) = override_ip {
        if let Ok(ip) = raw.parse() {
            return ip;
        }
    }
    let probe = || -> std::io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        match socket.local_addr()?.ip() {
            std::net::IpAddr::V4(v4) => Ok(v4),
            std::net::IpAddr::V6(_) => Ok(Ipv4Addr::LOCALHOST),
        }
    };
    probe().unwrap_or(Ipv4Addr::LOCALHOST)
}

async fn resolve_ipv4(host: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .ok()?
        .find_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
}

fn host_os_target() -> OsTarget {
    if cfg!(windows) { OsTarget::Windows } else { OsTarget::Posix }
}

fn finish_send_task(
    events: &ConnectionHandle,
    transfer: &Arc<DccTransfer>,
    result: Result<transfer::TransferOutcome, DccTransferError>,
) {
    match result {
        Ok(outcome) => {
            if let Some(checksum_ctcp) = outcome.checksum_ctcp {
                events.send(ctcp_privmsg(&transfer.peer_nick, &checksum_ctcp));
            }
        }
        Err(e) => warn!("dcc: SEND transfer {} to {} failed: {e}", transfer.id, transfer.peer_nick),
    }
}

fn finish_receive_task(
    _events: &ConnectionHandle,
    transfer: &Arc<DccTransfer>,
    result: Result<transfer::TransferOutcome, DccTransferError>,
) {
    if let Err(e) = result {
        warn!("dcc: RECEIVE transfer {} from {} failed: {e}", transfer.id, transfer.peer_nick);
    } else if transfer.snapshot().checksum_state == ChecksumState::Mismatch {
        warn!("dcc: checksum mismatch for transfer {} from {}", transfer.id, transfer.peer_nick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_ip_override_takes_precedence() {
        assert_eq!(determine_advertised_ip(Some("10.0.0.5")), "10.0.0.5".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn advertised_ip_falls_back_when_override_unparsable() {
        let ip = determine_advertised_ip(Some("not-an-ip"));
        // Either a real route-probed address or the loopback fallback —
        // either way it must be a valid IPv4 address, which the type
        // itself already guarantees; this just exercises the fallback path.
        let _ = ip;
    }

    #[tokio::test]
    async fn bind_listener_falls_back_to_ephemeral_port_on_empty_range() {
        let (_listener, port) = bind_listener(0, 0).await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn resolve_ipv4_parses_dotted_quad_without_dns() {
        assert_eq!(resolve_ipv4("127.0.0.1").await, Some(Ipv4Addr::LOCALHOST));
    }
}

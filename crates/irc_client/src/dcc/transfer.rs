//! DCC Transfer (spec.md §4.11): the per-transfer finite-state machine.
//! Each transfer owns exactly one socket and one file handle for its
//! whole lifetime, streamed in 4 KiB chunks with bandwidth throttling,
//! resume-offset verification, and post-transfer checksum comparison.
//!
//! Grounded on `original_source/dcc_transfer.py`'s `DCCTransfer` /
//! `DCCSendTransfer` / `DCCReceiveTransfer`. The original's status
//! enumeration also has `PAUSED`; spec.md §3 does not, so it's dropped
//! here rather than carried as dead weight.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::DccTransferError;
use crate::events::{Event, EventBus};

pub const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DccDirection {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DccTransferStatus {
    Queued,
    Negotiating,
    Connecting,
    Transferring,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl DccTransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DccTransferStatus::Completed | DccTransferStatus::Failed | DccTransferStatus::Cancelled
                | DccTransferStatus::TimedOut
        )
    }
}

/// Result of comparing the checksum we computed to the one the peer
/// advertised, per spec.md §4.11 ("compare case-insensitively; set
/// checksum-state to `Match`, `Mismatch`, or a diagnostic value").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumState {
    NotChecked,
    SenderDidNotProvide,
    Match,
    Mismatch,
}

/// Immutable snapshot of a transfer's current state, for `get_transfer_statuses`.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub id: Uuid,
    pub direction: DccDirection,
    pub peer_nick: String,
    pub filename: String,
    pub size: u64,
    pub bytes_transferred: u64,
    pub status: DccTransferStatus,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub error: Option<String>,
    pub checksum_state: ChecksumState,
}

struct MutableState {
    status: DccTransferStatus,
    bytes_transferred: u64,
    started_at: Option<i64>,
    ended_at: Option<i64>,
    error: Option<String>,
    checksum_expected: Option<String>,
    checksum_computed: Option<String>,
    checksum_state: ChecksumState,
}

/// A single DCC transfer. `Arc<DccTransfer>` is shared between the worker
/// task driving its I/O and the manager registry exposing read-only
/// status to listers and the cleanup sweep.
pub struct DccTransfer {
    pub id: Uuid,
    pub direction: DccDirection,
    pub peer_nick: String,
    pub filename: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub bandwidth_limit_bps: u64,
    pub resume_offset: u64,
    pub passive_token: Option<String>,
    /// The peer endpoint this transfer dials or expects a connection from,
    /// retained after the transfer ends so `DccManager::attempt_user_resume`
    /// can restart a failed receive without re-negotiating over CTCP.
    pub peer_addr: Option<(Ipv4Addr, u16)>,
    state: Mutex<MutableState>,
    cancel: CancellationToken,
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

impl DccTransfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        direction: DccDirection,
        peer_nick: String,
        filename: String,
        local_path: PathBuf,
        size: u64,
        bandwidth_limit_bps: u64,
        resume_offset: u64,
        passive_token: Option<String>,
        expected_checksum: Option<String>,
        peer_addr: Option<(Ipv4Addr, u16)>,
    ) -> Self {
        DccTransfer {
            id: Uuid::new_v4(),
            direction,
            peer_nick,
            filename,
            local_path,
            size,
            bandwidth_limit_bps,
            resume_offset,
            passive_token,
            peer_addr,
            state: Mutex::new(MutableState {
                status: DccTransferStatus::Queued,
                bytes_transferred: resume_offset,
                started_at: None,
                ended_at: None,
                error: None,
                checksum_expected: expected_checksum,
                checksum_computed: None,
                checksum_state: ChecksumState::NotChecked,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let state = self.state.lock().unwrap();
        TransferSnapshot {
            id: self.id,
            direction: self.direction,
            peer_nick: self.peer_nick.clone(),
            filename: self.filename.clone(),
            size: self.size,
            bytes_transferred: state.bytes_transferred,
            status: state.status,
            started_at: state.started_at,
            ended_at: state.ended_at,
            error: state.error.clone(),
            checksum_state: state.checksum_state.clone(),
        }
    }

    fn set_status(&self, status: DccTransferStatus) {
        let mut state = self.state.lock().unwrap();
        if state.started_at.is_none() && matches!(status, DccTransferStatus::Transferring) {
            state.started_at = Some(now_unix());
        }
        if status.is_terminal() {
            state.ended_at = Some(now_unix());
        }
        state.status = status;
    }

    fn fail(&self, error: DccTransferError) -> DccTransferError {
        let status = match &error {
            DccTransferError::TimedOut(_) => DccTransferStatus::TimedOut,
            DccTransferError::Cancelled => DccTransferStatus::Cancelled,
            _ => DccTransferStatus::Failed,
        };
        let mut state = self.state.lock().unwrap();
        state.status = status;
        state.ended_at = Some(now_unix());
        state.error = Some(error.to_string());
        error
    }

    fn add_bytes(&self, n: u64) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.bytes_transferred += n;
        state.bytes_transferred
    }

    fn record_checksum(&self, computed: String) -> ChecksumState {
        let mut state = self.state.lock().unwrap();
        state.checksum_computed = Some(computed.clone());
        state.checksum_state = match &state.checksum_expected {
            None => ChecksumState::SenderDidNotProvide,
            Some(expected) => {
                if expected.eq_ignore_ascii_case(&computed) {
                    ChecksumState::Match
                } else {
                    ChecksumState::Mismatch
                }
            }
        };
        state.checksum_state.clone()
    }
}

/// Sleeps off the gap between the ideal per-chunk time at `limit_bps` and
/// how long the chunk actually took, per spec.md §4.11: "the ideal time
/// for the chunk is `len/limit_bps`; sleep the remainder if actual
/// elapsed is less." `limit_bps == 0` means unlimited — no sleep.
async fn apply_throttle(chunk_len: usize, limit_bps: u64, elapsed: Duration) {
    if limit_bps == 0 {
        return;
    }
    let ideal = Duration::from_secs_f64(chunk_len as f64 / limit_bps as f64);
    if ideal > elapsed {
        tokio::time::sleep(ideal - elapsed).await;
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Streams `local_path` (from `transfer.resume_offset`) out over `socket`
/// in [`CHUNK_SIZE`] chunks, throttled per `transfer.bandwidth_limit_bps`.
async fn stream_file_to_socket(
    transfer: &DccTransfer,
    socket: &mut TcpStream,
    events: &EventBus,
    chunk_timeout: Duration,
) -> Result<(), DccTransferError> {
    let mut file = tokio::fs::File::open(&transfer.local_path).await.map_err(DccTransferError::Io)?;
    if transfer.resume_offset > 0 {
        file.seek(std::io::SeekFrom::Start(transfer.resume_offset)).await.map_err(DccTransferError::Io)?;
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        if transfer.cancel.is_cancelled() {
            return Err(DccTransferError::Cancelled);
        }
        let n = file.read(&mut buf).await.map_err(DccTransferError::Io)?;
        if n == 0 {
            break;
        }
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = transfer.cancel.cancelled() => return Err(DccTransferError::Cancelled),
            result = timeout(chunk_timeout, socket.write_all(&buf[..n])) => {
                result.map_err(|_| DccTransferError::TimedOut("DCC send chunk"))?.map_err(DccTransferError::Io)?;
            }
        }
        let total = transfer.add_bytes(n as u64);
        events.emit(Event::DccTransferProgress { id: transfer.id.to_string(), bytes_transferred: total, total: transfer.size });
        apply_throttle(n, transfer.bandwidth_limit_bps, started.elapsed()).await;
    }
    socket.flush().await.map_err(DccTransferError::Io)?;
    Ok(())
}

/// Opens (or creates/truncates) the local file for an inbound transfer,
/// enforcing spec.md §4.11's resume rule: "if the local size disagrees
/// with the resume offset, fail with a descriptive error."
async fn open_receive_file(path: &Path, resume_offset: u64) -> Result<tokio::fs::File, DccTransferError> {
    if resume_offset == 0 {
        return tokio::fs::File::create(path).await.map_err(DccTransferError::Io);
    }
    let mut file = tokio::fs::OpenOptions::new().read(true).write(true).open(path).await.map_err(DccTransferError::Io)?;
    let metadata = file.metadata().await.map_err(DccTransferError::Io)?;
    if metadata.len() != resume_offset {
        return Err(DccTransferError::ResumeMismatch { offset: resume_offset, local_size: metadata.len() });
    }
    file.seek(std::io::SeekFrom::Start(resume_offset)).await.map_err(DccTransferError::Io)?;
    Ok(file)
}

/// Receives into `transfer.local_path` from `socket` until `transfer.size`
/// bytes total have arrived (including any resumed prefix).
async fn receive_file_from_socket(
    transfer: &DccTransfer,
    socket: &mut TcpStream,
    events: &EventBus,
    chunk_timeout: Duration,
) -> Result<(), DccTransferError> {
    let mut file = open_receive_file(&transfer.local_path, transfer.resume_offset).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received = transfer.resume_offset;
    while received < transfer.size {
        if transfer.cancel.is_cancelled() {
            return Err(DccTransferError::Cancelled);
        }
        let started = Instant::now();
        let n = tokio::select! {
            biased;
            _ = transfer.cancel.cancelled() => return Err(DccTransferError::Cancelled),
            result = timeout(chunk_timeout, socket.read(&mut buf)) => {
                result.map_err(|_| DccTransferError::TimedOut("DCC recv chunk"))?.map_err(DccTransferError::Io)?
            }
        };
        if n == 0 {
            return Err(DccTransferError::Protocol("peer closed connection before transfer completed".to_string()));
        }
        file.write_all(&buf[..n]).await.map_err(DccTransferError::Io)?;
        received += n as u64;
        let total = transfer.add_bytes(n as u64);
        events.emit(Event::DccTransferProgress { id: transfer.id.to_string(), bytes_transferred: total, total: transfer.size });
        apply_throttle(n, transfer.bandwidth_limit_bps, started.elapsed()).await;
    }
    file.flush().await.map_err(DccTransferError::Io)?;
    Ok(())
}

fn compute_checksum_sync(data: &[u8], algorithm: &str) -> String {
    match algorithm.to_ascii_lowercase().as_str() {
        "md5" => {
            use md5::{Digest, Md5};
            let mut hasher = Md5::new();
            hasher.update(data);
            hex_encode(&hasher.finalize())
        }
        "sha1" => {
            use sha1::{Digest, Sha1};
            let mut hasher = Sha1::new();
            hasher.update(data);
            hex_encode(&hasher.finalize())
        }
        _ => {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(data);
            hex_encode(&hasher.finalize())
        }
    }
}

async fn compute_file_checksum(path: &Path, algorithm: &str) -> Result<String, DccTransferError> {
    let data = tokio::fs::read(path).await.map_err(DccTransferError::Io)?;
    Ok(compute_checksum_sync(&data, algorithm))
}

/// What a completed `run_*` call hands back to the manager: the CTCP
/// `DCC CHECKSUM` argument to relay to the peer, if checksumming is on.
pub struct TransferOutcome {
    pub checksum_ctcp: Option<String>,
}

async fn finish(
    transfer: &DccTransfer,
    events: &EventBus,
    checksum_algorithm: Option<&str>,
) -> Result<TransferOutcome, DccTransferError> {
    transfer.set_status(DccTransferStatus::Completed);
    events.emit(Event::DccTransferComplete { id: transfer.id.to_string() });

    let Some(algorithm) = checksum_algorithm else {
        return Ok(TransferOutcome { checksum_ctcp: None });
    };
    let computed = compute_file_checksum(&transfer.local_path, algorithm).await?;
    transfer.record_checksum(computed.clone());
    let ctcp = crate::dcc::protocol::format_dcc_checksum_ctcp(&transfer.filename, algorithm, &computed);
    Ok(TransferOutcome { checksum_ctcp: Some(ctcp) })
}

fn abort(transfer: &DccTransfer, events: &EventBus, error: DccTransferError) -> DccTransferError {
    let error = transfer.fail(error);
    match transfer.snapshot().status {
        DccTransferStatus::Cancelled => events.emit(Event::DccTransferCancelled { id: transfer.id.to_string() }),
        _ => events.emit(Event::DccTransferError { id: transfer.id.to_string(), reason: error.to_string() }),
    }
    error
}

/// Outbound active SEND: we already hold a listening socket bound in the
/// configured port range (allocated by the manager before the CTCP offer
/// went out); wait for the peer to connect, then stream.
pub async fn run_send_active(
    transfer: &DccTransfer,
    listener: TcpListener,
    events: &EventBus,
    accept_timeout: Duration,
    chunk_timeout: Duration,
    checksum_algorithm: Option<&str>,
) -> Result<TransferOutcome, DccTransferError> {
    transfer.set_status(DccTransferStatus::Connecting);
    let (mut socket, peer) = match timeout(accept_timeout, listener.accept()).await {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => return Err(abort(transfer, events, DccTransferError::Io(e))),
        Err(_) => return Err(abort(transfer, events, DccTransferError::TimedOut("DCC SEND incoming connection"))),
    };
    info!("dcc: peer {} connected from {peer} for transfer {}", transfer.peer_nick, transfer.id);
    transfer.set_status(DccTransferStatus::Transferring);
    events.emit(Event::DccTransferStart { id: transfer.id.to_string() });

    if let Err(e) = stream_file_to_socket(transfer, &mut socket, events, chunk_timeout).await {
        return Err(abort(transfer, events, e));
    }
    finish(transfer, events, checksum_algorithm).await.map_err(|e| abort(transfer, events, e))
}

/// Outbound passive (reverse) SEND: the CTCP offer carried a token and
/// port 0; once the peer's `DCC ACCEPT` names their listening port, we
/// connect outward to it.
pub async fn run_send_passive(
    transfer: &DccTransfer,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    events: &EventBus,
    chunk_timeout: Duration,
    checksum_algorithm: Option<&str>,
) -> Result<TransferOutcome, DccTransferError> {
    transfer.set_status(DccTransferStatus::Connecting);
    let mut socket = match TcpStream::connect((peer_ip, peer_port)).await {
        Ok(socket) => socket,
        Err(e) => return Err(abort(transfer, events, DccTransferError::Io(e))),
    };
    transfer.set_status(DccTransferStatus::Transferring);
    events.emit(Event::DccTransferStart { id: transfer.id.to_string() });

    if let Err(e) = stream_file_to_socket(transfer, &mut socket, events, chunk_timeout).await {
        return Err(abort(transfer, events, e));
    }
    finish(transfer, events, checksum_algorithm).await.map_err(|e| abort(transfer, events, e))
}

/// Inbound RECEIVE (active): the peer is the one listening (a classic DCC
/// SEND offer); we connect to their advertised `ip:port`.
pub async fn run_receive_active(
    transfer: &DccTransfer,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    events: &EventBus,
    chunk_timeout: Duration,
    checksum_algorithm: Option<&str>,
) -> Result<TransferOutcome, DccTransferError> {
    transfer.set_status(DccTransferStatus::Connecting);
    let mut socket = match TcpStream::connect((peer_ip, peer_port)).await {
        Ok(socket) => socket,
        Err(e) => return Err(abort(transfer, events, DccTransferError::Io(e))),
    };
    transfer.set_status(DccTransferStatus::Transferring);
    events.emit(Event::DccTransferStart { id: transfer.id.to_string() });

    if let Err(e) = receive_file_from_socket(transfer, &mut socket, events, chunk_timeout).await {
        return Err(abort(transfer, events, e));
    }
    finish(transfer, events, checksum_algorithm).await.map_err(|e| abort(transfer, events, e))
}

/// Inbound RECEIVE (passive/reverse): we accepted a reverse-SEND offer
/// from a peer who will connect to us; the manager already bound
/// `listener` on the port named in our `DCC ACCEPT` reply.
pub async fn run_receive_passive(
    transfer: &DccTransfer,
    listener: TcpListener,
    events: &EventBus,
    accept_timeout: Duration,
    chunk_timeout: Duration,
    checksum_algorithm: Option<&str>,
) -> Result<TransferOutcome, DccTransferError> {
    transfer.set_status(DccTransferStatus::Connecting);
    let (mut socket, peer) = match timeout(accept_timeout, listener.accept()).await {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => return Err(abort(transfer, events, DccTransferError::Io(e))),
        Err(_) => return Err(abort(transfer, events, DccTransferError::TimedOut("DCC RECV incoming connection"))),
    };
    debug!("dcc: passive receive peer connected from {peer} for transfer {}", transfer.id);
    transfer.set_status(DccTransferStatus::Transferring);
    events.emit(Event::DccTransferStart { id: transfer.id.to_string() });

    if let Err(e) = receive_file_from_socket(transfer, &mut socket, events, chunk_timeout).await {
        return Err(abort(transfer, events, e));
    }
    finish(transfer, events, checksum_algorithm).await.map_err(|e| abort(transfer, events, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_transfer(direction: DccDirection, size: u64, local_path: PathBuf) -> DccTransfer {
        DccTransfer::new(direction, "peer".to_string(), "file.dat".to_string(), local_path, size, 0, 0, None, None, None)
    }

    #[test]
    fn snapshot_starts_queued_with_resume_offset_as_initial_bytes() {
        let transfer = DccTransfer::new(
            DccDirection::Receive,
            "peer".to_string(),
            "file.dat".to_string(),
            PathBuf::from("/tmp/file.dat"),
            100,
            0,
            40,
            None,
            None,
            None,
        );
        let snap = transfer.snapshot();
        assert_eq!(snap.status, DccTransferStatus::Queued);
        assert_eq!(snap.bytes_transferred, 40);
    }

    #[test]
    fn checksum_state_matches_case_insensitively() {
        let transfer = sample_transfer(DccDirection::Receive, 10, PathBuf::from("/tmp/x"));
        {
            let mut state = transfer.state.lock().unwrap();
            state.checksum_expected = Some("ABCDEF".to_string());
        }
        let state = transfer.record_checksum("abcdef".to_string());
        assert_eq!(state, ChecksumState::Match);
    }

    #[test]
    fn checksum_state_mismatch_when_digests_differ() {
        let transfer = sample_transfer(DccDirection::Receive, 10, PathBuf::from("/tmp/x"));
        {
            let mut state = transfer.state.lock().unwrap();
            state.checksum_expected = Some("aaaa".to_string());
        }
        let state = transfer.record_checksum("bbbb".to_string());
        assert_eq!(state, ChecksumState::Mismatch);
    }

    #[test]
    fn checksum_state_sender_did_not_provide_when_no_expected_value() {
        let transfer = sample_transfer(DccDirection::Send, 10, PathBuf::from("/tmp/x"));
        let state = transfer.record_checksum("abcdef".to_string());
        assert_eq!(state, ChecksumState::SenderDidNotProvide);
    }

    #[tokio::test]
    async fn throttle_sleeps_for_the_shortfall_only() {
        let started = Instant::now();
        apply_throttle(1000, 0, Duration::from_millis(1)).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn open_receive_file_rejects_mismatched_resume_offset() {
        let dir = std::env::temp_dir().join(format!("dcc_transfer_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.dat");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(b"short").unwrap();
        }
        let err = open_receive_file(&path, 9999).await.unwrap_err();
        assert!(matches!(err, DccTransferError::ResumeMismatch { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn sha256_checksum_matches_known_vector() {
        let digest = compute_checksum_sync(b"abc", "sha256");
        assert_eq!(digest, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }
}

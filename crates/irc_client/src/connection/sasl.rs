//! SASL PLAIN authentication (spec.md §4.4, §3 `SaslState`).
//!
//! No teacher analog — `manuelpont94-irc`'s server accepts AUTHENTICATE
//! but never needs to *initiate* one. Grounded on
//! `original_source/sasl_authenticator.py`'s `SaslAuthenticator` (state
//! flags, `start_authentication`, `on_authenticate_challenge_received`
//! building `f"{nick}\0{nick}\0{password}"`, `_handle_success`/
//! `_handle_failure`), reimplemented in the teacher's `thiserror`+`log`
//! idiom instead of the original's Python exceptions and masked logging
//! helper.

use base64::Engine;
use log::{debug, info, warn};

use super::ConnectionHandle;
use crate::message::OutboundMessage;

const MAX_CHUNK_BYTES: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslOutcome {
    /// Declined at `start()` because no credentials were configured.
    DeclinedNoCredentials,
    /// `AUTHENTICATE PLAIN` sent, awaiting the server's `+` challenge.
    Started,
    Success,
    Failure,
    /// Nothing changed — an intermediate line was handled (e.g. a
    /// continuation chunk was sent).
    InProgress,
}

/// Tri-state success per spec.md §3 (`unknown / true / false`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslResult {
    Unknown,
    Succeeded,
    Failed,
}

pub struct SaslAuthenticator {
    handle: ConnectionHandle,
    nick: String,
    password: Option<String>,
    pub initiated: bool,
    pub flow_active: bool,
    pub result: SaslResult,
}

impl SaslAuthenticator {
    pub fn new(handle: ConnectionHandle, nick: impl Into<String>, password: Option<String>) -> Self {
        SaslAuthenticator {
            handle,
            nick: nick.into(),
            password,
            initiated: false,
            flow_active: false,
            result: SaslResult::Unknown,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.password.is_some()
    }

    /// Step 1: "On start, send `AUTHENTICATE PLAIN`." Declines immediately
    /// if no credentials are configured, per spec.md §4.4's last line.
    pub fn start(&mut self) -> SaslOutcome {
        if self.password.is_none() {
            self.result = SaslResult::Failed;
            return SaslOutcome::DeclinedNoCredentials;
        }
        self.initiated = true;
        self.flow_active = true;
        self.handle.send(OutboundMessage::new("AUTHENTICATE").with_param("PLAIN"));
        info!("sasl: started PLAIN authentication for {}", self.nick);
        SaslOutcome::Started
    }

    /// Step 2: on `AUTHENTICATE +`, build and send the base64 payload,
    /// chunked per spec.md §4.4 if it exceeds 400 bytes.
    pub fn on_authenticate_line(&mut self, payload: &str) -> SaslOutcome {
        if !self.flow_active {
            return SaslOutcome::InProgress;
        }
        if payload != "+" {
            // Servers only ever send "+" as the challenge for PLAIN; any
            // other payload is not ours to interpret.
            return SaslOutcome::InProgress;
        }
        let Some(password) = &self.password else {
            self.result = SaslResult::Failed;
            self.flow_active = false;
            return SaslOutcome::Failure;
        };
        let raw = format!("{nick}\0{nick}\0{password}", nick = self.nick);
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw.as_bytes());
        debug!(
            "sasl: sending PLAIN payload for {} (password masked, {} b64 bytes)",
            self.nick,
            encoded.len()
        );
        send_chunked(&self.handle, &encoded);
        SaslOutcome::InProgress
    }

    /// Steps 3-4: numeric outcomes. 907 (already authenticated) counts as
    /// success per spec.md.
    pub fn on_numeric(&mut self, numeric: u16) -> SaslOutcome {
        match numeric {
            900 | 903 | 907 => {
                self.result = SaslResult::Succeeded;
                self.flow_active = false;
                info!("sasl: authentication succeeded for {}", self.nick);
                SaslOutcome::Success
            }
            902 | 904 | 905 | 906 | 908 => {
                self.result = SaslResult::Failed;
                self.flow_active = false;
                warn!("sasl: authentication failed for {} (numeric {numeric})", self.nick);
                SaslOutcome::Failure
            }
            _ => SaslOutcome::InProgress,
        }
    }

    /// Step 5: external abort, e.g. the `sasl` capability was CAP DELeted
    /// mid-flow.
    pub fn abort(&mut self) -> SaslOutcome {
        if !self.flow_active {
            return SaslOutcome::InProgress;
        }
        self.flow_active = false;
        self.result = SaslResult::Failed;
        warn!("sasl: flow aborted externally for {}", self.nick);
        SaslOutcome::Failure
    }
}

/// Splits `encoded` into `AUTHENTICATE <chunk>` lines of at most 400
/// bytes each. If the final chunk is exactly 400 bytes, an empty
/// `AUTHENTICATE +` terminator line follows so the server can distinguish
/// "more data coming" from "payload ended exactly on a chunk boundary".
fn send_chunked(handle: &ConnectionHandle, encoded: &str) {
    if encoded.is_empty() {
        handle.send(OutboundMessage::new("AUTHENTICATE").with_param("+"));
        return;
    }
    let bytes = encoded.as_bytes();
    let mut offset = 0;
    let mut last_chunk_len = 0;
    while offset < bytes.len() {
        let end = (offset + MAX_CHUNK_BYTES).min(bytes.len());
        let chunk = std::str::from_utf8(&bytes[offset..end]).expect("base64 is ASCII");
        handle.send(OutboundMessage::new("AUTHENTICATE").with_param(chunk));
        last_chunk_len = chunk.len();
        offset = end;
    }
    if last_chunk_len == MAX_CHUNK_BYTES {
        handle.send(OutboundMessage::new("AUTHENTICATE").with_param("+"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx, Arc::new(EventBus::new())), rx)
    }

    #[test]
    fn plain_payload_matches_the_documented_example() {
        let (handle, mut rx) = test_handle();
        let mut sasl = SaslAuthenticator::new(handle, "alice", Some("s3cret".to_string()));
        assert_eq!(sasl.start(), SaslOutcome::Started);
        let _ = rx.try_recv().unwrap(); // AUTHENTICATE PLAIN

        sasl.on_authenticate_line("+");
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.command, "AUTHENTICATE");
        // spec.md §8: base64("alice\0alice\0s3cret") == YWxpY2UAYWxpY2UAczNjcmV0
        assert_eq!(sent.params[0], "YWxpY2UAYWxpY2UAczNjcmV0");
    }

    #[test]
    fn declines_immediately_with_no_credentials() {
        let (handle, _rx) = test_handle();
        let mut sasl = SaslAuthenticator::new(handle, "alice", None);
        assert_eq!(sasl.start(), SaslOutcome::DeclinedNoCredentials);
        assert_eq!(sasl.result, SaslResult::Failed);
    }

    #[test]
    fn numeric_907_counts_as_success() {
        let (handle, _rx) = test_handle();
        let mut sasl = SaslAuthenticator::new(handle, "alice", Some("x".to_string()));
        sasl.start();
        assert_eq!(sasl.on_numeric(907), SaslOutcome::Success);
        assert_eq!(sasl.result, SaslResult::Succeeded);
    }

    #[test]
    fn failure_numerics_mark_failed() {
        for numeric in [902, 904, 905, 906, 908] {
            let (handle, _rx) = test_handle();
            let mut sasl = SaslAuthenticator::new(handle, "alice", Some("x".to_string()));
            sasl.start();
            assert_eq!(sasl.on_numeric(numeric), SaslOutcome::Failure);
            assert_eq!(sasl.result, SaslResult::Failed);
        }
    }

    #[test]
    fn long_payload_is_chunked_with_terminator_on_exact_boundary() {
        let (handle, mut rx) = test_handle();
        // 300 raw bytes of password base64-encodes to well over 400 bytes.
        let password = "x".repeat(300);
        let mut sasl = SaslAuthenticator::new(handle, "alice", Some(password));
        sasl.start();
        rx.try_recv().unwrap();
        sasl.on_authenticate_line("+");

        let mut chunks = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            chunks.push(msg);
        }
        assert!(chunks.len() >= 2);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.params[0].len() <= MAX_CHUNK_BYTES);
        }
    }

    #[test]
    fn abort_marks_failed_only_if_flow_was_active() {
        let (handle, _rx) = test_handle();
        let mut sasl = SaslAuthenticator::new(handle, "alice", Some("x".to_string()));
        assert_eq!(sasl.abort(), SaslOutcome::InProgress);
        sasl.start();
        assert_eq!(sasl.abort(), SaslOutcome::Failure);
        assert_eq!(sasl.result, SaslResult::Failed);
    }
}

//! IRCv3 capability negotiation (spec.md §4.3, §3 `CapState`).
//!
//! Grounded on `irc_server/src/pre_registration.rs`'s `IrcCapPreRegistration`
//! (the CAP subcommand shape, and that file's habit of documenting each
//! subcommand's wire flow in a comment above its handler), generalized
//! from the server's receiving end of CAP to the client's driving end per
//! `original_source/cap_negotiator.py` (`supported_caps`/`requested_caps`/
//! `enabled_caps` sets, the LS/REQ/ACK/NAK/NEW/DEL flow).

use std::collections::HashSet;

use log::{debug, warn};

use super::ConnectionHandle;
use crate::message::OutboundMessage;

/// spec.md §3 `CapState`: three disjoint sets plus two completion flags.
#[derive(Debug, Clone, Default)]
pub struct CapState {
    pub supported: HashSet<String>,
    pub requested: HashSet<String>,
    pub enabled: HashSet<String>,
    pub initial_flow_complete: bool,
    pub negotiation_finished: bool,
}

/// What the supervisor should do after feeding a CAP line (or a SASL
/// completion signal) to the negotiator. Exists so `CapNegotiator` never
/// has to hold a reference to the SASL authenticator or the Registration
/// Coordinator — per spec.md §9, the supervisor mediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapOutcome {
    /// Nothing for the supervisor to do beyond updating state.
    None,
    /// `sasl` was ACKed and credentials are available: start the SASL flow.
    StartSasl,
    /// `CAP END` was sent; the Registration Coordinator may proceed.
    InitialFlowComplete,
    /// `sasl` was NAKed or DELeted mid-flow: tell SASL to mark itself failed.
    AbortSasl,
}

pub struct CapNegotiator {
    handle: ConnectionHandle,
    desired: HashSet<String>,
    has_sasl_credentials: bool,
    state: CapState,
    /// True once we've sent REQ and are waiting on SASL before ending the
    /// flow — gates `CAP END` until `on_sasl_completed` fires.
    sasl_gate: bool,
    ls_seen_any: bool,
}

impl CapNegotiator {
    pub fn new(handle: ConnectionHandle, desired: HashSet<String>, has_sasl_credentials: bool) -> Self {
        CapNegotiator {
            handle,
            desired,
            has_sasl_credentials,
            state: CapState::default(),
            sasl_gate: false,
            ls_seen_any: false,
        }
    }

    pub fn state(&self) -> &CapState {
        &self.state
    }

    /// Step 1: `CAP LS 302` immediately upon TCP/TLS completion.
    pub fn start(&self) {
        self.handle.send(OutboundMessage::new("CAP").with_param("LS").with_param("302"));
    }

    /// Step 2: `CAP * LS [* ]:caps…`. `is_final` is false when the message
    /// carries a `*` continuation marker (more lines follow).
    pub fn on_ls(&mut self, caps: &[&str], is_final: bool) -> CapOutcome {
        self.ls_seen_any = true;
        for cap in caps {
            let (name, _value) = split_cap_token(cap);
            self.state.supported.insert(name.to_ascii_lowercase());
        }
        if !is_final {
            return CapOutcome::None;
        }
        self.request_desired()
    }

    /// Steps 3-4: compute `desired ∩ supported`, dropping `sasl` if we
    /// have no credentials for it, and send `CAP REQ` if non-empty.
    fn request_desired(&mut self) -> CapOutcome {
        let mut to_request: HashSet<String> = self
            .desired
            .iter()
            .filter(|cap| self.state.supported.contains(cap.as_str()))
            .cloned()
            .collect();
        if to_request.contains("sasl") && !self.has_sasl_credentials {
            to_request.remove("sasl");
        }

        if to_request.is_empty() {
            return self.end_flow();
        }

        let mut ordered: Vec<&str> = to_request.iter().map(String::as_str).collect();
        ordered.sort_unstable();
        self.handle.send(OutboundMessage::new("CAP").with_param("REQ").with_trailing(ordered.join(" ")));
        self.state.requested = to_request;
        CapOutcome::None
    }

    /// Step 5: `CAP * ACK :caps`.
    pub fn on_ack(&mut self, caps: &[&str]) -> CapOutcome {
        let mut sasl_acked = false;
        for cap in caps {
            let name = cap.to_ascii_lowercase();
            if self.state.requested.remove(&name) {
                self.state.enabled.insert(name.clone());
            }
            if name == "sasl" {
                sasl_acked = true;
            }
        }
        if sasl_acked && self.has_sasl_credentials {
            self.sasl_gate = true;
            return CapOutcome::StartSasl;
        }
        if self.state.requested.is_empty() && !self.sasl_gate {
            return self.end_flow();
        }
        CapOutcome::None
    }

    /// Step 6: `CAP * NAK :caps`.
    pub fn on_nak(&mut self, caps: &[&str]) -> CapOutcome {
        let mut sasl_naked = false;
        for cap in caps {
            let name = cap.to_ascii_lowercase();
            self.state.requested.remove(&name);
            if name == "sasl" {
                sasl_naked = true;
            }
        }
        if sasl_naked {
            warn!("cap: server NAKed sasl, informing the SASL authenticator");
            if self.state.requested.is_empty() {
                // No other caps outstanding; still must wait for the
                // authenticator's own failure signal before ending, since
                // the supervisor routes AbortSasl to it first.
                return CapOutcome::AbortSasl;
            }
            return CapOutcome::AbortSasl;
        }
        if self.state.requested.is_empty() && !self.sasl_gate {
            return self.end_flow();
        }
        CapOutcome::None
    }

    /// Step 7: `CAP * NEW :caps`. Decided open question: auto-enable
    /// desired-but-newly-supported caps without issuing REQ (spec.md §9
    /// commits to this; some servers may not honor a bare enable, but
    /// re-REQing here would contradict the documented decision).
    pub fn on_new(&mut self, caps: &[&str]) -> CapOutcome {
        for cap in caps {
            let name = cap.to_ascii_lowercase();
            self.state.supported.insert(name.clone());
            if self.desired.contains(&name) && !self.state.enabled.contains(&name) {
                self.state.enabled.insert(name);
            }
        }
        CapOutcome::None
    }

    /// Step 8: `CAP * DEL :caps`.
    pub fn on_del(&mut self, caps: &[&str]) -> CapOutcome {
        let mut sasl_deleted = false;
        for cap in caps {
            let name = cap.to_ascii_lowercase();
            self.state.supported.remove(&name);
            self.state.enabled.remove(&name);
            if name == "sasl" {
                sasl_deleted = true;
            }
        }
        if sasl_deleted && self.sasl_gate {
            return CapOutcome::AbortSasl;
        }
        CapOutcome::None
    }

    /// Step 9: SASL finished (success or failure). If the flow was gated
    /// on it, send `CAP END` now.
    pub fn on_sasl_completed(&mut self) -> CapOutcome {
        if self.sasl_gate {
            self.sasl_gate = false;
            return self.end_flow();
        }
        CapOutcome::None
    }

    fn end_flow(&mut self) -> CapOutcome {
        if self.state.initial_flow_complete {
            return CapOutcome::None;
        }
        self.handle.send(OutboundMessage::new("CAP").with_param("END"));
        self.state.initial_flow_complete = true;
        self.state.negotiation_finished = true;
        debug!("cap: initial flow complete, CAP END sent");
        CapOutcome::InitialFlowComplete
    }
}

/// `cap-token = cap-name ["=" cap-value]` per the IRCv3 CAP grammar; the
/// teacher's comment block in `pre_registration.rs` documents the same
/// grammar for the server-side parser.
fn split_cap_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (token, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn negotiator(desired: &[&str], has_sasl: bool) -> (CapNegotiator, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx, Arc::new(EventBus::new()));
        let desired: HashSet<String> = desired.iter().map(|s| s.to_string()).collect();
        (CapNegotiator::new(handle, desired, has_sasl), rx)
    }

    #[test]
    fn handshake_transcript_matches_spec_example() {
        // spec.md §8: supported={sasl, multi-prefix, server-time},
        // desired={sasl, multi-prefix, foo} -> requests exactly
        // ":sasl multi-prefix", and after ACK of both plus SASL success,
        // exactly one CAP END is sent.
        let (mut cap, mut rx) = negotiator(&["sasl", "multi-prefix", "foo"], true);
        cap.start();
        let _ls_sent = rx.try_recv().unwrap();

        cap.on_ls(&["sasl", "multi-prefix", "server-time"], true);
        let req = rx.try_recv().unwrap();
        assert_eq!(req.command, "CAP");
        assert_eq!(req.params[0], "REQ");
        assert_eq!(req.trailing.as_deref(), Some("multi-prefix sasl"));

        let outcome = cap.on_ack(&["multi-prefix", "sasl"]);
        assert_eq!(outcome, CapOutcome::StartSasl);
        assert!(rx.try_recv().is_err()); // no CAP END yet, gated on SASL

        let outcome = cap.on_sasl_completed();
        assert_eq!(outcome, CapOutcome::InitialFlowComplete);
        let end = rx.try_recv().unwrap();
        assert_eq!(end.params, vec!["END".to_string()]);
        assert!(rx.try_recv().is_err()); // exactly one CAP END
    }

    #[test]
    fn sasl_is_dropped_from_request_without_credentials() {
        let (mut cap, mut rx) = negotiator(&["sasl", "multi-prefix"], false);
        cap.start();
        rx.try_recv().unwrap();
        cap.on_ls(&["sasl", "multi-prefix"], true);
        let req = rx.try_recv().unwrap();
        assert_eq!(req.trailing.as_deref(), Some("multi-prefix"));
    }

    #[test]
    fn no_overlap_ends_flow_immediately_after_ls() {
        let (mut cap, mut rx) = negotiator(&["unsupported-cap"], false);
        cap.start();
        rx.try_recv().unwrap();
        let outcome = cap.on_ls(&["sasl"], true);
        assert_eq!(outcome, CapOutcome::InitialFlowComplete);
        let end = rx.try_recv().unwrap();
        assert_eq!(end.params, vec!["END".to_string()]);
    }

    #[test]
    fn multiline_ls_accumulates_until_final() {
        let (mut cap, mut rx) = negotiator(&["a", "b"], false);
        cap.start();
        rx.try_recv().unwrap();
        assert_eq!(cap.on_ls(&["a"], false), CapOutcome::None);
        assert!(rx.try_recv().is_err());
        cap.on_ls(&["b"], true);
        assert!(cap.state().supported.contains("a"));
        assert!(cap.state().supported.contains("b"));
    }

    #[test]
    fn cap_new_auto_enables_without_req() {
        let (mut cap, _rx) = negotiator(&["away-notify"], false);
        let outcome = cap.on_new(&["away-notify"]);
        assert_eq!(outcome, CapOutcome::None);
        assert!(cap.state().enabled.contains("away-notify"));
        assert!(!cap.state().requested.contains("away-notify"));
    }

    #[test]
    fn nak_of_sasl_signals_abort() {
        let (mut cap, mut rx) = negotiator(&["sasl"], true);
        cap.start();
        rx.try_recv().unwrap();
        cap.on_ls(&["sasl"], true);
        rx.try_recv().unwrap(); // CAP REQ
        let outcome = cap.on_nak(&["sasl"]);
        assert_eq!(outcome, CapOutcome::AbortSasl);
    }
}

//! Connection lifecycle (spec.md §4.3-§4.6, §3 `ConnectionState`/
//! `ConnectionInfo`): capability negotiation, SASL, registration, and the
//! network transport, wired together by a supervisor that mediates
//! between them instead of letting them hold references to each other
//! (spec.md §9 "back-references among coordinators").

pub mod cap;
pub mod registration;
pub mod sasl;
pub mod transport;

use std::collections::HashSet;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{mpsc, Notify};

use crate::errors::ConfigError;
use crate::events::{Event, EventBus};
use crate::identity::ClientIdentity;
use crate::message::OutboundMessage;

use cap::{CapNegotiator, CapOutcome};
use registration::{RegistrationCoordinator, RegistrationOutcome};
use sasl::{SaslAuthenticator, SaslOutcome};

/// spec.md §3 `ConnectionState`. Transitions are linear forward; any state
/// can return to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Registered,
    Ready,
    Error,
    ConfigError,
}

/// spec.md §3 `ConnectionInfo`.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub verify_cert: bool,
    pub nick: String,
    pub username: String,
    pub realname: String,
    pub server_password: Option<String>,
    pub nickserv_password: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub desired_caps: HashSet<String>,
}

impl ConnectionInfo {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.host.trim().is_empty() {
            reasons.push("host must not be empty".to_string());
        }
        if self.port == 0 {
            reasons.push("port must be nonzero".to_string());
        }
        if self.nick.trim().is_empty() {
            reasons.push("nick must not be empty".to_string());
        }
        if self.sasl_username.is_some() != self.sasl_password.is_some() {
            reasons.push("sasl_username and sasl_password must be set together".to_string());
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidProfile { profile: self.host.clone(), reasons })
        }
    }

    pub fn has_sasl_credentials(&self) -> bool {
        self.sasl_username.is_some() && self.sasl_password.is_some()
    }
}

/// The narrow capability object spec.md §9 calls for: `send(command)` and
/// `emit(event)`, nothing else. Cloning is cheap (an `mpsc::Sender` and an
/// `Arc<EventBus>`), so every coordinator gets its own handle.
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    events: Arc<EventBus>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundMessage>, events: Arc<EventBus>) -> Self {
        ConnectionHandle { outbound, events }
    }

    /// Never blocks (spec.md §5: "CAP/SASL/Registration: never block").
    /// Silently drops if the writer task has already gone away — the
    /// connection is tearing down regardless.
    pub fn send(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            warn!("connection: dropped outbound message, writer task is gone");
        }
    }

    pub fn emit(&self, event: Event) {
        self.events.emit(event);
    }
}

/// Owns CAP/SASL/Registration for one connection and mediates between
/// them per spec.md §9's "relationships are CAP notifies Registration on
/// initial-flow-complete, CAP notifies SASL on ACK-of-sasl, SASL notifies
/// CAP on completion" — implemented as explicit match arms here rather
/// than each coordinator holding the others.
pub struct ConnectionSupervisor {
    pub cap: CapNegotiator,
    pub sasl: SaslAuthenticator,
    pub registration: RegistrationCoordinator,
    pub identity: ClientIdentity,
    handle: ConnectionHandle,
    state: ConnectionState,
    /// Fires exactly once, when `ConnectionState::Ready` is reached.
    pub ready: Arc<Notify>,
}

impl ConnectionSupervisor {
    pub fn new(handle: ConnectionHandle, info: &ConnectionInfo) -> Self {
        let identity = ClientIdentity::new(info.nick.clone(), info.username.clone(), info.realname.clone());
        let cap = CapNegotiator::new(handle.clone(), info.desired_caps.clone(), info.has_sasl_credentials());
        let sasl = SaslAuthenticator::new(handle.clone(), info.nick.clone(), info.sasl_password.clone());
        let registration = RegistrationCoordinator::new(
            handle.clone(),
            info.server_password.clone(),
            info.nick.clone(),
            info.username.clone(),
            info.realname.clone(),
        );
        ConnectionSupervisor {
            cap,
            sasl,
            registration,
            identity,
            handle,
            state: ConnectionState::Disconnected,
            ready: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Called once TCP/TLS finishes: starts CAP negotiation.
    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.cap.start();
    }

    pub fn on_cap_ls(&mut self, caps: &[&str], is_final: bool) {
        let outcome = self.cap.on_ls(caps, is_final);
        self.apply_cap_outcome(outcome);
    }

    pub fn on_cap_ack(&mut self, caps: &[&str]) {
        let outcome = self.cap.on_ack(caps);
        self.apply_cap_outcome(outcome);
    }

    pub fn on_cap_nak(&mut self, caps: &[&str]) {
        let outcome = self.cap.on_nak(caps);
        self.apply_cap_outcome(outcome);
    }

    pub fn on_cap_new(&mut self, caps: &[&str]) {
        let outcome = self.cap.on_new(caps);
        self.apply_cap_outcome(outcome);
    }

    pub fn on_cap_del(&mut self, caps: &[&str]) {
        let outcome = self.cap.on_del(caps);
        self.apply_cap_outcome(outcome);
    }

    fn apply_cap_outcome(&mut self, outcome: CapOutcome) {
        match outcome {
            CapOutcome::None => {}
            CapOutcome::StartSasl => {
                let sasl_outcome = self.sasl.start();
                if matches!(sasl_outcome, SaslOutcome::DeclinedNoCredentials | SaslOutcome::Failure) {
                    self.apply_cap_outcome(self.cap.on_sasl_completed());
                }
            }
            CapOutcome::AbortSasl => {
                self.sasl.abort();
                self.apply_cap_outcome(self.cap.on_sasl_completed());
            }
            CapOutcome::InitialFlowComplete => self.try_proceed_to_registration(),
        }
    }

    /// Forwards an `AUTHENTICATE` line's payload to the SASL authenticator
    /// and, on completion, notifies CAP so it can send `CAP END` if gated.
    pub fn on_authenticate_line(&mut self, payload: &str) {
        let outcome = self.sasl.on_authenticate_line(payload);
        if matches!(outcome, SaslOutcome::Success | SaslOutcome::Failure) {
            self.apply_cap_outcome(self.cap.on_sasl_completed());
        }
    }

    /// Forwards a SASL-related numeric (900/902/903/904/905/906/907/908).
    pub fn on_sasl_numeric(&mut self, numeric: u16) {
        let outcome = self.sasl.on_numeric(numeric);
        if matches!(outcome, SaslOutcome::Success | SaslOutcome::Failure) {
            self.apply_cap_outcome(self.cap.on_sasl_completed());
        }
    }

    fn try_proceed_to_registration(&mut self) {
        let outcome = self.registration.proceed();
        if outcome == RegistrationOutcome::Sent {
            self.state = ConnectionState::Registered;
        }
    }

    /// ERR_NICKNAMEINUSE (433).
    pub fn on_nick_collision(&mut self) {
        if self.registration.on_nick_collision() == RegistrationOutcome::Exhausted {
            self.state = ConnectionState::Error;
        }
    }

    /// RPL_WELCOME (001): spec.md §3 "Ready means registration completed
    /// AND CAP/SASL sequence finished."
    pub async fn on_welcome(&mut self) {
        self.registration.on_welcome();
        self.identity.set_nick(self.registration.pending_nick()).await;
        self.state = ConnectionState::Ready;
        self.handle.emit(Event::ClientReady { nick: self.identity.nick().await });
        self.ready.notify_waiters();
        info!("connection: reached Ready state for {}", self.identity.nick().await);
    }

    /// Resets CAP/SASL/Registration state for a fresh connection attempt
    /// (spec.md §4.6: "resets dependent state (CAP/SASL/Registration)").
    pub fn reset_for_reconnect(&mut self, info: &ConnectionInfo) {
        *self = ConnectionSupervisor::new(self.handle.clone(), info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ConnectionInfo {
        ConnectionInfo {
            host: "irc.example.com".to_string(),
            port: 6697,
            tls: true,
            verify_cert: true,
            nick: "bob".to_string(),
            username: "bob".to_string(),
            realname: "Bob".to_string(),
            server_password: None,
            nickserv_password: None,
            sasl_username: Some("bob".to_string()),
            sasl_password: Some("s3cret".to_string()),
            desired_caps: ["sasl".to_string(), "multi-prefix".to_string()].into_iter().collect(),
        }
    }

    fn supervisor() -> (ConnectionSupervisor, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx, Arc::new(EventBus::new()));
        (ConnectionSupervisor::new(handle, &sample_info()), rx)
    }

    #[test]
    fn validate_flags_missing_nick_and_empty_host() {
        let mut info = sample_info();
        info.nick = String::new();
        info.host = String::new();
        let err = info.validate().unwrap_err();
        match err {
            ConfigError::InvalidProfile { reasons, .. } => {
                assert!(reasons.iter().any(|r| r.contains("host")));
                assert!(reasons.iter().any(|r| r.contains("nick")));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn full_handshake_reaches_ready_without_double_cap_end() {
        let (mut sup, mut rx) = supervisor();
        sup.on_connected();
        rx.try_recv().unwrap(); // CAP LS 302

        sup.on_cap_ls(&["sasl", "multi-prefix"], true);
        rx.try_recv().unwrap(); // CAP REQ

        sup.on_cap_ack(&["sasl", "multi-prefix"]);
        let authenticate_plain = rx.try_recv().unwrap();
        assert_eq!(authenticate_plain.command, "AUTHENTICATE");

        sup.on_authenticate_line("+");
        rx.try_recv().unwrap(); // AUTHENTICATE <payload>

        sup.on_sasl_numeric(903);
        let cap_end = rx.try_recv().unwrap();
        assert_eq!(cap_end.params, vec!["END".to_string()]);

        assert_eq!(sup.state(), ConnectionState::Registered);
        let nick = rx.try_recv().unwrap();
        assert_eq!(nick.command, "NICK");
        rx.try_recv().unwrap(); // USER

        sup.on_welcome().await;
        assert_eq!(sup.state(), ConnectionState::Ready);
        assert!(rx.try_recv().is_err()); // no extra CAP END or re-registration
    }

    #[tokio::test]
    async fn nick_collision_then_welcome_reaches_ready() {
        let (mut sup, mut rx) = supervisor();
        sup.on_connected();
        rx.try_recv().unwrap();
        sup.on_cap_ls(&[], true); // nothing supported -> immediate CAP END
        let cap_end = rx.try_recv().unwrap();
        assert_eq!(cap_end.params, vec!["END".to_string()]);
        rx.try_recv().unwrap(); // NICK
        rx.try_recv().unwrap(); // USER

        sup.on_nick_collision();
        assert_eq!(rx.try_recv().unwrap().params, vec!["bob_".to_string()]);

        sup.on_welcome().await;
        assert_eq!(sup.identity.nick().await, "bob_");
        assert_eq!(sup.state(), ConnectionState::Ready);
    }
}

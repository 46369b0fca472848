//! `irc_client_core`: connection lifecycle, message dispatch, DCC file
//! transfer, and trigger evaluation for an IRC client, exposed as a library
//! an embedding application (TUI, headless bot, test harness) wires
//! together. No UI rendering, CLI parsing, or script loading lives here —
//! see each submodule's doc comment for what it's grounded on.
//!
//! [`Client`] is the facade: one instance per server connection, owning
//! the pieces every other module needs shared (the `EventBus`, the DCC
//! Manager, the Trigger Engine) and driving the reconnect loop. Grounded
//! on `bin/irc_server.rs`'s per-connection task split — one reader task,
//! one writer task joined by a channel — generalized from "accept inbound
//! forever" to "dial outbound, reconnect with backoff on failure" per
//! spec.md §4.6.

pub mod config;
pub mod connection;
pub mod context;
pub mod dcc;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod identity;
pub mod ignore;
pub mod message;
pub mod triggers;

use std::sync::{Arc, RwLock};

use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use config::{ClientConfig, ConfigSnapshot, ServerProfile};
use connection::transport::{self, ReconnectBackoff};
use connection::{ConnectionHandle, ConnectionInfo, ConnectionState, ConnectionSupervisor};
use context::ContextStore;
use dcc::DccManager;
use dispatch::{CapSubcommand, DispatchOutcome, Dispatcher};
use errors::IrcClientError;
use events::{Event, EventBus};
use ignore::{IgnoreCategory, IgnoreList};
use message::OutboundMessage;
use triggers::TriggerEngine;

/// A `ConnectionHandle` with nothing on the other end of its channel — the
/// DCC Manager needs one to exist before the first connection attempt, and
/// `ConnectionHandle::send` already treats a gone receiver as a harmless,
/// logged no-op (spec.md §5: "never block").
fn idle_handle(events: Arc<EventBus>) -> ConnectionHandle {
    let (tx, _rx) = mpsc::unbounded_channel();
    ConnectionHandle::new(tx, events)
}

fn parse_ignore_categories(spec: &str) -> Vec<IgnoreCategory> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.to_ascii_lowercase().as_str() {
            "all" => Some(IgnoreCategory::All),
            "message" | "privmsg" => Some(IgnoreCategory::Message),
            "notice" => Some(IgnoreCategory::Notice),
            "ctcp" => Some(IgnoreCategory::Ctcp),
            "invite" => Some(IgnoreCategory::Invite),
            _ => None,
        })
        .collect()
}

fn connection_info_from_profile(profile: &ServerProfile) -> ConnectionInfo {
    ConnectionInfo {
        host: profile.address.clone(),
        port: profile.port,
        tls: profile.ssl,
        verify_cert: profile.verify_ssl_cert,
        nick: profile.nick.clone(),
        username: profile.username.clone(),
        realname: profile.realname.clone(),
        server_password: profile.password.clone(),
        nickserv_password: profile.nickserv_password.clone(),
        sasl_username: profile.sasl_username.clone(),
        sasl_password: profile.sasl_password.clone(),
        desired_caps: profile.desired_caps.iter().cloned().collect(),
    }
}

/// Owns one server connection's worth of state: the `Dispatcher` (and the
/// `ContextStore`/ignore list it holds), the DCC Manager, the Trigger
/// Engine, and the single `EventBus` all of them publish to.
///
/// The DCC Manager is rebuilt on every connection attempt (it needs a
/// `ConnectionHandle` wired to that attempt's outbound channel to relay
/// CTCP replies) and published behind a `RwLock<Arc<_>>`, the same
/// swap-the-whole-thing pattern `ConfigSnapshot` uses for `/rehash`. A
/// transfer already in flight keeps running after a reconnect — its
/// `tokio::spawn` task holds its own `Arc<DccTransfer>` independent of the
/// manager — but it drops out of `get_transfer_statuses()`/
/// `cancel_transfer()` bookkeeping, since those address transfers through
/// the manager that started them. Documented in DESIGN.md; a client whose
/// control connection is dropping mid-transfer is already in a degraded
/// state.
pub struct Client {
    config: ConfigSnapshot,
    events: Arc<EventBus>,
    dispatcher: Dispatcher,
    dcc: RwLock<Arc<DccManager>>,
    triggers: Arc<TriggerEngine>,
    /// The current connection's outbound handle, published so the
    /// embedding app can send user-typed commands or Trigger Engine
    /// `Command` actions without threading a channel of its own through
    /// [`Client::run`]. `None` while disconnected.
    outbound: RwLock<Option<ConnectionHandle>>,
    shutdown: CancellationToken,
}

impl Client {
    /// `headless` selects the Context Store's 50-line buffer instead of the
    /// UI default of 500 (spec.md §3). `client_version` is the CTCP VERSION
    /// auto-reply body.
    pub fn new(config: ClientConfig, headless: bool, client_version: impl Into<String>) -> Self {
        let events = Arc::new(EventBus::new());
        let contexts = ContextStore::new(headless);

        let mut ignore = IgnoreList::new();
        for (mask, categories) in &config.ignore_list {
            ignore.add(mask.clone(), &parse_ignore_categories(categories));
        }

        let triggers = Arc::new(TriggerEngine::new());
        let config_snapshot = ConfigSnapshot::new(config);
        let dcc = DccManager::new(config_snapshot.clone(), idle_handle(events.clone()), events.clone());
        let dispatcher = Dispatcher::new(contexts, events.clone(), ignore, client_version);

        Client {
            config: config_snapshot,
            events,
            dispatcher,
            dcc: RwLock::new(Arc::new(dcc)),
            triggers,
            outbound: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn contexts(&self) -> &ContextStore {
        self.dispatcher.contexts()
    }

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    /// The DCC Manager for whichever connection attempt is current. Held
    /// behind a lock rather than an `Arc` field directly since a reconnect
    /// replaces it (see the struct doc comment).
    pub fn dcc(&self) -> Arc<DccManager> {
        self.dcc.read().unwrap().clone()
    }

    /// `/rehash`: swaps the published config for every reader that holds a
    /// `ConfigSnapshot` clone.
    pub fn rehash(&self, new_config: ClientConfig) {
        self.config.rehash(new_config);
    }

    /// Requests a graceful shutdown: the current connection attempt (if
    /// any) sends `QUIT` and the reconnect loop in [`Client::run`] exits
    /// instead of redialing.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Sends a message over the current connection. Returns `false` without
    /// sending anything while disconnected — callers that need to queue a
    /// command until reconnect should hold onto it themselves.
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.outbound.read().unwrap().as_ref() {
            Some(handle) => {
                handle.send(message);
                true
            }
            None => false,
        }
    }

    /// Validates `profile`, then dials and redials it with exponential
    /// backoff (spec.md §4.6: "initial 1s, doubling to a cap") until
    /// [`Client::request_shutdown`] is called or the profile fails
    /// validation. Each attempt resets CAP/SASL/Registration state and gets
    /// a fresh DCC Manager (see the struct doc comment).
    pub async fn run(&self, profile_name: &str, profile: &ServerProfile) -> Result<(), IrcClientError> {
        profile.validate(profile_name)?;
        let info = connection_info_from_profile(profile);
        info.validate()?;

        let mut backoff = ReconnectBackoff::default();
        while !self.shutdown.is_cancelled() {
            match self.connect_once(&info).await {
                Ok(()) => backoff.reset(),
                Err(e) => warn!("client: connection attempt to {}:{} failed: {e}", info.host, info.port),
            }
            if self.shutdown.is_cancelled() {
                break;
            }
            let delay = backoff.next_delay();
            info!("client: reconnecting to {}:{} in {delay:?}", info.host, info.port);
            tokio::time::sleep(delay).await;
        }
        self.events.emit(Event::ClientShutdownFinal);
        Ok(())
    }

    /// Dials once, runs CAP/SASL/registration and the read/write loops
    /// until the connection closes (EOF, transport error, or shutdown
    /// request), then returns. Grounded on `handlers/client.rs`'s
    /// reader-task/writer-task split over `tokio::io::split`.
    async fn connect_once(&self, info: &ConnectionInfo) -> Result<(), IrcClientError> {
        info!("client: dialing {}:{} (tls={})", info.host, info.port, info.tls);
        let socket = transport::dial(&info.host, info.port, info.tls, info.verify_cert).await?;
        let (read_half, write_half) = tokio::io::split(socket);

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();

        let handle = ConnectionHandle::new(cmd_tx, self.events.clone());
        let mut supervisor = ConnectionSupervisor::new(handle.clone(), info);

        *self.dcc.write().unwrap() = Arc::new(DccManager::new(self.config.clone(), handle.clone(), self.events.clone()));
        let cleanup_task = dcc::spawn_cleanup_task(self.dcc());
        *self.outbound.write().unwrap() = Some(handle.clone());

        self.events.emit(Event::ClientConnected {
            server: info.host.clone(),
            port: info.port,
            nick: info.nick.clone(),
            ssl: info.tls,
        });

        // Bridges typed outbound messages to the raw-line writer, the only
        // place serialization failures (embedded CR/LF, oversized lines)
        // surface — dropped and logged rather than tearing down the
        // connection over one bad line.
        let serialize_task = tokio::spawn(async move {
            while let Some(message) = cmd_rx.recv().await {
                match message.serialize() {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("client: dropped unserializable outbound message: {e}"),
                }
            }
        });

        let write_task = tokio::spawn(async move {
            if let Err(e) = transport::run_write_loop(write_half, line_rx).await {
                warn!("client: write loop ended: {e}");
            }
        });

        let read_task = tokio::spawn(async move {
            transport::run_read_loop(read_half, |line| {
                let _ = inbound_tx.send(line);
            })
            .await
        });

        supervisor.on_connected();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    handle.send(OutboundMessage::new("QUIT").with_trailing("client shutting down"));
                    break;
                }
                line = inbound_rx.recv() => {
                    match line {
                        Some(line) => self.process_line(&mut supervisor, &handle, &line).await,
                        None => break,
                    }
                }
            }
            if supervisor.state() == ConnectionState::Error {
                break;
            }
        }

        *self.outbound.write().unwrap() = None;
        drop(handle);
        cleanup_task.abort();
        let read_result = read_task.await;
        let _ = write_task.await;
        let _ = serialize_task.await;

        self.events.emit(Event::ClientDisconnected { server: info.host.clone(), port: info.port });

        match read_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => {
                warn!("client: read task did not exit cleanly: {e}");
                Ok(())
            }
        }
    }

    /// Parses one inbound line, dispatches it, sends whatever replies the
    /// Dispatcher produced, and forwards anything the Dispatcher couldn't
    /// finish handling itself (spec.md §9: the Dispatcher has no reference
    /// to the Supervisor or the DCC Manager) to whichever of those owns it.
    async fn process_line(&self, supervisor: &mut ConnectionSupervisor, handle: &ConnectionHandle, line: &str) {
        let msg = match message::parse_line(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("client: malformed line {line:?}: {e}");
                return;
            }
        };

        let (outcome, replies) = self.dispatcher.handle(&supervisor.identity, &msg).await;
        for reply in replies {
            handle.send(reply);
        }

        match outcome {
            DispatchOutcome::Handled | DispatchOutcome::Ignored => {}
            DispatchOutcome::Cap { subcommand, caps, is_final } => {
                let caps: Vec<&str> = caps.iter().map(String::as_str).collect();
                match subcommand {
                    CapSubcommand::Ls => supervisor.on_cap_ls(&caps, is_final),
                    CapSubcommand::Ack => supervisor.on_cap_ack(&caps),
                    CapSubcommand::Nak => supervisor.on_cap_nak(&caps),
                    CapSubcommand::New => supervisor.on_cap_new(&caps),
                    CapSubcommand::Del => supervisor.on_cap_del(&caps),
                }
            }
            DispatchOutcome::AuthenticateLine { payload } => supervisor.on_authenticate_line(&payload),
            DispatchOutcome::SaslNumeric { numeric } => supervisor.on_sasl_numeric(numeric),
            DispatchOutcome::NickCollision => supervisor.on_nick_collision(),
            DispatchOutcome::Welcome { server_message } => {
                let nick = supervisor.identity.nick().await;
                self.events.emit(Event::ClientRegistered { nick, server_message });
                supervisor.on_welcome().await;
            }
            DispatchOutcome::DccCtcp { source, userhost, payload } => {
                self.dcc().handle_incoming_ctcp(&source, &userhost, &payload).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ClientConfig {
        ClientConfig::parse(
            r#"
[Server.Example]
address = "irc.example.com"
port = 6697
ssl = true
nick = "bob"
username = "bob"
realname = "Bob"

[IgnoreList]
"spammer!*@*" = "message,notice"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn new_wires_ignore_list_categories_from_config() {
        let client = Client::new(sample_config(), true, "irc_client_core/0.1");
        let identity = identity::ClientIdentity::new("bob", "bob", "Bob");

        let msg = message::parse_line(":spammer!x@y.z PRIVMSG bob :hello").unwrap();
        let (outcome, _) = client.dispatcher.handle(&identity, &msg).await;
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }

    #[test]
    fn dcc_manager_is_available_before_any_connection() {
        let client = Client::new(sample_config(), true, "irc_client_core/0.1");
        assert!(client.dcc().get_transfer_statuses().is_empty());
    }

    #[test]
    fn rehash_is_visible_through_config_snapshot() {
        let client = Client::new(sample_config(), true, "irc_client_core/0.1");
        let mut replacement = (*client.config().current()).clone();
        replacement.dcc.download_dir = "/tmp/elsewhere".to_string();
        client.rehash(replacement);
        assert_eq!(client.config().current().dcc.download_dir, "/tmp/elsewhere");
    }
}

//! The Numeric & Command Dispatcher (spec.md §4.7): the single place that
//! turns a [`ParsedMessage`] into Context Store mutations and Event Bus
//! emissions.
//!
//! Grounded on `irc_server/src/handlers/request.rs`'s dispatch-by-trying-
//! each-handler shape (there, a chain of `or_else`s over per-subsystem
//! parsers; here, one big match on [`Command`] since a client dispatches
//! by what the *server* sent rather than validating what a client typed)
//! and `irc_server/src/channel_ops.rs` (JOIN/PART/MODE/TOPIC semantics,
//! generalized from "validate and apply" to "observe and record").
//!
//! CAP/AUTHENTICATE lines and the handful of numerics that belong to
//! registration (001, 433, 900-908) are *not* applied here — the
//! Dispatcher has no reference to the `ConnectionSupervisor` (spec.md §9:
//! avoid back-references between coordinators), so [`handle`] reports
//! them as a [`DispatchOutcome`] variant and the caller that owns both the
//! Dispatcher and the Supervisor forwards it.

pub mod ctcp;
pub mod isupport;
pub mod numerics;

use std::sync::{Arc, Mutex};

use log::warn;

use crate::context::{ChannelJoinStatus, ContextKind, ContextStore};
use crate::events::{Event, EventBus};
use crate::identity::ClientIdentity;
use crate::ignore::{IgnoreCategory, IgnoreList};
use crate::message::{Command, ParsedMessage};

use isupport::IsupportTable;

/// What a dispatched message turned out to be, for the cases the
/// Dispatcher can't finish handling on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Fully handled: Context Store updated, Event Bus notified as
    /// appropriate. Nothing further to do.
    Handled,
    /// Suppressed by the ignore list. Distinguished from `Handled` only
    /// for callers that want to count/log suppressions.
    Ignored,
    Cap { subcommand: CapSubcommand, caps: Vec<String>, is_final: bool },
    AuthenticateLine { payload: String },
    SaslNumeric { numeric: u16 },
    NickCollision,
    Welcome { server_message: String },
    /// A `\x01DCC ...\x01` CTCP arrived over PRIVMSG/NOTICE. The Dispatcher
    /// has no reference to the DCC manager (same reasoning as CAP/
    /// AUTHENTICATE above), so the caller forwards the raw payload.
    DccCtcp { source: String, userhost: String, payload: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapSubcommand {
    Ls,
    Ack,
    Nak,
    New,
    Del,
}

/// Holds everything the Dispatcher mutates or consults for one connection.
/// Owns no transport or registration state — that's the
/// `ConnectionSupervisor`'s job; this only ever reacts to what already
/// arrived on the wire.
pub struct Dispatcher {
    contexts: ContextStore,
    events: Arc<EventBus>,
    ignore: Mutex<IgnoreList>,
    isupport: Mutex<IsupportTable>,
    client_version: String,
}

impl Dispatcher {
    pub fn new(contexts: ContextStore, events: Arc<EventBus>, ignore: IgnoreList, client_version: impl Into<String>) -> Self {
        Dispatcher {
            contexts,
            events,
            ignore: Mutex::new(ignore),
            isupport: Mutex::new(IsupportTable::new()),
            client_version: client_version.into(),
        }
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The outbound replies a caller should send after dispatching
    /// (PONG, CTCP auto-replies) — kept as a return value instead of a
    /// `ConnectionHandle` field so the Dispatcher stays transport-agnostic
    /// and trivially testable without a channel.
    pub async fn handle(&self, identity: &ClientIdentity, msg: &ParsedMessage) -> (DispatchOutcome, Vec<crate::message::OutboundMessage>) {
        let mut replies = Vec::new();
        let outcome = self.handle_inner(identity, msg, &mut replies).await;
        (outcome, replies)
    }

    async fn handle_inner(
        &self,
        identity: &ClientIdentity,
        msg: &ParsedMessage,
        replies: &mut Vec<crate::message::OutboundMessage>,
    ) -> DispatchOutcome {
        match &msg.command {
            Command::Named(name) => self.handle_named(identity, name, msg, replies).await,
            Command::Numeric(n) => self.handle_numeric(identity, *n, msg).await,
        }
    }

    async fn handle_named(
        &self,
        identity: &ClientIdentity,
        name: &str,
        msg: &ParsedMessage,
        replies: &mut Vec<crate::message::OutboundMessage>,
    ) -> DispatchOutcome {
        match name {
            "PING" => {
                let mut pong = crate::message::OutboundMessage::new("PONG");
                if let Some(t) = &msg.trailing {
                    pong = pong.with_trailing(t.clone());
                }
                replies.push(pong);
                DispatchOutcome::Handled
            }
            "PRIVMSG" => self.handle_privmsg_or_notice(identity, msg, false, replies).await,
            "NOTICE" => self.handle_privmsg_or_notice(identity, msg, true, replies).await,
            "JOIN" => self.handle_join(identity, msg, replies).await,
            "PART" => self.handle_part(identity, msg).await,
            "KICK" => self.handle_kick(identity, msg).await,
            "QUIT" => self.handle_quit(msg),
            "NICK" => self.handle_nick(identity, msg).await,
            "MODE" => self.handle_mode(msg),
            "TOPIC" => self.handle_topic(msg),
            "CHGHOST" => self.handle_chghost(identity, msg).await,
            "AWAY" => self.handle_away(msg),
            "CAP" => self.handle_cap(msg),
            "AUTHENTICATE" => {
                let payload = msg.param(0).or(msg.trailing.as_deref()).unwrap_or("").to_string();
                DispatchOutcome::AuthenticateLine { payload }
            }
            _ => {
                warn!("dispatch: unhandled command {name}");
                DispatchOutcome::Handled
            }
        }
    }

    async fn handle_privmsg_or_notice(
        &self,
        identity: &ClientIdentity,
        msg: &ParsedMessage,
        is_notice: bool,
        replies: &mut Vec<crate::message::OutboundMessage>,
    ) -> DispatchOutcome {
        let source_nick = msg.source_nick.clone().unwrap_or_default();
        let userhost = msg.prefix.clone().unwrap_or_default();
        let target = msg.param(0).unwrap_or_default().to_string();
        let body = msg.trailing.clone().unwrap_or_default();
        let is_channel = target.starts_with(['#', '&', '!', '+']);

        if let Some(ctcp) = ctcp::extract_ctcp(&body) {
            if self.is_ignored(&userhost, IgnoreCategory::Ctcp) {
                return DispatchOutcome::Ignored;
            }
            if ctcp::is_dcc(&ctcp) {
                return DispatchOutcome::DccCtcp {
                    source: source_nick,
                    userhost,
                    payload: ctcp.argument.unwrap_or_default(),
                };
            }
            if let Some(action) = ctcp::action_text(&ctcp) {
                let context_name = if is_channel { target.clone() } else { source_nick.clone() };
                self.contexts.append_message(&context_name, format!("* {source_nick} {action}"), "action");
                self.events.emit(Event::Privmsg {
                    nick: source_nick,
                    userhost,
                    target,
                    message: action.to_string(),
                    is_channel,
                    tags: tag_pairs(msg),
                });
                return DispatchOutcome::Handled;
            }
            if !is_notice && ctcp::is_auto_reply_tag(&ctcp.tag) {
                if let Some(reply_body) = ctcp::build_auto_reply(&ctcp, &self.client_version, "now") {
                    replies.push(
                        crate::message::OutboundMessage::new("NOTICE")
                            .with_param(source_nick.clone())
                            .with_trailing(reply_body),
                    );
                }
            }
            return DispatchOutcome::Handled;
        }

        let category = if is_notice { IgnoreCategory::Notice } else { IgnoreCategory::Message };
        if self.is_ignored(&userhost, category) {
            return DispatchOutcome::Ignored;
        }

        let context_name = if is_channel { target.clone() } else { source_nick.clone() };
        let style = if is_notice { "notice" } else { "message" };
        self.contexts.append_message(&context_name, format!("<{source_nick}> {body}"), style);

        let event = if is_notice {
            Event::Notice {
                nick: source_nick,
                userhost,
                target,
                message: body,
                is_channel,
                tags: tag_pairs(msg),
            }
        } else {
            Event::Privmsg {
                nick: source_nick,
                userhost,
                target,
                message: body,
                is_channel,
                tags: tag_pairs(msg),
            }
        };
        let _ = identity; // self-directed messages need no special casing: context key already resolves correctly
        self.events.emit(event);
        DispatchOutcome::Handled
    }

    async fn handle_join(
        &self,
        identity: &ClientIdentity,
        msg: &ParsedMessage,
        replies: &mut Vec<crate::message::OutboundMessage>,
    ) -> DispatchOutcome {
        let nick = msg.source_nick.clone().unwrap_or_default();
        let userhost = msg.prefix.clone().unwrap_or_default();
        let channel = msg.param(0).or(msg.trailing.as_deref()).unwrap_or_default().to_string();
        // extended-join appends account (or "*") and the realname trailing.
        let account = msg.param(1).filter(|a| *a != "*").map(|s| s.to_string());
        let realname = if msg.param(1).is_some() { msg.trailing.clone() } else { None };

        let is_self = identity.is_self_nick(&nick).await;
        self.contexts.get_or_create(&channel, ContextKind::Channel, None);
        self.contexts.append_message(&channel, format!("-> {nick} has joined {channel}"), "join");

        if is_self {
            // spec.md §4.7: "clear roster, request NAMES+MODE" — the old
            // roster (from a prior join of this channel) must not bleed
            // into the new one while we wait for fresh NAMES.
            self.contexts.clear_roster(&channel);
            let current = self.contexts.join_status(&channel).unwrap_or_default();
            self.contexts.set_join_status(&channel, current.on_self_join_observed());
            replies.push(crate::message::OutboundMessage::new("NAMES").with_param(channel.clone()));
            replies.push(crate::message::OutboundMessage::new("MODE").with_param(channel.clone()));
        } else {
            self.contexts.add_user(&channel, &nick, "");
        }

        self.events.emit(Event::Join { nick, userhost, channel, account, realname, is_self });
        DispatchOutcome::Handled
    }

    async fn handle_part(&self, identity: &ClientIdentity, msg: &ParsedMessage) -> DispatchOutcome {
        let nick = msg.source_nick.clone().unwrap_or_default();
        let userhost = msg.prefix.clone().unwrap_or_default();
        let channel = msg.param(0).unwrap_or_default().to_string();
        let reason = msg.trailing.clone();
        let is_self = identity.is_self_nick(&nick).await;

        let suffix = reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
        self.contexts.append_message(&channel, format!("<- {nick} has left {channel}{suffix}"), "part");

        if is_self {
            self.contexts.clear_roster(&channel);
            let current = self.contexts.join_status(&channel).unwrap_or_default();
            self.contexts.set_join_status(&channel, current.on_removed());
            self.contexts.select_fallback_if_active(&channel);
        } else {
            self.contexts.remove_user(&channel, &nick);
        }

        self.events.emit(Event::Part { nick, userhost, channel, reason, is_self });
        DispatchOutcome::Handled
    }

    /// spec.md §4.7: "PART/QUIT/KICK: update roster; if self-PART/KICK,
    /// transition context to `NotJoined`, discard roster, auto-select a
    /// fallback active context." Mirrors `handle_part`'s self branch.
    async fn handle_kick(&self, identity: &ClientIdentity, msg: &ParsedMessage) -> DispatchOutcome {
        let kicker = msg.source_nick.clone().unwrap_or_default();
        let kicker_userhost = msg.prefix.clone().unwrap_or_default();
        let channel = msg.param(0).unwrap_or_default().to_string();
        let kicked_nick = msg.param(1).unwrap_or_default().to_string();
        let reason = msg.trailing.clone();
        let is_self = identity.is_self_nick(&kicked_nick).await;

        let suffix = reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
        self.contexts
            .append_message(&channel, format!("<- {kicked_nick} was kicked by {kicker}{suffix}"), "kick");

        if is_self {
            self.contexts.clear_roster(&channel);
            let current = self.contexts.join_status(&channel).unwrap_or_default();
            self.contexts.set_join_status(&channel, current.on_removed());
            self.contexts.select_fallback_if_active(&channel);
        } else {
            self.contexts.remove_user(&channel, &kicked_nick);
        }

        self.events.emit(Event::Kick { kicked_nick, kicker, kicker_userhost, channel, reason, is_self });
        DispatchOutcome::Handled
    }

    fn handle_quit(&self, msg: &ParsedMessage) -> DispatchOutcome {
        let nick = msg.source_nick.clone().unwrap_or_default();
        let userhost = msg.prefix.clone().unwrap_or_default();
        let reason = msg.trailing.clone();

        let suffix = reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
        for channel in self.contexts.ordered_names() {
            let in_channel = self.contexts.get(&channel).map(|ctx| ctx.users.contains(&nick)).unwrap_or(false);
            if in_channel {
                self.contexts.remove_user(&channel, &nick);
                self.contexts.append_message(&channel, format!("<- {nick} has quit{suffix}"), "quit");
            }
        }

        self.events.emit(Event::Quit { nick, userhost, reason });
        DispatchOutcome::Handled
    }

    async fn handle_nick(&self, identity: &ClientIdentity, msg: &ParsedMessage) -> DispatchOutcome {
        let old_nick = msg.source_nick.clone().unwrap_or_default();
        let userhost = msg.prefix.clone().unwrap_or_default();
        let new_nick = msg.param(0).or(msg.trailing.as_deref()).unwrap_or_default().to_string();
        let is_self = identity.is_self_nick(&old_nick).await;

        self.contexts.rename_user_everywhere(&old_nick, &new_nick);
        for channel in self.contexts.ordered_names() {
            if self.contexts.get(&channel).map(|c| c.users.contains(&new_nick)).unwrap_or(false) {
                self.contexts.append_message(&channel, format!("* {old_nick} is now known as {new_nick}"), "nick");
            }
        }

        if is_self {
            identity.set_nick(&new_nick).await;
            self.events.emit(Event::ClientNickChanged { old_nick: old_nick.clone(), new_nick: new_nick.clone() });
        }

        self.events.emit(Event::Nick { old_nick, new_nick, userhost, is_self });
        DispatchOutcome::Handled
    }

    fn handle_mode(&self, msg: &ParsedMessage) -> DispatchOutcome {
        let target = msg.param(0).unwrap_or_default().to_string();
        let setter = msg.source_nick.clone().unwrap_or_default();
        let setter_userhost = msg.prefix.clone().unwrap_or_default();
        let mode_string = msg.param(1).unwrap_or_default().to_string();
        let mode_params: Vec<String> = msg.params.iter().skip(2).cloned().collect();

        let isupport = self.isupport.lock().unwrap();
        let changes = numerics::parse_mode_changes(&mode_string, mode_params.iter(), |c| isupport.param_arity(c));
        let is_channel = target.starts_with(['#', '&', '!', '+']);

        if is_channel {
            for change in &changes {
                let status_symbol = isupport
                    .prefix_symbols()
                    .iter()
                    .find(|&&s| isupport.letter_for_symbol(s) == Some(change.letter))
                    .copied();
                if let Some(symbol) = status_symbol {
                    if let Some(nick) = &change.param {
                        // Insert/remove just this one symbol — spec.md
                        // §4.7: "+o adds @ to target's prefix; -o removes
                        // it" — a full-string replace here would wipe any
                        // other multi-prefix symbol the nick already has.
                        if change.adding {
                            self.contexts.add_prefix_symbol(&target, nick, symbol, isupport.prefix_symbols());
                        } else {
                            self.contexts.remove_prefix_symbol(&target, nick, symbol);
                        }
                    }
                } else if let Some(mut ctx) = self.contexts.get_mut(&target) {
                    if change.adding {
                        ctx.modes.insert(change.letter);
                    } else {
                        ctx.modes.remove(&change.letter);
                    }
                }
            }
            let current_channel_modes = self.contexts.get(&target).map(|c| c.modes.iter().copied().collect()).unwrap_or_default();
            self.contexts.append_message(&target, format!("* {setter} sets mode {mode_string} {}", mode_params.join(" ")), "mode");
            self.events.emit(Event::ChannelModeApplied {
                channel: target.clone(),
                setter_nick: setter.clone(),
                setter_userhost: setter_userhost.clone(),
                mode_changes: changes.iter().map(|c| (c.letter, c.adding, c.param.clone())).collect(),
                current_channel_modes,
            });
        }

        self.events.emit(Event::Mode {
            target,
            setter,
            setter_userhost,
            mode_string,
            mode_params,
            parsed_modes: changes.into_iter().map(|c| (c.letter, c.adding, c.param)).collect(),
        });
        DispatchOutcome::Handled
    }

    fn handle_topic(&self, msg: &ParsedMessage) -> DispatchOutcome {
        let channel = msg.param(0).unwrap_or_default().to_string();
        let nick = msg.source_nick.clone().unwrap_or_default();
        let userhost = msg.prefix.clone().unwrap_or_default();
        let topic = msg.trailing.clone().unwrap_or_default();

        self.contexts.set_topic(&channel, Some(topic.clone()));
        self.contexts.append_message(&channel, format!("* {nick} changed the topic to: {topic}"), "topic");
        self.events.emit(Event::Topic { nick, userhost, channel, topic });
        DispatchOutcome::Handled
    }

    async fn handle_chghost(&self, identity: &ClientIdentity, msg: &ParsedMessage) -> DispatchOutcome {
        let nick = msg.source_nick.clone().unwrap_or_default();
        let old_userhost = msg.prefix.clone().unwrap_or_default();
        let new_ident = msg.param(0).unwrap_or_default().to_string();
        let new_host = msg.param(1).unwrap_or_default().to_string();

        if identity.is_self_nick(&nick).await {
            identity.set_userhost(format!("{nick}!{new_ident}@{new_host}")).await;
        }

        self.events.emit(Event::Chghost { nick, new_ident, new_host, old_userhost });
        DispatchOutcome::Handled
    }

    /// `away-notify` (spec.md §6): updates the away flag on every roster
    /// entry for this nick rather than tracking it per-channel, since a
    /// user's away state isn't channel-specific.
    fn handle_away(&self, msg: &ParsedMessage) -> DispatchOutcome {
        let nick = msg.source_nick.clone().unwrap_or_default();
        let userhost = msg.prefix.clone().unwrap_or_default();
        let message = msg.trailing.clone();
        self.contexts.set_away_everywhere(&nick, message.is_some());
        self.events.emit(Event::Away { nick, userhost, message });
        DispatchOutcome::Handled
    }

    fn handle_cap(&self, msg: &ParsedMessage) -> DispatchOutcome {
        let subcommand = match msg.param(1).unwrap_or_default().to_ascii_uppercase().as_str() {
            "LS" => CapSubcommand::Ls,
            "ACK" => CapSubcommand::Ack,
            "NAK" => CapSubcommand::Nak,
            "NEW" => CapSubcommand::New,
            "DEL" => CapSubcommand::Del,
            other => {
                warn!("dispatch: unrecognized CAP subcommand {other}");
                return DispatchOutcome::Handled;
            }
        };
        let is_final = msg.param(2) != Some("*");
        let caps: Vec<String> = msg
            .trailing
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        DispatchOutcome::Cap { subcommand, caps, is_final }
    }

    async fn handle_numeric(&self, identity: &ClientIdentity, n: u16, msg: &ParsedMessage) -> DispatchOutcome {
        use numerics::*;

        if n == RPL_WELCOME {
            let server_message = msg.trailing.clone().unwrap_or_default();
            self.contexts.append_message(crate::context::STATUS_CONTEXT_NAME, server_message.clone(), "status");
            return DispatchOutcome::Welcome { server_message };
        }
        if n == ERR_NICKNAMEINUSE {
            return DispatchOutcome::NickCollision;
        }
        if is_sasl_outcome(n) {
            return DispatchOutcome::SaslNumeric { numeric: n };
        }
        if n == RPL_ISUPPORT {
            let tokens: Vec<String> = msg.params.iter().skip(1).cloned().collect();
            self.isupport.lock().unwrap().apply_tokens(&tokens);
            return DispatchOutcome::Handled;
        }
        if n == RPL_NOTOPIC || n == RPL_TOPIC {
            let channel = msg.param(1).unwrap_or_default().to_string();
            let topic = if n == RPL_TOPIC { msg.trailing.clone() } else { None };
            self.contexts.set_topic(&channel, topic);
            return DispatchOutcome::Handled;
        }
        if n == RPL_NAMREPLY {
            let channel = msg.param(2).unwrap_or_default().to_string();
            self.contexts.get_or_create(&channel, ContextKind::Channel, None);
            for entry in parse_names_trailing(msg.trailing.as_deref().unwrap_or_default()) {
                self.contexts.add_user(&channel, &entry.nick, &entry.prefix);
                if identity.is_self_nick(&entry.nick).await {
                    let current = self.contexts.join_status(&channel).unwrap_or_default();
                    self.contexts.set_join_status(&channel, current.on_self_join_observed());
                }
            }
            return DispatchOutcome::Handled;
        }
        if n == RPL_ENDOFNAMES {
            let channel = msg.param(1).unwrap_or_default().to_string();
            let current = self.contexts.join_status(&channel).unwrap_or(ChannelJoinStatus::NotJoined);
            let next = current.on_end_of_names();
            self.contexts.set_join_status(&channel, next);
            if next.is_joined() {
                self.events.emit(Event::ChannelFullyJoined { channel_name: channel });
            }
            return DispatchOutcome::Handled;
        }
        if is_join_error(n) {
            let channel = msg.param(1).unwrap_or_default().to_string();
            let current = self.contexts.join_status(&channel).unwrap_or_default();
            self.contexts.set_join_status(&channel, current.on_join_error());
            let reason = msg.trailing.clone().unwrap_or_default();
            self.contexts.append_message(&channel, format!("* cannot join {channel}: {reason}"), "error");
            return DispatchOutcome::Handled;
        }
        if n == ERR_NOSUCHNICK || n == ERR_NOSUCHCHANNEL {
            let target = msg.param(1).unwrap_or_default().to_string();
            let reason = msg.trailing.clone().unwrap_or_default();
            self.contexts.append_message(crate::context::STATUS_CONTEXT_NAME, format!("* {target}: {reason}"), "error");
            return DispatchOutcome::Handled;
        }
        if n == RPL_LISTSTART || n == RPL_LIST || n == RPL_LISTEND {
            self.contexts.get_or_create("List Results", ContextKind::ListResults, None);
            let line = msg.all_params().join(" ");
            self.contexts.append_message("List Results", line, "list");
            return DispatchOutcome::Handled;
        }
        if matches!(
            n,
            RPL_WHOISUSER | RPL_ENDOFWHOIS | RPL_WHOREPLY | RPL_ENDOFWHO | RPL_WHOWASUSER | RPL_ENDOFWHOWAS
        ) {
            let line = msg.all_params().join(" ");
            self.contexts.append_message(crate::context::STATUS_CONTEXT_NAME, line, "info");
            return DispatchOutcome::Handled;
        }

        let line = format!("{:03} {}", n, msg.all_params().join(" "));
        self.contexts.append_message(crate::context::STATUS_CONTEXT_NAME, line, "raw");
        self.events.emit(Event::RawIrcNumeric {
            numeric: n,
            source: msg.prefix.clone(),
            params_list: msg.params.clone(),
            display_params_list: msg.params.iter().skip(1).cloned().collect(),
            trailing: msg.trailing.clone(),
            tags: tag_pairs(msg),
        });
        DispatchOutcome::Handled
    }

    fn is_ignored(&self, source: &str, category: IgnoreCategory) -> bool {
        self.ignore.lock().unwrap().is_ignored(source, category)
    }
}

fn tag_pairs(msg: &ParsedMessage) -> Vec<(String, String)> {
    msg.tags
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_line;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ContextStore::new(false), Arc::new(EventBus::new()), IgnoreList::new(), "irc_client_core/0.1")
    }

    #[tokio::test]
    async fn ping_produces_a_pong_reply() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        let msg = parse_line("PING :server.example.com").unwrap();
        let (outcome, replies) = d.handle(&identity, &msg).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].command, "PONG");
        assert_eq!(replies[0].trailing.as_deref(), Some("server.example.com"));
    }

    #[tokio::test]
    async fn privmsg_appends_to_channel_context_and_emits_event() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        let msg = parse_line(":alice!a@host PRIVMSG #chan :hello there").unwrap();
        let (outcome, _) = d.handle(&identity, &msg).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        let ctx = d.contexts().get("#chan").unwrap();
        assert_eq!(ctx.all_messages().next().unwrap().text, "<alice> hello there");
    }

    #[tokio::test]
    async fn ignored_source_suppresses_privmsg() {
        let d = dispatcher();
        d.ignore.lock().unwrap().add("alice!*@*", &[]);
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        let msg = parse_line(":alice!a@host PRIVMSG #chan :spam").unwrap();
        let (outcome, _) = d.handle(&identity, &msg).await;
        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(!d.contexts().exists("#chan"));
    }

    #[tokio::test]
    async fn version_ctcp_request_triggers_auto_reply() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        let msg = parse_line(":alice!a@host PRIVMSG bob :\u{01}VERSION\u{01}").unwrap();
        let (_, replies) = d.handle(&identity, &msg).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].command, "NOTICE");
        assert_eq!(replies[0].trailing.as_deref(), Some("\u{01}VERSION irc_client_core/0.1\u{01}"));
    }

    #[tokio::test]
    async fn action_is_styled_distinctly_from_ordinary_messages() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        let msg = parse_line(":alice!a@host PRIVMSG #chan :\u{01}ACTION waves\u{01}").unwrap();
        d.handle(&identity, &msg).await;
        let ctx = d.contexts().get("#chan").unwrap();
        let first = ctx.all_messages().next().unwrap();
        assert_eq!(first.text, "* alice waves");
        assert_eq!(first.style, "action");
    }

    #[tokio::test]
    async fn full_join_and_names_transcript_reaches_fully_joined() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");

        let join = parse_line(":bob!b@host JOIN #chan").unwrap();
        d.handle(&identity, &join).await;
        assert_eq!(d.contexts().join_status("#chan"), Some(ChannelJoinStatus::SelfJoinReceived));

        let names = parse_line(":server 353 bob = #chan :bob @alice +carol").unwrap();
        d.handle(&identity, &names).await;
        let ctx = d.contexts().get("#chan").unwrap();
        assert_eq!(ctx.users.prefix_of("alice"), Some("@"));
        assert_eq!(ctx.users.prefix_of("carol"), Some("+"));
        drop(ctx);

        let end = parse_line(":server 366 bob #chan :End of /NAMES list.").unwrap();
        d.handle(&identity, &end).await;
        assert_eq!(d.contexts().join_status("#chan"), Some(ChannelJoinStatus::FullyJoined));
    }

    #[tokio::test]
    async fn quit_removes_the_nick_from_every_channel_it_was_in() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        d.handle(&identity, &parse_line(":bob!b@host JOIN #a").unwrap()).await;
        d.handle(&identity, &parse_line(":alice!a@host JOIN #a").unwrap()).await;
        d.handle(&identity, &parse_line(":alice!a@host QUIT :gone").unwrap()).await;
        let ctx = d.contexts().get("#a").unwrap();
        assert!(!ctx.users.contains("alice"));
    }

    #[tokio::test]
    async fn mode_applies_isupport_prefix_symbol_to_roster() {
        let d = dispatcher();
        {
            let mut table = d.isupport.lock().unwrap();
            table.apply_tokens(&["PREFIX=(ov)@+".to_string()]);
        }
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        d.handle(&identity, &parse_line(":bob!b@host JOIN #chan").unwrap()).await;
        d.handle(&identity, &parse_line(":alice!a@host JOIN #chan").unwrap()).await;
        let mode = parse_line(":op!o@host MODE #chan +o alice").unwrap();
        d.handle(&identity, &mode).await;
        let ctx = d.contexts().get("#chan").unwrap();
        assert_eq!(ctx.users.prefix_of("alice"), Some("@"));
    }

    #[tokio::test]
    async fn mode_removing_one_symbol_preserves_other_multi_prefix_symbols() {
        let d = dispatcher();
        {
            let mut table = d.isupport.lock().unwrap();
            table.apply_tokens(&["PREFIX=(ov)@+".to_string()]);
        }
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        d.handle(&identity, &parse_line(":bob!b@host JOIN #chan").unwrap()).await;
        d.handle(&identity, &parse_line(":alice!a@host JOIN #chan").unwrap()).await;
        d.handle(&identity, &parse_line(":op!o@host MODE #chan +v alice").unwrap()).await;
        d.handle(&identity, &parse_line(":op!o@host MODE #chan +o alice").unwrap()).await;
        {
            let ctx = d.contexts().get("#chan").unwrap();
            assert_eq!(ctx.users.prefix_of("alice"), Some("@+"));
        }
        d.handle(&identity, &parse_line(":op!o@host MODE #chan -o alice").unwrap()).await;
        let ctx = d.contexts().get("#chan").unwrap();
        assert_eq!(ctx.users.prefix_of("alice"), Some("+"));
    }

    #[tokio::test]
    async fn self_join_clears_roster_and_requests_names_and_mode() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        d.handle(&identity, &parse_line(":bob!b@host JOIN #chan").unwrap()).await;
        d.handle(&identity, &parse_line(":alice!a@host JOIN #chan").unwrap()).await;
        let (outcome, replies) = d.handle(&identity, &parse_line(":bob!b@host JOIN #chan").unwrap()).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(replies.iter().any(|r| r.command == "NAMES"));
        assert!(replies.iter().any(|r| r.command == "MODE"));
        let ctx = d.contexts().get("#chan").unwrap();
        assert!(!ctx.users.contains("alice"));
    }

    #[tokio::test]
    async fn kick_removes_target_from_roster_and_emits_event() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        d.handle(&identity, &parse_line(":bob!b@host JOIN #chan").unwrap()).await;
        d.handle(&identity, &parse_line(":alice!a@host JOIN #chan").unwrap()).await;
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        d.events.subscribe(move |event| *seen2.lock().unwrap() = Some(event.clone()));

        let kick = parse_line(":op!o@host KICK #chan alice :spamming").unwrap();
        let (outcome, _) = d.handle(&identity, &kick).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        let ctx = d.contexts().get("#chan").unwrap();
        assert!(!ctx.users.contains("alice"));
        drop(ctx);
        match seen.lock().unwrap().clone() {
            Some(Event::Kick { kicked_nick, kicker, is_self, .. }) => {
                assert_eq!(kicked_nick, "alice");
                assert_eq!(kicker, "op");
                assert!(!is_self);
            }
            other => panic!("expected Event::Kick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn self_kick_clears_roster_and_falls_back_active_context() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        d.handle(&identity, &parse_line(":bob!b@host JOIN #chan").unwrap()).await;
        d.handle(&identity, &parse_line(":alice!a@host JOIN #chan").unwrap()).await;
        d.contexts().set_active("#chan");

        let kick = parse_line(":op!o@host KICK #chan bob :rules").unwrap();
        let (outcome, _) = d.handle(&identity, &kick).await;
        assert_eq!(outcome, DispatchOutcome::Handled);

        let ctx = d.contexts().get("#chan").unwrap();
        assert!(ctx.users.is_empty());
        assert_eq!(ctx.join_status, Some(ChannelJoinStatus::NotJoined));
        drop(ctx);
        assert_eq!(d.contexts().active_name().as_deref(), Some("status"));
    }

    #[tokio::test]
    async fn nick_collision_numeric_is_forwarded_not_handled_locally() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        let msg = parse_line(":server 433 * bob :Nickname is already in use.").unwrap();
        let (outcome, _) = d.handle(&identity, &msg).await;
        assert_eq!(outcome, DispatchOutcome::NickCollision);
    }

    #[tokio::test]
    async fn cap_ls_is_forwarded_with_parsed_caps_and_finality() {
        let d = dispatcher();
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        let msg = parse_line(":server CAP * LS * :sasl multi-prefix").unwrap();
        let (outcome, _) = d.handle(&identity, &msg).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Cap {
                subcommand: CapSubcommand::Ls,
                caps: vec!["sasl".to_string(), "multi-prefix".to_string()],
                is_final: false,
            }
        );
    }
}

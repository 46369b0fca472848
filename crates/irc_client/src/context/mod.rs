//! The Context Store (spec.md §4.2): owns every per-conversation Context
//! (status window, channels, queries, list-results, the DCC monitor) —
//! message ring buffer, user roster, topic, join-status, unread counter.
//!
//! Grounded on the teacher's `channels_models.rs` (`IrcChannel` with its
//! `DashSet` roster and `RwLock`-guarded topic), generalized from a
//! multi-client server's channel registry into a single client's set of
//! conversations, and given the bounded ring buffer and unread-counter
//! bookkeeping spec.md §3/§4.2 call for.

pub mod join_status;

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

pub use join_status::ChannelJoinStatus;

pub const STATUS_CONTEXT_NAME: &str = "Status";
const DEFAULT_UI_BUFFER_CAP: usize = 500;
const DEFAULT_HEADLESS_BUFFER_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Status,
    Channel,
    Query,
    ListResults,
    DccMonitor,
}

/// One line in a context's scrollback: display text, a style key the
/// renderer maps to a color/attribute, and the wall-clock time it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMessage {
    pub text: String,
    pub style: String,
    pub timestamp_unix: u64,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An ordered nickname → mode-prefix-string roster. Ordering is
/// insertion order, matching the NAMES reply order a server sends; lookups
/// are O(1) via a side index.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    order: Vec<String>,
    prefixes: std::collections::HashMap<String, String>,
    away: std::collections::HashSet<String>,
}

impl Roster {
    pub fn insert(&mut self, nick: &str, prefix: &str) {
        if !self.prefixes.contains_key(nick) {
            self.order.push(nick.to_string());
        }
        self.prefixes.insert(nick.to_string(), prefix.to_string());
    }

    pub fn remove(&mut self, nick: &str) -> bool {
        if self.prefixes.remove(nick).is_some() {
            self.order.retain(|n| n != nick);
            self.away.remove(nick);
            true
        } else {
            false
        }
    }

    pub fn rename(&mut self, old_nick: &str, new_nick: &str) -> bool {
        if let Some(prefix) = self.prefixes.remove(old_nick) {
            if let Some(slot) = self.order.iter_mut().find(|n| n.as_str() == old_nick) {
                *slot = new_nick.to_string();
            }
            self.prefixes.insert(new_nick.to_string(), prefix);
            if self.away.remove(old_nick) {
                self.away.insert(new_nick.to_string());
            }
            true
        } else {
            false
        }
    }

    /// `away-notify`: only takes effect for nicks already on the roster.
    pub fn set_away(&mut self, nick: &str, away: bool) -> bool {
        if !self.prefixes.contains_key(nick) {
            return false;
        }
        if away {
            self.away.insert(nick.to_string());
        } else {
            self.away.remove(nick);
        }
        true
    }

    pub fn is_away(&self, nick: &str) -> bool {
        self.away.contains(nick)
    }

    pub fn prefix_of(&self, nick: &str) -> Option<&str> {
        self.prefixes.get(nick).map(String::as_str)
    }

    pub fn set_prefix(&mut self, nick: &str, prefix: &str) -> bool {
        if let Some(p) = self.prefixes.get_mut(nick) {
            *p = prefix.to_string();
            true
        } else {
            false
        }
    }

    /// Adds one status `symbol` to `nick`'s existing prefix (e.g. `+o`
    /// inserting `@` into a multi-prefix `"+"`, yielding `"@+"`), re-sorted
    /// by `rank` (highest status first — the server's PREFIX order). A
    /// no-op if `nick` isn't on the roster; idempotent if the symbol is
    /// already present.
    pub fn add_prefix_symbol(&mut self, nick: &str, symbol: char, rank: &[char]) -> bool {
        if let Some(p) = self.prefixes.get_mut(nick) {
            let mut symbols: Vec<char> = p.chars().collect();
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
            symbols.sort_by_key(|c| rank.iter().position(|r| r == c).unwrap_or(usize::MAX));
            *p = symbols.into_iter().collect();
            true
        } else {
            false
        }
    }

    /// Removes one status `symbol` from `nick`'s existing prefix, leaving
    /// any other symbols (e.g. multi-prefix `"@+"` losing `@` on `-o`
    /// yields `"+"`). A no-op if `nick` isn't on the roster.
    pub fn remove_prefix_symbol(&mut self, nick: &str, symbol: char) -> bool {
        if let Some(p) = self.prefixes.get_mut(nick) {
            *p = p.chars().filter(|&c| c != symbol).collect();
            true
        } else {
            false
        }
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.prefixes.contains_key(nick)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.prefixes.clear();
        self.away.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |n| (n.as_str(), self.prefixes.get(n).map(String::as_str).unwrap_or("")))
    }
}

/// A single conversation. Mutated exclusively by the Dispatcher (single
/// writer per connection); read by the renderer and by `/lastlog`.
#[derive(Debug, Clone)]
pub struct Context {
    /// Normalized key used for lookups (lowercase).
    pub name: String,
    /// Case-preserved name shown to the user.
    pub display_name: String,
    pub kind: ContextKind,
    messages: VecDeque<ContextMessage>,
    capacity: usize,
    pub users: Roster,
    pub topic: Option<String>,
    pub modes: std::collections::HashSet<char>,
    pub unread: usize,
    pub message_scroll: usize,
    pub user_scroll: usize,
    pub join_status: Option<ChannelJoinStatus>,
}

impl Context {
    fn new(name: &str, display_name: &str, kind: ContextKind, capacity: usize) -> Self {
        Context {
            name: name.to_string(),
            display_name: display_name.to_string(),
            kind,
            messages: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            users: Roster::default(),
            topic: None,
            modes: std::collections::HashSet::new(),
            unread: 0,
            message_scroll: 0,
            user_scroll: 0,
            join_status: if kind == ContextKind::Channel {
                Some(ChannelJoinStatus::NotJoined)
            } else {
                None
            },
        }
    }

    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ContextMessage> {
        let len = self.messages.len();
        let skip = len.saturating_sub(n);
        self.messages.iter().skip(skip)
    }

    pub fn all_messages(&self) -> impl Iterator<Item = &ContextMessage> {
        self.messages.iter()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn push_message(&mut self, text: impl Into<String>, style: impl Into<String>) {
        if self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(ContextMessage {
            text: text.into(),
            style: style.into(),
            timestamp_unix: now_unix(),
        });
    }
}

/// Normalizes a context name per spec.md §4.2: channel-prefixed names
/// (`#`, `&`, `!`, `+`) lowercase in full and the lowercase form *is* the
/// display name; everything else keeps its original case for display but
/// is compared case-insensitively.
pub fn normalize_name(raw: &str) -> (String, String) {
    if raw.starts_with(['#', '&', '!', '+']) {
        let lower = raw.to_lowercase();
        (lower.clone(), lower)
    } else {
        (raw.to_lowercase(), raw.to_string())
    }
}

pub fn context_kind_for_name(raw: &str) -> ContextKind {
    if raw.eq_ignore_ascii_case(STATUS_CONTEXT_NAME) {
        ContextKind::Status
    } else if raw.starts_with(['#', '&', '!', '+']) {
        ContextKind::Channel
    } else {
        ContextKind::Query
    }
}

/// Owns every Context for one connection. Exclusively owned by that
/// connection's supervisor (spec.md §3 "Ownership").
pub struct ContextStore {
    contexts: DashMap<String, Context>,
    /// Insertion order of channel/query contexts, for fallback selection
    /// when the active context is removed. Status is never in this list —
    /// it is always the fallback of last resort.
    order: std::sync::Mutex<Vec<String>>,
    active: std::sync::Mutex<Option<String>>,
    default_capacity: usize,
}

impl ContextStore {
    /// `headless` selects the 50-line buffer spec.md §3 specifies for
    /// headless mode; otherwise the 500-line UI default.
    pub fn new(headless: bool) -> Self {
        let store = ContextStore {
            contexts: DashMap::new(),
            order: std::sync::Mutex::new(Vec::new()),
            active: std::sync::Mutex::new(None),
            default_capacity: if headless {
                DEFAULT_HEADLESS_BUFFER_CAP
            } else {
                DEFAULT_UI_BUFFER_CAP
            },
        };
        // Status queuing must work before any connection exists (spec.md
        // §9 open question, decided: queue unconditionally) — so Status
        // always exists from construction.
        store.get_or_create(STATUS_CONTEXT_NAME, ContextKind::Status, None);
        store.set_active(STATUS_CONTEXT_NAME);
        store
    }

    /// Idempotent; normalizes `name`. Returns the normalized key so callers
    /// can address the context without re-deriving it.
    pub fn get_or_create(
        &self,
        name: &str,
        kind: ContextKind,
        initial_status: Option<ChannelJoinStatus>,
    ) -> String {
        let (key, display) = normalize_name(name);
        if !self.contexts.contains_key(&key) {
            let mut ctx = Context::new(&key, &display, kind, self.default_capacity);
            if let Some(status) = initial_status {
                ctx.join_status = Some(status);
            }
            self.contexts.insert(key.clone(), ctx);
            if kind != ContextKind::Status {
                self.order.lock().unwrap().push(key.clone());
            }
        }
        key
    }

    pub fn get(&self, name: &str) -> Option<dashmap::mapref::one::Ref<'_, String, Context>> {
        let (key, _) = normalize_name(name);
        self.contexts.get(&key)
    }

    pub fn get_mut(&self, name: &str) -> Option<dashmap::mapref::one::RefMut<'_, String, Context>> {
        let (key, _) = normalize_name(name);
        self.contexts.get_mut(&key)
    }

    pub fn exists(&self, name: &str) -> bool {
        let (key, _) = normalize_name(name);
        self.contexts.contains_key(&key)
    }

    pub fn active_name(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }

    pub fn is_active(&self, name: &str) -> bool {
        let (key, _) = normalize_name(name);
        self.active_name().as_deref() == Some(key.as_str())
    }

    /// Resets the unread counter on the newly active context. Returns
    /// false if no such context exists.
    pub fn set_active(&self, name: &str) -> bool {
        let (key, _) = normalize_name(name);
        if let Some(mut ctx) = self.contexts.get_mut(&key) {
            ctx.unread = 0;
            *self.active.lock().unwrap() = Some(key);
            true
        } else {
            false
        }
    }

    /// Removes a context. If it was active, selects a fallback: the next
    /// channel/query in insertion order, else Status.
    pub fn remove(&self, name: &str) -> bool {
        let (key, _) = normalize_name(name);
        if key == STATUS_CONTEXT_NAME.to_lowercase() {
            return false; // Status is never removable.
        }
        let removed = self.contexts.remove(&key).is_some();
        if removed {
            self.order.lock().unwrap().retain(|n| n != &key);
            let was_active = self.active_name().as_deref() == Some(key.as_str());
            if was_active {
                let fallback = self
                    .order
                    .lock()
                    .unwrap()
                    .first()
                    .cloned()
                    .unwrap_or_else(|| STATUS_CONTEXT_NAME.to_lowercase());
                self.set_active(&fallback);
            }
        }
        removed
    }

    /// If `name` is currently active, switches to a fallback context — the
    /// next channel/query in insertion order (excluding `name`), else
    /// Status — without removing `name`'s Context itself (self-PART/KICK
    /// leave a channel's history browsable; spec.md §3: "Any → `NotJoined`
    /// on PART echo or kick" plus §4.7's "auto-select a fallback active
    /// context"). A no-op if `name` isn't the active context.
    pub fn select_fallback_if_active(&self, name: &str) {
        let (key, _) = normalize_name(name);
        if self.active_name().as_deref() != Some(key.as_str()) {
            return;
        }
        let fallback = self
            .order
            .lock()
            .unwrap()
            .iter()
            .find(|n| *n != &key)
            .cloned()
            .unwrap_or_else(|| STATUS_CONTEXT_NAME.to_lowercase());
        self.set_active(&fallback);
    }

    /// Increments unread if `name` is not the active context; bounded ring
    /// discards the oldest entry at capacity.
    pub fn append_message(&self, name: &str, text: impl Into<String>, style: impl Into<String>) {
        let (key, display) = normalize_name(name);
        let kind = context_kind_for_name(name);
        self.get_or_create(name, kind, None);
        let is_active = self.is_active(name);
        if let Some(mut ctx) = self.contexts.get_mut(&key) {
            ctx.push_message(text, style);
            if !is_active {
                ctx.unread += 1;
            }
        }
        let _ = display; // normalized display already applied at creation time
    }

    pub fn add_user(&self, name: &str, nick: &str, prefix: &str) {
        if let Some(mut ctx) = self.get_mut(name) {
            ctx.users.insert(nick, prefix);
        }
    }

    pub fn remove_user(&self, name: &str, nick: &str) -> bool {
        self.get_mut(name).map(|mut ctx| ctx.users.remove(nick)).unwrap_or(false)
    }

    pub fn update_prefix(&self, name: &str, nick: &str, prefix: &str) -> bool {
        self.get_mut(name).map(|mut ctx| ctx.users.set_prefix(nick, prefix)).unwrap_or(false)
    }

    /// Adds one status `symbol` to `nick`'s prefix in context `name`,
    /// re-sorted by `rank` — used for `+o`-style MODE changes so an
    /// existing multi-prefix symbol isn't clobbered (spec.md §4.7: "+o
    /// adds @ to target's prefix").
    pub fn add_prefix_symbol(&self, name: &str, nick: &str, symbol: char, rank: &[char]) -> bool {
        self.get_mut(name).map(|mut ctx| ctx.users.add_prefix_symbol(nick, symbol, rank)).unwrap_or(false)
    }

    /// Removes one status `symbol` from `nick`'s prefix in context `name`
    /// (spec.md §4.7: "-o removes it" — only that symbol, not the whole
    /// prefix string).
    pub fn remove_prefix_symbol(&self, name: &str, nick: &str, symbol: char) -> bool {
        self.get_mut(name).map(|mut ctx| ctx.users.remove_prefix_symbol(nick, symbol)).unwrap_or(false)
    }

    pub fn rename_user_everywhere(&self, old_nick: &str, new_nick: &str) {
        for mut ctx in self.contexts.iter_mut() {
            ctx.users.rename(old_nick, new_nick);
        }
    }

    /// `away-notify`: a nick's away state isn't channel-specific, so every
    /// roster that already lists it gets the flag (rosters that don't list
    /// it are left alone — `Roster::set_away` is a no-op for strangers).
    pub fn set_away_everywhere(&self, nick: &str, away: bool) {
        for mut ctx in self.contexts.iter_mut() {
            ctx.users.set_away(nick, away);
        }
    }

    /// Clears a channel's roster — called on our own PART/KICK (spec.md §3
    /// invariant: "never shared across channels").
    pub fn clear_roster(&self, name: &str) {
        if let Some(mut ctx) = self.get_mut(name) {
            ctx.users.clear();
        }
    }

    pub fn set_topic(&self, name: &str, topic: Option<String>) {
        if let Some(mut ctx) = self.get_mut(name) {
            ctx.topic = topic;
        }
    }

    pub fn set_join_status(&self, name: &str, status: ChannelJoinStatus) {
        if let Some(mut ctx) = self.get_mut(name) {
            ctx.join_status = Some(status);
        }
    }

    pub fn join_status(&self, name: &str) -> Option<ChannelJoinStatus> {
        self.get(name).and_then(|ctx| ctx.join_status)
    }

    pub fn unread_count(&self, name: &str) -> usize {
        self.get(name).map(|ctx| ctx.unread).unwrap_or(0)
    }

    /// Stable ordered iteration of the channel/query contexts, for the
    /// renderer's context list (status is addressed separately — it's
    /// always present and always first in the UI, not part of this list).
    pub fn ordered_names(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

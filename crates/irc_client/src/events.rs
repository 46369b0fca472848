//! The Event Bus (spec.md §4.13): named publish/subscribe, synchronous
//! dispatch in the emitting context, subscription order preserved.
//!
//! The teacher's `channels_models.rs` uses one `broadcast::Sender` per
//! channel for fan-out to connected clients; a `broadcast` channel is the
//! wrong shape here because delivery is async and receiver-paced, while
//! spec.md requires synchronous same-context delivery with subscriber
//! failures isolated from each other. This is that same fan-out idea,
//! generalized to a single bus carrying every event kind and dispatched by
//! direct callback invocation instead of a channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::RwLock;

use log::error;

/// All event kinds spec.md §6 documents, plus the DCC events of §4.12.
/// Each documented field becomes a typed struct field — spec.md's
/// "free-form record (string-keyed map)" realized concretely per event
/// kind instead of as a runtime map.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ClientConnected { server: String, port: u16, nick: String, ssl: bool },
    ClientDisconnected { server: String, port: u16 },
    ClientRegistered { nick: String, server_message: String },
    ClientReady { nick: String },
    ClientNickChanged { old_nick: String, new_nick: String },
    ClientShutdownFinal,

    Privmsg {
        nick: String,
        userhost: String,
        target: String,
        message: String,
        is_channel: bool,
        tags: Vec<(String, String)>,
    },
    Notice {
        nick: String,
        userhost: String,
        target: String,
        message: String,
        is_channel: bool,
        tags: Vec<(String, String)>,
    },
    Join {
        nick: String,
        userhost: String,
        channel: String,
        account: Option<String>,
        realname: Option<String>,
        is_self: bool,
    },
    ChannelFullyJoined { channel_name: String },
    Part { nick: String, userhost: String, channel: String, reason: Option<String>, is_self: bool },
    Kick {
        kicked_nick: String,
        kicker: String,
        kicker_userhost: String,
        channel: String,
        reason: Option<String>,
        is_self: bool,
    },
    Quit { nick: String, userhost: String, reason: Option<String> },
    Nick { old_nick: String, new_nick: String, userhost: String, is_self: bool },
    Mode {
        target: String,
        setter: String,
        setter_userhost: String,
        mode_string: String,
        mode_params: Vec<String>,
        parsed_modes: Vec<(char, bool, Option<String>)>,
    },
    ChannelModeApplied {
        channel: String,
        setter_nick: String,
        setter_userhost: String,
        mode_changes: Vec<(char, bool, Option<String>)>,
        current_channel_modes: Vec<char>,
    },
    Topic { nick: String, userhost: String, channel: String, topic: String },
    Chghost { nick: String, new_ident: String, new_host: String, old_userhost: String },
    Away { nick: String, userhost: String, message: Option<String> },
    RawIrcNumeric {
        numeric: u16,
        source: Option<String>,
        params_list: Vec<String>,
        display_params_list: Vec<String>,
        trailing: Option<String>,
        tags: Vec<(String, String)>,
    },

    DccTransferQueued { id: String },
    DccTransferStart { id: String },
    DccTransferProgress { id: String, bytes_transferred: u64, total: u64 },
    DccTransferComplete { id: String },
    DccTransferError { id: String, reason: String },
    DccTransferCancelled { id: String },
    DccSendOfferIncoming { peer: String, filename: String, ip: String, port: u16, size: u64 },
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Dispatches events to subscribers synchronously, in subscription order.
/// A subscriber that panics is caught and logged; its siblings still run.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus { subscribers: RwLock::new(Vec::new()) }
    }

    /// Registers a subscriber. Returns nothing identifying it — spec.md's
    /// event bus has no unsubscribe operation; callers that need scoped
    /// subscriptions drop the whole bus or gate on internal state instead.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Box::new(callback));
    }

    pub fn emit(&self, event: Event) {
        let subscribers = self.subscribers.read().unwrap();
        for (idx, subscriber) in subscribers.iter().enumerate() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber(&event)));
            if let Err(panic_payload) = result {
                let message = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!("event subscriber #{idx} panicked handling {event:?}: {message}");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn subscribers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = order.clone();
            bus.subscribe(move |_event| order.lock().unwrap().push(tag));
        }
        bus.emit(Event::ClientShutdownFinal);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn a_panicking_subscriber_does_not_stop_its_siblings() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(|_event| panic!("boom"));
        {
            let hits = hits.clone();
            bus.subscribe(move |_event| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.emit(Event::ClientShutdownFinal);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_matches_a_specific_event_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        {
            let seen = seen.clone();
            bus.subscribe(move |event| {
                *seen.lock().unwrap() = Some(event.clone());
            });
        }
        bus.emit(Event::ClientReady { nick: "bob".to_string() });
        assert_eq!(
            *seen.lock().unwrap(),
            Some(Event::ClientReady { nick: "bob".to_string() })
        );
    }
}

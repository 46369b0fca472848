//! `ClientIdentity` and `ConnectionStats` (SPEC_FULL.md §3 supplements).
//!
//! Grounded on the teacher's `users.rs` `UserState(Arc<RwLock<Client>>)`
//! wrapper, generalized from "the server's view of one connected user" to
//! "our own view of ourselves" — the Dispatcher needs this to recognize
//! self-JOIN/self-PART/self-KICK, and the Trigger Engine needs it for
//! `$me`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct IdentitySnapshot {
    nick: String,
    username: String,
    realname: String,
    userhost: Option<String>,
}

/// Our own current identity on one connection. Updated by the Registration
/// Coordinator (initial values, nick-collision mutations) and the
/// Dispatcher (self-NICK, and the userhost learned from our own JOIN echo
/// or a WHOIS/WHO reply about ourselves).
#[derive(Clone)]
pub struct ClientIdentity(Arc<RwLock<IdentitySnapshot>>);

impl ClientIdentity {
    pub fn new(nick: impl Into<String>, username: impl Into<String>, realname: impl Into<String>) -> Self {
        ClientIdentity(Arc::new(RwLock::new(IdentitySnapshot {
            nick: nick.into(),
            username: username.into(),
            realname: realname.into(),
            userhost: None,
        })))
    }

    pub async fn nick(&self) -> String {
        self.0.read().await.nick.clone()
    }

    pub async fn set_nick(&self, nick: impl Into<String>) {
        self.0.write().await.nick = nick.into();
    }

    pub async fn username(&self) -> String {
        self.0.read().await.username.clone()
    }

    pub async fn realname(&self) -> String {
        self.0.read().await.realname.clone()
    }

    pub async fn userhost(&self) -> Option<String> {
        self.0.read().await.userhost.clone()
    }

    pub async fn set_userhost(&self, userhost: impl Into<String>) {
        self.0.write().await.userhost = Some(userhost.into());
    }

    /// True if `candidate_nick` is our own current nickname
    /// (case-insensitive — nickname comparisons are casefolded throughout
    /// IRC, per RFC 2812 §2.2).
    pub async fn is_self_nick(&self, candidate_nick: &str) -> bool {
        self.0.read().await.nick.eq_ignore_ascii_case(candidate_nick)
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Per-profile persisted counters (spec.md §3 `ConnectionInfo` "counters"
/// field, split into its own struct per SPEC_FULL.md §3 so it can be
/// serialized as the "optional persisted connection-statistics snapshot"
/// spec.md §6 mentions).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub last_success_unix: Option<u64>,
    pub last_error: Option<String>,
}

impl ConnectionStats {
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_success(&mut self) {
        self.last_success_unix = Some(now_unix());
        self.last_error = None;
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn self_nick_check_is_case_insensitive() {
        let identity = ClientIdentity::new("Bob", "bob", "Bob Realname");
        assert!(identity.is_self_nick("BOB").await);
        assert!(!identity.is_self_nick("alice").await);
    }

    #[tokio::test]
    async fn set_nick_updates_identity() {
        let identity = ClientIdentity::new("bob", "bob", "Bob");
        identity.set_nick("bob_1").await;
        assert_eq!(identity.nick().await, "bob_1");
    }

    #[test]
    fn stats_track_attempts_and_errors() {
        let mut stats = ConnectionStats::default();
        stats.record_attempt();
        stats.record_attempt();
        stats.record_error("connection refused");
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.last_error.as_deref(), Some("connection refused"));
        stats.record_success();
        assert!(stats.last_error.is_none());
        assert!(stats.last_success_unix.is_some());
    }
}

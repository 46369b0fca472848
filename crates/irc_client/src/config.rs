//! Configuration data model and loader (spec.md §6, §9 "mutable globals").
//!
//! Grounded on the teacher's `config.rs` (`Config::load` via
//! `toml::from_str`), generalized from one server-wide document into the
//! `[Server.<Name>]`/`[DCC]`/`[Logging]`/`[IgnoreList]`/`[Features]`
//! sections spec.md §6 names. The teacher's own `Config::load` swallows
//! errors into `Box<dyn Error>`; here that becomes a typed [`ConfigError`]
//! so callers can render the "list of human-readable reasons" spec.md §3
//! requires for `ConnectionState::ConfigError`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::errors::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(rename = "Server", default)]
    pub servers: HashMap<String, ServerProfile>,
    #[serde(rename = "DCC", default)]
    pub dcc: DccConfig,
    #[serde(rename = "Logging", default)]
    pub logging: LoggingConfig,
    #[serde(rename = "IgnoreList", default)]
    pub ignore_list: HashMap<String, String>,
    #[serde(rename = "Features", default)]
    pub features: FeaturesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerProfile {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    pub nick: String,
    pub username: String,
    pub realname: String,
    #[serde(default)]
    pub channels: Vec<String>,
    pub password: Option<String>,
    pub nickserv_password: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_ssl_cert: bool,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub desired_caps: Vec<String>,
}

impl ServerProfile {
    /// Checks the fields spec.md §3 requires before a connection attempt:
    /// "Validated before use; on validation failure the connection enters
    /// `ConfigError` with a list of human-readable reasons."
    pub fn validate(&self, profile_name: &str) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.address.trim().is_empty() {
            reasons.push("address must not be empty".to_string());
        }
        if self.port == 0 {
            reasons.push("port must be nonzero".to_string());
        }
        if self.nick.trim().is_empty() {
            reasons.push("nick must not be empty".to_string());
        }
        if self.username.trim().is_empty() {
            reasons.push("username must not be empty".to_string());
        }
        if self.sasl_username.is_some() != self.sasl_password.is_some() {
            reasons.push("sasl_username and sasl_password must be set together".to_string());
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidProfile { profile: profile_name.to_string(), reasons })
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DccConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    /// Advertised IPv4 for outbound `DCC SEND` offers. `None` falls back to
    /// probing a route to a public address, per spec.md §4.11.
    #[serde(default)]
    pub advertised_ip: Option<String>,
    #[serde(default)]
    pub upload_dir: Option<String>,
    #[serde(default)]
    pub auto_accept: bool,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub resume_enabled: bool,
    #[serde(default)]
    pub checksum_verify: bool,
    #[serde(default = "default_checksum_algorithm")]
    pub checksum_algorithm: String,
    #[serde(default)]
    pub bandwidth_limit_send_kbps: u64,
    #[serde(default)]
    pub bandwidth_limit_recv_kbps: u64,
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,
    #[serde(default = "default_passive_token_timeout")]
    pub passive_token_timeout: u64,
    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "default_transfer_max_age")]
    pub transfer_max_age_seconds: u64,
}

impl Default for DccConfig {
    fn default() -> Self {
        DccConfig {
            enabled: default_true(),
            download_dir: default_download_dir(),
            advertised_ip: None,
            upload_dir: None,
            auto_accept: false,
            max_file_size: default_max_file_size(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            timeout: default_timeout(),
            resume_enabled: default_true(),
            checksum_verify: false,
            checksum_algorithm: default_checksum_algorithm(),
            bandwidth_limit_send_kbps: 0,
            bandwidth_limit_recv_kbps: 0,
            blocked_extensions: default_blocked_extensions(),
            passive_token_timeout: default_passive_token_timeout(),
            cleanup_enabled: default_true(),
            cleanup_interval_seconds: default_cleanup_interval(),
            transfer_max_age_seconds: default_transfer_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub file_path: Option<String>,
    #[serde(default)]
    pub rotate: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub triggers: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        FeaturesConfig { triggers: true }
    }
}

fn default_true() -> bool {
    true
}
fn default_download_dir() -> String {
    "downloads".to_string()
}
fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}
fn default_port_range_start() -> u16 {
    1024
}
fn default_port_range_end() -> u16 {
    65535
}
fn default_timeout() -> u64 {
    300
}
fn default_checksum_algorithm() -> String {
    "sha256".to_string()
}
fn default_blocked_extensions() -> Vec<String> {
    vec![".exe", ".bat", ".com", ".scr", ".vbs", ".pif"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_passive_token_timeout() -> u64 {
    120
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_transfer_max_age() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Mirrors the teacher's `Config::load`, narrowed to a typed error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Spec.md §9's reloadable snapshot: readers clone the `Arc`, `/rehash`
/// builds a new `ClientConfig` and swaps the handle behind a
/// `std::sync::RwLock` — the teacher uses `tokio::sync::RwLock` for
/// shared mutable state elsewhere; a plain `std::sync::RwLock` suffices
/// here since the critical section is just a pointer swap, never held
/// across an `.await`.
#[derive(Clone)]
pub struct ConfigSnapshot {
    inner: Arc<RwLock<Arc<ClientConfig>>>,
}

impl ConfigSnapshot {
    pub fn new(config: ClientConfig) -> Self {
        ConfigSnapshot { inner: Arc::new(RwLock::new(Arc::new(config))) }
    }

    pub fn current(&self) -> Arc<ClientConfig> {
        self.inner.read().unwrap().clone()
    }

    /// `/rehash`: atomically replaces the published config.
    pub fn rehash(&self, new_config: ClientConfig) {
        *self.inner.write().unwrap() = Arc::new(new_config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[Server.Libera]
address = "irc.libera.chat"
port = 6697
ssl = true
nick = "bob"
username = "bob"
realname = "Bob"
channels = ["#rust"]
desired_caps = ["sasl", "multi-prefix"]

[DCC]
enabled = true
download_dir = "/tmp/downloads"

[IgnoreList]
"bob!*@*" = "all"
"#;

    #[test]
    fn parses_full_document() {
        let config = ClientConfig::parse(SAMPLE).unwrap();
        let server = config.servers.get("Libera").unwrap();
        assert_eq!(server.address, "irc.libera.chat");
        assert_eq!(server.port, 6697);
        assert!(server.ssl);
        assert_eq!(server.desired_caps, vec!["sasl", "multi-prefix"]);
        assert_eq!(config.dcc.download_dir, "/tmp/downloads");
        assert!(config.ignore_list.contains_key("bob!*@*"));
    }

    #[test]
    fn dcc_defaults_apply_when_section_omitted() {
        let config = ClientConfig::parse(
            r#"
[Server.X]
address = "irc.example.com"
port = 6667
nick = "a"
username = "a"
realname = "A"
"#,
        )
        .unwrap();
        assert_eq!(config.dcc.port_range_start, 1024);
        assert_eq!(config.dcc.checksum_algorithm, "sha256");
        assert!(config.dcc.blocked_extensions.contains(&".exe".to_string()));
    }

    #[test]
    fn validate_reports_empty_nick_and_mismatched_sasl() {
        let mut profile = ServerProfile {
            address: "irc.example.com".to_string(),
            port: 6667,
            ssl: false,
            nick: String::new(),
            username: "a".to_string(),
            realname: "A".to_string(),
            channels: vec![],
            password: None,
            nickserv_password: None,
            sasl_username: Some("a".to_string()),
            sasl_password: None,
            verify_ssl_cert: true,
            auto_connect: false,
            desired_caps: vec![],
        };
        let err = profile.validate("X").unwrap_err();
        match err {
            ConfigError::InvalidProfile { reasons, .. } => {
                assert!(reasons.iter().any(|r| r.contains("nick")));
                assert!(reasons.iter().any(|r| r.contains("sasl")));
            }
            _ => panic!("wrong error variant"),
        }
        profile.nick = "a".to_string();
        profile.sasl_password = Some("x".to_string());
        assert!(profile.validate("X").is_ok());
    }

    #[test]
    fn rehash_swaps_the_published_snapshot() {
        let base = ClientConfig::parse(SAMPLE).unwrap();
        let snapshot = ConfigSnapshot::new(base);
        assert_eq!(snapshot.current().dcc.download_dir, "/tmp/downloads");

        let mut replacement = (*snapshot.current()).clone();
        replacement.dcc.download_dir = "/var/dl".to_string();
        snapshot.rehash(replacement);

        assert_eq!(snapshot.current().dcc.download_dir, "/var/dl");
    }
}

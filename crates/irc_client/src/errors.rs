use thiserror::Error;

/// Wire parsing failed. The only case the codec itself raises: a line with
/// no command token (spec: "fails with MalformedMessage only when the
/// command token is missing").
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("parameter contains an embedded CR or LF: {0:?}")]
    EmbeddedLineBreak(String),

    #[error("serialized line exceeds the 512-byte wire limit ({0} bytes)")]
    LineTooLong(usize),
}

/// CAP/SASL negotiation timing and outcome failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("SASL authentication failed: {0}")]
    AuthFailed(String),

    #[error("nick collision recovery exhausted its attempt budget")]
    NickCollisionExhausted,
}

/// A connection profile failed validation before it was ever dialed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid server profile '{profile}': {reasons:?}")]
    InvalidProfile {
        profile: String,
        reasons: Vec<String>,
    },

    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Socket / DNS / TLS failures — these drive the reconnect-with-backoff path.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("DNS resolution failed for {0}")]
    Dns(String),

    #[error("not connected")]
    NotConnected,
}

/// DCC offer/path rejected before any socket was opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DccSecurityError {
    #[error("filename sanitized to an empty string")]
    EmptyAfterSanitization,

    #[error("file extension '{0}' is blocked")]
    BlockedExtension(String),

    #[error("proposed size {proposed} exceeds the configured maximum {max}")]
    TooLarge { proposed: u64, max: u64 },

    #[error("resolved path escapes the download directory")]
    PathEscape,

    #[error("could not create or access the download directory: {0}")]
    DirectoryUnavailable(String),
}

/// Per-transfer failure. Never fatal to the manager or the IRC connection.
#[derive(Error, Debug)]
pub enum DccTransferError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("security rejection: {0}")]
    Security(#[from] DccSecurityError),

    #[error("resume offset {offset} does not match local file size {local_size}")]
    ResumeMismatch { offset: u64, local_size: u64 },

    #[error("transfer timed out waiting for {0}")]
    TimedOut(&'static str),

    #[error("transfer was cancelled")]
    Cancelled,

    #[error("malformed DCC CTCP payload: {0}")]
    Protocol(String),

    #[error("no such transfer: {0}")]
    NotFound(String),
}

/// Trigger action execution failure. Always caught, logged, surfaced to
/// Status — never propagated out of the trigger engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script execution failed: {0}")]
    ExecutionFailed(String),

    #[error("invalid trigger pattern '{0}': {1}")]
    InvalidPattern(String, String),
}

/// Umbrella error for operations that can fail for more than one of the
/// above reasons. Per-subsystem call sites prefer the narrower error type;
/// this exists for facade-level functions (e.g. `Client::connect`) that
/// thread several subsystems together.
#[derive(Error, Debug)]
pub enum IrcClientError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    DccSecurity(#[from] DccSecurityError),

    #[error(transparent)]
    DccTransfer(#[from] DccTransferError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

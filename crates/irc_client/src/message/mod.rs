//! The IRC message codec (spec.md §4.1).
//!
//! Grammar, from RFC 2812 2.3.1 plus the IRCv3 message-tags prefix:
//!
//! ```text
//! line       := ['@' tags ' '] [':' source ' '] command [' ' params] crlf
//! tags       := tag (';' tag)*
//! tag        := key ['=' value]
//! params     := middle* [' :' trailing]
//! middle     := non-space-non-colon token
//! ```
//!
//! The codec is pure and never panics. It fails with [`MessageError`] only
//! when the command token itself is missing — every other irregularity
//! (stray whitespace, an empty trailing, no prefix) is tolerated, same as
//! the teacher's `parsers.rs` treats the wire grammar as permissive.

pub mod tags;

use std::collections::HashMap;

use nom::{
    IResult, Parser,
    bytes::complete::{take_till1, take_while},
    character::complete::char,
    sequence::preceded,
};

use crate::errors::MessageError;

/// A command token: either a textual command (`PRIVMSG`, `CAP`, ...) kept
/// uppercase, or a three-digit numeric reply retained as an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Named(String),
    Numeric(u16),
}

impl Command {
    /// The wire representation of this command token.
    pub fn as_wire_token(&self) -> String {
        match self {
            Command::Named(name) => name.clone(),
            Command::Numeric(n) => format!("{n:03}"),
        }
    }

    pub fn is_numeric(&self, n: u16) -> bool {
        matches!(self, Command::Numeric(x) if *x == n)
    }

    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, Command::Named(n) if n.eq_ignore_ascii_case(name))
    }
}

/// An immutable record produced by parsing one wire line. Constructed by
/// the codec, consumed by the Dispatcher, discarded after handling (spec
/// §3 "ParsedMessage").
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub tags: Option<HashMap<String, String>>,
    pub prefix: Option<String>,
    /// The portion of `prefix` before the first `!`, when a prefix is
    /// present. For a server-name prefix (no `!`) this equals the whole
    /// prefix.
    pub source_nick: Option<String>,
    pub command: Command,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl ParsedMessage {
    /// All parameters in wire order, with `trailing` appended last if
    /// present. Convenient for handlers that don't care about the
    /// middle/trailing distinction.
    pub fn all_params(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.params.iter().map(String::as_str).collect();
        if let Some(t) = &self.trailing {
            out.push(t.as_str());
        }
        out
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref().and_then(|t| t.get(key)).map(String::as_str)
    }
}

fn tag_section(input: &str) -> IResult<&str, Vec<(String, String)>> {
    let (rem, raw) = preceded(char('@'), take_till1(|c| c == ' ')).parse(input)?;
    Ok((rem, tags::parse_tags(raw)))
}

fn prefix_section(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_till1(|c| c == ' ')).parse(input)
}

fn command_token(input: &str) -> IResult<&str, &str> {
    take_till1(|c| c == ' ')(input)
}

fn middle_param(input: &str) -> IResult<&str, &str> {
    take_till1(|c| c == ' ')(input)
}

fn spaces(input: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ')(input)
}

/// Parses a single wire line (without the trailing `\r\n`, which the
/// transport strips during framing) into a [`ParsedMessage`].
pub fn parse_line(line: &str) -> Result<ParsedMessage, MessageError> {
    let mut rest = line.trim_end_matches(['\r', '\n']);

    let mut tag_pairs = None;
    if rest.starts_with('@') {
        match tag_section(rest) {
            Ok((r, parsed)) => {
                tag_pairs = Some(parsed);
                rest = r.trim_start_matches(' ');
            }
            Err(_) => return Err(MessageError::Malformed("unterminated tag section".into())),
        }
    }

    let mut prefix = None;
    let mut source_nick = None;
    if rest.starts_with(':') {
        match prefix_section(rest) {
            Ok((r, parsed)) => {
                prefix = Some(parsed.to_string());
                source_nick = Some(
                    parsed
                        .split('!')
                        .next()
                        .unwrap_or(parsed)
                        .to_string(),
                );
                rest = r.trim_start_matches(' ');
            }
            Err(_) => return Err(MessageError::Malformed("unterminated prefix".into())),
        }
    }

    let (rest, command_raw) = command_token(rest)
        .map_err(|_| MessageError::Malformed("missing command token".into()))?;
    if command_raw.is_empty() {
        return Err(MessageError::Malformed("missing command token".into()));
    }
    let command = parse_command_token(command_raw);

    let (params, trailing) = parse_params(rest);

    Ok(ParsedMessage {
        tags: tag_pairs.map(|pairs| pairs.into_iter().collect()),
        prefix,
        source_nick,
        command,
        params,
        trailing,
    })
}

fn parse_command_token(raw: &str) -> Command {
    if raw.len() == 3 && raw.chars().all(|c| c.is_ascii_digit()) {
        // Parse error is unreachable: we just verified 3 ASCII digits.
        Command::Numeric(raw.parse().unwrap_or(0))
    } else {
        Command::Named(raw.to_ascii_uppercase())
    }
}

fn parse_params(mut rest: &str) -> (Vec<String>, Option<String>) {
    let mut params = Vec::new();
    let mut trailing = None;

    loop {
        let (r, _) = spaces(rest).unwrap_or((rest, ""));
        rest = r;
        if rest.is_empty() {
            break;
        }
        if let Some(stripped) = rest.strip_prefix(':') {
            trailing = Some(stripped.to_string());
            break;
        }
        match middle_param(rest) {
            Ok((r, token)) => {
                params.push(token.to_string());
                rest = r;
            }
            Err(_) => break,
        }
    }

    (params, trailing)
}

/// A message under construction for transmission. Unlike [`ParsedMessage`]
/// this carries no source prefix (a client never sends one) but may carry
/// outbound tags (e.g. a client-only `+typing` tag, when the server
/// advertises `message-tags`).
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub tags: Vec<(String, String)>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl OutboundMessage {
    pub fn new(command: impl Into<String>) -> Self {
        OutboundMessage {
            tags: Vec::new(),
            command: command.into(),
            params: Vec::new(),
            trailing: None,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_trailing(mut self, trailing: impl Into<String>) -> Self {
        self.trailing = Some(trailing.into());
        self
    }

    /// Serializes to a single wire line, **without** the terminating
    /// `\r\n` — the Network Transport appends that during framing (spec.md
    /// §4.1: "a single `\r\n` terminator is appended by the Network
    /// Transport, not the codec").
    pub fn serialize(&self) -> Result<String, MessageError> {
        for p in self.params.iter().chain(self.trailing.iter()) {
            if p.contains('\r') || p.contains('\n') {
                return Err(MessageError::EmbeddedLineBreak(p.clone()));
            }
        }

        let mut out = String::new();
        if !self.tags.is_empty() {
            out.push('@');
            out.push_str(&tags::format_tags(&self.tags));
            out.push(' ');
        }
        out.push_str(&self.command);
        for p in &self.params {
            out.push(' ');
            out.push_str(p);
        }
        if let Some(t) = &self.trailing {
            let needs_colon = t.is_empty() || t.contains(' ') || t.starts_with(':');
            out.push(' ');
            if needs_colon {
                out.push(':');
            }
            out.push_str(t);
        }

        if out.len() > 510 {
            return Err(MessageError::LineTooLong(out.len()));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_command() {
        let msg = parse_line("PING :server.example.com").unwrap();
        assert_eq!(msg.command, Command::Named("PING".into()));
        assert_eq!(msg.trailing.as_deref(), Some("server.example.com"));
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn parses_prefix_and_source_nick() {
        let msg = parse_line(":alice!a@host.example PRIVMSG #chan :hi there").unwrap();
        assert_eq!(msg.source_nick.as_deref(), Some("alice"));
        assert_eq!(msg.prefix.as_deref(), Some("alice!a@host.example"));
        assert_eq!(msg.command, Command::Named("PRIVMSG".into()));
        assert_eq!(msg.params, vec!["#chan".to_string()]);
        assert_eq!(msg.trailing.as_deref(), Some("hi there"));
    }

    #[test]
    fn source_nick_without_bang_is_whole_prefix() {
        let msg = parse_line(":irc.server.net NOTICE * :hello").unwrap();
        assert_eq!(msg.source_nick.as_deref(), Some("irc.server.net"));
    }

    #[test]
    fn parses_numeric_commands() {
        let msg = parse_line(":server 001 nick :Welcome").unwrap();
        assert_eq!(msg.command, Command::Numeric(1));
    }

    #[test]
    fn parses_message_tags() {
        let msg = parse_line(
            "@time=2024-01-01T00:00:00.000Z;msgid=abc123 :alice!a@host PRIVMSG #c :hey",
        )
        .unwrap();
        assert_eq!(msg.tag("time"), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(msg.tag("msgid"), Some("abc123"));
    }

    #[test]
    fn tag_escapes_decode() {
        let msg = parse_line("@note=a\\sb\\:c :x PRIVMSG #c :hi").unwrap();
        assert_eq!(msg.tag("note"), Some("a b;c"));
    }

    #[test]
    fn missing_command_is_malformed() {
        assert!(parse_line("").is_err());
        assert!(parse_line(":prefix-only").is_err());
    }

    #[test]
    fn tolerates_excess_whitespace() {
        let msg = parse_line("PRIVMSG   #chan   :hello").unwrap();
        assert_eq!(msg.params, vec!["#chan".to_string()]);
        assert_eq!(msg.trailing.as_deref(), Some("hello"));
    }

    #[test]
    fn middle_params_preserve_order() {
        let msg = parse_line("MODE #chan +o alice").unwrap();
        assert_eq!(msg.params, vec!["#chan".to_string(), "+o".to_string(), "alice".to_string()]);
    }

    #[test]
    fn outbound_trailing_is_colon_prefixed_when_needed() {
        let m = OutboundMessage::new("PRIVMSG")
            .with_param("#chan")
            .with_trailing("hello world");
        assert_eq!(m.serialize().unwrap(), "PRIVMSG #chan :hello world");
    }

    #[test]
    fn outbound_no_colon_when_trailing_has_no_space() {
        let m = OutboundMessage::new("JOIN").with_param("#chan");
        assert_eq!(m.serialize().unwrap(), "JOIN #chan");
    }

    #[test]
    fn outbound_rejects_embedded_crlf() {
        let m = OutboundMessage::new("PRIVMSG")
            .with_param("#chan")
            .with_trailing("bad\r\ninjected");
        assert!(matches!(m.serialize(), Err(MessageError::EmbeddedLineBreak(_))));
    }

    #[test]
    fn round_trip_parse_then_serialize() {
        let cases = [
            "PRIVMSG #chan :hello world",
            "JOIN #chan",
            "NICK newnick",
        ];
        for raw in cases {
            let parsed = parse_line(raw).unwrap();
            let mut out = OutboundMessage::new(parsed.command.as_wire_token());
            for p in &parsed.params {
                out = out.with_param(p.clone());
            }
            if let Some(t) = &parsed.trailing {
                out = out.with_trailing(t.clone());
            }
            assert_eq!(out.serialize().unwrap(), raw);
        }
    }
}

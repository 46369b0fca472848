//! CTCP framing and the core auto-replies (VERSION/PING/TIME/CLIENTINFO)
//! and `/me` (ACTION), per spec.md §4.7's "CTCP: extracted from PRIVMSG/
//! NOTICE bodies wrapped in \x01...\x01; VERSION/PING/TIME/CLIENTINFO get
//! automatic replies; ACTION is delivered as a distinctly-styled message,
//! not a raw CTCP". DCC payloads (`\x01DCC SEND ...\x01`) are recognized
//! here and handed off whole to the not-yet-dispatched DCC manager; this
//! module doesn't parse their internals (`dcc::protocol` does).
//!
//! No teacher analog (the server relays PRIVMSG bodies unexamined); built
//! directly from spec.md §4.7/§6 since CTCP has no original_source/
//! reference module of its own (the original documented it only inline).

pub const CTCP_DELIM: char = '\u{01}';

/// One CTCP request or reply extracted from a PRIVMSG/NOTICE body.
#[derive(Debug, Clone, PartialEq)]
pub struct CtcpMessage {
    pub tag: String,
    pub argument: Option<String>,
}

/// Extracts a CTCP payload from a PRIVMSG/NOTICE trailing parameter. A
/// well-formed CTCP body is bracketed by `\x01` on both ends; a body
/// missing the closing delimiter (some clients truncate on disconnect) is
/// still accepted, since rejecting it would just drop a reply nobody can
/// otherwise act on.
pub fn extract_ctcp(body: &str) -> Option<CtcpMessage> {
    let rest = body.strip_prefix(CTCP_DELIM)?;
    let rest = rest.strip_suffix(CTCP_DELIM).unwrap_or(rest);
    let (tag, argument) = match rest.split_once(' ') {
        Some((tag, arg)) => (tag.to_string(), Some(arg.to_string())),
        None => (rest.to_string(), None),
    };
    Some(CtcpMessage { tag: tag.to_ascii_uppercase(), argument })
}

/// Wraps a tag/argument pair back into CTCP-framed text, ready to go in a
/// PRIVMSG/NOTICE trailing parameter.
pub fn frame_ctcp(tag: &str, argument: Option<&str>) -> String {
    match argument {
        Some(arg) if !arg.is_empty() => format!("{CTCP_DELIM}{tag} {arg}{CTCP_DELIM}"),
        _ => format!("{CTCP_DELIM}{tag}{CTCP_DELIM}"),
    }
}

/// Whether this CTCP request is one of the four spec.md §4.7 says get an
/// automatic reply (note this applies to *requests*, PRIVMSG only, never
/// to CTCP arriving over NOTICE — replies don't get replies).
pub fn is_auto_reply_tag(tag: &str) -> bool {
    matches!(tag, "VERSION" | "PING" | "TIME" | "CLIENTINFO")
}

/// Builds the NOTICE reply body for an auto-reply-eligible CTCP request.
/// `client_version` and `now_formatted` are supplied by the caller so this
/// stays free of wall-clock/version-string concerns.
pub fn build_auto_reply(
    request: &CtcpMessage,
    client_version: &str,
    now_formatted: &str,
) -> Option<String> {
    match request.tag.as_str() {
        "VERSION" => Some(frame_ctcp("VERSION", Some(client_version))),
        "TIME" => Some(frame_ctcp("TIME", Some(now_formatted))),
        "PING" => Some(frame_ctcp("PING", request.argument.as_deref())),
        "CLIENTINFO" => Some(frame_ctcp("CLIENTINFO", Some("ACTION CLIENTINFO PING TIME VERSION"))),
        _ => None,
    }
}

/// `/me does a thing` becomes `\x01ACTION does a thing\x01` on the wire;
/// the inverse recovers the action text for display.
pub fn frame_action(text: &str) -> String {
    frame_ctcp("ACTION", Some(text))
}

pub fn action_text(message: &CtcpMessage) -> Option<&str> {
    if message.tag == "ACTION" {
        Some(message.argument.as_deref().unwrap_or(""))
    } else {
        None
    }
}

pub fn is_dcc(message: &CtcpMessage) -> bool {
    message.tag == "DCC"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tag_and_argument() {
        let msg = extract_ctcp("\u{01}PING 123456\u{01}").unwrap();
        assert_eq!(msg.tag, "PING");
        assert_eq!(msg.argument.as_deref(), Some("123456"));
    }

    #[test]
    fn extracts_bare_tag_with_no_argument() {
        let msg = extract_ctcp("\u{01}VERSION\u{01}").unwrap();
        assert_eq!(msg.tag, "VERSION");
        assert_eq!(msg.argument, None);
    }

    #[test]
    fn tolerates_missing_closing_delimiter() {
        let msg = extract_ctcp("\u{01}TIME").unwrap();
        assert_eq!(msg.tag, "TIME");
    }

    #[test]
    fn non_ctcp_body_returns_none() {
        assert!(extract_ctcp("hello there").is_none());
    }

    #[test]
    fn build_auto_reply_covers_the_four_documented_tags() {
        let version_req = CtcpMessage { tag: "VERSION".to_string(), argument: None };
        assert_eq!(
            build_auto_reply(&version_req, "irc_client_core/0.1", "now"),
            Some("\u{01}VERSION irc_client_core/0.1\u{01}".to_string())
        );

        let ping_req = CtcpMessage { tag: "PING".to_string(), argument: Some("123".to_string()) };
        assert_eq!(
            build_auto_reply(&ping_req, "x", "now"),
            Some("\u{01}PING 123\u{01}".to_string())
        );

        let unknown = CtcpMessage { tag: "FINGER".to_string(), argument: None };
        assert_eq!(build_auto_reply(&unknown, "x", "now"), None);
    }

    #[test]
    fn action_round_trips() {
        let wire = frame_action("waves");
        let parsed = extract_ctcp(&wire).unwrap();
        assert_eq!(action_text(&parsed), Some("waves"));
    }

    #[test]
    fn recognizes_dcc_tag() {
        let msg = extract_ctcp("\u{01}DCC SEND file.dat 2130706433 5000 2048\u{01}").unwrap();
        assert!(is_dcc(&msg));
    }
}

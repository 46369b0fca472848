//! DCC Protocol (spec.md §4.9): parsing and formatting the CTCP payloads
//! that negotiate a DCC transfer.
//!
//! Grounded on `original_source/dcc_protocol.py`'s `parse_dcc_ctcp` /
//! `format_dcc_send_ctcp` / `parse_ip_port_from_dcc_string`. The Python
//! original parses SEND/ACCEPT *backwards* from the end of the
//! whitespace-split argument list (filesize, then port, then ip, with
//! whatever remains joined back together as the filename) so that an
//! unquoted filename containing spaces still parses; that's preserved
//! here rather than requiring callers to quote.

use std::net::Ipv4Addr;

use crate::errors::DccTransferError;

/// One parsed `DCC <SEND|ACCEPT|RESUME>` CTCP payload (already stripped of
/// the surrounding `\x01` delimiters and the leading `DCC` token's
/// `extract_ctcp` handling — this module only ever sees the argument
/// string that followed the `DCC` CTCP tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DccRequest {
    Send { filename: String, ip: Ipv4Addr, port: u16, size: u64, token: Option<String> },
    Accept { filename: String, port: u16, position: u64, token: Option<String> },
    Resume { filename: String, port: u16, position: u64, token: Option<String> },
}

/// Decodes the packed-IPv4 network-byte-order integer DCC SEND carries.
pub fn decode_packed_ip(ip_int: u32) -> Ipv4Addr {
    Ipv4Addr::from(ip_int.to_be_bytes())
}

/// Encodes an IPv4 address as the packed network-byte-order integer DCC
/// SEND expects on the wire.
pub fn encode_packed_ip(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

/// Splits `DCC SEND "my file.dat" 2130706433 5000 2048` (the argument
/// string after the literal `DCC` token has already been consumed by the
/// caller) into whitespace tokens, respecting a double-quoted filename.
fn tokenize(args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = args.trim().chars().peekable();
    while chars.peek().is_some() {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut quoted = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                quoted.push(c);
            }
            tokens.push(quoted);
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(word);
        }
    }
    tokens
}

/// Parses a `DCC <cmd> ...` payload body (the text following the literal
/// CTCP tag `DCC`, e.g. what `CtcpMessage { tag: "DCC", argument }` carries
/// as `argument`). Works backwards from the end of the token list for
/// SEND/ACCEPT/RESUME so an unquoted filename with embedded spaces still
/// parses, matching the original's behavior.
pub fn parse_dcc_ctcp(payload: &str) -> Result<DccRequest, DccTransferError> {
    let tokens = tokenize(payload);
    let (command, rest) = tokens
        .split_first()
        .ok_or_else(|| DccTransferError::Protocol("empty DCC payload".to_string()))?;

    match command.to_ascii_uppercase().as_str() {
        "SEND" => parse_send(rest),
        "ACCEPT" => parse_accept_or_resume(rest, true),
        "RESUME" => parse_accept_or_resume(rest, false),
        other => Err(DccTransferError::Protocol(format!("unsupported DCC subcommand: {other}"))),
    }
}

fn parse_send(rest: &[String]) -> Result<DccRequest, DccTransferError> {
    // `filename ip port size [token]`, filename may itself contain spaces
    // when unquoted — everything before the trailing three/four fields is
    // the filename.
    if rest.len() < 4 {
        return Err(DccTransferError::Protocol("DCC SEND: too few fields".to_string()));
    }
    let (filename_tokens, token, size_idx) = if rest.len() >= 5 {
        (&rest[..rest.len() - 4], Some(rest[rest.len() - 1].clone()), rest.len() - 4)
    } else {
        (&rest[..rest.len() - 3], None, rest.len() - 3)
    };
    if filename_tokens.is_empty() {
        return Err(DccTransferError::Protocol("DCC SEND: missing filename".to_string()));
    }
    let filename = filename_tokens.join(" ");
    let ip_int: u32 = rest[size_idx]
        .parse()
        .map_err(|_| DccTransferError::Protocol(format!("DCC SEND: bad ip field {:?}", rest[size_idx])))?;
    // SEND's port field is 0 for a passive/reverse offer (spec.md §4.11),
    // unlike ACCEPT/RESUME's port, which always names a real listening port.
    let port = parse_port_allow_zero(&rest[size_idx + 1])?;
    let size: u64 = rest[size_idx + 2]
        .parse()
        .map_err(|_| DccTransferError::Protocol(format!("DCC SEND: bad size field {:?}", rest[size_idx + 2])))?;
    Ok(DccRequest::Send { filename, ip: decode_packed_ip(ip_int), port, size, token })
}

fn parse_accept_or_resume(rest: &[String], is_accept: bool) -> Result<DccRequest, DccTransferError> {
    if rest.len() < 3 {
        return Err(DccTransferError::Protocol("DCC ACCEPT/RESUME: too few fields".to_string()));
    }
    let (filename_tokens, token, position_idx) = if rest.len() >= 4 {
        (&rest[..rest.len() - 3], Some(rest[rest.len() - 1].clone()), rest.len() - 3)
    } else {
        (&rest[..rest.len() - 2], None, rest.len() - 2)
    };
    if filename_tokens.is_empty() {
        return Err(DccTransferError::Protocol("DCC ACCEPT/RESUME: missing filename".to_string()));
    }
    let filename = filename_tokens.join(" ");
    let port = parse_port(&rest[position_idx])?;
    let position: u64 = rest[position_idx + 1]
        .parse()
        .map_err(|_| DccTransferError::Protocol(format!("bad position field {:?}", rest[position_idx + 1])))?;
    if is_accept {
        Ok(DccRequest::Accept { filename, port, position, token })
    } else {
        Ok(DccRequest::Resume { filename, port, position, token })
    }
}

fn parse_port(field: &str) -> Result<u16, DccTransferError> {
    let port = parse_port_allow_zero(field)?;
    if port == 0 {
        return Err(DccTransferError::Protocol("port 0 out of range".to_string()));
    }
    Ok(port)
}

/// Like [`parse_port`] but accepts 0 — only valid for DCC SEND's port
/// field, which is the passive/reverse-mode sentinel.
fn parse_port_allow_zero(field: &str) -> Result<u16, DccTransferError> {
    let port: u32 = field.parse().map_err(|_| DccTransferError::Protocol(format!("bad port field {field:?}")))?;
    if port > 65535 {
        return Err(DccTransferError::Protocol(format!("port {port} out of range")));
    }
    Ok(port as u16)
}

fn quote_filename_if_needed(filename: &str) -> String {
    if filename.contains(' ') { format!("\"{filename}\"") } else { filename.to_string() }
}

/// Formats a `DCC SEND` CTCP argument string (the caller wraps it in
/// `\x01...\x01` via `dispatch::ctcp::frame_ctcp`). Rejects filenames with
/// control characters and invalid ports, per spec.md §4.9.
pub fn format_dcc_send_ctcp(
    filename: &str,
    ip: Ipv4Addr,
    port: u16,
    size: u64,
    token: Option<&str>,
) -> Result<String, DccTransferError> {
    if filename.chars().any(|c| c.is_control()) {
        return Err(DccTransferError::Protocol("filename contains control characters".to_string()));
    }
    if port == 0 {
        // Port 0 is valid only for a passive/reverse offer, which always
        // carries a token — reject the bare case where neither is true.
        if token.is_none() {
            return Err(DccTransferError::Protocol("port 0 requires a passive-mode token".to_string()));
        }
    }
    let ip_int = encode_packed_ip(ip);
    let name = quote_filename_if_needed(filename);
    Ok(match token {
        Some(tok) => format!("DCC SEND {name} {ip_int} {port} {size} {tok}"),
        None => format!("DCC SEND {name} {ip_int} {port} {size}"),
    })
}

/// Formats a `DCC ACCEPT` CTCP argument string.
pub fn format_dcc_accept_ctcp(
    filename: &str,
    port: u16,
    position: u64,
    token: Option<&str>,
) -> Result<String, DccTransferError> {
    if filename.chars().any(|c| c.is_control()) {
        return Err(DccTransferError::Protocol("filename contains control characters".to_string()));
    }
    if port == 0 {
        return Err(DccTransferError::Protocol("invalid port 0".to_string()));
    }
    let name = quote_filename_if_needed(filename);
    Ok(match token {
        Some(tok) => format!("DCC ACCEPT {name} {port} {position} {tok}"),
        None => format!("DCC ACCEPT {name} {port} {position}"),
    })
}

/// Formats a `DCC RESUME` CTCP argument string.
pub fn format_dcc_resume_ctcp(
    filename: &str,
    port: u16,
    position: u64,
    token: Option<&str>,
) -> Result<String, DccTransferError> {
    if filename.chars().any(|c| c.is_control()) {
        return Err(DccTransferError::Protocol("filename contains control characters".to_string()));
    }
    if port == 0 {
        return Err(DccTransferError::Protocol("invalid port 0".to_string()));
    }
    let name = quote_filename_if_needed(filename);
    Ok(match token {
        Some(tok) => format!("DCC RESUME {name} {port} {position} {tok}"),
        None => format!("DCC RESUME {name} {port} {position}"),
    })
}

/// Formats the optional post-transfer `DCC CHECKSUM` extension (spec.md
/// §6): `DCC CHECKSUM <filename> <algo> <hex-digest>`.
pub fn format_dcc_checksum_ctcp(filename: &str, algo: &str, hex_digest: &str) -> String {
    let name = quote_filename_if_needed(filename);
    format!("DCC CHECKSUM {name} {algo} {hex_digest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dcc_send_round_trips_exactly_as_spec_md_documents() {
        let formatted =
            format_dcc_send_ctcp("my file.dat", "127.0.0.1".parse().unwrap(), 5000, 2048, None).unwrap();
        assert_eq!(formatted, "DCC SEND \"my file.dat\" 2130706433 5000 2048");

        let parsed = parse_dcc_ctcp(&formatted).unwrap();
        assert_eq!(
            parsed,
            DccRequest::Send {
                filename: "my file.dat".to_string(),
                ip: "127.0.0.1".parse().unwrap(),
                port: 5000,
                size: 2048,
                token: None,
            }
        );
    }

    #[test]
    fn unquoted_filename_with_spaces_still_parses_backwards() {
        let parsed = parse_dcc_ctcp("SEND some long file.dat 2130706433 5000 2048").unwrap();
        assert_eq!(
            parsed,
            DccRequest::Send {
                filename: "some long file.dat".to_string(),
                ip: "127.0.0.1".parse().unwrap(),
                port: 5000,
                size: 2048,
                token: None,
            }
        );
    }

    #[test]
    fn send_with_passive_token() {
        let parsed = parse_dcc_ctcp("SEND file.dat 2130706433 0 2048 abc123").unwrap();
        assert_eq!(
            parsed,
            DccRequest::Send {
                filename: "file.dat".to_string(),
                ip: "127.0.0.1".parse().unwrap(),
                port: 0,
                size: 2048,
                token: Some("abc123".to_string()),
            }
        );
    }

    #[test]
    fn accept_parses_port_and_position() {
        let parsed = parse_dcc_ctcp("ACCEPT file.dat 5000 1024").unwrap();
        assert_eq!(
            parsed,
            DccRequest::Accept { filename: "file.dat".to_string(), port: 5000, position: 1024, token: None }
        );
    }

    #[test]
    fn resume_parses_port_and_position() {
        let parsed = parse_dcc_ctcp("RESUME file.dat 5000 1024").unwrap();
        assert_eq!(
            parsed,
            DccRequest::Resume { filename: "file.dat".to_string(), port: 5000, position: 1024, token: None }
        );
    }

    #[test]
    fn rejects_port_zero_without_token() {
        let err = format_dcc_send_ctcp("file.dat", "127.0.0.1".parse().unwrap(), 0, 100, None).unwrap_err();
        assert!(matches!(err, DccTransferError::Protocol(_)));
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_dcc_ctcp("").is_err());
        assert!(parse_dcc_ctcp("SEND onlytwo fields").is_err());
        assert!(parse_dcc_ctcp("FROB file.dat 1 2 3").is_err());
    }

    #[test]
    fn checksum_extension_formats_with_quoting() {
        let msg = format_dcc_checksum_ctcp("my file.dat", "sha256", "abc123");
        assert_eq!(msg, "DCC CHECKSUM \"my file.dat\" sha256 abc123");
    }

    #[test]
    fn packed_ip_round_trips() {
        let ip: Ipv4Addr = "192.168.1.1".parse().unwrap();
        let packed = encode_packed_ip(ip);
        assert_eq!(decode_packed_ip(packed), ip);
    }
}

//! IRCv3 message-tags escape handling (spec.md §4.1).
//!
//!     tag-value escape   = "\\" / "\:" / "\s" / "\r" / "\n"
//!
//! `\:` decodes to `;`, `\s` to space, `\\` to `\`, `\r`/`\n` to CR/LF.
//! An unknown escape (`\x` for any other `x`) preserves the following
//! character verbatim — this is what makes `decode`/`encode` tolerant of
//! servers that invent their own escapes.

/// Decodes a single raw tag value as received on the wire.
pub fn decode_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {} // trailing backslash with nothing after it: drop it
        }
    }
    out
}

/// Encodes a tag value for transmission, the inverse of [`decode_tag_value`].
pub fn encode_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Parses the `@key1=val1;key2;key3=val3` segment (without the leading `@`
/// or trailing space) into an ordered list of (key, value) pairs. A tag
/// with no `=value` part maps to an empty string, matching IRCv3's
/// "client-only tags may be valueless" convention.
pub fn parse_tags(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter(|t| !t.is_empty())
        .map(|tag| match tag.split_once('=') {
            Some((k, v)) => (k.to_string(), decode_tag_value(v)),
            None => (tag.to_string(), String::new()),
        })
        .collect()
}

/// Renders a tag list back into the `@...` wire segment, without the `@`
/// prefix or trailing space.
pub fn format_tags(tags: &[(String, String)]) -> String {
    tags.iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={}", encode_tag_value(v))
            }
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_is_involution_on_supported_escapes() {
        let original = "semi;colon space\\backslash\r\n";
        let encoded = encode_tag_value(original);
        assert_eq!(decode_tag_value(&encoded), original);
    }

    #[test]
    fn unknown_escape_preserves_following_char() {
        assert_eq!(decode_tag_value("a\\xb"), "axb");
    }

    #[test]
    fn trailing_backslash_is_dropped() {
        assert_eq!(decode_tag_value("a\\"), "a");
    }

    #[test]
    fn parse_tags_handles_valueless_and_valued() {
        let parsed = parse_tags("time=2024-01-01;account;msgid=abc\\:123");
        assert_eq!(
            parsed,
            vec![
                ("time".to_string(), "2024-01-01".to_string()),
                ("account".to_string(), String::new()),
                ("msgid".to_string(), "abc;123".to_string()),
            ]
        );
    }

    #[test]
    fn format_tags_round_trips() {
        let tags = vec![
            ("time".to_string(), "2024-01-01".to_string()),
            ("account".to_string(), String::new()),
        ];
        assert_eq!(format_tags(&tags), "time=2024-01-01;account");
    }
}

//! ISUPPORT (numeric 005) tracking. spec.md §4.7 names this as a
//! supplement the Dispatcher needs in order to interpret MODE/NAMES
//! correctly: `CHANMODES` tells it which mode letters take a parameter,
//! `PREFIX` tells it which status symbols exist and their rank, and the
//! channel-type/length tokens bound how names/topics get validated. No
//! teacher analog — the server side never needs to parse its own
//! capability advertisement.

use std::collections::HashMap;

use super::numerics::ParamArity;

/// Parsed tokens from one or more RPL_ISUPPORT (005) lines. Accumulates
/// across lines since servers typically split the full token set over
/// several 005 replies.
#[derive(Debug, Clone)]
pub struct IsupportTable {
    raw: HashMap<String, Option<String>>,
    prefix_symbols: Vec<char>,
    prefix_letters: Vec<char>,
    chanmodes: [Vec<char>; 4],
}

impl Default for IsupportTable {
    fn default() -> Self {
        // RFC 1459 fallback, used until a PREFIX/CHANMODES token arrives.
        IsupportTable {
            raw: HashMap::new(),
            prefix_symbols: vec!['@', '+'],
            prefix_letters: vec!['o', 'v'],
            chanmodes: [vec!['b'], vec!['k'], vec!['l'], vec![]],
        }
    }
}

impl IsupportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one 005 line's tokens (`params[1..]`, excluding the trailing
    /// "are supported by this server" text and the leading nick param).
    pub fn apply_tokens(&mut self, tokens: &[String]) {
        for token in tokens {
            if token.eq_ignore_ascii_case("are") {
                continue; // trailing human-readable filler some servers include as a param
            }
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (token.clone(), None),
            };
            match key.as_str() {
                "PREFIX" => {
                    if let Some(v) = &value {
                        self.apply_prefix_token(v);
                    }
                }
                "CHANMODES" => {
                    if let Some(v) = &value {
                        self.apply_chanmodes_token(v);
                    }
                }
                _ => {}
            }
            self.raw.insert(key, value);
        }
    }

    fn apply_prefix_token(&mut self, value: &str) {
        // "(ohv)@%+": letters in parens, symbols after, paired by position.
        if let Some(paren_end) = value.find(')') {
            let letters = &value[1..paren_end];
            let symbols = &value[paren_end + 1..];
            self.prefix_letters = letters.chars().collect();
            self.prefix_symbols = symbols.chars().collect();
        }
    }

    fn apply_chanmodes_token(&mut self, value: &str) {
        let groups: Vec<&str> = value.split(',').collect();
        for (i, group) in groups.iter().take(4).enumerate() {
            self.chanmodes[i] = group.chars().collect();
        }
    }

    /// `CHANMODES=A,B,C,D`: A and B always take a parameter (A on a list
    /// type like `b`, B on a single-value type like `k`); C takes one only
    /// when being set (e.g. `l`); D never does. Status letters from
    /// `PREFIX` (`o`, `v`, ...) always take a parameter too — servers don't
    /// repeat them in `CHANMODES`, they're a separate token entirely.
    pub fn param_arity(&self, letter: char) -> ParamArity {
        if self.prefix_letters.contains(&letter) {
            ParamArity::Always
        } else if self.chanmodes[0].contains(&letter) || self.chanmodes[1].contains(&letter) {
            ParamArity::Always
        } else if self.chanmodes[2].contains(&letter) {
            ParamArity::OnSet
        } else {
            ParamArity::Never
        }
    }

    /// The rank-ordered prefix symbols, highest status first (e.g. `['@',
    /// '+']` or `['~', '&', '@', '%', '+']` with `multi-prefix`).
    pub fn prefix_symbols(&self) -> &[char] {
        &self.prefix_symbols
    }

    /// The mode letter a status symbol corresponds to (`@` -> `o`).
    pub fn letter_for_symbol(&self, symbol: char) -> Option<char> {
        self.prefix_symbols.iter().position(|&s| s == symbol).map(|i| self.prefix_letters[i])
    }

    pub fn token(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(|v| v.as_deref())
    }

    pub fn network_name(&self) -> Option<&str> {
        self.token("NETWORK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc1459() {
        let table = IsupportTable::new();
        assert_eq!(table.param_arity('o'), ParamArity::Always);
        assert_eq!(table.param_arity('l'), ParamArity::OnSet);
        assert_eq!(table.param_arity('n'), ParamArity::Never);
    }

    #[test]
    fn prefix_token_updates_symbol_rank() {
        let mut table = IsupportTable::new();
        table.apply_tokens(&["PREFIX=(ohv)@%+".to_string()]);
        assert_eq!(table.prefix_symbols(), &['@', '%', '+']);
        assert_eq!(table.letter_for_symbol('@'), Some('o'));
        assert_eq!(table.letter_for_symbol('%'), Some('h'));
    }

    #[test]
    fn chanmodes_token_reclassifies_letters() {
        let mut table = IsupportTable::new();
        table.apply_tokens(&["CHANMODES=beI,k,l,imnpst".to_string()]);
        assert_eq!(table.param_arity('e'), ParamArity::Always);
        assert_eq!(table.param_arity('k'), ParamArity::Always);
        assert_eq!(table.param_arity('l'), ParamArity::OnSet);
        assert_eq!(table.param_arity('m'), ParamArity::Never);
    }

    #[test]
    fn tokens_accumulate_across_multiple_lines() {
        let mut table = IsupportTable::new();
        table.apply_tokens(&["NETWORK=ExampleNet".to_string()]);
        table.apply_tokens(&["CHANTYPES=#&".to_string()]);
        assert_eq!(table.network_name(), Some("ExampleNet"));
        assert_eq!(table.token("CHANTYPES"), Some("#&"));
    }

    #[test]
    fn ignores_trailing_are_supported_filler() {
        let mut table = IsupportTable::new();
        table.apply_tokens(&["NETWORK=Foo".to_string(), "are".to_string()]);
        assert_eq!(table.network_name(), Some("Foo"));
    }
}

//! The ignore list (SPEC_FULL.md §3 `IgnoreList`, spec.md §4.7/§8).
//!
//! Grounded on `original_source/ignore_commands.py`'s per-pattern event
//! scoping (an ignore can be scoped to message/notice/ctcp/invite, default
//! "all"); no teacher analog exists since the server never filters what it
//! relays. Glob semantics (`*` any sequence, `?` one character,
//! case-insensitive) are the ones spec.md §8's "Ignore list glob" property
//! names; implemented directly rather than pulling in a glob crate since
//! the only inputs are `nick!user@host` masks, not filesystem paths.

use std::collections::HashSet;

/// The event categories an ignore entry can be scoped to. `All` suppresses
/// every category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreCategory {
    All,
    Message,
    Notice,
    Ctcp,
    Invite,
}

#[derive(Debug, Clone)]
struct IgnoreEntry {
    mask: String,
    categories: HashSet<IgnoreCategory>,
}

#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    entries: Vec<IgnoreEntry>,
}

impl IgnoreList {
    pub fn new() -> Self {
        IgnoreList::default()
    }

    /// An empty `categories` means "all categories" (the default scope).
    pub fn add(&mut self, mask: impl Into<String>, categories: &[IgnoreCategory]) {
        let set: HashSet<IgnoreCategory> = if categories.is_empty() {
            [IgnoreCategory::All].into_iter().collect()
        } else {
            categories.iter().copied().collect()
        };
        self.entries.push(IgnoreEntry { mask: mask.into(), categories: set });
    }

    pub fn remove(&mut self, mask: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.mask.eq_ignore_ascii_case(mask));
        self.entries.len() != before
    }

    /// Spec.md §8 "Ignore list glob": `is_source_ignored("bob!x@y.z",
    /// {"bob!*@*"})` is true; matching is case-insensitive.
    pub fn is_ignored(&self, source: &str, category: IgnoreCategory) -> bool {
        self.entries.iter().any(|entry| {
            let scoped = entry.categories.contains(&IgnoreCategory::All)
                || entry.categories.contains(&category);
            scoped && glob_match(&entry.mask, source)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `*` matches any run of characters (including none); `?` matches exactly
/// one character; everything else is compared case-insensitively.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let text: Vec<char> = text.to_ascii_lowercase().chars().collect();
    glob_match_chars(&pattern, &text)
}

fn glob_match_chars(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => {
            if glob_match_chars(rest, text) {
                return true;
            }
            if let Some((_, text_rest)) = text.split_first() {
                return glob_match_chars(pattern, text_rest);
            }
            false
        }
        Some(('?', rest)) => match text.split_first() {
            Some((_, text_rest)) => glob_match_chars(rest, text_rest),
            None => false,
        },
        Some((p, rest)) => match text.split_first() {
            Some((t, text_rest)) if t == p => glob_match_chars(rest, text_rest),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bob_mask_matches_bob_but_not_alice() {
        let mut list = IgnoreList::new();
        list.add("bob!*@*", &[]);
        assert!(list.is_ignored("bob!x@y.z", IgnoreCategory::Message));
        assert!(!list.is_ignored("alice!x@y.z", IgnoreCategory::Message));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let mut list = IgnoreList::new();
        list.add("BOB!*@*", &[]);
        assert!(list.is_ignored("bob!x@Y.Z", IgnoreCategory::Message));
    }

    #[test]
    fn category_scoping_restricts_suppression() {
        let mut list = IgnoreList::new();
        list.add("bob!*@*", &[IgnoreCategory::Ctcp]);
        assert!(list.is_ignored("bob!x@y.z", IgnoreCategory::Ctcp));
        assert!(!list.is_ignored("bob!x@y.z", IgnoreCategory::Message));
    }

    #[test]
    fn question_mark_matches_exactly_one_char() {
        let mut list = IgnoreList::new();
        list.add("bo?!*@*", &[]);
        assert!(list.is_ignored("bob!x@y.z", IgnoreCategory::Message));
        assert!(!list.is_ignored("boot!x@y.z", IgnoreCategory::Message));
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut list = IgnoreList::new();
        list.add("bob!*@*", &[]);
        assert!(list.remove("bob!*@*"));
        assert!(!list.is_ignored("bob!x@y.z", IgnoreCategory::Message));
    }
}

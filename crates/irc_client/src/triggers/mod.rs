//! The Trigger Engine (spec.md §4.8): persisted pattern-matched rules that
//! turn incoming events into either a command string or a sandboxed
//! script action.
//!
//! Grounded on `original_source/features/triggers/trigger_manager.py` (no
//! teacher analog — the server never watches for patterns in its own
//! traffic). Kept: the per-event-kind field mapping, longest-key-first
//! substitution, first-match-wins scan order, JSON persistence. Changed:
//! `compiled_pattern` is never serialized (the original's `asdict` dump
//! included it, which only worked because nothing ever actually
//! round-tripped a loaded-then-saved trigger through a regex-bearing
//! field); `ActionType::Python` becomes `ActionType::Script`, executed
//! through a caller-supplied [`ScriptExecutor`] instead of an embedded
//! interpreter, since nothing in this corpus embeds one.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::error;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    Text,
    Action,
    Join,
    Part,
    Quit,
    Kick,
    Mode,
    Topic,
    Nick,
    Notice,
    Invite,
    Ctcp,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Command,
    Script,
}

/// The persisted, serializable half of a trigger. The compiled regex lives
/// alongside it in [`CompiledTrigger`] but never round-trips to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: u64,
    pub event_type: TriggerType,
    pub pattern: String,
    pub action_type: ActionType,
    pub action_content: String,
    pub is_enabled: bool,
}

struct CompiledTrigger {
    record: TriggerRecord,
    compiled: Regex,
}

/// What incoming event data is available to match against and to
/// substitute into an action. One field per spec.md §4.8 trigger-kind
/// scan target, all optional since a given event kind populates only a
/// handful.
#[derive(Debug, Clone, Default)]
pub struct TriggerEventData {
    pub nick: Option<String>,
    pub channel: Option<String>,
    pub target: Option<String>,
    pub client_nick: Option<String>,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub modes_str: Option<String>,
    pub new_topic: Option<String>,
    pub old_nick: Option<String>,
    pub kicked_nick: Option<String>,
    pub ctcp_command: Option<String>,
    pub raw_line: Option<String>,
    pub timestamp: Option<String>,
}

impl TriggerEventData {
    fn field_value(&self, event_type: TriggerType) -> Option<&str> {
        match event_type {
            TriggerType::Text | TriggerType::Action | TriggerType::Notice => self.message.as_deref(),
            TriggerType::Join | TriggerType::Part | TriggerType::Quit => self.nick.as_deref(),
            TriggerType::Kick => self.kicked_nick.as_deref(),
            TriggerType::Mode => self.modes_str.as_deref(),
            TriggerType::Topic => self.new_topic.as_deref(),
            TriggerType::Nick => self.old_nick.as_deref(),
            TriggerType::Invite => self.channel.as_deref(),
            TriggerType::Ctcp => self.ctcp_command.as_deref(),
            TriggerType::Raw => self.raw_line.as_deref(),
        }
    }
}

/// The result of a matched trigger: either a command string ready to go
/// through the user-command parser, or a script to run through a
/// caller-supplied executor.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerAction {
    Command(String),
    Script { code: String, event_data: HashMap<String, String> },
}

/// A constrained surface a trigger's `Script` action is run against —
/// spec.md §4.8's "access to a constrained API surface (send message,
/// log, read event data)". Implementations decide what that surface
/// actually permits; the engine only guarantees failures never escape.
pub trait ScriptExecutor {
    fn execute(&self, code: &str, event_data: &HashMap<String, String>) -> Result<(), String>;
}

pub struct TriggerEngine {
    triggers: Mutex<Vec<CompiledTrigger>>,
    next_id: AtomicU64,
}

impl TriggerEngine {
    pub fn new() -> Self {
        TriggerEngine { triggers: Mutex::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    /// Loads persisted triggers from `path`. A missing file is treated as
    /// an empty trigger set, not an error. A trigger whose pattern no
    /// longer compiles is dropped with a logged error rather than failing
    /// the whole load — matches the original's per-item tolerance.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let engine = TriggerEngine::new();
        if !path.exists() {
            return Ok(engine);
        }
        let content = std::fs::read_to_string(path)?;
        let records: Vec<TriggerRecord> = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                error!("triggers: failed to parse {}: {e}", path.display());
                return Ok(engine);
            }
        };

        let mut next_id = 1u64;
        let mut compiled = Vec::with_capacity(records.len());
        for record in records {
            match Regex::new(&record.pattern) {
                Ok(re) => {
                    next_id = next_id.max(record.id + 1);
                    compiled.push(CompiledTrigger { record, compiled: re });
                }
                Err(e) => error!("triggers: dropping trigger #{} with invalid pattern '{}': {e}", record.id, record.pattern),
            }
        }
        *engine.triggers.lock().unwrap() = compiled;
        engine.next_id.store(next_id, Ordering::SeqCst);
        Ok(engine)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let records: Vec<TriggerRecord> = self.triggers.lock().unwrap().iter().map(|t| t.record.clone()).collect();
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Compiles `pattern` and appends a new, enabled trigger. Rejects
    /// before ever touching storage if the pattern doesn't compile.
    pub fn add(
        &self,
        event_type: TriggerType,
        pattern: impl Into<String>,
        action_type: ActionType,
        action_content: impl Into<String>,
    ) -> Result<u64, ScriptError> {
        let pattern = pattern.into();
        let compiled = Regex::new(&pattern).map_err(|e| ScriptError::InvalidPattern(pattern.clone(), e.to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = TriggerRecord {
            id,
            event_type,
            pattern,
            action_type,
            action_content: action_content.into(),
            is_enabled: true,
        };
        self.triggers.lock().unwrap().push(CompiledTrigger { record, compiled });
        Ok(id)
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut triggers = self.triggers.lock().unwrap();
        let before = triggers.len();
        triggers.retain(|t| t.record.id != id);
        triggers.len() != before
    }

    pub fn set_enabled(&self, id: u64, enabled: bool) -> bool {
        let mut triggers = self.triggers.lock().unwrap();
        match triggers.iter_mut().find(|t| t.record.id == id) {
            Some(t) => {
                t.record.is_enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn list(&self, filter: Option<TriggerType>) -> Vec<TriggerRecord> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| filter.is_none_or(|f| f == t.record.event_type))
            .map(|t| t.record.clone())
            .collect()
    }

    /// Scans enabled triggers of `event_type` in insertion order; the
    /// first whose pattern matches the event-kind's designated field wins
    /// (spec.md §4.8: "no cascade").
    pub fn process(&self, event_type: TriggerType, data: &TriggerEventData) -> Option<TriggerAction> {
        let field_value = data.field_value(event_type)?;
        let triggers = self.triggers.lock().unwrap();
        for t in triggers.iter() {
            if !t.record.is_enabled || t.record.event_type != event_type {
                continue;
            }
            let Some(captures) = t.compiled.captures(field_value) else { continue };
            let env = build_substitution_env(data, &captures);
            return Some(match t.record.action_type {
                ActionType::Command => TriggerAction::Command(perform_substitutions(&t.record.action_content, &env)),
                ActionType::Script => TriggerAction::Script { code: t.record.action_content.clone(), event_data: env },
            });
        }
        None
    }

    /// Runs a `Script` action's code through `executor`, catching both
    /// returned errors and panics so a broken script never takes down the
    /// caller (spec.md §4.8: "failures are caught and logged without
    /// propagating").
    pub fn run_script(&self, code: &str, event_data: &HashMap<String, String>, executor: &dyn ScriptExecutor) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(code, event_data)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => error!("triggers: script action failed: {msg}"),
            Err(_) => error!("triggers: script action panicked"),
        }
    }
}

impl Default for TriggerEngine {
    fn default() -> Self {
        TriggerEngine::new()
    }
}

fn build_substitution_env(data: &TriggerEventData, captures: &regex::Captures) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("$nick".to_string(), data.nick.clone().unwrap_or_default());
    env.insert("$channel".to_string(), data.channel.clone().unwrap_or_default());
    env.insert("$target".to_string(), data.target.clone().unwrap_or_default());
    env.insert("$me".to_string(), data.client_nick.clone().unwrap_or_default());
    let message = data.message.clone().unwrap_or_default();
    env.insert("$msg".to_string(), message.clone());
    env.insert("$message".to_string(), message.clone());
    env.insert("$reason".to_string(), data.reason.clone().unwrap_or_default());
    env.insert("$mode".to_string(), data.modes_str.clone().unwrap_or_default());
    env.insert("$topic".to_string(), data.new_topic.clone().unwrap_or_default());
    env.insert("$raw".to_string(), data.raw_line.clone().unwrap_or_default());
    env.insert("$timestamp".to_string(), data.timestamp.clone().unwrap_or_default());

    let words: Vec<&str> = message.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        env.insert(format!("$${}", i + 1), word.to_string());
    }
    if words.len() > 1 {
        env.insert("$1-".to_string(), words[1..].join(" "));
    }
    if words.len() > 2 {
        env.insert("$2-".to_string(), words[2..].join(" "));
    }

    env.insert("$0".to_string(), captures.get(0).map(|m| m.as_str().to_string()).unwrap_or_default());
    for i in 1..captures.len() {
        env.insert(format!("${i}"), captures.get(i).map(|m| m.as_str().to_string()).unwrap_or_default());
    }
    env
}

/// Replaces every `$`-prefixed variable in `template` with its value,
/// longest key first so `$message` is replaced before `$msg` even though
/// the latter is a prefix of the former.
fn perform_substitutions(template: &str, env: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()));
    let mut result = template.to_string();
    for key in keys {
        result = result.replace(key.as_str(), &env[key]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with_message(message: &str) -> TriggerEventData {
        TriggerEventData {
            nick: Some("alice".to_string()),
            channel: Some("#chan".to_string()),
            client_nick: Some("bob".to_string()),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn text_trigger_matches_and_substitutes_command() {
        let engine = TriggerEngine::new();
        engine.add(TriggerType::Text, "hello", ActionType::Command, "PRIVMSG $channel :hi $nick").unwrap();
        let action = engine.process(TriggerType::Text, &data_with_message("hello there")).unwrap();
        assert_eq!(action, TriggerAction::Command("PRIVMSG #chan :hi alice".to_string()));
    }

    #[test]
    fn longest_key_substitution_prefers_message_over_msg() {
        let engine = TriggerEngine::new();
        engine.add(TriggerType::Text, "hi", ActionType::Command, "echo $message / $msg").unwrap();
        let action = engine.process(TriggerType::Text, &data_with_message("hi")).unwrap();
        assert_eq!(action, TriggerAction::Command("echo hi / hi".to_string()));
    }

    #[test]
    fn first_match_wins_no_cascade() {
        let engine = TriggerEngine::new();
        engine.add(TriggerType::Text, "hi", ActionType::Command, "first").unwrap();
        engine.add(TriggerType::Text, "hi", ActionType::Command, "second").unwrap();
        let action = engine.process(TriggerType::Text, &data_with_message("hi")).unwrap();
        assert_eq!(action, TriggerAction::Command("first".to_string()));
    }

    #[test]
    fn disabled_trigger_is_skipped() {
        let engine = TriggerEngine::new();
        let id = engine.add(TriggerType::Text, "hi", ActionType::Command, "first").unwrap();
        engine.add(TriggerType::Text, "hi", ActionType::Command, "second").unwrap();
        engine.set_enabled(id, false);
        let action = engine.process(TriggerType::Text, &data_with_message("hi")).unwrap();
        assert_eq!(action, TriggerAction::Command("second".to_string()));
    }

    #[test]
    fn kick_trigger_matches_kicked_nick_field() {
        let engine = TriggerEngine::new();
        engine.add(TriggerType::Kick, "^carol$", ActionType::Command, "welcome back $nick").unwrap();
        let data = TriggerEventData { kicked_nick: Some("carol".to_string()), nick: Some("op".to_string()), ..Default::default() };
        let action = engine.process(TriggerType::Kick, &data).unwrap();
        assert_eq!(action, TriggerAction::Command("welcome back op".to_string()));
    }

    #[test]
    fn regex_capture_groups_are_available_as_dollar_n() {
        let engine = TriggerEngine::new();
        engine.add(TriggerType::Text, r"^!echo (\w+)$", ActionType::Command, "PRIVMSG $channel :$1").unwrap();
        let action = engine.process(TriggerType::Text, &data_with_message("!echo hi")).unwrap();
        assert_eq!(action, TriggerAction::Command("PRIVMSG #chan :hi".to_string()));
    }

    #[test]
    fn invalid_pattern_is_rejected_without_being_added() {
        let engine = TriggerEngine::new();
        let err = engine.add(TriggerType::Text, "(unterminated", ActionType::Command, "x").unwrap_err();
        assert!(matches!(err, ScriptError::InvalidPattern(_, _)));
        assert!(engine.list(None).is_empty());
    }

    #[test]
    fn script_action_failure_is_caught_and_does_not_propagate() {
        struct Failing;
        impl ScriptExecutor for Failing {
            fn execute(&self, _code: &str, _event_data: &HashMap<String, String>) -> Result<(), String> {
                Err("boom".to_string())
            }
        }
        let engine = TriggerEngine::new();
        engine.add(TriggerType::Text, "hi", ActionType::Script, "do_something()").unwrap();
        let action = engine.process(TriggerType::Text, &data_with_message("hi")).unwrap();
        if let TriggerAction::Script { code, event_data } = action {
            engine.run_script(&code, &event_data, &Failing);
        } else {
            panic!("expected a script action");
        }
    }

    #[test]
    fn save_and_load_round_trip_preserves_triggers() {
        let path = std::env::temp_dir().join(format!("irc_client_core_triggers_test_{}.json", std::process::id()));
        let engine = TriggerEngine::new();
        engine.add(TriggerType::Join, "alice", ActionType::Command, "PRIVMSG #chan :hi $nick").unwrap();
        engine.save(&path).unwrap();

        let loaded = TriggerEngine::load(&path).unwrap();
        let records = loaded.list(None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pattern, "alice");

        let _ = std::fs::remove_file(&path);
    }
}

//! The variable resolver: turns `user.*`, `message.*`,
//! `command.*`, `media_group.*`, `time.*`, `user.stats.*`, `group.stats.*`
//! and `vars.*` paths into values, consulting the platform client,
//! statistics store and persistent store as needed — each external query
//! memoized at most once per event.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;

use crate::error::ResolveError;
use crate::eval::index_value;
use crate::event::{Event, EventPayload, EventTag, Message};
use crate::platform::PlatformClient;
use crate::store::{PersistentStore, StatKind, StatisticsStore};
use crate::value::Value;

/// One already-evaluated path segment handed to the resolver: index
/// expressions have already been reduced to a [`Value`] by the evaluator.
#[derive(Debug, Clone)]
pub enum ResolvedSegment {
    Attr(String),
    Index(Value),
}

impl ResolvedSegment {
    fn canonical(&self) -> String {
        match self {
            ResolvedSegment::Attr(name) => format!(".{name}"),
            ResolvedSegment::Index(v) => format!("[{}]", v.render()),
        }
    }
}

pub fn canonical_path(root: &str, segments: &[ResolvedSegment]) -> String {
    let mut s = root.to_string();
    for seg in segments {
        s.push_str(&seg.canonical());
    }
    s
}

/// Per-event execution context: the triggering event, the target user for
/// administrative actions (see `executor::resolve_target_user`), the
/// backing stores/client, and the memoization cache.
///
/// Lives exactly as long as one dispatch.
pub struct EventContext {
    pub event: Event,
    pub platform: Arc<dyn PlatformClient>,
    pub store: Arc<dyn PersistentStore>,
    pub stats: Arc<dyn StatisticsStore>,
    memo: AHashMap<String, Value>,
    command_cache: Option<ParsedCommand>,
}

struct ParsedCommand {
    name: String,
    args: Vec<String>,
}

impl EventContext {
    pub fn new(
        event: Event,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn PersistentStore>,
        stats: Arc<dyn StatisticsStore>,
    ) -> Self {
        Self {
            event,
            platform,
            store,
            stats,
            memo: AHashMap::default(),
            command_cache: None,
        }
    }

    fn memo_get(&self, key: &str) -> Option<&Value> {
        self.memo.get(key)
    }

    fn memo_put(&mut self, key: String, value: Value) {
        self.memo.insert(key, value);
    }
}

#[async_trait]
pub trait VariableResolver: Send + Sync {
    async fn resolve(
        &self,
        root: &str,
        segments: &[ResolvedSegment],
        ctx: &mut EventContext,
    ) -> Result<Value, ResolveError>;
}

/// The production `VariableResolver` used outside of tests.
pub struct DefaultResolver;

#[async_trait]
impl VariableResolver for DefaultResolver {
    async fn resolve(
        &self,
        root: &str,
        segments: &[ResolvedSegment],
        ctx: &mut EventContext,
    ) -> Result<Value, ResolveError> {
        let key = canonical_path(root, segments);
        if let Some(cached) = ctx.memo_get(&key) {
            return Ok(cached.clone());
        }
        let value = match root {
            "user" => resolve_user(segments, ctx).await?,
            "message" => resolve_message(segments, ctx)?,
            "command" => resolve_command(segments, ctx)?,
            "media_group" => resolve_media_group(segments, ctx)?,
            "time" => resolve_time(segments)?,
            "group" => resolve_group(segments, ctx).await?,
            "vars" => resolve_vars(segments, ctx).await?,
            other => return Err(ResolveError::new(format!("unknown context root '{other}'"))),
        };
        ctx.memo_put(key, value.clone());
        Ok(value)
    }
}

fn attr_name(seg: &ResolvedSegment) -> Option<&str> {
    match seg {
        ResolvedSegment::Attr(name) => Some(name.as_str()),
        ResolvedSegment::Index(_) => None,
    }
}

async fn resolve_user(segments: &[ResolvedSegment], ctx: &mut EventContext) -> Result<Value, ResolveError> {
    let Some(user) = ctx.event.user().cloned() else {
        return walk_rest(Value::Null, segments);
    };

    match segments.first().and_then(attr_name) {
        Some("is_admin") => {
            let member = ctx
                .platform
                .get_chat_member(ctx.event.group_id, user.id)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
            walk_rest(Value::Bool(member.is_admin), &segments[1..])
        }
        Some("stats") => {
            let window = segments.get(1).and_then(attr_name).ok_or_else(|| {
                ResolveError::new("user.stats requires a '<kind>_<N><unit>' field")
            })?;
            let (kind, seconds) = parse_stat_window(window, StatsScope::User)?;
            let count = ctx
                .stats
                .count(ctx.event.group_id, kind, seconds, Some(user.id))
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
            walk_rest(Value::Number(count as f64), &segments[2..])
        }
        _ => walk_rest(user_value(&user), segments),
    }
}

fn resolve_message(segments: &[ResolvedSegment], ctx: &EventContext) -> Result<Value, ResolveError> {
    let base = ctx.event.message().map(message_value).unwrap_or(Value::Null);
    walk_rest(base, segments)
}

fn resolve_command(segments: &[ResolvedSegment], ctx: &mut EventContext) -> Result<Value, ResolveError> {
    if ctx.event.tag != EventTag::Command {
        return Err(ResolveError::new("'command.*' is only valid for command events"));
    }
    let message = ctx
        .event
        .message()
        .ok_or_else(|| ResolveError::new("command event missing its message"))?;
    let text = message.text.clone().unwrap_or_default();

    if ctx.command_cache.is_none() {
        let (name, args) = parse_command_text(&text);
        ctx.command_cache = Some(ParsedCommand { name, args });
    }
    let parsed = ctx.command_cache.as_ref().unwrap();

    let base = Value::Map(BTreeMap::from([
        ("name".to_string(), Value::str(parsed.name.clone())),
        (
            "arg".to_string(),
            Value::List(parsed.args.iter().map(|a| Value::str(a.clone())).collect()),
        ),
        ("arg_count".to_string(), Value::Number((parsed.args.len() + 1) as f64)),
        (
            "full_args".to_string(),
            Value::str(full_args(&text)),
        ),
    ]));
    walk_rest(base, segments)
}

fn resolve_media_group(segments: &[ResolvedSegment], ctx: &EventContext) -> Result<Value, ResolveError> {
    let EventPayload::MediaGroup { messages, .. } = &ctx.event.payload else {
        return Err(ResolveError::new("'media_group.*' is only valid for media_group events"));
    };
    let caption = messages
        .iter()
        .find_map(|m| m.caption.clone())
        .map(Value::str)
        .unwrap_or(Value::Null);
    let base = Value::Map(BTreeMap::from([
        (
            "messages".to_string(),
            Value::List(messages.iter().map(message_value).collect()),
        ),
        ("message_count".to_string(), Value::Number(messages.len() as f64)),
        ("caption".to_string(), caption),
    ]));
    walk_rest(base, segments)
}

fn resolve_time(segments: &[ResolvedSegment]) -> Result<Value, ResolveError> {
    let base = Value::Map(BTreeMap::from([(
        "unix".to_string(),
        Value::Number(crate::time::now_unix() as f64),
    )]));
    walk_rest(base, segments)
}

async fn resolve_group(segments: &[ResolvedSegment], ctx: &mut EventContext) -> Result<Value, ResolveError> {
    match segments.first().and_then(attr_name) {
        Some("stats") => {
            let window = segments
                .get(1)
                .and_then(attr_name)
                .ok_or_else(|| ResolveError::new("group.stats requires a '<kind>_<N><unit>' field"))?;
            let (kind, seconds) = parse_stat_window(window, StatsScope::Group)?;
            let count = ctx
                .stats
                .count(ctx.event.group_id, kind, seconds, None)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
            walk_rest(Value::Number(count as f64), &segments[2..])
        }
        other => Err(ResolveError::new(format!(
            "unsupported 'group.{}' path",
            other.unwrap_or("?")
        ))),
    }
}

/// `vars.group.<name>`, `vars.user.<name>` (target user) or
/// `vars.user_<id>.<name>` (specific user). Missing data returns `null`,
/// never an error.
async fn resolve_vars(segments: &[ResolvedSegment], ctx: &mut EventContext) -> Result<Value, ResolveError> {
    let Some(scope_seg) = segments.first().and_then(attr_name) else {
        return Err(ResolveError::new("'vars.*' requires a scope segment"));
    };
    let Some(name) = segments.get(1).and_then(attr_name) else {
        return Ok(Value::Null);
    };

    let (scope, target) = match parse_var_scope(scope_seg, ctx.target_user_id()) {
        Some(pair) => pair,
        None => return Ok(Value::Null),
    };

    let value = ctx
        .store
        .read_var(ctx.event.group_id, scope, name, target)
        .await
        .unwrap_or(None)
        .unwrap_or(Value::Null);
    walk_rest(value, &segments[2..])
}

impl EventContext {
    /// The effective target user for `vars.user.*` reads inside a rule body
    /// that has not (yet) explicitly disambiguated a target: falls back to
    /// the reply-to author, then the triggering user. This is the same
    /// three-step search `get_var`/`set_var` and every administrative action
    /// use to pick a target.
    pub fn target_user_id(&self) -> Option<i64> {
        if let Some(msg) = self.event.message() {
            if let Some(reply) = &msg.reply_to_message {
                return Some(reply.from_user.id);
            }
        }
        self.event.user().map(|u| u.id)
    }
}

/// Splits a `get_var`/`set_var` path argument like `"user.warnings"` or
/// `"user_12345.warnings"` into its scope token and variable name, mirroring
/// how `vars.<scope>.<name>` is already split into path segments by the
/// parser.
pub fn split_var_path(path: &str) -> Option<(&str, &str)> {
    path.split_once('.')
}

/// The three-step target-user search shared by every administrative action
/// and by `get_var`/`set_var` with scope `user`: an explicit id the caller
/// passed, else the replied-to message's author, else the user who
/// triggered the event.
pub fn resolve_target_user(explicit: Option<i64>, ctx: &EventContext) -> Option<i64> {
    explicit.or_else(|| ctx.target_user_id())
}

/// Scope parsing shared between `vars.*` path resolution and the `get_var`/
/// `set_var` builtins/actions, so both agree on scope semantics (SPEC_FULL
/// §4.3).
pub fn parse_var_scope(scope_token: &str, target_user_id: Option<i64>) -> Option<(&'static str, Option<i64>)> {
    if scope_token == "group" {
        return Some(("group", None));
    }
    if scope_token == "user" {
        return target_user_id.map(|id| ("user", Some(id)));
    }
    if let Some(digits) = scope_token.strip_prefix("user_") {
        return digits.parse::<i64>().ok().map(|id| ("user", Some(id)));
    }
    None
}

enum StatsScope {
    User,
    Group,
}

fn parse_stat_window(field: &str, scope: StatsScope) -> Result<(StatKind, u64), ResolveError> {
    let (kind_str, window_str) = field
        .rsplit_once('_')
        .ok_or_else(|| ResolveError::new(format!("malformed stats field '{field}'")))?;

    let unit = window_str
        .chars()
        .last()
        .ok_or_else(|| ResolveError::new(format!("malformed stats field '{field}'")))?;
    let digits = &window_str[..window_str.len() - unit.len_utf8()];
    let n: u64 = digits
        .parse()
        .map_err(|_| ResolveError::new(format!("malformed stats window '{window_str}'")))?;
    let seconds = match unit {
        's' => n,
        'm' => n * 60,
        'h' => n * 3600,
        'd' => n * 86400,
        other => return Err(ResolveError::new(format!("unknown stats window unit '{other}'"))),
    };

    let kind = match (scope, kind_str) {
        (StatsScope::User, "messages") => StatKind::UserMessages,
        (StatsScope::Group, "messages") => StatKind::GroupMessages,
        (StatsScope::Group, "joins") => StatKind::GroupJoins,
        (StatsScope::Group, "leaves") => StatKind::GroupLeaves,
        (_, other) => return Err(ResolveError::new(format!("unsupported stats kind '{other}'"))),
    };
    Ok((kind, seconds))
}

/// Splits `/cmd arg1 "arg two" arg3` into (`cmd`, [`arg1`, `arg two`, `arg3`]),
/// respecting double-quoted groups.
fn parse_command_text(text: &str) -> (String, Vec<String>) {
    let mut tokens = tokenize_command_args(text);
    let name = if tokens.is_empty() {
        String::new()
    } else {
        tokens.remove(0)
    };
    let name = name.strip_prefix('/').unwrap_or(&name).to_string();
    (name, tokens)
}

fn tokenize_command_args(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut token = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                token.push(chars.next().unwrap());
            }
        }
        tokens.push(token);
    }
    tokens
}

/// The string from the first argument's starting offset onward.
fn full_args(text: &str) -> String {
    let trimmed = text.trim_start();
    match trimmed.split_once(char::is_whitespace) {
        Some((_, rest)) => rest.trim_start().to_string(),
        None => String::new(),
    }
}

fn user_value(user: &crate::event::User) -> Value {
    Value::Map(BTreeMap::from([
        ("id".to_string(), Value::Number(user.id as f64)),
        (
            "username".to_string(),
            user.username.clone().map(Value::str).unwrap_or(Value::Null),
        ),
        ("first_name".to_string(), Value::str(user.first_name.clone())),
        ("is_bot".to_string(), Value::Bool(user.is_bot)),
    ]))
}

fn message_value(message: &Message) -> Value {
    Value::Map(BTreeMap::from([
        ("id".to_string(), Value::Number(message.id as f64)),
        ("chat_id".to_string(), Value::Number(message.chat_id as f64)),
        ("from_user".to_string(), user_value(&message.from_user)),
        (
            "text".to_string(),
            message.text.clone().map(Value::str).unwrap_or(Value::Null),
        ),
        (
            "caption".to_string(),
            message.caption.clone().map(Value::str).unwrap_or(Value::Null),
        ),
        (
            "reply_to_message".to_string(),
            message
                .reply_to_message
                .as_deref()
                .map(message_value)
                .unwrap_or(Value::Null),
        ),
    ]))
}

/// Applies any segments left over after a namespace handler has produced its
/// base value, reusing the evaluator's generic null-propagating indexer so
/// this logic exists in exactly one place (design note §9).
fn walk_rest(mut base: Value, segments: &[ResolvedSegment]) -> Result<Value, ResolveError> {
    for seg in segments {
        if matches!(base, Value::Null) {
            return Ok(Value::Null);
        }
        base = match seg {
            ResolvedSegment::Attr(name) => match &base {
                Value::Map(map) => map.get(name).cloned().unwrap_or(Value::Null),
                other => {
                    return Err(ResolveError::new(format!(
                        "cannot access attribute '{name}' on a {}",
                        other.type_name()
                    )))
                }
            },
            ResolvedSegment::Index(index) => {
                index_value(&base, index).map_err(|e| ResolveError::new(e.to_string()))?
            }
        };
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_window_minutes() {
        let (kind, seconds) = parse_stat_window("messages_5m", StatsScope::User).unwrap();
        assert_eq!(kind, StatKind::UserMessages);
        assert_eq!(seconds, 300);
    }

    #[test]
    fn parses_var_scope_user_with_digits() {
        let (scope, target) = parse_var_scope("user_12345", None).unwrap();
        assert_eq!(scope, "user");
        assert_eq!(target, Some(12345));
    }

    #[test]
    fn command_args_respect_quoted_groups() {
        let (name, args) = parse_command_text(r#"/warn 77 "spamming a lot""#);
        assert_eq!(name, "warn");
        assert_eq!(args, vec!["77".to_string(), "spamming a lot".to_string()]);
    }

    #[test]
    fn full_args_starts_at_first_argument() {
        assert_eq!(full_args("/warn 77 spamming a lot"), "77 spamming a lot");
        assert_eq!(full_args("/warn"), "");
    }
}

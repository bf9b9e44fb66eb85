//! Action dispatch: the side-effecting calls a rule body can
//! make as bare statements — `reply(...)`, `ban_user(...)`, `set_var(...)`,
//! `stop`, and so on. Kept separate from [`crate::builtins`], which covers
//! pure expression functions with no adapter access.

use crate::error::{EvalError, ResolveError, RuntimeError};
use crate::resolver::{parse_var_scope, resolve_target_user, split_var_path, EventContext};
use crate::token::Position;
use crate::value::Value;

pub const ACTION_NAMES: &[&str] = &[
    "reply",
    "send_message",
    "delete_message",
    "ban_user",
    "kick_user",
    "mute_user",
    "unmute_user",
    "set_var",
    "start_verification",
    "stop",
];

pub fn is_action(name: &str) -> bool {
    ACTION_NAMES.contains(&name)
}

/// What running an action does to the enclosing rule's control flow.
pub enum ActionEffect {
    Continue,
    Stop,
}

pub async fn dispatch(
    name: &str,
    args: &[Value],
    ctx: &mut EventContext,
    pos: Position,
) -> Result<ActionEffect, EvalError> {
    match name {
        "stop" => return Ok(ActionEffect::Stop),
        "reply" => {
            let text = expect_str(args, 0, pos)?;
            let message_id = ctx
                .event
                .message()
                .map(|m| m.id)
                .ok_or_else(|| RuntimeError::new("reply() requires a message event", pos))?;
            ctx.platform
                .reply(message_id, &text)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "send_message" => {
            let text = expect_str(args, 0, pos)?;
            ctx.platform
                .send_message(ctx.event.group_id, &text)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "delete_message" => {
            let message_id = match args.first() {
                Some(Value::Number(n)) => *n as i64,
                _ => ctx
                    .event
                    .message()
                    .map(|m| m.id)
                    .ok_or_else(|| RuntimeError::new("delete_message() requires a message event", pos))?,
            };
            ctx.platform
                .delete(message_id)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "ban_user" => {
            let Some(user) = resolve_target_user(explicit_target(args, 0), ctx) else {
                return Ok(ActionEffect::Continue);
            };
            let reason = args.get(1).and_then(as_str);
            ctx.platform
                .ban(ctx.event.group_id, user, reason.as_deref())
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "kick_user" => {
            let Some(user) = resolve_target_user(explicit_target(args, 0), ctx) else {
                return Ok(ActionEffect::Continue);
            };
            ctx.platform
                .kick(ctx.event.group_id, user)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "mute_user" => {
            let Some(user) = resolve_target_user(explicit_target(args, 0), ctx) else {
                return Ok(ActionEffect::Continue);
            };
            let until = match args.get(1) {
                Some(Value::Number(n)) => Some(crate::time::now_unix() + *n as i64),
                _ => None,
            };
            ctx.platform
                .restrict(ctx.event.group_id, user, until)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "unmute_user" => {
            let Some(user) = resolve_target_user(explicit_target(args, 0), ctx) else {
                return Ok(ActionEffect::Continue);
            };
            ctx.platform
                .unrestrict(ctx.event.group_id, user)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "start_verification" => {
            let Some(user) = resolve_target_user(explicit_target(args, 0), ctx) else {
                return Ok(ActionEffect::Continue);
            };
            ctx.platform
                .start_verification(ctx.event.group_id, user)
                .await
                .map_err(|e| ResolveError::new(e.to_string()))?;
        }
        "set_var" => {
            let path = expect_str(args, 0, pos)?;
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            let explicit = explicit_target(args, 2);

            let Some((scope_token, var_name)) = split_var_path(&path) else {
                return Err(RuntimeError::new(format!("'{path}' is not a valid set_var path"), pos).into());
            };
            let target = resolve_target_user(explicit, ctx);
            let Some((scope, target)) = parse_var_scope(scope_token, target) else {
                return Ok(ActionEffect::Continue);
            };

            // A null value deletes the variable rather than storing an explicit null.
            if matches!(value, Value::Null) {
                ctx.store
                    .delete_var(ctx.event.group_id, scope, var_name, target)
                    .await
                    .map_err(|e| ResolveError::new(e.to_string()))?;
            } else {
                ctx.store
                    .write_var(ctx.event.group_id, scope, var_name, value, target)
                    .await
                    .map_err(|e| ResolveError::new(e.to_string()))?;
            }
        }
        other => return Err(RuntimeError::new(format!("unknown action '{other}'"), pos).into()),
    }
    Ok(ActionEffect::Continue)
}

fn as_str(v: &Value) -> Option<String> {
    match v {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

fn expect_str(args: &[Value], index: usize, pos: Position) -> Result<String, EvalError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(RuntimeError::new(
            format!("expected a string argument, got a {}", other.type_name()),
            pos,
        )
        .into()),
        None => Err(RuntimeError::new(format!("missing argument {}", index + 1), pos).into()),
    }
}

fn explicit_target(args: &[Value], index: usize) -> Option<i64> {
    match args.get(index) {
        Some(Value::Number(n)) => Some(*n as i64),
        _ => None,
    }
}



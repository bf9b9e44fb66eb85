//! The expression evaluator. Pure with respect to the AST and
//! scope; all effects (context-variable lookups) are delegated to a
//! [`VariableResolver`] supplied by the caller.

use async_recursion::async_recursion;

use crate::ast::{BinaryOp, Expr, PathSegment, UnaryOp};
use crate::builtins;
use crate::error::{EvalError, RuntimeError};
use crate::resolver::{parse_var_scope, resolve_target_user, split_var_path, EventContext, ResolvedSegment, VariableResolver};
use crate::scope::Scope;
use crate::token::Position;
use crate::value::Value;

const CONTEXT_ROOTS: &[&str] = &["user", "message", "command", "media_group", "time", "vars", "group"];

pub fn is_context_root(name: &str) -> bool {
    CONTEXT_ROOTS.contains(&name)
}

#[async_recursion]
pub async fn eval_expr(
    expr: &Expr,
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v, _) => Ok(v.clone()),

        Expr::ListLiteral(items, _) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, scope, resolver, ctx).await?);
            }
            Ok(Value::List(out))
        }

        Expr::DictLiteral(pairs, _) => {
            let mut map = std::collections::BTreeMap::new();
            for (key, value_expr) in pairs {
                let value = eval_expr(value_expr, scope, resolver, ctx).await?;
                map.insert(key.clone(), value);
            }
            Ok(Value::Map(map))
        }

        Expr::Identifier(name, pos) => {
            if let Some(v) = scope.get(name) {
                Ok(v.clone())
            } else if is_context_root(name) {
                let value = resolve_path(name, &[], scope, resolver, ctx).await?;
                Ok(value)
            } else {
                Err(RuntimeError::new(format!("unknown variable '{name}'"), *pos).into())
            }
        }

        Expr::Path { root, segments, .. } => resolve_path(root, segments, scope, resolver, ctx).await,

        Expr::Unary(op, operand, pos) => {
            let v = eval_expr(operand, scope, resolver, ctx).await?;
            eval_unary(*op, v, *pos)
        }

        Expr::Binary(BinaryOp::And, lhs, rhs, _) => {
            let l = eval_expr(lhs, scope, resolver, ctx).await?;
            if !l.is_truthy() {
                return Ok(l);
            }
            eval_expr(rhs, scope, resolver, ctx).await
        }

        Expr::Binary(BinaryOp::Or, lhs, rhs, _) => {
            let l = eval_expr(lhs, scope, resolver, ctx).await?;
            if l.is_truthy() {
                return Ok(l);
            }
            eval_expr(rhs, scope, resolver, ctx).await
        }

        Expr::Binary(op, lhs, rhs, pos) => {
            let l = eval_expr(lhs, scope, resolver, ctx).await?;
            let r = eval_expr(rhs, scope, resolver, ctx).await?;
            eval_binary(*op, l, r, *pos)
        }

        Expr::Call { name, args, pos } if name == "get_var" => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, scope, resolver, ctx).await?);
            }
            eval_get_var(&values, ctx, *pos).await
        }

        Expr::Call { name, args, pos } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, scope, resolver, ctx).await?);
            }
            builtins::call(name, &values, *pos).map_err(Into::into)
        }
    }
}

/// `get_var(path, default?, user_id?)`: reads a persisted variable as an
/// expression, where `path` is `"<scope>.<name>"` sharing its scope grammar
/// with `vars.*` paths (see [`parse_var_scope`]). A missing value, an
/// unrecognized scope, or a store failure all read as `default` (or `null`
/// if no default was given) — persisted state is inherently optional.
async fn eval_get_var(args: &[Value], ctx: &mut EventContext, pos: Position) -> Result<Value, EvalError> {
    let Some(Value::Str(path)) = args.first() else {
        return Err(RuntimeError::new("get_var(path, default?, user_id?) expects a string path", pos).into());
    };
    let default = args.get(1).cloned().unwrap_or(Value::Null);
    let explicit = match args.get(2) {
        Some(Value::Number(n)) => Some(*n as i64),
        _ => None,
    };

    let Some((scope_token, name)) = split_var_path(path) else {
        return Err(RuntimeError::new(format!("'{path}' is not a valid get_var path"), pos).into());
    };
    let target = resolve_target_user(explicit, ctx);
    let Some((scope, target)) = parse_var_scope(scope_token, target) else {
        return Ok(default);
    };

    let group_id = ctx.event.group_id;
    Ok(ctx
        .store
        .read_var(group_id, scope, name, target)
        .await
        .unwrap_or(None)
        .unwrap_or(default))
}

/// Resolves a complete path: local variable paths are walked generically
/// here (the one place null-propagation through `.attr`/`[index]` chains is
/// implemented, per design note §9); context-namespace paths (`user.*`,
/// `message.*`, ...) are delegated whole to the resolver, which internally
/// reuses [`walk_path`] for its own nested objects (e.g. `reply_to_message`).
async fn resolve_path(
    root: &str,
    segments: &[PathSegment],
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
) -> Result<Value, EvalError> {
    if let Some(base) = scope.get(root).cloned() {
        return walk_local(base, segments, scope, resolver, ctx).await;
    }

    if !is_context_root(root) {
        return Err(RuntimeError::new(format!("unknown variable '{root}'"), Position::START).into());
    }

    let mut resolved = Vec::with_capacity(segments.len());
    for seg in segments {
        match seg {
            PathSegment::Attr(name) => resolved.push(ResolvedSegment::Attr(name.clone())),
            PathSegment::Index(index_expr) => {
                let v = eval_expr(index_expr, scope, resolver, ctx).await?;
                resolved.push(ResolvedSegment::Index(v));
            }
        }
    }

    resolver
        .resolve(root, &resolved, ctx)
        .await
        .map_err(Into::into)
}

/// Generic null-propagating walk over a local [`Value`]: `.attr` indexes a
/// map, `[expr]` indexes a list/string/map. A `null` at any point short-
/// circuits the remaining segments to `null` rather than erroring.
async fn walk_local(
    mut current: Value,
    segments: &[PathSegment],
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
) -> Result<Value, EvalError> {
    for seg in segments {
        if matches!(current, Value::Null) {
            return Ok(Value::Null);
        }
        current = match seg {
            PathSegment::Attr(name) => match &current {
                Value::Map(map) => map.get(name).cloned().unwrap_or(Value::Null),
                other => {
                    return Err(RuntimeError::new(
                        format!("cannot access attribute '{name}' on a {}", other.type_name()),
                        Position::START,
                    )
                    .into())
                }
            },
            PathSegment::Index(index_expr) => {
                let index = eval_expr(index_expr, scope, resolver, ctx).await?;
                index_value(&current, &index)?
            }
        };
    }
    Ok(current)
}

pub fn index_value(base: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match (base, index) {
        (Value::List(items), Value::Number(n)) => {
            let i = *n as i64;
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| RuntimeError::new(format!("index {i} out of bounds"), Position::START))
        }
        (Value::Str(s), Value::Number(n)) => {
            let i = *n as i64;
            usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| RuntimeError::new(format!("index {i} out of bounds"), Position::START))
        }
        (Value::Map(map), Value::Str(key)) => Ok(map.get(key.as_str()).cloned().unwrap_or(Value::Null)),
        (other, _) => Err(RuntimeError::new(
            format!("cannot index into a {}", other.type_name()),
            Position::START,
        )),
    }
}

fn eval_unary(op: UnaryOp, v: Value, pos: Position) -> Result<Value, EvalError> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Neg, other) => Err(RuntimeError::new(
            format!("cannot negate a {}", other.type_name()),
            pos,
        )
        .into()),
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value, pos: Position) -> Result<Value, EvalError> {
    use BinaryOp::*;
    use Value::*;

    match op {
        Add => match (l, r) {
            (Number(a), Number(b)) => Ok(Number(a + b)),
            (Str(a), Str(b)) => Ok(Value::str(format!("{a}{b}"))),
            (Str(a), other) => Ok(Value::str(format!("{a}{}", other.render()))),
            (other, Str(b)) => Ok(Value::str(format!("{}{b}", other.render()))),
            (List(mut a), List(b)) => {
                a.extend(b);
                Ok(List(a))
            }
            (a, b) => Err(type_mismatch("+", &a, &b, pos)),
        },
        Sub => numeric_op(l, r, pos, |a, b| a - b),
        Mul => numeric_op(l, r, pos, |a, b| a * b),
        Div => match (l, r) {
            (Number(_), Number(b)) if b == 0.0 => {
                Err(RuntimeError::new("division by zero", pos).into())
            }
            (Number(a), Number(b)) => Ok(Number(a / b)),
            (a, b) => Err(type_mismatch("/", &a, &b, pos)),
        },
        Eq => Ok(Bool(values_equal(&l, &r))),
        NotEq => Ok(Bool(!values_equal(&l, &r))),
        Gt => compare(l, r, pos, |o| o == std::cmp::Ordering::Greater),
        GtEq => compare(l, r, pos, |o| o != std::cmp::Ordering::Less),
        Lt => compare(l, r, pos, |o| o == std::cmp::Ordering::Less),
        LtEq => compare(l, r, pos, |o| o != std::cmp::Ordering::Greater),
        Contains => match (&l, &r) {
            (Str(s), Str(needle)) => Ok(Bool(s.contains(needle.as_str()))),
            (List(items), needle) => Ok(Bool(items.iter().any(|v| values_equal(v, needle)))),
            _ => Err(type_mismatch("contains", &l, &r, pos)),
        },
        StartsWith => match (&l, &r) {
            (Str(s), Str(prefix)) => Ok(Bool(s.starts_with(prefix.as_str()))),
            _ => Err(type_mismatch("startswith", &l, &r, pos)),
        },
        EndsWith => match (&l, &r) {
            (Str(s), Str(suffix)) => Ok(Bool(s.ends_with(suffix.as_str()))),
            _ => Err(type_mismatch("endswith", &l, &r, pos)),
        },
        And | Or => unreachable!("short-circuit operators are handled in eval_expr"),
    }
}

fn numeric_op(l: Value, r: Value, pos: Position, f: impl Fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(a, b))),
        (a, b) => Err(type_mismatch("arithmetic", &a, &b, pos)),
    }
}

fn compare(l: Value, r: Value, pos: Position, f: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, EvalError> {
    match (&l, &r) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(
            a.partial_cmp(b).map(&f).unwrap_or(false),
        )),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(f(a.cmp(b)))),
        _ => Err(type_mismatch("comparison", &l, &r, pos)),
    }
}

fn type_mismatch(op: &str, l: &Value, r: &Value, pos: Position) -> EvalError {
    RuntimeError::new(
        format!(
            "type mismatch for '{op}': {} and {}",
            l.type_name(),
            r.type_name()
        ),
        pos,
    )
    .into()
}

/// Structural equality: numbers never equal strings, null equals only null.
pub fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| values_equal(v, bv)))
        }
        _ => false,
    }
}



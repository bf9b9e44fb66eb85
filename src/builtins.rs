//! Built-in functions callable from any expression. Pure and
//! synchronous: none of them touch the platform, the store or the scope.
//! `get_var` is the one exception and is special-cased by the evaluator
//! before it ever reaches [`call`].

use crate::error::RuntimeError;
use crate::token::Position;
use crate::value::Value;

/// Signature shared by every entry in [`BUILTINS`].
type BuiltinFn = fn(&[Value], Position) -> Result<Value, RuntimeError>;

/// The one table both [`call`] and [`is_builtin`] read from, so the two can
/// never disagree about which names are recognized. `get_var` is listed
/// alongside it even though it never reaches [`call`]: the evaluator
/// special-cases it before dispatching here, but it's still a built-in as
/// far as callers deciding "is this name known at all" are concerned.
const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("len", len),
    ("str", str_fn),
    ("int", int),
    ("lower", lower),
    ("upper", upper),
    ("split", split),
    ("join", join),
];

pub fn is_builtin(name: &str) -> bool {
    name == "get_var" || BUILTINS.iter().any(|(n, _)| *n == name)
}

pub fn call(name: &str, args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    match BUILTINS.iter().find(|(n, _)| *n == name) {
        Some((_, f)) => f(args, pos),
        None => Err(RuntimeError::new(format!("unknown function '{name}'"), pos)),
    }
}

fn arg<'a>(args: &'a [Value], index: usize, pos: Position) -> Result<&'a Value, RuntimeError> {
    args.get(index)
        .ok_or_else(|| RuntimeError::new(format!("missing argument {}", index + 1), pos))
}

fn arity(args: &[Value], expected: usize, name: &str, pos: Position) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::new(
            format!("{name}() expects {expected} argument(s), got {}", args.len()),
            pos,
        ));
    }
    Ok(())
}

fn len(args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    arity(args, 1, "len", pos)?;
    match arg(args, 0, pos)? {
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::List(items) => Ok(Value::Number(items.len() as f64)),
        Value::Map(map) => Ok(Value::Number(map.len() as f64)),
        other => Err(RuntimeError::new(
            format!("len() is not defined for a {}", other.type_name()),
            pos,
        )),
    }
}

/// A string that doesn't parse as a base-10 number coerces to `0` rather
/// than erroring.
fn int(args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    arity(args, 1, "int", pos)?;
    match arg(args, 0, pos)? {
        Value::Number(n) => Ok(Value::Number(n.trunc())),
        Value::Str(s) => Ok(Value::Number(s.trim().parse::<f64>().map(f64::trunc).unwrap_or(0.0))),
        Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        other => Err(RuntimeError::new(
            format!("int() is not defined for a {}", other.type_name()),
            pos,
        )),
    }
}

fn str_fn(args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    Ok(Value::str(arg(args, 0, pos)?.render()))
}

fn lower(args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    string_case(args, pos, str::to_lowercase)
}

fn upper(args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    string_case(args, pos, str::to_uppercase)
}

fn string_case(args: &[Value], pos: Position, f: impl Fn(&str) -> String) -> Result<Value, RuntimeError> {
    match arg(args, 0, pos)? {
        Value::Str(s) => Ok(Value::str(f(s))),
        other => Err(RuntimeError::new(
            format!("expected a string, got a {}", other.type_name()),
            pos,
        )),
    }
}

fn split(args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(RuntimeError::new(
            format!("split() expects 2 or 3 argument(s), got {}", args.len()),
            pos,
        ));
    }
    let (Value::Str(s), Value::Str(sep)) = (arg(args, 0, pos)?, arg(args, 1, pos)?) else {
        return Err(RuntimeError::new("split(string, separator) expects two strings", pos));
    };
    let maxsplit = match args.get(2) {
        Some(Value::Number(n)) => Some(*n as usize),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(RuntimeError::new(
                format!("split()'s maxsplit must be a number, got a {}", other.type_name()),
                pos,
            ))
        }
    };
    let parts: Vec<Value> = match (sep.is_empty(), maxsplit) {
        (true, _) => s.chars().map(|c| Value::str(c.to_string())).collect(),
        (false, Some(n)) => s.splitn(n + 1, sep.as_str()).map(Value::str).collect(),
        (false, None) => s.split(sep.as_str()).map(Value::str).collect(),
    };
    Ok(Value::List(parts))
}

fn join(args: &[Value], pos: Position) -> Result<Value, RuntimeError> {
    arity(args, 2, "join", pos)?;
    let Value::List(items) = arg(args, 0, pos)? else {
        return Err(RuntimeError::new("join(list, separator) expects a list", pos));
    };
    let Value::Str(sep) = arg(args, 1, pos)? else {
        return Err(RuntimeError::new("join(list, separator) expects a string separator", pos));
    };
    let parts: Vec<String> = items.iter().map(Value::render).collect();
    Ok(Value::str(parts.join(sep.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_counts_chars_not_bytes() {
        let result = call("len", &[Value::str("héllo")], Position::START).unwrap();
        assert_eq!(result, Value::Number(5.0));
    }

    #[test]
    fn split_then_join_round_trips() {
        let split_result = call("split", &[Value::str("a,b,c"), Value::str(",")], Position::START).unwrap();
        let joined = call("join", &[split_result, Value::str("-")], Position::START).unwrap();
        assert_eq!(joined, Value::str("a-b-c"));
    }

    #[test]
    fn int_parses_numeric_strings() {
        let result = call("int", &[Value::str(" 42 ")], Position::START).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert!(call("frobnicate", &[], Position::START).is_err());
    }
}

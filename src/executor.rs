//! Walks a parsed rule's statements against one event.
//!
//! A fresh [`Scope`] frame backs each rule invocation; `foreach` pushes and
//! pops its own frame so loop variables shadow outer ones only for the
//! duration of the loop (see [`Scope::declare`]).

use tracing::warn;

use crate::actions::{self, ActionEffect};
use crate::ast::{AssignTarget, Block, PathSegment, Rule, Stmt};
use crate::error::{EvalError, RuntimeError};
use crate::eval::{eval_expr, index_value, values_equal};
use crate::resolver::{EventContext, VariableResolver};
use crate::scope::Scope;
use crate::value::Value;

/// Rules loop over lists sourced from context data (e.g. `media_group.messages`);
/// this bounds a single runaway `foreach` rather than hanging the worker task.
const MAX_LOOP_ITERATIONS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The body ran to completion (or hit an explicit `stop`).
    Completed,
    /// An action called `stop`, short-circuiting the remaining body.
    Stopped,
    /// An unrecoverable evaluation error ended the rule early.
    Errored(String),
}

enum Flow {
    Normal,
    Break,
    Continue,
    Stop,
}

pub async fn execute(rule: &Rule, resolver: &(dyn VariableResolver + Sync), ctx: &mut EventContext) -> Outcome {
    if let Some(guard) = &rule.guard {
        match eval_expr(guard, &mut Scope::new(), resolver, ctx).await {
            Ok(v) if !v.is_truthy() => return Outcome::Completed,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %describe(&e), "rule guard failed to evaluate");
                return Outcome::Errored(describe(&e));
            }
        }
    }

    let mut scope = Scope::new();
    match exec_block(&rule.body, &mut scope, resolver, ctx).await {
        Ok(Flow::Stop) => Outcome::Stopped,
        Ok(_) => Outcome::Completed,
        Err(e) => {
            warn!(error = %describe(&e), "rule body failed to evaluate");
            Outcome::Errored(describe(&e))
        }
    }
}

fn describe(e: &EvalError) -> String {
    match e {
        EvalError::Runtime(r) => r.message.clone(),
        EvalError::Resolve(r) => r.message.clone(),
    }
}

#[async_recursion::async_recursion]
async fn exec_block(
    block: &Block,
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
) -> Result<Flow, EvalError> {
    for stmt in block {
        match exec_stmt(stmt, scope, resolver, ctx).await? {
            Flow::Normal => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Normal)
}

#[async_recursion::async_recursion]
async fn exec_stmt(
    stmt: &Stmt,
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
) -> Result<Flow, EvalError> {
    match stmt {
        Stmt::Expr(expr) => {
            exec_expr_stmt(expr, scope, resolver, ctx).await?;
            Ok(Flow::Normal)
        }

        Stmt::Assign { targets, value, pos } => {
            let v = eval_expr(value, scope, resolver, ctx).await?;
            for target in targets {
                assign(target, v.clone(), scope, resolver, ctx, *pos).await?;
            }
            Ok(Flow::Normal)
        }

        Stmt::If {
            cond,
            then_block,
            else_block,
            ..
        } => {
            let taken = eval_expr(cond, scope, resolver, ctx).await?.is_truthy();
            if taken {
                exec_block(then_block, scope, resolver, ctx).await
            } else if let Some(else_block) = else_block {
                exec_block(else_block, scope, resolver, ctx).await
            } else {
                Ok(Flow::Normal)
            }
        }

        Stmt::Foreach {
            var, iterable, body, pos,
        } => {
            let items = eval_expr(iterable, scope, resolver, ctx).await?;
            let items = match items {
                Value::List(items) => items,
                Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                Value::Null => Vec::new(),
                other => {
                    return Err(RuntimeError::new(
                        format!("foreach expects a list or a string, got a {}", other.type_name()),
                        *pos,
                    )
                    .into())
                }
            };

            let mut iterations = 0u64;
            for item in items {
                iterations += 1;
                if iterations > MAX_LOOP_ITERATIONS {
                    return Err(RuntimeError::new("foreach exceeded the maximum iteration count", *pos).into());
                }
                scope.push_frame();
                scope.declare(var, item);
                let flow = exec_block(body, scope, resolver, ctx).await;
                scope.pop_frame();
                match flow? {
                    Flow::Break => break,
                    Flow::Continue | Flow::Normal => {}
                    Flow::Stop => return Ok(Flow::Stop),
                }
            }
            Ok(Flow::Normal)
        }

        Stmt::Break(_) => Ok(Flow::Break),
        Stmt::Continue(_) => Ok(Flow::Continue),
    }
}

/// A bare-expression statement: an action call runs through [`actions::dispatch`];
/// anything else (e.g. a side-effect-free `get_var(...)` call) is evaluated
/// and its result discarded.
async fn exec_expr_stmt(
    expr: &crate::ast::Expr,
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
) -> Result<Flow, EvalError> {
    if let crate::ast::Expr::Call { name, args, pos } = expr {
        if actions::is_action(name) {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, scope, resolver, ctx).await?);
            }
            return match actions::dispatch(name, &values, ctx, *pos).await? {
                ActionEffect::Stop => Ok(Flow::Stop),
                ActionEffect::Continue => Ok(Flow::Normal),
            };
        }
        if !crate::builtins::is_builtin(name) {
            return Err(RuntimeError::new(format!("unknown action '{name}'"), *pos).into());
        }
    }
    eval_expr(expr, scope, resolver, ctx).await?;
    Ok(Flow::Normal)
}

/// Writes `value` into a local variable or an indexed/attributed path off one.
/// Only local (non-context) roots are assignable; `user.x = ...` etc. is a
/// parse-time restriction enforced by the grammar, not checked again here.
async fn assign(
    target: &AssignTarget,
    value: Value,
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
    pos: crate::token::Position,
) -> Result<(), EvalError> {
    if target.segments.is_empty() {
        scope.set(&target.root, value);
        return Ok(());
    }

    let mut base = scope.get(&target.root).cloned().unwrap_or(Value::Null);
    set_path(&mut base, &target.segments, value, scope, resolver, ctx, pos).await?;
    scope.set(&target.root, base);
    Ok(())
}

#[async_recursion::async_recursion]
async fn set_path(
    base: &mut Value,
    segments: &[PathSegment],
    value: Value,
    scope: &mut Scope,
    resolver: &(dyn VariableResolver + Sync),
    ctx: &mut EventContext,
    pos: crate::token::Position,
) -> Result<(), EvalError> {
    let (head, rest) = segments.split_first().expect("assign target has at least one segment");

    match head {
        PathSegment::Attr(name) => {
            if let Value::Null = base {
                *base = Value::Map(Default::default());
            }
            let Value::Map(map) = base else {
                return Err(RuntimeError::new(format!("cannot assign to attribute '{name}' on a {}", base.type_name()), pos).into());
            };
            if rest.is_empty() {
                map.insert(name.clone(), value);
            } else {
                let mut child = map.get(name).cloned().unwrap_or(Value::Null);
                set_path(&mut child, rest, value, scope, resolver, ctx, pos).await?;
                map.insert(name.clone(), child);
            }
        }
        PathSegment::Index(index_expr) => {
            let index = eval_expr(index_expr, scope, resolver, ctx).await?;
            if rest.is_empty() {
                assign_index(base, &index, value, pos)?;
            } else {
                let mut child = index_value(base, &index)?;
                set_path(&mut child, rest, value, scope, resolver, ctx, pos).await?;
                assign_index(base, &index, child, pos)?;
            }
        }
    }
    Ok(())
}

fn assign_index(base: &mut Value, index: &Value, value: Value, pos: crate::token::Position) -> Result<(), EvalError> {
    match (base, index) {
        (Value::List(items), Value::Number(n)) => {
            let i = *n as i64;
            let i = usize::try_from(i).map_err(|_| RuntimeError::new(format!("index {i} out of bounds"), pos))?;
            if i >= items.len() {
                return Err(RuntimeError::new(format!("index {i} out of bounds"), pos).into());
            }
            items[i] = value;
            Ok(())
        }
        (Value::Map(map), Value::Str(key)) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        (other, _) => Err(RuntimeError::new(format!("cannot assign into a {}", other.type_name()), pos).into()),
    }
}

/// Structural equality exposed for callers outside `eval` (e.g. future
/// dedup/cache logic) that need it without pulling in the whole evaluator.
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    values_equal(a, b)
}

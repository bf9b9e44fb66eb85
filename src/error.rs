//! Error kinds shared by the evaluator, resolver, executor and action
//! adapters. No error variant here is allowed to unwind past the
//! dispatcher's per-event task boundary; callers convert these into the
//! non-fatal outcomes described next to each variant.

use thiserror::Error;

use crate::token::Position;

/// Failure while evaluating an expression: type mismatch, bad argument
/// count, division by zero, or an unknown function/action name.
/// Terminates the current rule; execution continues with the next rule.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("RuntimeError: {message}")]
pub struct RuntimeError {
    pub message: String,
    pub pos: Position,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, pos: Position) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Unknown path component against a non-null parent, or a store/platform
/// failure while resolving a context variable.
///
/// Converted to `null` for `vars.*` paths (missing persistent data is not an
/// error); converted to a rule-level failure for everything else.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("ResolveError: {message}")]
pub struct ResolveError {
    pub message: String,
}

impl ResolveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A chat-platform API call failed (network, permission, rate limit).
/// Caught by the action wrapper, logged, and does not terminate the rule.
#[derive(Debug, Clone, Error)]
#[error("AdapterError: {message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The database or another required backing service was unreachable while
/// loading a group's rule cache. The dispatcher skips the group for this
/// event, leaves the cache empty, and retries on the next event.
#[derive(Debug, Clone, Error)]
#[error("FatalError: {message}")]
pub struct FatalError {
    pub message: String,
}

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of evaluating an expression: either a value, or one of the two
/// error kinds the evaluator itself can raise.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl EvalError {
    pub fn pos(&self) -> Option<Position> {
        match self {
            EvalError::Runtime(e) => Some(e.pos),
            EvalError::Resolve(_) => None,
        }
    }
}

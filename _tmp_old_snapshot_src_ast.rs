//! AST node types produced by the parser.
//!
//! Nodes are immutable once built: a parsed [`Rule`] is shared read-only by
//! the executor, so no node here owns any mutable state.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::token::Position;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Contains,
    StartsWith,
    EndsWith,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// One segment of a [`Expr::Path`] beyond the root identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// `.name`
    Attr(String),
    /// `[expr]`
    Index(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value, Position),
    ListLiteral(Vec<Expr>, Position),
    DictLiteral(Vec<(String, Expr)>, Position),
    /// A bare name with no path segments (e.g. a local variable written by `i = 0;`).
    Identifier(String, Position),
    /// `root` is the leading identifier; `segments` may be empty (equivalent to `Identifier`).
    Path {
        root: String,
        segments: Vec<PathSegment>,
        pos: Position,
    },
    Unary(UnaryOp, Box<Expr>, Position),
    Binary(BinaryOp, Box<Expr>, Box<Expr>, Position),
    Call {
        name: String,
        args: Vec<Expr>,
        pos: Position,
    },
}

impl Expr {
    pub fn pos(&self) -> Position {
        match self {
            Expr::Literal(_, p)
            | Expr::ListLiteral(_, p)
            | Expr::DictLiteral(_, p)
            | Expr::Identifier(_, p)
            | Expr::Path { pos: p, .. }
            | Expr::Unary(_, _, p)
            | Expr::Binary(_, _, _, p)
            | Expr::Call { pos: p, .. } => *p,
        }
    }
}

/// An assignable location: either a bare local name or a dotted/indexed path.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignTarget {
    pub root: String,
    pub segments: Vec<PathSegment>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// Chained assignment `a = b = e` is represented as nested [`Assign`] nodes
    /// sharing one evaluation of `e` at execution time (see `executor::exec_stmt`).
    Assign {
        targets: Vec<AssignTarget>,
        value: Expr,
        pos: Position,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        pos: Position,
    },
    Foreach {
        var: String,
        iterable: Expr,
        body: Block,
        pos: Position,
    },
    Break(Position),
    Continue(Position),
}

pub type Block = Vec<Stmt>;

/// A trigger accepted by a [`Rule`]'s `WHEN` clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trigger {
    Message,
    Command,
    UserJoin,
    UserLeave,
    Photo,
    Video,
    Document,
    EditedMessage,
    MediaGroup,
    Schedule(String),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Message => write!(f, "message"),
            Trigger::Command => write!(f, "command"),
            Trigger::UserJoin => write!(f, "user_join"),
            Trigger::UserLeave => write!(f, "user_leave"),
            Trigger::Photo => write!(f, "photo"),
            Trigger::Video => write!(f, "video"),
            Trigger::Document => write!(f, "document"),
            Trigger::EditedMessage => write!(f, "edited_message"),
            Trigger::MediaGroup => write!(f, "media_group"),
            Trigger::Schedule(cron) => write!(f, "schedule(\"{cron}\")"),
        }
    }
}

/// A fully parsed, immutable rule. Shared from the rule cache by [`Arc`].
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub triggers: BTreeSet<Trigger>,
    pub guard: Option<Expr>,
    pub body: Block,
    pub priority: i64,
    pub active: bool,
    /// Opaque hash of the source text, used to detect unchanged rules across reloads.
    pub source_hash: u64,
    pub source: String,
}

pub type SharedRule = Arc<Rule>;



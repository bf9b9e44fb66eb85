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

/// The context namespaces every rule reads from (`user.id`, `message.text`,
/// ...). Read-only: the parser rejects assigning to one of these roots, and
/// the evaluator routes reads to them through a [`crate::resolver::VariableResolver`]
/// rather than the local [`crate::scope::Scope`].
const CONTEXT_ROOTS: &[&str] = &["user", "message", "command", "media_group", "time", "vars", "group"];

pub fn is_context_root(name: &str) -> bool {
    CONTEXT_ROOTS.contains(&name)
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

impl Rule {
    /// Whether `self` and `other` have the same triggers, guard, body,
    /// priority and active flag, ignoring source positions and the raw
    /// source text/hash. Two rules parsed from differently-formatted but
    /// equivalent source (e.g. one printed back from the other's AST) are
    /// `same_shape` even though their derived `PartialEq` would see them as
    /// different, since every node's `Position` is part of that comparison.
    pub fn same_shape(&self, other: &Rule) -> bool {
        self.triggers == other.triggers
            && self.priority == other.priority
            && self.active == other.active
            && opt_expr_shape_eq(self.guard.as_ref(), other.guard.as_ref())
            && block_shape_eq(&self.body, &other.body)
    }
}

fn opt_expr_shape_eq(a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => expr_shape_eq(a, b),
        _ => false,
    }
}

fn expr_shape_eq(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Literal(v1, _), Expr::Literal(v2, _)) => v1 == v2,
        (Expr::ListLiteral(i1, _), Expr::ListLiteral(i2, _)) => {
            i1.len() == i2.len() && i1.iter().zip(i2).all(|(x, y)| expr_shape_eq(x, y))
        }
        (Expr::DictLiteral(p1, _), Expr::DictLiteral(p2, _)) => {
            p1.len() == p2.len()
                && p1
                    .iter()
                    .zip(p2)
                    .all(|((k1, v1), (k2, v2))| k1 == k2 && expr_shape_eq(v1, v2))
        }
        (Expr::Identifier(n1, _), Expr::Identifier(n2, _)) => n1 == n2,
        (
            Expr::Path {
                root: r1, segments: s1, ..
            },
            Expr::Path {
                root: r2, segments: s2, ..
            },
        ) => r1 == r2 && s1.len() == s2.len() && s1.iter().zip(s2).all(|(x, y)| segment_shape_eq(x, y)),
        (Expr::Unary(o1, e1, _), Expr::Unary(o2, e2, _)) => o1 == o2 && expr_shape_eq(e1, e2),
        (Expr::Binary(o1, l1, r1, _), Expr::Binary(o2, l2, r2, _)) => {
            o1 == o2 && expr_shape_eq(l1, l2) && expr_shape_eq(r1, r2)
        }
        (Expr::Call { name: n1, args: a1, .. }, Expr::Call { name: n2, args: a2, .. }) => {
            n1 == n2 && a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| expr_shape_eq(x, y))
        }
        _ => false,
    }
}

fn segment_shape_eq(a: &PathSegment, b: &PathSegment) -> bool {
    match (a, b) {
        (PathSegment::Attr(x), PathSegment::Attr(y)) => x == y,
        (PathSegment::Index(x), PathSegment::Index(y)) => expr_shape_eq(x, y),
        _ => false,
    }
}

fn target_shape_eq(a: &AssignTarget, b: &AssignTarget) -> bool {
    a.root == b.root
        && a.segments.len() == b.segments.len()
        && a.segments.iter().zip(&b.segments).all(|(x, y)| segment_shape_eq(x, y))
}

fn stmt_shape_eq(a: &Stmt, b: &Stmt) -> bool {
    match (a, b) {
        (Stmt::Expr(e1), Stmt::Expr(e2)) => expr_shape_eq(e1, e2),
        (Stmt::Assign { targets: t1, value: v1, .. }, Stmt::Assign { targets: t2, value: v2, .. }) => {
            t1.len() == t2.len() && t1.iter().zip(t2).all(|(x, y)| target_shape_eq(x, y)) && expr_shape_eq(v1, v2)
        }
        (
            Stmt::If {
                cond: c1,
                then_block: tb1,
                else_block: eb1,
                ..
            },
            Stmt::If {
                cond: c2,
                then_block: tb2,
                else_block: eb2,
                ..
            },
        ) => {
            expr_shape_eq(c1, c2)
                && block_shape_eq(tb1, tb2)
                && match (eb1, eb2) {
                    (None, None) => true,
                    (Some(x), Some(y)) => block_shape_eq(x, y),
                    _ => false,
                }
        }
        (
            Stmt::Foreach {
                var: v1,
                iterable: i1,
                body: b1,
                ..
            },
            Stmt::Foreach {
                var: v2,
                iterable: i2,
                body: b2,
                ..
            },
        ) => v1 == v2 && expr_shape_eq(i1, i2) && block_shape_eq(b1, b2),
        (Stmt::Break(_), Stmt::Break(_)) => true,
        (Stmt::Continue(_), Stmt::Continue(_)) => true,
        _ => false,
    }
}

fn block_shape_eq(a: &Block, b: &Block) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| stmt_shape_eq(x, y))
}

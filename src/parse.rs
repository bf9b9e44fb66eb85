//! Recursive-descent parser with precedence-climbing expressions.
//!
//! `Rule := "WHEN" trigger-list ("WHERE" expression)? "THEN" block "END"`.
//! One parse function per grammar production.

use std::collections::BTreeSet;

use crate::ast::*;
use crate::token::{tokenize, LexError, Position, Token, TokenKind};
use crate::value::Value;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("parse error ({pos}): {message}")]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            pos: e.pos,
        }
    }
}

/// Parses one complete rule from source text. Never returns a partial AST:
/// on any error the whole parse is abandoned.
pub fn parse_rule(source: &str) -> Result<Rule, ParseError> {
    let tokens = tokenize(source)?;
    let mut p = Parser { tokens, pos: 0 };
    let rule = p.parse_rule(source)?;
    p.expect(&TokenKind::Eof)?;
    Ok(rule)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError {
            message: format!("expected {expected}, got {}", self.peek().kind),
            pos: self.peek().pos,
        }
    }

    fn expect_identifier(&mut self) -> Result<(String, Position), ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                let pos = self.advance().pos;
                Ok((name, pos))
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    // ---- rule, triggers, block -------------------------------------------------

    fn parse_rule(&mut self, source: &str) -> Result<Rule, ParseError> {
        self.expect(&TokenKind::When)?;
        let triggers = self.parse_trigger_list()?;
        let guard = if self.check(&TokenKind::Where) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Then)?;
        let body = self.parse_block()?;
        self.expect(&TokenKind::End)?;

        Ok(Rule {
            triggers,
            guard,
            body,
            priority: 0,
            active: true,
            source_hash: source_hash(source),
            source: source.to_string(),
        })
    }

    fn parse_trigger_list(&mut self) -> Result<BTreeSet<Trigger>, ParseError> {
        let mut triggers = BTreeSet::new();
        let mut has_schedule = false;
        loop {
            let (name, pos) = self.expect_identifier()?;
            let trigger = if name.eq_ignore_ascii_case("schedule") {
                self.expect(&TokenKind::LeftParen)?;
                let cron = match self.peek().kind.clone() {
                    TokenKind::Str(s) => {
                        self.advance();
                        s
                    }
                    _ => return Err(self.unexpected("a cron string literal")),
                };
                self.expect(&TokenKind::RightParen)?;
                has_schedule = true;
                Trigger::Schedule(cron)
            } else {
                trigger_from_name(&name).ok_or_else(|| ParseError {
                    message: format!("unknown trigger '{name}'"),
                    pos,
                })?
            };
            triggers.insert(trigger);

            if self.check(&TokenKind::Or) {
                self.advance();
                continue;
            }
            break;
        }
        if has_schedule && triggers.len() > 1 {
            return Err(ParseError {
                message: "'schedule' cannot be combined with other triggers".into(),
                pos: self.peek().pos,
            });
        }
        Ok(triggers)
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(&TokenKind::LeftBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RightBrace)?;
        Ok(stmts)
    }

    // ---- statements -------------------------------------------------------

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match &self.peek().kind {
            TokenKind::If => self.parse_if(),
            TokenKind::Foreach => self.parse_foreach(),
            TokenKind::Break => {
                let pos = self.advance().pos;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Break(pos))
            }
            TokenKind::Continue => {
                let pos = self.advance().pos;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Continue(pos))
            }
            _ => self.parse_expr_or_assign_stmt(),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.expect(&TokenKind::If)?.pos;
        self.expect(&TokenKind::LeftParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RightParen)?;
        let then_block = self.parse_block()?;
        let else_block = if self.check(&TokenKind::Else) {
            self.advance();
            if self.check(&TokenKind::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            pos,
        })
    }

    fn parse_foreach(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.expect(&TokenKind::Foreach)?.pos;
        self.expect(&TokenKind::LeftParen)?;
        let (var, _) = self.expect_identifier()?;
        self.expect(&TokenKind::In)?;
        let iterable = self.parse_expr()?;
        self.expect(&TokenKind::RightParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::Foreach {
            var,
            iterable,
            body,
            pos,
        })
    }

    /// An expression statement, or a (possibly chained) assignment.
    ///
    /// Chained assignment `a = b = expr;` parses right-associatively: each
    /// path followed by `=` accumulates into `targets` until a non-path or
    /// non-`=` is found, which becomes the shared right-hand `value`.
    fn parse_expr_or_assign_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start_pos = self.peek().pos;
        let first = self.parse_expr()?;

        if !self.check(&TokenKind::Assign) {
            self.expect(&TokenKind::Semicolon)?;
            return Ok(Stmt::Expr(first));
        }

        let mut targets = vec![expr_to_target(first)?];
        loop {
            self.advance(); // '='
            let next = self.parse_expr()?;
            if self.check(&TokenKind::Assign) {
                targets.push(expr_to_target(next)?);
                continue;
            }
            self.expect(&TokenKind::Semicolon)?;
            return Ok(Stmt::Assign {
                targets,
                value: next,
                pos: start_pos,
            });
        }
    }

    // ---- expressions (precedence climbing, lowest to highest) -------------

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let pos = self.advance().pos;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        while self.check(&TokenKind::And) {
            let pos = self.advance().pos;
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Contains => BinaryOp::Contains,
                TokenKind::StartsWith => BinaryOp::StartsWith,
                TokenKind::EndsWith => BinaryOp::EndsWith,
                _ => break,
            };
            let pos = self.advance().pos;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let pos = self.advance().pos;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            let pos = self.advance().pos;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match &self.peek().kind {
            TokenKind::Not => {
                let pos = self.advance().pos;
                let operand = self.parse_unary()?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand), pos))
            }
            TokenKind::Minus => {
                let pos = self.advance().pos;
                let operand = self.parse_unary()?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand), pos))
            }
            _ => self.parse_postfix(),
        }
    }

    /// Calls and postfix `.name` / `[expr]` chains, then primary expressions.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let primary = self.parse_primary()?;

        match primary {
            // A bare identifier becomes the root of a path, a call, or stays a local name.
            Expr::Identifier(name, pos) => {
                if self.check(&TokenKind::LeftParen) {
                    let args = self.parse_call_args()?;
                    return Ok(Expr::Call { name, args, pos });
                }
                let mut segments = Vec::new();
                self.parse_segments(&mut segments)?;
                if segments.is_empty() {
                    Ok(Expr::Identifier(name, pos))
                } else {
                    Ok(Expr::Path {
                        root: name,
                        segments,
                        pos,
                    })
                }
            }
            other => Ok(other),
        }
    }

    fn parse_segments(&mut self, segments: &mut Vec<PathSegment>) -> Result<(), ParseError> {
        loop {
            match &self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let (name, _) = self.expect_identifier()?;
                    segments.push(PathSegment::Attr(name));
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RightBracket)?;
                    segments.push(PathSegment::Index(Box::new(index)));
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(&TokenKind::LeftParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            args.push(self.parse_expr()?);
            while self.check(&TokenKind::Comma) {
                self.advance();
                args.push(self.parse_expr()?);
            }
        }
        self.expect(&TokenKind::RightParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n), tok.pos))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::str(s), tok.pos))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true), tok.pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false), tok.pos))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null, tok.pos))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RightBracket) {
                    items.push(self.parse_expr()?);
                    while self.check(&TokenKind::Comma) {
                        self.advance();
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect(&TokenKind::RightBracket)?;
                Ok(Expr::ListLiteral(items, tok.pos))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut pairs = Vec::new();
                if !self.check(&TokenKind::RightBrace) {
                    pairs.push(self.parse_dict_entry()?);
                    while self.check(&TokenKind::Comma) {
                        self.advance();
                        pairs.push(self.parse_dict_entry()?);
                    }
                }
                self.expect(&TokenKind::RightBrace)?;
                Ok(Expr::DictLiteral(pairs, tok.pos))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier(name, tok.pos))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_dict_entry(&mut self) -> Result<(String, Expr), ParseError> {
        let key = match self.peek().kind.clone() {
            TokenKind::Str(s) => {
                self.advance();
                s
            }
            TokenKind::Identifier(s) => {
                self.advance();
                s
            }
            _ => return Err(self.unexpected("a dict key")),
        };
        self.expect(&TokenKind::Colon)?;
        let value = self.parse_expr()?;
        Ok((key, value))
    }
}

fn trigger_from_name(name: &str) -> Option<Trigger> {
    Some(match name {
        "message" => Trigger::Message,
        "command" => Trigger::Command,
        "user_join" => Trigger::UserJoin,
        "user_leave" => Trigger::UserLeave,
        "photo" => Trigger::Photo,
        "video" => Trigger::Video,
        "document" => Trigger::Document,
        "edited_message" => Trigger::EditedMessage,
        "media_group" => Trigger::MediaGroup,
        _ => return None,
    })
}

fn expr_to_target(expr: Expr) -> Result<AssignTarget, ParseError> {
    let (root, segments, pos) = match expr {
        Expr::Identifier(root, pos) => (root, Vec::new(), pos),
        Expr::Path { root, segments, pos } => (root, segments, pos),
        other => {
            return Err(ParseError {
                message: "expected an assignable path on the left of '='".into(),
                pos: other.pos(),
            })
        }
    };
    if is_context_root(&root) {
        return Err(ParseError {
            message: format!("'{root}' is a read-only context variable and cannot be assigned to"),
            pos,
        });
    }
    Ok(AssignTarget { root, segments, pos })
}

/// A cheap, stable hash used to detect whether a rule's source changed
/// across a cache reload, without re-parsing to compare ASTs.
fn source_hash(source: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = ahash::AHasher::default();
    source.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keyword_reply_rule() {
        let rule = parse_rule(
            r#"WHEN message WHERE message.text contains "hello" THEN { reply("hi"); } END"#,
        )
        .unwrap();
        assert!(rule.triggers.contains(&Trigger::Message));
        assert!(rule.guard.is_some());
        assert_eq!(rule.body.len(), 1);
    }

    #[test]
    fn schedule_rejects_combination_with_other_triggers() {
        let err = parse_rule(r#"WHEN message or schedule("* * * * *") THEN { reply("x"); } END"#)
            .unwrap_err();
        assert!(err.message.contains("schedule"));
    }

    #[test]
    fn missing_semicolon_reports_line_and_column() {
        let err = parse_rule("WHEN message THEN { reply(\"x\") } END").unwrap_err();
        assert_eq!(err.pos.line(), 1);
        assert!(err.message.contains("expected ';'"));
    }

    #[test]
    fn chained_assignment_produces_two_targets() {
        let rule = parse_rule("WHEN message THEN { a = b = 1; } END").unwrap();
        match &rule.body[0] {
            Stmt::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("expected Assign, got {other:?}"),
        }
    }

    #[test]
    fn command_arg_index_is_a_path_with_numeric_index_segment() {
        let rule = parse_rule("WHEN command THEN { t = command.arg[0]; } END").unwrap();
        match &rule.body[0] {
            Stmt::Assign { value, .. } => match value {
                Expr::Path { root, segments, .. } => {
                    assert_eq!(root, "command");
                    assert!(matches!(segments[0], PathSegment::Attr(ref s) if s == "arg"));
                    assert!(matches!(segments[1], PathSegment::Index(_)));
                }
                other => panic!("expected Path, got {other:?}"),
            },
            other => panic!("expected Assign, got {other:?}"),
        }
    }
}

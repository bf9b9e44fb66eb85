//! Prints a parsed [`Rule`] back to a canonical source form.
//!
//! Every sub-expression is fully parenthesized, so the printer doesn't need
//! to reproduce the parser's precedence-climbing rules to stay round-trip
//! safe: feeding the output back through `parse_rule` always reconstructs
//! the same AST, just with an extra, harmless layer of parens.

use crate::ast::{AssignTarget, BinaryOp, Block, Expr, PathSegment, Stmt, Trigger, UnaryOp};
use crate::value::{format_number, Value};
use crate::Rule;

pub fn print_rule(rule: &Rule) -> String {
    let mut out = String::from("WHEN ");
    let triggers: Vec<String> = rule.triggers.iter().map(print_trigger).collect();
    out.push_str(&triggers.join(" or "));
    if let Some(guard) = &rule.guard {
        out.push_str(" WHERE ");
        out.push_str(&print_expr(guard));
    }
    out.push_str(" THEN ");
    out.push_str(&print_block(&rule.body));
    out.push_str(" END");
    out
}

/// `Trigger`'s `Display` interpolates a schedule's cron string raw, which
/// isn't safe to feed back through the lexer if the string itself contains
/// a `"` or `\`; this re-escapes it the way [`print_str_literal`] does for
/// ordinary string literals.
fn print_trigger(trigger: &Trigger) -> String {
    match trigger {
        Trigger::Schedule(cron) => format!("schedule({})", print_str_literal(cron)),
        other => other.to_string(),
    }
}

fn print_block(block: &Block) -> String {
    let mut out = String::from("{ ");
    for stmt in block {
        out.push_str(&print_stmt(stmt));
        out.push(' ');
    }
    out.push('}');
    out
}

fn print_stmt(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Expr(e) => format!("{};", print_expr(e)),
        Stmt::Assign { targets, value, .. } => {
            let mut out = String::new();
            for target in targets {
                out.push_str(&print_target(target));
                out.push_str(" = ");
            }
            out.push_str(&print_expr(value));
            out.push(';');
            out
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
            ..
        } => {
            let mut out = format!("if ({}) {}", print_expr(cond), print_block(then_block));
            if let Some(else_block) = else_block {
                out.push_str(" else ");
                out.push_str(&print_block(else_block));
            }
            out
        }
        Stmt::Foreach { var, iterable, body, .. } => {
            format!("foreach ({var} in {}) {}", print_expr(iterable), print_block(body))
        }
        Stmt::Break(_) => "break;".to_string(),
        Stmt::Continue(_) => "continue;".to_string(),
    }
}

fn print_target(target: &AssignTarget) -> String {
    let mut out = target.root.clone();
    for seg in &target.segments {
        out.push_str(&print_segment(seg));
    }
    out
}

fn print_segment(seg: &PathSegment) -> String {
    match seg {
        PathSegment::Attr(name) => format!(".{name}"),
        PathSegment::Index(index) => format!("[{}]", print_expr(index)),
    }
}

fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(v, _) => print_literal(v),
        Expr::ListLiteral(items, _) => {
            let parts: Vec<String> = items.iter().map(print_expr).collect();
            format!("[{}]", parts.join(", "))
        }
        Expr::DictLiteral(pairs, _) => {
            let parts: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", print_str_literal(k), print_expr(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Expr::Identifier(name, _) => name.clone(),
        Expr::Path { root, segments, .. } => {
            let mut out = root.clone();
            for seg in segments {
                out.push_str(&print_segment(seg));
            }
            out
        }
        Expr::Unary(op, operand, _) => match op {
            UnaryOp::Neg => format!("(-{})", print_expr(operand)),
            UnaryOp::Not => format!("(not {})", print_expr(operand)),
        },
        Expr::Binary(op, lhs, rhs, _) => {
            format!("({} {} {})", print_expr(lhs), binary_op_str(*op), print_expr(rhs))
        }
        Expr::Call { name, args, .. } => {
            let parts: Vec<String> = args.iter().map(print_expr).collect();
            format!("{name}({})", parts.join(", "))
        }
    }
}

fn binary_op_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Contains => "contains",
        BinaryOp::StartsWith => "startswith",
        BinaryOp::EndsWith => "endswith",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

fn print_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Str(s) => print_str_literal(s),
        // Literal nodes only ever wrap the four scalar kinds above; lists and
        // dicts parse into ListLiteral/DictLiteral instead.
        other => other.render(),
    }
}

fn print_str_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_rule;

    #[test]
    fn printed_rule_reparses_to_the_same_ast() {
        let sources = [
            r#"WHEN message THEN { reply("hi"); } END"#,
            r#"WHEN command or message WHERE user.is_admin and not user.is_bot THEN {
                if (message.text contains "ban") { ban_user(); } else { reply("ok"); }
            } END"#,
            r#"WHEN message THEN {
                foreach (item in [1, 2, 3]) { if (item == 2) { break; } }
                set_var("user.warnings", get_var("user.warnings", 0) + 1);
            } END"#,
            r#"WHEN schedule("0 0 * * * *") THEN { send_message("tick \"now\""); } END"#,
            r#"WHEN schedule("0 0 * * * \"x\"") THEN { reply("hi"); } END"#,
        ];
        for source in sources {
            let original = parse_rule(source).unwrap();
            let printed = print_rule(&original);
            let reparsed = parse_rule(&printed).unwrap_or_else(|e| panic!("printed form {printed:?} failed to reparse: {e}"));
            assert!(
                original.same_shape(&reparsed),
                "round-trip mismatch for {source:?}\nprinted: {printed}\noriginal: {original:?}\nreparsed: {reparsed:?}"
            );
        }
    }
}

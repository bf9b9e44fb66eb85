//! `precompile` lets an editor or admin command validate a rule body before
//! it's saved, without constructing an [`EventContext`].

use crate::parse::parse_rule;

/// Returns `(true, None)` if `source` parses; `(false, Some(message))`
/// otherwise, where `message` already includes the line/column.
pub fn precompile(source: &str) -> (bool, Option<String>) {
    match parse_rule(source) {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_rule_round_trips() {
        let (ok, msg) = precompile(r#"WHEN message THEN { reply("hi"); } END"#);
        assert!(ok);
        assert!(msg.is_none());
    }

    #[test]
    fn invalid_rule_reports_position() {
        let (ok, msg) = precompile("WHEN message THEN { reply(\"hi\") } END");
        assert!(!ok);
        assert!(msg.unwrap().contains("line 1"));
    }
}

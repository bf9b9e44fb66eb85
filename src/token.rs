//! The lexer: turns rule source text into a stream of positioned [`Token`]s.

use std::fmt;
use std::str::Chars;

/// A 1-based (line, column) location in the rule source.
///
/// Advancing past `u32::MAX` on either axis saturates rather than panics;
/// no real rule source gets anywhere near that large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    pub const START: Self = Self { line: 1, column: 1 };

    pub fn line(self) -> u32 {
        self.line
    }

    pub fn column(self) -> u32 {
        self.column
    }

    fn advance(&mut self) {
        self.column += 1;
    }

    fn newline(&mut self) {
        self.line += 1;
        self.column = 1;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A single lexical token paired with the position of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Number(f64),
    Str(String),

    When,
    Where,
    Then,
    End,
    If,
    Else,
    Foreach,
    In,
    Break,
    Continue,
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Contains,
    StartsWith,
    EndsWith,

    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Assign,

    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TokenKind::*;
        match self {
            Identifier(s) => write!(f, "identifier '{s}'"),
            Number(n) => write!(f, "number '{n}'"),
            Str(s) => write!(f, "string \"{s}\""),
            When => write!(f, "'WHEN'"),
            Where => write!(f, "'WHERE'"),
            Then => write!(f, "'THEN'"),
            End => write!(f, "'END'"),
            If => write!(f, "'if'"),
            Else => write!(f, "'else'"),
            Foreach => write!(f, "'foreach'"),
            In => write!(f, "'in'"),
            Break => write!(f, "'break'"),
            Continue => write!(f, "'continue'"),
            True => write!(f, "'true'"),
            False => write!(f, "'false'"),
            Null => write!(f, "'null'"),
            And => write!(f, "'and'"),
            Or => write!(f, "'or'"),
            Not => write!(f, "'not'"),
            Contains => write!(f, "'contains'"),
            StartsWith => write!(f, "'startswith'"),
            EndsWith => write!(f, "'endswith'"),
            LeftBrace => write!(f, "'{{'"),
            RightBrace => write!(f, "'}}'"),
            LeftParen => write!(f, "'('"),
            RightParen => write!(f, "')'"),
            LeftBracket => write!(f, "'['"),
            RightBracket => write!(f, "']'"),
            Comma => write!(f, "','"),
            Semicolon => write!(f, "';'"),
            Colon => write!(f, "':'"),
            Dot => write!(f, "'.'"),
            Assign => write!(f, "'='"),
            Plus => write!(f, "'+'"),
            Minus => write!(f, "'-'"),
            Star => write!(f, "'*'"),
            Slash => write!(f, "'/'"),
            EqEq => write!(f, "'=='"),
            NotEq => write!(f, "'!='"),
            Gt => write!(f, "'>'"),
            GtEq => write!(f, "'>='"),
            Lt => write!(f, "'<'"),
            LtEq => write!(f, "'<='"),
            Eof => write!(f, "end of input"),
        }
    }
}

/// Lexical error, always carrying the position of the offending character.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("lex error ({pos}): {message}")]
pub struct LexError {
    pub message: String,
    pub pos: Position,
}

fn keyword(word: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match word.to_ascii_lowercase().as_str() {
        "when" => When,
        "where" => Where,
        "then" => Then,
        "end" => End,
        "if" => If,
        "else" => Else,
        "foreach" => Foreach,
        "in" => In,
        "break" => Break,
        "continue" => Continue,
        "true" => True,
        "false" => False,
        "null" => Null,
        "and" => And,
        "or" => Or,
        "not" => Not,
        "contains" => Contains,
        "startswith" => StartsWith,
        "endswith" => EndsWith,
        _ => return None,
    })
}

/// Tokenizes an entire source string, consuming `//` line comments and
/// stopping at an `Eof` token. Fails eagerly on the first unrecognized rune.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<Chars<'a>>,
    pos: Position,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            pos: Position::START,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        loop {
            self.skip_whitespace_and_comments();
            let start = self.pos;
            let Some(&c) = self.chars.peek() else {
                self.tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos: start,
                });
                return Ok(self.tokens);
            };

            let kind = if c.is_ascii_digit() {
                self.read_number()
            } else if c == '"' || c == '\'' {
                self.read_string(c)?
            } else if c.is_alphabetic() || c == '_' {
                self.read_identifier()
            } else {
                self.read_punctuation(start)?
            };

            self.tokens.push(Token { kind, pos: start });
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.pos.newline();
        } else {
            self.pos.advance();
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'/') {
                        while !matches!(self.chars.peek(), None | Some('\n')) {
                            self.bump();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn read_number(&mut self) -> TokenKind {
        let mut text = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
        }
        if self.chars.peek() == Some(&'.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if matches!(lookahead.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.bump().unwrap());
                while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit()) {
                    text.push(self.bump().unwrap());
                }
            }
        }
        TokenKind::Number(text.parse().expect("lexer only accumulates digits and '.'"))
    }

    fn read_identifier(&mut self) -> TokenKind {
        let mut text = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
            text.push(self.bump().unwrap());
        }
        keyword(&text).unwrap_or(TokenKind::Identifier(text))
    }

    fn read_string(&mut self, quote: char) -> Result<TokenKind, LexError> {
        let start = self.pos;
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(LexError {
                        message: "unterminated string literal".into(),
                        pos: start,
                    })
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some('\'') => text.push('\''),
                    Some(other) => text.push(other),
                    None => {
                        return Err(LexError {
                            message: "unterminated escape sequence".into(),
                            pos: start,
                        })
                    }
                },
                Some(c) => text.push(c),
            }
        }
        Ok(TokenKind::Str(text))
    }

    fn read_punctuation(&mut self, start: Position) -> Result<TokenKind, LexError> {
        use TokenKind::*;
        let c = self.bump().unwrap();
        Ok(match c {
            '{' => LeftBrace,
            '}' => RightBrace,
            '(' => LeftParen,
            ')' => RightParen,
            '[' => LeftBracket,
            ']' => RightBracket,
            ',' => Comma,
            ';' => Semicolon,
            ':' => Colon,
            '.' => Dot,
            '+' => Plus,
            '-' => Minus,
            '*' => Star,
            '/' => Slash,
            '=' => {
                if self.chars.peek() == Some(&'=') {
                    self.bump();
                    EqEq
                } else {
                    Assign
                }
            }
            '!' => {
                if self.chars.peek() == Some(&'=') {
                    self.bump();
                    NotEq
                } else {
                    return Err(LexError {
                        message: "unexpected character '!'".into(),
                        pos: start,
                    });
                }
            }
            '>' => {
                if self.chars.peek() == Some(&'=') {
                    self.bump();
                    GtEq
                } else {
                    Gt
                }
            }
            '<' => {
                if self.chars.peek() == Some(&'=') {
                    self.bump();
                    LtEq
                } else {
                    Lt
                }
            }
            other => {
                return Err(LexError {
                    message: format!("unexpected character '{other}'"),
                    pos: start,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_fold_case_insensitively() {
        assert_eq!(kinds("WHEN where ThEn"), vec![TokenKind::When, TokenKind::Where, TokenKind::Then, TokenKind::Eof]);
    }

    #[test]
    fn tracks_line_and_column() {
        let tokens = tokenize("a\nbb").unwrap();
        assert_eq!(tokens[0].pos, Position { line: 1, column: 1 });
        assert_eq!(tokens[1].pos, Position { line: 2, column: 1 });
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("a // comment\nb"), vec![
            TokenKind::Identifier("a".into()),
            TokenKind::Identifier("b".into()),
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#""a\nb\"c""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str("a\nb\"c".into()));
    }

    #[test]
    fn unexpected_character_reports_position() {
        let err = tokenize("a @ b").unwrap_err();
        assert_eq!(err.message, "unexpected character '@'");
        assert_eq!(err.pos.column(), 3);
    }

    #[test]
    fn number_literal_is_not_fooled_by_leading_minus() {
        // the '-' is a separate token; the lexer never folds it into the number
        let kinds = kinds("-5");
        assert_eq!(kinds, vec![TokenKind::Minus, TokenKind::Number(5.0), TokenKind::Eof]);
    }
}

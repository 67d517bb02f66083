//! The stateful lexer.
//!
//! Present only when the grammar carries a `lexer` block. At every
//! position the lexer tries each token definition in declaration
//! order and keeps the longest match; ties go to the earlier entry.
//! `skip` entries advance without emitting. A `handle_indent` entry
//! turns newline-plus-indentation matches into layout tokens by
//! comparing the captured indentation string against a stack:
//!
//! - same as the stack top: one newline token
//! - extends the stack top: push, one `INDENT`
//! - a prefix of some outer entry: pop with one `DEDENT` each until
//!   the top matches exactly (no exact match is an error)
//! - anything else: inconsistent indentation, an error
//!
//! At end of input one `DEDENT` is emitted per open level. All
//! positions are character based.

use serde_json::Value;

use crate::error::LexError;
use crate::grammar::{Coercion, LexerSpec, TokenAction};

/// One token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token type name; synthetic layout tokens use `INDENT`,
    /// `DEDENT`, and the configured newline name.
    pub kind: String,
    /// Matched source text; empty for `INDENT`/`DEDENT`.
    pub text: String,
    pub line: usize,
    pub col: usize,
    /// Character offset of the first character.
    pub offset: usize,
}

impl Token {
    fn new(kind: &str, text: impl Into<String>, line: usize, col: usize, offset: usize) -> Self {
        Token {
            kind: kind.to_string(),
            text: text.into(),
            line,
            col,
            offset,
        }
    }
}

impl LexerSpec {
    /// Tokenize `text` into a flat token stream.
    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut layout = LayoutStack::new();
        let mut cursor = Cursor::new(text);

        while !cursor.at_end() {
            let (def_index, match_len) = match self.longest_match(cursor.rest()) {
                Some(found) => found,
                None => {
                    let ch = cursor.rest().chars().next().unwrap_or('\0');
                    return Err(LexError::new(
                        cursor.line,
                        cursor.col,
                        format!("unexpected character '{}'", ch),
                    ));
                }
            };
            if match_len == 0 {
                return Err(LexError::new(
                    cursor.line,
                    cursor.col,
                    "a lexer rule matched zero characters",
                ));
            }

            let def = &self.tokens[def_index];
            let matched = &cursor.rest()[..match_len];
            match def.action {
                Some(TokenAction::Skip) => {}
                Some(TokenAction::HandleIndent) => {
                    layout.handle(matched, &cursor, &self.newline_token, &mut tokens)?;
                }
                None => {
                    let kind = def.token.as_deref().expect("validated at compile time");
                    tokens.push(Token::new(
                        kind,
                        matched,
                        cursor.line,
                        cursor.col,
                        cursor.offset,
                    ));
                }
            }
            cursor.advance(matched);
        }

        if self.handles_layout {
            layout.finish(&cursor, &mut tokens);
        }

        Ok(tokens)
    }

    /// Index and byte length of the longest match at the start of
    /// `rest`; earlier definitions win ties.
    fn longest_match(&self, rest: &str) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (index, def) in self.tokens.iter().enumerate() {
            if let Some(len) = def.pattern.match_len(rest) {
                let better = match best {
                    Some((_, best_len)) => len > best_len,
                    None => true,
                };
                if better {
                    best = Some((index, len));
                }
            }
        }
        best
    }

    /// The coerced leaf value for a token, per its definition's
    /// `ast.type`. Tokens without a coercion carry their text.
    pub fn leaf_value(&self, token: &Token) -> Value {
        match self.def_for(&token.kind).and_then(|d| d.coerce) {
            Some(Coercion::Number) => crate::builder::coerce_number(&token.text),
            Some(Coercion::Bool) => Value::Bool(token.text.eq_ignore_ascii_case("true")),
            Some(Coercion::Null) => Value::Null,
            None => Value::String(token.text.clone()),
        }
    }
}

/// Character-accurate scan position.
struct Cursor<'a> {
    text: &'a str,
    byte: usize,
    offset: usize,
    line: usize,
    col: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor {
            text,
            byte: 0,
            offset: 0,
            line: 1,
            col: 1,
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.byte..]
    }

    fn at_end(&self) -> bool {
        self.byte >= self.text.len()
    }

    fn advance(&mut self, matched: &str) {
        for ch in matched.chars() {
            self.offset += 1;
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.byte += matched.len();
    }
}

/// The indentation stack for `handle_indent`.
struct LayoutStack {
    levels: Vec<String>,
}

impl LayoutStack {
    fn new() -> Self {
        LayoutStack {
            levels: vec![String::new()],
        }
    }

    /// Process one `handle_indent` match. `matched` starts at the
    /// newline; the indentation is everything after its last newline.
    fn handle(
        &mut self,
        matched: &str,
        cursor: &Cursor<'_>,
        newline_token: &str,
        tokens: &mut Vec<Token>,
    ) -> Result<(), LexError> {
        let indent = match matched.rfind('\n') {
            Some(pos) => &matched[pos + 1..],
            None => matched,
        };

        // Position of the first character of the following line.
        let newlines = matched.chars().filter(|&c| c == '\n').count();
        let next_line = cursor.line + newlines;
        let chars_after_last_newline = indent.chars().count();
        let next_line_offset =
            cursor.offset + matched.chars().count() - chars_after_last_newline;

        let top = self.levels.last().expect("stack is never empty").clone();
        if indent == top {
            tokens.push(Token::new(
                newline_token,
                "\n",
                cursor.line,
                cursor.col,
                cursor.offset,
            ));
        } else if indent.starts_with(top.as_str()) {
            self.levels.push(indent.to_string());
            tokens.push(Token::new("INDENT", "", next_line, 1, next_line_offset));
        } else if top.starts_with(indent) {
            while self.levels.len() > 1 && self.levels.last().map(|t| t.as_str()) != Some(indent) {
                self.levels.pop();
                tokens.push(Token::new("DEDENT", "", next_line, 1, next_line_offset));
            }
            if self.levels.last().map(|t| t.as_str()) != Some(indent) {
                return Err(LexError::new(
                    next_line,
                    1,
                    "unindent does not match any outer indentation level",
                ));
            }
        } else {
            return Err(LexError::new(
                next_line,
                1,
                "inconsistent use of tabs and spaces in indentation",
            ));
        }
        Ok(())
    }

    /// Close every open level at end of input.
    fn finish(&mut self, cursor: &Cursor<'_>, tokens: &mut Vec<Token>) {
        while self.levels.len() > 1 {
            self.levels.pop();
            tokens.push(Token::new("DEDENT", "", cursor.line, 1, cursor.offset));
        }
    }
}

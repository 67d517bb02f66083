//! Public parsing entry points.
//!
//! `Parser` owns a compiled grammar and turns source text into an
//! AST. The recognizer itself never raises; this module converts a
//! root-level failure (or a parse that stops short of the end of
//! input) into a `ParseError` carrying the farthest failure position,
//! the terminals expected there, and the rule stack.

pub mod engine;
pub mod fragment;

use std::path::Path;

use crate::ast::AstValue;
use crate::builder::AstBuilder;
use crate::error::{GrammarError, GrammarErrorKind, KoineError, ParseError};
use crate::grammar::CompiledGrammar;
use crate::location::SourceMap;
use engine::{Farthest, Input, Recognizer};

/// A reusable parser over one compiled grammar.
///
/// Each `parse` call carries its own cursor state; a `Parser` can be
/// reused freely but not re-entrantly from multiple threads against
/// the same call.
pub struct Parser {
    grammar: CompiledGrammar,
}

impl Parser {
    pub fn new(grammar: CompiledGrammar) -> Self {
        Parser { grammar }
    }

    /// Load, compose, and compile a grammar file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KoineError> {
        Ok(Parser {
            grammar: CompiledGrammar::compile_from_file(path)?,
        })
    }

    pub fn grammar(&self) -> &CompiledGrammar {
        &self.grammar
    }

    /// Parse from the grammar's start rule.
    pub fn parse(&self, text: &str) -> Result<Option<AstValue>, KoineError> {
        parse(&self.grammar, text, None)
    }

    /// Parse from an explicit start rule.
    pub fn parse_from(&self, text: &str, start_rule: &str) -> Result<Option<AstValue>, KoineError> {
        parse(&self.grammar, text, Some(start_rule))
    }

    /// Check that `text` parses, discarding the AST.
    pub fn validate(&self, text: &str) -> Result<(), KoineError> {
        self.parse(text).map(|_| ())
    }
}

/// Parse `text` against `grammar`. The whole input must be consumed.
pub fn parse(
    grammar: &CompiledGrammar,
    text: &str,
    start_rule: Option<&str>,
) -> Result<Option<AstValue>, KoineError> {
    let start = start_rule.unwrap_or(&grammar.start);
    let (start_key, _) = grammar.rules.get_key_value(start).ok_or_else(|| {
        GrammarError::new(
            GrammarErrorKind::UnknownRule,
            format!("start rule '{}' is not defined", start),
        )
    })?;

    let map = SourceMap::new(text);
    let tokens;
    let input = match &grammar.lexer {
        Some(lexer) => {
            tokens = lexer.tokenize(text)?;
            Input::tokens(&tokens)
        }
        None => Input::chars(text),
    };

    let mut recognizer = Recognizer::new(grammar, &input);
    match recognizer.recognize(start_key) {
        Some(fragment) => {
            let end = fragment.end();
            if end < input.len() {
                Err(short_parse_error(&input, &map, end, &recognizer.farthest).into())
            } else {
                let builder = AstBuilder::new(grammar, &input, &map);
                Ok(builder.build_root(&fragment))
            }
        }
        None => Err(failure_error(&input, &map, &recognizer.farthest).into()),
    }
}

/// The root rule failed outright: report the farthest failure.
fn failure_error(input: &Input<'_>, map: &SourceMap, farthest: &Farthest) -> ParseError {
    let at = if farthest.any { farthest.at } else { 0 };
    build_error(input, map, at, farthest, None)
}

/// The root rule matched a prefix. Prefer the farthest failure when
/// it is at or past the consumed end; otherwise report the unconsumed
/// remainder.
fn short_parse_error(
    input: &Input<'_>,
    map: &SourceMap,
    end: usize,
    farthest: &Farthest,
) -> ParseError {
    if farthest.any && farthest.at >= end {
        build_error(input, map, farthest.at, farthest, None)
    } else {
        let note = "Failed to consume entire input.";
        build_error(input, map, end, &Farthest::default(), Some(note))
    }
}

fn build_error(
    input: &Input<'_>,
    map: &SourceMap,
    at: usize,
    farthest: &Farthest,
    note: Option<&str>,
) -> ParseError {
    let expected: Vec<String> = farthest.expected.iter().cloned().collect();
    let (line, col, near) = describe_position(input, map, at);

    let mut message = format!("Syntax error at L{}:C{}", line, col);
    match &near {
        Near::Snippet(snippet) => {
            message.push_str(&format!(" near '{}...'", snippet));
        }
        Near::Token { text, kind } => {
            message.push_str(&format!(" near '{}'. Unexpected token: {}", text, kind));
        }
        Near::EndOfInput => {}
    }
    message.push('.');
    if let Some(note) = note {
        message.push_str(&format!(" {}", note));
        if let Near::Snippet(snippet) = &near {
            message.push_str(&format!(
                " Unconsumed input begins with: '{}...'",
                snippet
            ));
        }
    }
    if matches!(near, Near::EndOfInput) && note.is_none() {
        message.push_str(" Unexpected end of input.");
    }
    if !expected.is_empty() {
        message.push_str(&format!(" Expected one of: {}.", expected.join(", ")));
    }

    ParseError {
        line,
        col,
        message,
        expected,
        rule_stack: farthest.rule_stack.clone(),
    }
}

enum Near {
    Snippet(String),
    Token { text: String, kind: String },
    EndOfInput,
}

fn describe_position(input: &Input<'_>, map: &SourceMap, at: usize) -> (usize, usize, Near) {
    match input {
        Input::Chars { .. } => {
            let (line, col) = map.find(at);
            if at >= input.len() {
                return (line, col, Near::EndOfInput);
            }
            let end = (at + 20).min(input.len());
            let slice = input.slice(at, end);
            let snippet: String = slice.split('\n').next().unwrap_or("").to_string();
            if snippet.is_empty() {
                (line, col, Near::EndOfInput)
            } else {
                (line, col, Near::Snippet(snippet))
            }
        }
        Input::Tokens { tokens } => match tokens.get(at) {
            Some(token) => (
                token.line,
                token.col,
                Near::Token {
                    text: token.text.clone(),
                    kind: token.kind.clone(),
                },
            ),
            None => match tokens.last() {
                Some(last) => (last.line, last.col, Near::EndOfInput),
                None => (1, 1, Near::EndOfInput),
            },
        },
    }
}

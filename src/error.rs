//! Error types for every Koine subsystem.
//!
//! Each stage of the pipeline has its own error type with the fields a
//! caller needs to point at the offending grammar rule or source
//! position. `KoineError` is the umbrella returned by the high-level
//! entry points that can fail in more than one stage.

use std::fmt;
use std::path::PathBuf;

/// Classification of grammar compilation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarErrorKind {
    /// A `rule` reference or `token` reference does not resolve.
    UnknownRule,
    /// A rule is defined but cannot be reached from the start rule.
    Unreachable,
    /// A rule body does not have the shape its directives require.
    BadStructure,
    /// `includes` form a cycle.
    IncludeCycle,
    /// A `subgrammar` file could not be found or loaded.
    SubgrammarNotFound,
    /// An `ast` directive (or rule-body key set) is malformed.
    MalformedDirective,
    /// A grammar document could not be read from disk.
    Io,
    /// A grammar document could not be deserialized.
    InvalidDocument,
}

impl fmt::Display for GrammarErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GrammarErrorKind::UnknownRule => "unknown rule",
            GrammarErrorKind::Unreachable => "unreachable rule",
            GrammarErrorKind::BadStructure => "bad structure",
            GrammarErrorKind::IncludeCycle => "include cycle",
            GrammarErrorKind::SubgrammarNotFound => "subgrammar not found",
            GrammarErrorKind::MalformedDirective => "malformed directive",
            GrammarErrorKind::Io => "io",
            GrammarErrorKind::InvalidDocument => "invalid document",
        };
        write!(f, "{}", name)
    }
}

/// A failure while composing, validating, or compiling a grammar.
#[derive(Debug, Clone)]
pub struct GrammarError {
    pub kind: GrammarErrorKind,
    pub message: String,
    /// The grammar file the error originates from, when known.
    pub file: Option<PathBuf>,
    /// The rule the error originates from, when known.
    pub rule: Option<String>,
}

impl GrammarError {
    pub fn new(kind: GrammarErrorKind, message: impl Into<String>) -> Self {
        GrammarError {
            kind,
            message: message.into(),
            file: None,
            rule: None,
        }
    }

    pub fn in_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grammar error ({}): {}", self.kind, self.message)?;
        if let Some(rule) = &self.rule {
            write!(f, " (in rule '{}')", rule)?;
        }
        if let Some(file) = &self.file {
            write!(f, " (in file '{}')", file.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for GrammarError {}

/// A failure while tokenizing source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl LexError {
    pub fn new(line: usize, col: usize, message: impl Into<String>) -> Self {
        LexError {
            line,
            col,
            message: message.into(),
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at L{}:C{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexError {}

/// A failure reported by the recognizer at the farthest position it
/// reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub col: usize,
    /// Fully formatted, user-facing description.
    pub message: String,
    /// Terminal descriptions that could have matched at the failure
    /// position, sorted and deduplicated.
    pub expected: Vec<String>,
    /// The rule invocation stack at the farthest failure, outermost
    /// first.
    pub rule_stack: Vec<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// A failure while rendering an AST back to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileError {
    pub node_tag: String,
    pub message: String,
}

impl TranspileError {
    pub fn new(node_tag: impl Into<String>, message: impl Into<String>) -> Self {
        TranspileError {
            node_tag: node_tag.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TranspileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transpile error at node '{}': {}",
            self.node_tag, self.message
        )
    }
}

impl std::error::Error for TranspileError {}

/// Umbrella error for entry points that can fail in more than one
/// stage (for example `Parser::parse`, which can hit the lexer or the
/// recognizer).
#[derive(Debug, Clone)]
pub enum KoineError {
    Grammar(GrammarError),
    Lex(LexError),
    Parse(ParseError),
    Transpile(TranspileError),
}

impl fmt::Display for KoineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KoineError::Grammar(e) => write!(f, "{}", e),
            KoineError::Lex(e) => write!(f, "{}", e),
            KoineError::Parse(e) => write!(f, "{}", e),
            KoineError::Transpile(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for KoineError {}

impl From<GrammarError> for KoineError {
    fn from(e: GrammarError) -> Self {
        KoineError::Grammar(e)
    }
}

impl From<LexError> for KoineError {
    fn from(e: LexError) -> Self {
        KoineError::Lex(e)
    }
}

impl From<ParseError> for KoineError {
    fn from(e: ParseError) -> Self {
        KoineError::Parse(e)
    }
}

impl From<TranspileError> for KoineError {
    fn from(e: TranspileError) -> Self {
        KoineError::Transpile(e)
    }
}

impl KoineError {
    /// The user-facing line of the failure, when the stage carries one.
    pub fn line(&self) -> Option<usize> {
        match self {
            KoineError::Lex(e) => Some(e.line),
            KoineError::Parse(e) => Some(e.line),
            _ => None,
        }
    }

    /// The user-facing column of the failure, when the stage carries one.
    pub fn col(&self) -> Option<usize> {
        match self {
            KoineError::Lex(e) => Some(e.col),
            KoineError::Parse(e) => Some(e.col),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_error_display_includes_context() {
        let err = GrammarError::new(GrammarErrorKind::UnknownRule, "rule 'foo' is not defined")
            .in_rule("bar")
            .in_file("grammar.yaml");
        let text = err.to_string();
        assert!(text.contains("unknown rule"));
        assert!(text.contains("'foo'"));
        assert!(text.contains("(in rule 'bar')"));
        assert!(text.contains("grammar.yaml"));
    }

    #[test]
    fn koine_error_exposes_position() {
        let err = KoineError::from(LexError::new(3, 7, "unexpected character"));
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.col(), Some(7));
    }
}

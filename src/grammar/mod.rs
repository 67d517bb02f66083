//! The compiled grammar model.
//!
//! Compilation turns the string-keyed map form of a grammar into a
//! closed sum type (`ExprKind`) with every regex compiled, every
//! reference linked, and every directive checked. A
//! `CompiledGrammar` is immutable after compilation and can be shared
//! across threads.

pub mod compile;
pub mod composer;
pub mod loader;
pub mod raw;
pub mod validate;

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::GrammarError;
pub use raw::{RawGrammar, RawTranspilerGrammar};

/// A grammar ready for parsing.
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    /// Name of the default start rule.
    pub start: String,
    /// All rules, keyed by (possibly namespace-qualified) name.
    pub rules: HashMap<String, Rule>,
    /// Present when the grammar drives a lexer; the recognizer then
    /// walks tokens instead of characters.
    pub lexer: Option<LexerSpec>,
    /// The file this grammar was loaded from, when known.
    pub origin_file: Option<PathBuf>,
}

impl CompiledGrammar {
    /// Compile a grammar document. `base_path` is the directory used
    /// to resolve relative `includes` and `subgrammar` paths.
    pub fn compile(doc: RawGrammar, base_path: Option<&Path>) -> Result<Self, GrammarError> {
        composer::compose(doc, base_path)
    }

    /// Like [`CompiledGrammar::compile`], but every `subgrammar`
    /// reference is replaced by its inline `placeholder` expression
    /// and no external files are loaded.
    pub fn compile_placeholder(doc: RawGrammar) -> Result<Self, GrammarError> {
        composer::compose_placeholder(doc)
    }

    /// Load and compile a grammar file, resolving includes and
    /// subgrammars relative to it.
    pub fn compile_from_file(path: impl AsRef<Path>) -> Result<Self, GrammarError> {
        let path = path.as_ref();
        let doc = loader::load_grammar_file(path)?;
        let base = path.parent().map(|p| p.to_path_buf());
        let mut grammar = composer::compose(doc, base.as_deref())?;
        grammar.origin_file = Some(path.to_path_buf());
        Ok(grammar)
    }
}

/// One compiled rule: its body and the rule-level `ast` directive.
#[derive(Debug, Clone)]
pub struct Rule {
    pub body: ExprNode,
    pub ast: AstDirective,
}

/// A rule-body expression together with its per-occurrence directive.
#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub ast: AstDirective,
}

/// The executable form of a rule body.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(String),
    Regex(Pattern),
    /// Lexer mode only: match one token by type name.
    Token(String),
    Ref(String),
    Sequence(Vec<ExprNode>),
    Choice(Vec<ExprNode>),
    ZeroOrMore(Box<ExprNode>),
    OneOrMore(Box<ExprNode>),
    Optional(Box<ExprNode>),
    PosLookahead(Box<ExprNode>),
    NegLookahead(Box<ExprNode>),
}

impl ExprNode {
    /// Immediate sub-expressions, for validation walks.
    pub fn children(&self) -> Vec<&ExprNode> {
        match &self.kind {
            ExprKind::Sequence(parts) => parts.iter().collect(),
            ExprKind::Choice(alts) => alts.iter().collect(),
            ExprKind::ZeroOrMore(e)
            | ExprKind::OneOrMore(e)
            | ExprKind::Optional(e)
            | ExprKind::PosLookahead(e)
            | ExprKind::NegLookahead(e) => vec![e],
            _ => Vec::new(),
        }
    }

    pub fn is_lookahead(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::PosLookahead(_) | ExprKind::NegLookahead(_)
        )
    }
}

/// A compiled regular expression, anchored at the cursor.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// The pattern as written in the grammar.
    pub source: String,
    /// The compiled form: `^(?:…)` with `\Z` rewritten to `\z`.
    pub regex: Regex,
}

impl Pattern {
    /// Length in bytes of the match at the start of `text`, if any.
    pub fn match_len(&self, text: &str) -> Option<usize> {
        self.regex.find(text).map(|m| m.end())
    }
}

/// Value coercion applied to leaf text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Number,
    Bool,
    Null,
}

/// An operator- or map-shaped rewrite of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Structure {
    LeftAssociativeOp,
    RightAssociativeOp,
    Mapped(MappedStructure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedStructure {
    /// Node tag; the rule name when omitted.
    pub tag: Option<String>,
    /// Child key to sequence-part index, in key order.
    pub children: Vec<(String, usize)>,
}

/// A compiled `ast` directive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AstDirective {
    pub tag: Option<String>,
    pub name: Option<String>,
    pub discard: bool,
    pub promote: bool,
    pub leaf: bool,
    pub coerce: Option<Coercion>,
    pub structure: Option<Structure>,
}

impl AstDirective {
    /// True when the directive changes shaping at this node. `name`
    /// does not count: it only structures the parent.
    pub fn shapes_node(&self) -> bool {
        self.tag.is_some()
            || self.discard
            || self.promote
            || self.leaf
            || self.coerce.is_some()
            || self.structure.is_some()
    }
}

/// The compiled `lexer` block.
#[derive(Debug, Clone)]
pub struct LexerSpec {
    /// Token definitions in declaration order; order breaks
    /// longest-match ties.
    pub tokens: Vec<TokenDef>,
    /// Token type emitted for a same-level newline when layout
    /// handling is on.
    pub newline_token: String,
    /// True when some definition carries `action: handle_indent`.
    pub handles_layout: bool,
}

impl LexerSpec {
    /// The definition that emits tokens of type `kind`, if any.
    /// Synthetic layout tokens have no definition.
    pub fn def_for(&self, kind: &str) -> Option<&TokenDef> {
        self.tokens
            .iter()
            .find(|d| d.token.as_deref() == Some(kind))
    }

    /// All token type names this lexer can emit.
    pub fn token_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tokens
            .iter()
            .filter_map(|d| d.token.as_deref())
            .collect();
        if self.handles_layout {
            names.push("INDENT");
            names.push("DEDENT");
            names.push(&self.newline_token);
        }
        names
    }
}

/// One lexer token definition.
#[derive(Debug, Clone)]
pub struct TokenDef {
    pub pattern: Pattern,
    pub token: Option<String>,
    pub action: Option<TokenAction>,
    /// `type` coercion applied when the token becomes an AST leaf.
    pub coerce: Option<Coercion>,
    /// Tokens of this type are matched but never appear in the AST.
    pub discard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    Skip,
    HandleIndent,
}

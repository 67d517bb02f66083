//! # koine
//!
//! A data-driven language toolkit. Grammars are plain nested maps
//! (YAML, JSON, or TOML); Koine compiles them into an executable PEG,
//! parses source text into a semantic AST under per-rule `ast`
//! directives, and renders ASTs back to text through a second,
//! equally data-driven transpiler grammar.
//!
//! The pipeline:
//!
//! ```text
//! grammar document -> composer (includes, subgrammars) -> CompiledGrammar
//! source text -> (lexer) -> PEG recognizer -> fragments -> AST builder -> AST
//! AST + transpiler grammar -> walker -> output text
//! ```
//!
//! Three entry points cover it: [`compile_grammar`] (with
//! [`compile_grammar_from_file`] and [`compile_placeholder`]),
//! [`Parser::parse`], and [`Transpiler::transpile`].
//!
//! ```no_run
//! use koine::{Parser, Transpiler};
//!
//! let parser = Parser::from_file("calculator.yaml")?;
//! let ast = parser.parse("1 + 2 * 3")?.expect("non-empty AST");
//! let transpiler = Transpiler::from_file("to_lisp.yaml")?;
//! let out = transpiler.transpile_value(&ast)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod ast;
pub mod builder;
pub mod error;
pub mod grammar;
pub mod lexer;
pub mod location;
pub mod parser;
pub mod transpiler;

use std::path::Path;

pub use ast::{AstNode, AstValue, Children};
pub use error::{
    GrammarError, GrammarErrorKind, KoineError, LexError, ParseError, TranspileError,
};
pub use grammar::{CompiledGrammar, RawGrammar, RawTranspilerGrammar};
pub use lexer::Token;
pub use location::Position;
pub use parser::{parse, Parser};
pub use transpiler::Transpiler;

/// Compile a grammar document. `base_path` is the directory against
/// which relative `includes` and `subgrammar` paths resolve.
pub fn compile_grammar(
    doc: RawGrammar,
    base_path: Option<&Path>,
) -> Result<CompiledGrammar, GrammarError> {
    CompiledGrammar::compile(doc, base_path)
}

/// Load and compile a grammar file; its directory becomes the base
/// path.
pub fn compile_grammar_from_file(
    path: impl AsRef<Path>,
) -> Result<CompiledGrammar, GrammarError> {
    CompiledGrammar::compile_from_file(path)
}

/// Compile with every `subgrammar` reference replaced by its inline
/// `placeholder`; no files are read. Useful for structurally
/// validating one grammar file in isolation.
pub fn compile_placeholder(doc: RawGrammar) -> Result<CompiledGrammar, GrammarError> {
    CompiledGrammar::compile_placeholder(doc)
}

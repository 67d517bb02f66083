//! The serde document model of grammar files.
//!
//! Grammar documents are nested maps; YAML, JSON, and TOML all
//! deserialize into the same structs here. This layer is purely
//! structural: exactly-one-key checks, reference resolution, and all
//! other validation happen during compilation, where errors can carry
//! rule and file context.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{GrammarError, GrammarErrorKind};

/// A whole grammar document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGrammar {
    pub start_rule: Option<String>,
    #[serde(default)]
    pub rules: BTreeMap<String, RawExpr>,
    pub lexer: Option<RawLexer>,
    #[serde(default)]
    pub includes: Vec<String>,
}

/// One rule-body node. Exactly one structural key must be present;
/// `ast` rides along on any of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExpr {
    pub literal: Option<String>,
    pub regex: Option<String>,
    pub token: Option<String>,
    pub rule: Option<String>,
    pub sequence: Option<Vec<RawExpr>>,
    pub choice: Option<Vec<RawExpr>>,
    pub zero_or_more: Option<Box<RawExpr>>,
    pub one_or_more: Option<Box<RawExpr>>,
    pub optional: Option<Box<RawExpr>>,
    pub positive_lookahead: Option<Box<RawExpr>>,
    pub negative_lookahead: Option<Box<RawExpr>>,
    pub subgrammar: Option<RawSubgrammar>,
    pub ast: Option<RawAst>,
}

/// A reference to another grammar file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSubgrammar {
    pub file: String,
    /// Entry rule inside the subgrammar; defaults to its `start_rule`.
    pub rule: Option<String>,
    /// Expression substituted for this reference by the placeholder
    /// compiler. Defaults to an empty sequence.
    pub placeholder: Option<Box<RawExpr>>,
}

/// The `ast` directive attached to a rule or an individual part.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAst {
    pub tag: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub discard: bool,
    #[serde(default)]
    pub promote: bool,
    #[serde(default)]
    pub leaf: bool,
    #[serde(rename = "type")]
    pub coerce: Option<RawCoercion>,
    pub structure: Option<RawStructure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawCoercion {
    Number,
    Bool,
    Null,
}

/// `structure` accepts either a well-known name or a `map_children`
/// table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawStructure {
    Name(String),
    Mapped {
        tag: Option<String>,
        map_children: BTreeMap<String, RawChildMapping>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChildMapping {
    pub from_child: usize,
}

/// The optional `lexer` block.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLexer {
    #[serde(default)]
    pub tokens: Vec<RawTokenDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTokenDef {
    pub regex: String,
    pub token: Option<String>,
    pub action: Option<RawTokenAction>,
    pub ast: Option<RawAst>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTokenAction {
    Skip,
    HandleIndent,
}

/// A whole transpiler grammar document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTranspilerGrammar {
    pub transpiler: Option<RawTranspilerConfig>,
    #[serde(default)]
    pub rules: BTreeMap<String, RawTranspileRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTranspilerConfig {
    /// The indent unit; four spaces when omitted.
    pub indent: Option<String>,
}

/// One transpiler rule, looked up by AST node tag.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTranspileRule {
    pub template: Option<String>,
    #[serde(rename = "use")]
    pub use_: Option<RawUse>,
    pub value: Option<String>,
    pub cases: Option<Vec<RawCase>>,
    pub state_set: Option<BTreeMap<String, Value>>,
    pub join_children_with: Option<String>,
    #[serde(default)]
    pub indent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawUse {
    Value,
    Text,
}

/// One branch of a `cases` list: either a condition with a `then`
/// template, or a `default` template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCase {
    #[serde(rename = "if")]
    pub condition: Option<RawCondition>,
    pub then: Option<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCondition {
    pub path: String,
    pub equals: Option<Value>,
    #[serde(default)]
    pub negate: bool,
}

fn invalid(format: &str, err: impl std::fmt::Display) -> GrammarError {
    GrammarError::new(
        GrammarErrorKind::InvalidDocument,
        format!("failed to read {} grammar document: {}", format, err),
    )
}

impl RawGrammar {
    pub fn from_yaml(text: &str) -> Result<Self, GrammarError> {
        serde_yaml::from_str(text).map_err(|e| invalid("YAML", e))
    }

    pub fn from_json(text: &str) -> Result<Self, GrammarError> {
        serde_json::from_str(text).map_err(|e| invalid("JSON", e))
    }

    pub fn from_toml(text: &str) -> Result<Self, GrammarError> {
        toml::from_str(text).map_err(|e| invalid("TOML", e))
    }
}

impl RawTranspilerGrammar {
    pub fn from_yaml(text: &str) -> Result<Self, GrammarError> {
        serde_yaml::from_str(text).map_err(|e| invalid("YAML", e))
    }

    pub fn from_json(text: &str) -> Result<Self, GrammarError> {
        serde_json::from_str(text).map_err(|e| invalid("JSON", e))
    }
}

impl RawExpr {
    /// Names of the structural keys present on this node.
    pub fn structural_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.literal.is_some() {
            keys.push("literal");
        }
        if self.regex.is_some() {
            keys.push("regex");
        }
        if self.token.is_some() {
            keys.push("token");
        }
        if self.rule.is_some() {
            keys.push("rule");
        }
        if self.sequence.is_some() {
            keys.push("sequence");
        }
        if self.choice.is_some() {
            keys.push("choice");
        }
        if self.zero_or_more.is_some() {
            keys.push("zero_or_more");
        }
        if self.one_or_more.is_some() {
            keys.push("one_or_more");
        }
        if self.optional.is_some() {
            keys.push("optional");
        }
        if self.positive_lookahead.is_some() {
            keys.push("positive_lookahead");
        }
        if self.negative_lookahead.is_some() {
            keys.push("negative_lookahead");
        }
        if self.subgrammar.is_some() {
            keys.push("subgrammar");
        }
        keys
    }

    /// Immediate sub-expressions, for structural walks over raw
    /// documents (subgrammar discovery, placeholder rewriting).
    pub fn children_mut(&mut self) -> Vec<&mut RawExpr> {
        let mut out: Vec<&mut RawExpr> = Vec::new();
        if let Some(parts) = &mut self.sequence {
            out.extend(parts.iter_mut());
        }
        if let Some(alts) = &mut self.choice {
            out.extend(alts.iter_mut());
        }
        for slot in [
            &mut self.zero_or_more,
            &mut self.one_or_more,
            &mut self.optional,
            &mut self.positive_lookahead,
            &mut self.negative_lookahead,
        ] {
            if let Some(inner) = slot {
                out.push(inner);
            }
        }
        out
    }

    pub fn children(&self) -> Vec<&RawExpr> {
        let mut out: Vec<&RawExpr> = Vec::new();
        if let Some(parts) = &self.sequence {
            out.extend(parts.iter());
        }
        if let Some(alts) = &self.choice {
            out.extend(alts.iter());
        }
        for slot in [
            &self.zero_or_more,
            &self.one_or_more,
            &self.optional,
            &self.positive_lookahead,
            &self.negative_lookahead,
        ] {
            if let Some(inner) = slot {
                out.push(inner);
            }
        }
        out
    }

    /// True if this node or anything below it is a `subgrammar`
    /// reference.
    pub fn contains_subgrammar(&self) -> bool {
        self.subgrammar.is_some() || self.children().iter().any(|c| c.contains_subgrammar())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_small_yaml_grammar() {
        let doc = r#"
start_rule: greeting
rules:
  greeting:
    sequence:
      - literal: "hello"
      - rule: name
        ast: { name: who }
  name:
    regex: "[a-z]+"
    ast: { leaf: true }
"#;
        let grammar = RawGrammar::from_yaml(doc).unwrap();
        assert_eq!(grammar.start_rule.as_deref(), Some("greeting"));
        let greeting = &grammar.rules["greeting"];
        assert_eq!(greeting.structural_keys(), vec!["sequence"]);
        let parts = greeting.sequence.as_ref().unwrap();
        assert_eq!(parts[1].ast.as_ref().unwrap().name.as_deref(), Some("who"));
    }

    #[test]
    fn deserializes_structure_variants() {
        let named: RawAst =
            serde_yaml::from_str("structure: left_associative_op").unwrap();
        assert!(matches!(named.structure, Some(RawStructure::Name(ref s)) if s == "left_associative_op"));

        let mapped: RawAst = serde_yaml::from_str(
            "structure: { tag: pair, map_children: { key: { from_child: 0 }, val: { from_child: 2 } } }",
        )
        .unwrap();
        match mapped.structure {
            Some(RawStructure::Mapped { tag, map_children }) => {
                assert_eq!(tag.as_deref(), Some("pair"));
                assert_eq!(map_children["val"].from_child, 2);
            }
            other => panic!("unexpected structure: {:?}", other),
        }
    }

    #[test]
    fn deserializes_lexer_and_transpiler_blocks() {
        let grammar = RawGrammar::from_yaml(
            r#"
start_rule: s
lexer:
  tokens:
    - { regex: '\n[ \t]*', action: handle_indent }
    - { regex: '[0-9]+', token: NUMBER, ast: { type: number } }
    - { regex: '[ ]+', action: skip }
rules:
  s: { token: NUMBER }
"#,
        )
        .unwrap();
        let lexer = grammar.lexer.unwrap();
        assert_eq!(lexer.tokens.len(), 3);
        assert_eq!(lexer.tokens[0].action, Some(RawTokenAction::HandleIndent));
        assert_eq!(lexer.tokens[1].ast.as_ref().unwrap().coerce, Some(RawCoercion::Number));

        let transpiler = RawTranspilerGrammar::from_yaml(
            r#"
transpiler: { indent: "  " }
rules:
  binary_op: { template: "({op} {left} {right})" }
  number: { use: value }
  assignment:
    cases:
      - if: { path: "state.vars.{target}", negate: true }
        then: "let {target} = {value};"
      - default: "{target} = {value};"
    state_set: { "vars.{target}": true }
"#,
        )
        .unwrap();
        assert_eq!(
            transpiler.transpiler.unwrap().indent.as_deref(),
            Some("  ")
        );
        assert_eq!(transpiler.rules["number"].use_, Some(RawUse::Value));
        let cases = transpiler.rules["assignment"].cases.as_ref().unwrap();
        assert!(cases[0].condition.as_ref().unwrap().negate);
        assert_eq!(cases[1].default.as_deref(), Some("{target} = {value};"));
    }

    #[test]
    fn json_documents_load_too() {
        let grammar = RawGrammar::from_json(
            r#"{ "start_rule": "main", "rules": { "main": { "literal": "a" } } }"#,
        )
        .unwrap();
        assert_eq!(grammar.rules["main"].literal.as_deref(), Some("a"));
    }
}

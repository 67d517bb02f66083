//! The AST builder.
//!
//! Shapes raw parse fragments into the semantic AST by walking the
//! grammar expression and the fragment side by side, applying the
//! `ast` directives it meets. Directive priority at any node:
//!
//! 1. `discard` drops the slot.
//! 2. `leaf` captures the covered text with no further recursion
//!    (rules whose body is a bare literal or regex are leaves
//!    automatically in character mode).
//! 3. `structure` rewrites operator chains into `binary_op` nodes or
//!    builds a keyed children map from `map_children`.
//! 4. `promote` replaces the node with its shaped children: always a
//!    list for sequences and quantifiers, the single shaped child for
//!    choices. The rule's remaining `tag`/`type` apply afterwards.
//! 5. Otherwise a default node is built; its children are a keyed map
//!    when any sequence part carries `ast.name`, a flattened list
//!    otherwise.
//!
//! Anonymous expressions without directives are transparent: their
//! shaped children splice into the surrounding collection one level
//! up. A rule whose body is a bare reference with no directives is an
//! alias and shapes straight through.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ast::{AstNode, AstValue, Children};
use crate::grammar::{
    AstDirective, Coercion, CompiledGrammar, ExprKind, ExprNode, MappedStructure, Structure,
};
use crate::location::SourceMap;
use crate::parser::engine::Input;
use crate::parser::fragment::Fragment;

/// The decimal grammar accepted by the `number` coercion.
static DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

/// Coerce text to a number value: an integer when integral, a float
/// otherwise. Text outside the decimal grammar stays a string.
pub fn coerce_number(text: &str) -> Value {
    let trimmed = text.trim();
    if DECIMAL.is_match(trimmed) {
        let parsed: f64 = trimmed.parse().unwrap_or(0.0);
        if parsed.fract() == 0.0 && parsed.abs() <= i64::MAX as f64 {
            return Value::from(parsed as i64);
        }
        return Value::from(parsed);
    }
    Value::String(text.to_string())
}

/// Apply a `type` coercion to leaf text.
pub fn coerce_value(text: &str, coercion: Coercion) -> Value {
    match coercion {
        Coercion::Number => coerce_number(text),
        Coercion::Bool => Value::Bool(text.trim().eq_ignore_ascii_case("true")),
        Coercion::Null => Value::Null,
    }
}

/// Intermediate shaping result: nothing, one node, or a list that
/// splices into the parent collection. Lists may nest; consumers
/// flatten on demand.
#[derive(Debug, Clone)]
pub(crate) enum Shaped {
    Empty,
    Node(AstNode),
    List(Vec<Shaped>),
}

fn flatten(shaped: Shaped) -> Vec<AstNode> {
    match shaped {
        Shaped::Empty => Vec::new(),
        Shaped::Node(node) => vec![node],
        Shaped::List(items) => items.into_iter().flat_map(flatten).collect(),
    }
}

fn shaped_to_value(shaped: Shaped) -> Option<AstValue> {
    match shaped {
        Shaped::Empty => None,
        Shaped::Node(node) => Some(AstValue::Node(node)),
        Shaped::List(items) => Some(AstValue::List(
            items.into_iter().flat_map(flatten).collect(),
        )),
    }
}

pub(crate) struct AstBuilder<'g, 'a> {
    grammar: &'g CompiledGrammar,
    input: &'a Input<'a>,
    map: &'a SourceMap,
}

impl<'g, 'a> AstBuilder<'g, 'a> {
    pub fn new(grammar: &'g CompiledGrammar, input: &'a Input<'a>, map: &'a SourceMap) -> Self {
        AstBuilder {
            grammar,
            input,
            map,
        }
    }

    /// Shape the root fragment returned by the recognizer.
    pub fn build_root(&self, fragment: &Fragment) -> Option<AstValue> {
        let shaped = match fragment {
            Fragment::Rule { name, .. } => self.apply_rule(name, fragment),
            _ => Shaped::Empty,
        };
        shaped_to_value(shaped)
    }

    /// Shape one occurrence of a part, honoring its inline directive.
    fn shape_part(&self, expr: &ExprNode, fragment: &Fragment) -> Shaped {
        let directive = &expr.ast;
        if directive.discard {
            return Shaped::Empty;
        }
        match &expr.kind {
            ExprKind::Ref(name) => {
                let shaped = self.apply_rule(name, fragment);
                self.overlay(directive, shaped, fragment)
            }
            _ => {
                if directive.shapes_node() {
                    self.shape_with_directive(directive, None, expr, fragment)
                } else {
                    self.transparent(expr, fragment)
                }
            }
        }
    }

    /// Shape a rule application with its rule-level directive.
    fn apply_rule(&self, name: &str, fragment: &Fragment) -> Shaped {
        let rule = match self.grammar.rules.get(name) {
            Some(rule) => rule,
            None => return Shaped::Empty,
        };
        let inner = match fragment {
            Fragment::Rule { inner, .. } => inner,
            _ => return Shaped::Empty,
        };
        // A bare `rule:` body with no directives on either side is an
        // alias; it shapes straight through without a wrapper node.
        if !rule.ast.shapes_node()
            && matches!(rule.body.kind, ExprKind::Ref(_))
            && !rule.body.ast.shapes_node()
        {
            return self.transparent(&rule.body, inner);
        }
        self.shape_with_directive(&rule.ast, Some(name), &rule.body, inner)
    }

    /// The directive-application core, shared by rules and inline
    /// parts. `rule_tag` is the rule name when shaping a rule body.
    fn shape_with_directive(
        &self,
        directive: &AstDirective,
        rule_tag: Option<&str>,
        body: &ExprNode,
        fragment: &Fragment,
    ) -> Shaped {
        if directive.discard {
            return Shaped::Empty;
        }
        if directive.leaf || self.is_auto_leaf(body) {
            return self.make_leaf(directive, rule_tag, body, fragment);
        }
        if let Some(structure) = &directive.structure {
            return self.shape_structure(structure, directive, rule_tag, body, fragment);
        }

        let inner = self.transparent(body, fragment);
        if directive.promote {
            return self.promote(directive, body, inner, fragment);
        }
        self.default_node(directive, rule_tag, body, fragment, inner)
    }

    /// In character mode a rule whose body is a bare literal or regex
    /// is a leaf without needing `leaf: true`.
    fn is_auto_leaf(&self, body: &ExprNode) -> bool {
        matches!(self.input, Input::Chars { .. })
            && matches!(body.kind, ExprKind::Literal(_) | ExprKind::Regex(_))
    }

    /// Shape an expression without applying its own directive,
    /// producing the transparent (spliceable) result.
    fn transparent(&self, expr: &ExprNode, fragment: &Fragment) -> Shaped {
        match (&expr.kind, fragment) {
            (ExprKind::Literal(_), Fragment::Terminal { start, end }) => {
                self.anonymous_terminal("literal", *start, *end)
            }
            (ExprKind::Regex(_), Fragment::Terminal { start, end }) => {
                self.anonymous_terminal("regex", *start, *end)
            }
            (ExprKind::Token(_), Fragment::Terminal { start, .. }) => self.token_leaf(*start),
            (ExprKind::Ref(name), Fragment::Rule { .. }) => self.apply_rule(name, fragment),
            (ExprKind::Sequence(parts), Fragment::Seq { parts: frags, .. }) => Shaped::List(
                parts
                    .iter()
                    .zip(frags.iter())
                    .map(|(part, frag)| self.shape_part(part, frag))
                    .collect(),
            ),
            (ExprKind::Choice(alts), Fragment::Choice { alt, inner, .. }) => {
                self.shape_part(&alts[*alt], inner)
            }
            (ExprKind::ZeroOrMore(inner), Fragment::Repeat { items, .. })
            | (ExprKind::OneOrMore(inner), Fragment::Repeat { items, .. }) => Shaped::List(
                items
                    .iter()
                    .map(|item| self.shape_part(inner, item))
                    .collect(),
            ),
            (ExprKind::Optional(inner), Fragment::Opt { inner: frag, .. }) => match frag {
                Some(frag) => self.shape_part(inner, frag),
                None => Shaped::Empty,
            },
            _ => Shaped::Empty,
        }
    }

    /// An inline literal or regex match with no directive. Empty
    /// matches produce nothing.
    fn anonymous_terminal(&self, tag: &str, start: usize, end: usize) -> Shaped {
        let text = self.input.slice(start, end);
        if text.is_empty() {
            return Shaped::Empty;
        }
        let (line, col) = self.pos_of(start);
        Shaped::Node(AstNode::leaf(tag, text, line, col))
    }

    /// A consumed token, unless its definition discards it.
    fn token_leaf(&self, index: usize) -> Shaped {
        let token = match self.input.token_at(index) {
            Some(token) => token,
            None => return Shaped::Empty,
        };
        let lexer = self.grammar.lexer.as_ref().expect("token match without lexer");
        if let Some(def) = lexer.def_for(&token.kind) {
            if def.discard {
                return Shaped::Empty;
            }
        }
        Shaped::Node(
            AstNode::leaf(token.kind.clone(), token.text.clone(), token.line, token.col)
                .with_value(lexer.leaf_value(token)),
        )
    }

    fn make_leaf(
        &self,
        directive: &AstDirective,
        rule_tag: Option<&str>,
        body: &ExprNode,
        fragment: &Fragment,
    ) -> Shaped {
        let tag = directive
            .tag
            .clone()
            .or_else(|| rule_tag.map(String::from))
            .unwrap_or_else(|| match &body.kind {
                ExprKind::Literal(_) => "literal".to_string(),
                ExprKind::Regex(_) => "regex".to_string(),
                ExprKind::Token(name) => name.clone(),
                _ => "leaf".to_string(),
            });
        let text = self.text_of(fragment.start(), fragment.end());
        let (line, col) = self.pos_of(fragment.start());
        let value = match directive.coerce {
            Some(coercion) => Some(coerce_value(&text, coercion)),
            None => self.single_token_value(fragment),
        };
        let mut node = AstNode::leaf(tag, text, line, col);
        node.value = value;
        Shaped::Node(node)
    }

    /// The token definition's own coercion, when a leaf covers
    /// exactly one token.
    fn single_token_value(&self, fragment: &Fragment) -> Option<Value> {
        if fragment.end() != fragment.start() + 1 {
            return None;
        }
        let token = self.input.token_at(fragment.start())?;
        let lexer = self.grammar.lexer.as_ref()?;
        Some(lexer.leaf_value(token))
    }

    fn promote(
        &self,
        directive: &AstDirective,
        body: &ExprNode,
        inner: Shaped,
        fragment: &Fragment,
    ) -> Shaped {
        let promoted = match body.kind {
            // Sequences and quantifiers always promote to a list,
            // even a list of one.
            ExprKind::Sequence(_)
            | ExprKind::ZeroOrMore(_)
            | ExprKind::OneOrMore(_)
            | ExprKind::Optional(_) => Shaped::List(
                flatten(inner).into_iter().map(Shaped::Node).collect(),
            ),
            // Choices and references promote to their single shaped
            // child (which may itself be a list).
            _ => inner,
        };

        match promoted {
            Shaped::Empty => Shaped::Empty,
            Shaped::Node(mut node) => {
                if let Some(tag) = &directive.tag {
                    node.tag = tag.clone();
                }
                if directive.leaf {
                    node.children = Children::None;
                }
                if let Some(coercion) = directive.coerce {
                    if let Some(text) = node.text.clone() {
                        node.value = Some(coerce_value(&text, coercion));
                    }
                }
                Shaped::Node(node)
            }
            Shaped::List(items) => {
                if let Some(tag) = &directive.tag {
                    // Re-tagging a promoted list wraps it in a fresh
                    // node so the tag has somewhere to live.
                    let (line, col) = self.pos_of(fragment.start());
                    Shaped::Node(AstNode {
                        tag: tag.clone(),
                        text: Some(self.text_of(fragment.start(), fragment.end())),
                        line,
                        col,
                        value: None,
                        children: Children::List(
                            items.into_iter().flat_map(flatten).collect(),
                        ),
                    })
                } else {
                    Shaped::List(items)
                }
            }
        }
    }

    fn default_node(
        &self,
        directive: &AstDirective,
        rule_tag: Option<&str>,
        body: &ExprNode,
        fragment: &Fragment,
        inner: Shaped,
    ) -> Shaped {
        let tag = match directive.tag.clone().or_else(|| rule_tag.map(String::from)) {
            Some(tag) => tag,
            // An anonymous expression with no tag to give stays
            // transparent.
            None => return inner,
        };

        // Named mode: any part with `ast.name` switches the children
        // to a keyed map. The transparent list is parallel to the
        // sequence parts, so names line up by position.
        if let ExprKind::Sequence(parts) = &body.kind {
            if parts.iter().any(|p| p.ast.name.is_some()) {
                let entries = match inner {
                    Shaped::List(entries) => entries,
                    other => vec![other],
                };
                let mut named = BTreeMap::new();
                for (part, shaped) in parts.iter().zip(entries.into_iter()) {
                    let Some(name) = &part.ast.name else { continue };
                    match shaped {
                        Shaped::Empty => {}
                        Shaped::Node(node) => {
                            named.insert(name.clone(), AstValue::Node(node));
                        }
                        Shaped::List(items) => {
                            named.insert(
                                name.clone(),
                                AstValue::List(items.into_iter().flat_map(flatten).collect()),
                            );
                        }
                    }
                }
                let (line, col) = self.pos_of(fragment.start());
                return Shaped::Node(AstNode {
                    tag,
                    text: Some(self.text_of(fragment.start(), fragment.end())),
                    line,
                    col,
                    value: None,
                    children: Children::Named(named),
                });
            }
        }

        let (line, col) = self.pos_of(fragment.start());
        Shaped::Node(AstNode {
            tag,
            text: Some(self.text_of(fragment.start(), fragment.end())),
            line,
            col,
            value: None,
            children: Children::List(flatten(inner)),
        })
    }

    fn shape_structure(
        &self,
        structure: &Structure,
        directive: &AstDirective,
        rule_tag: Option<&str>,
        body: &ExprNode,
        fragment: &Fragment,
    ) -> Shaped {
        let (parts, frags) = match (&body.kind, fragment) {
            (ExprKind::Sequence(parts), Fragment::Seq { parts: frags, .. }) => (parts, frags),
            // Shape checked at validation; fall back to transparent.
            _ => return self.transparent(body, fragment),
        };
        match structure {
            Structure::LeftAssociativeOp => self.fold_left(parts, frags),
            Structure::RightAssociativeOp => self.fold_right(parts, frags),
            Structure::Mapped(mapped) => {
                self.map_children(mapped, directive, rule_tag, parts, frags, fragment)
            }
        }
    }

    /// `a op b op c` folds to `((a op b) op c)`.
    fn fold_left(&self, parts: &[ExprNode], frags: &[Fragment]) -> Shaped {
        let mut base_nodes = flatten(self.shape_part(&parts[0], &frags[0]));
        if base_nodes.is_empty() {
            return Shaped::Empty;
        }
        let mut acc = base_nodes.remove(0);

        let tail = self.shape_part(&parts[1], &frags[1]);
        let iterations = match tail {
            Shaped::List(items) => items,
            Shaped::Empty => Vec::new(),
            other => vec![other],
        };
        for iteration in iterations {
            let mut group = flatten(iteration);
            if group.len() < 2 {
                continue;
            }
            let right = group.remove(1);
            let op = group.remove(0);
            acc = binary_op(op, acc, right);
        }
        Shaped::Node(acc)
    }

    /// `a op b op c` nests to `(a op (b op c))`; the recursion lives
    /// in the grammar's self-reference.
    fn fold_right(&self, parts: &[ExprNode], frags: &[Fragment]) -> Shaped {
        let mut base_nodes = flatten(self.shape_part(&parts[0], &frags[0]));
        if base_nodes.is_empty() {
            return Shaped::Empty;
        }
        let base = base_nodes.remove(0);

        let mut tail = flatten(self.shape_part(&parts[1], &frags[1]));
        if tail.len() < 2 {
            return Shaped::Node(base);
        }
        let right = tail.remove(1);
        let op = tail.remove(0);
        Shaped::Node(binary_op(op, base, right))
    }

    fn map_children(
        &self,
        mapped: &MappedStructure,
        directive: &AstDirective,
        rule_tag: Option<&str>,
        parts: &[ExprNode],
        frags: &[Fragment],
        fragment: &Fragment,
    ) -> Shaped {
        let slots: Vec<Shaped> = parts
            .iter()
            .zip(frags.iter())
            .map(|(part, frag)| self.shape_part(part, frag))
            .collect();

        let mut named = BTreeMap::new();
        for (name, index) in &mapped.children {
            // Fall forward from the requested slot until something
            // survived shaping; optional and discarded slots collapse
            // leftward.
            for slot in slots.iter().skip(*index) {
                let nodes = flatten(slot.clone());
                if nodes.is_empty() {
                    continue;
                }
                let value = if nodes.len() == 1 {
                    AstValue::Node(nodes.into_iter().next().unwrap())
                } else {
                    AstValue::List(nodes)
                };
                named.insert(name.clone(), value);
                break;
            }
        }

        let tag = mapped
            .tag
            .clone()
            .or_else(|| directive.tag.clone())
            .or_else(|| rule_tag.map(String::from))
            .unwrap_or_else(|| "mapped".to_string());
        let (line, col) = self.pos_of(fragment.start());
        Shaped::Node(AstNode {
            tag,
            text: Some(self.text_of(fragment.start(), fragment.end())),
            line,
            col,
            value: None,
            children: Children::Named(named),
        })
    }

    /// Part-level directives layered over a rule reference's result.
    fn overlay(&self, directive: &AstDirective, shaped: Shaped, fragment: &Fragment) -> Shaped {
        if !directive.shapes_node() {
            return shaped;
        }
        if directive.discard {
            return Shaped::Empty;
        }
        if directive.leaf {
            let tag = directive.tag.clone().unwrap_or_else(|| match &shaped {
                Shaped::Node(node) => node.tag.clone(),
                _ => "leaf".to_string(),
            });
            let text = self.text_of(fragment.start(), fragment.end());
            let (line, col) = self.pos_of(fragment.start());
            let mut node = AstNode::leaf(tag, text.clone(), line, col);
            if let Some(coercion) = directive.coerce {
                node.value = Some(coerce_value(&text, coercion));
            }
            return Shaped::Node(node);
        }
        match shaped {
            Shaped::Empty => Shaped::Empty,
            Shaped::Node(mut node) => {
                if let Some(tag) = &directive.tag {
                    node.tag = tag.clone();
                }
                if let Some(coercion) = directive.coerce {
                    if let Some(text) = node.text.clone() {
                        node.value = Some(coerce_value(&text, coercion));
                    }
                }
                Shaped::Node(node)
            }
            Shaped::List(items) => {
                if let Some(tag) = &directive.tag {
                    let (line, col) = self.pos_of(fragment.start());
                    Shaped::Node(AstNode {
                        tag: tag.clone(),
                        text: Some(self.text_of(fragment.start(), fragment.end())),
                        line,
                        col,
                        value: None,
                        children: Children::List(
                            items.into_iter().flat_map(flatten).collect(),
                        ),
                    })
                } else {
                    Shaped::List(items)
                }
            }
        }
    }

    fn pos_of(&self, position: usize) -> (usize, usize) {
        match self.input {
            Input::Chars { .. } => self.map.find(position),
            Input::Tokens { .. } => match self.input.token_at(position) {
                Some(token) => (token.line, token.col),
                None => match position.checked_sub(1).and_then(|p| self.input.token_at(p)) {
                    Some(last) => (last.line, last.col),
                    None => (1, 1),
                },
            },
        }
    }

    /// Covered text: the source slice in character mode, the covered
    /// tokens' texts joined with spaces in lexer mode.
    fn text_of(&self, start: usize, end: usize) -> String {
        match self.input {
            Input::Chars { .. } => self.input.slice(start, end).to_string(),
            Input::Tokens { .. } => {
                let mut pieces = Vec::new();
                for index in start..end {
                    if let Some(token) = self.input.token_at(index) {
                        if !token.text.is_empty() {
                            pieces.push(token.text.as_str());
                        }
                    }
                }
                pieces.join(" ")
            }
        }
    }
}

/// The canonical operator node: keyed `op`/`left`/`right` children,
/// position taken from the operator.
fn binary_op(op: AstNode, left: AstNode, right: AstNode) -> AstNode {
    let line = op.line;
    let col = op.col;
    let mut children = BTreeMap::new();
    children.insert("op".to_string(), AstValue::Node(op));
    children.insert("left".to_string(), AstValue::Node(left));
    children.insert("right".to_string(), AstValue::Node(right));
    AstNode {
        tag: "binary_op".to_string(),
        text: None,
        line,
        col,
        value: None,
        children: Children::Named(children),
    }
}

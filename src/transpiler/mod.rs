//! The transpiler engine.
//!
//! A tree walker over the AST: each node's tag selects a rule from
//! the transpiler grammar, the rule's template (or matching `cases`
//! branch) is filled from the transpiled children, and `state_set`
//! writes into a mutable state map threaded through the whole walk in
//! left-to-right depth-first order. Rules can raise the indentation
//! depth for their children; each produced line is prefixed once, at
//! the moment the joined children are substituted into the parent,
//! so nesting never double-indents.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::ast::{AstNode, AstValue, Children};
use crate::error::{GrammarError, TranspileError};
use crate::grammar::loader;
use crate::grammar::raw::{RawCase, RawTranspileRule, RawTranspilerGrammar, RawUse};

const DEFAULT_INDENT: &str = "    ";

/// A reusable transpiler over one transpiler grammar.
///
/// Each `transpile` call owns a fresh state map and indentation
/// depth, so one `Transpiler` can serve many calls.
pub struct Transpiler {
    rules: BTreeMap<String, RawTranspileRule>,
    indent_unit: String,
}

impl Transpiler {
    pub fn new(grammar: RawTranspilerGrammar) -> Self {
        let indent_unit = grammar
            .transpiler
            .and_then(|c| c.indent)
            .unwrap_or_else(|| DEFAULT_INDENT.to_string());
        Transpiler {
            rules: grammar.rules,
            indent_unit,
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, GrammarError> {
        Ok(Transpiler::new(RawTranspilerGrammar::from_yaml(text)?))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GrammarError> {
        Ok(Transpiler::new(loader::load_transpiler_file(path.as_ref())?))
    }

    /// Render one AST to text.
    pub fn transpile(&self, ast: &AstNode) -> Result<String, TranspileError> {
        let mut walker = Walker {
            rules: &self.rules,
            indent_unit: &self.indent_unit,
            state: Value::Object(serde_json::Map::new()),
            depth: 0,
        };
        walker.node(ast)
    }

    /// Render a parse result that may be a list of nodes.
    pub fn transpile_value(&self, ast: &AstValue) -> Result<String, TranspileError> {
        let mut walker = Walker {
            rules: &self.rules,
            indent_unit: &self.indent_unit,
            state: Value::Object(serde_json::Map::new()),
            depth: 0,
        };
        walker.value(ast)
    }
}

struct Walker<'t> {
    rules: &'t BTreeMap<String, RawTranspileRule>,
    indent_unit: &'t str,
    state: Value,
    depth: usize,
}

impl<'t> Walker<'t> {
    fn value(&mut self, value: &AstValue) -> Result<String, TranspileError> {
        match value {
            AstValue::Node(node) => self.node(node),
            AstValue::List(items) => {
                let mut pieces = Vec::new();
                for item in items {
                    pieces.push(self.node(item)?);
                }
                Ok(pieces.join(" "))
            }
        }
    }

    fn node(&mut self, node: &AstNode) -> Result<String, TranspileError> {
        let rule = self.rules.get(&node.tag);
        let indents = rule.map(|r| r.indent).unwrap_or(false);
        if indents {
            self.depth += 1;
        }
        let result = self.node_inner(node, rule, indents);
        if indents {
            self.depth -= 1;
        }
        result
    }

    fn node_inner(
        &mut self,
        node: &AstNode,
        rule: Option<&'t RawTranspileRule>,
        indents: bool,
    ) -> Result<String, TranspileError> {
        // Transpile the children up front: templates, case paths, and
        // state paths all substitute from the same map.
        let subs = self.child_substitutions(node, rule, indents)?;

        let template = match rule {
            Some(rule) if rule.cases.is_some() => {
                Some(self.select_case(node, rule.cases.as_ref().unwrap(), &subs)?)
            }
            Some(rule) => rule.template.as_deref(),
            None => None,
        };

        let output = if let Some(template) = template {
            self.substitute(template, node, &subs)?
        } else if let Some(rule) = rule {
            match rule.use_ {
                Some(RawUse::Value) => stringify(node.value.as_ref().unwrap_or(&Value::Null)),
                Some(RawUse::Text) => match &node.text {
                    Some(text) => text.clone(),
                    None => {
                        return Err(TranspileError::new(
                            node.tag.clone(),
                            "'use: text' on a node that has no text",
                        ))
                    }
                },
                None => match &rule.value {
                    Some(literal) => literal.clone(),
                    None => self.fallback(node)?,
                },
            }
        } else {
            self.fallback(node)?
        };

        // State writes happen after the node's own output; later
        // siblings observe the state this node leaves behind.
        if let Some(rule) = rule {
            if let Some(state_set) = &rule.state_set {
                for (path_template, value) in state_set {
                    let path = self.substitute(path_template, node, &subs)?;
                    let value = match value {
                        Value::String(text) => {
                            Value::String(self.substitute(text, node, &subs)?)
                        }
                        other => other.clone(),
                    };
                    write_state(&mut self.state, &path, value);
                }
            }
        }

        Ok(output)
    }

    /// No rule for this tag: a leaf's value or text speaks for
    /// itself.
    fn fallback(&self, node: &AstNode) -> Result<String, TranspileError> {
        if let Some(value) = &node.value {
            return Ok(stringify(value));
        }
        if let Some(text) = &node.text {
            return Ok(text.clone());
        }
        Err(TranspileError::new(
            node.tag.clone(),
            "no transpiler rule and the node has neither value nor text",
        ))
    }

    /// Transpiled children keyed for substitution: named children
    /// under their names, list children joined under `children`.
    fn child_substitutions(
        &mut self,
        node: &AstNode,
        rule: Option<&RawTranspileRule>,
        indents: bool,
    ) -> Result<BTreeMap<String, String>, TranspileError> {
        let mut subs = BTreeMap::new();
        match &node.children {
            Children::None => {}
            Children::Named(named) => {
                for (name, child) in named {
                    let rendered = self.value(child)?;
                    subs.insert(name.clone(), rendered);
                }
            }
            Children::List(items) => {
                let current_indent = self.indent_unit.repeat(self.depth);
                let mut joiner = rule
                    .and_then(|r| r.join_children_with.clone())
                    .unwrap_or_default();
                if joiner.contains('\n') {
                    joiner = joiner.replace('\n', &format!("\n{}", current_indent));
                }
                let mut rendered = Vec::new();
                for item in items {
                    let piece = self.node(item)?;
                    if !piece.is_empty() {
                        rendered.push(piece);
                    }
                }
                let mut joined = rendered.join(&joiner);
                if indents && !joined.is_empty() {
                    joined = format!("{}{}", current_indent, joined);
                }
                subs.insert("children".to_string(), joined);
            }
        }
        Ok(subs)
    }

    /// Pick the first matching `cases` branch.
    fn select_case(
        &mut self,
        node: &AstNode,
        cases: &'t [RawCase],
        subs: &BTreeMap<String, String>,
    ) -> Result<&'t str, TranspileError> {
        for case in cases {
            if let Some(condition) = &case.condition {
                if self.evaluate_condition(node, condition, subs)? {
                    return case.then.as_deref().ok_or_else(|| {
                        TranspileError::new(
                            node.tag.clone(),
                            "a 'cases' branch with 'if' needs a 'then'",
                        )
                    });
                }
            } else if let Some(default) = &case.default {
                return Ok(default);
            }
        }
        Err(TranspileError::new(
            node.tag.clone(),
            "no 'cases' branch matched and there is no 'default'",
        ))
    }

    fn evaluate_condition(
        &mut self,
        node: &AstNode,
        condition: &crate::grammar::raw::RawCondition,
        subs: &BTreeMap<String, String>,
    ) -> Result<bool, TranspileError> {
        // Placeholders inside the path resolve against the transpiled
        // children first.
        let path = self.substitute(&condition.path, node, subs)?;
        let resolved = self.resolve_path(&path, node, subs);

        let mut result = match &condition.equals {
            Some(expected) => match &resolved {
                Some(actual) => resolved_to_string(actual) == stringify(expected),
                None => false,
            },
            None => truthy(&resolved),
        };
        if condition.negate {
            result = !result;
        }
        Ok(result)
    }

    /// Resolve a dot path rooted at `node.`, `state.`, or a
    /// transpiled-child name.
    fn resolve_path(
        &self,
        path: &str,
        node: &AstNode,
        subs: &BTreeMap<String, String>,
    ) -> Option<Resolved> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        match root {
            "node" => resolve_node_path(node, segments),
            "state" => {
                let mut current = &self.state;
                for segment in segments {
                    current = current.as_object()?.get(segment)?;
                }
                Some(Resolved::Json(current.clone()))
            }
            name => {
                if segments.next().is_some() {
                    return None;
                }
                subs.get(name).map(|s| Resolved::Text(s.clone()))
            }
        }
    }

    /// Fill `{placeholder}` holes in a template. `{{` and `}}` are
    /// literal braces.
    fn substitute(
        &mut self,
        template: &str,
        node: &AstNode,
        subs: &BTreeMap<String, String>,
    ) -> Result<String, TranspileError> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        out.push('{');
                        continue;
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(inner) => name.push(inner),
                            None => {
                                return Err(TranspileError::new(
                                    node.tag.clone(),
                                    format!("unterminated placeholder '{{{}'", name),
                                ))
                            }
                        }
                    }
                    out.push_str(&self.placeholder(&name, node, subs)?);
                }
                '}' => {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                    }
                    out.push('}');
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn placeholder(
        &mut self,
        name: &str,
        node: &AstNode,
        subs: &BTreeMap<String, String>,
    ) -> Result<String, TranspileError> {
        if name == "children" {
            return match &node.children {
                Children::Named(_) => Err(TranspileError::new(
                    node.tag.clone(),
                    "'{children}' is not available when children are keyed; use their names",
                )),
                _ => Ok(subs.get("children").cloned().unwrap_or_default()),
            };
        }
        if let Some(index_text) = name.strip_prefix("children.") {
            let index: usize = index_text.parse().map_err(|_| {
                TranspileError::new(
                    node.tag.clone(),
                    format!("'{{{}}}' is not a valid child index", name),
                )
            })?;
            let Children::List(items) = &node.children else {
                return Err(TranspileError::new(
                    node.tag.clone(),
                    format!("'{{{}}}' needs ordered children", name),
                ));
            };
            let child = items.get(index).ok_or_else(|| {
                TranspileError::new(
                    node.tag.clone(),
                    format!("child index {} is out of range ({} children)", index, items.len()),
                )
            })?;
            return self.node(child);
        }
        subs.get(name).cloned().ok_or_else(|| {
            TranspileError::new(
                node.tag.clone(),
                format!("unresolved placeholder '{{{}}}'", name),
            )
        })
    }
}

/// A resolved condition-path value.
enum Resolved {
    Text(String),
    Json(Value),
    Exists,
}

fn resolve_node_path<'a>(
    node: &AstNode,
    mut segments: impl Iterator<Item = &'a str>,
) -> Option<Resolved> {
    let segment = match segments.next() {
        Some(segment) => segment,
        None => return Some(Resolved::Exists),
    };
    match segment {
        "tag" => terminal_text(node.tag.clone(), segments),
        "text" => match &node.text {
            Some(text) => terminal_text(text.clone(), segments),
            None => None,
        },
        "line" => terminal_json(Value::from(node.line as u64), segments),
        "col" => terminal_json(Value::from(node.col as u64), segments),
        "value" => match &node.value {
            Some(value) => terminal_json(value.clone(), segments),
            None => None,
        },
        "children" => match &node.children {
            Children::Named(named) => {
                let name = match segments.next() {
                    Some(name) => name,
                    None => return Some(Resolved::Exists),
                };
                resolve_ast_value(named.get(name)?, segments)
            }
            Children::List(items) => {
                let index: usize = segments.next()?.parse().ok()?;
                resolve_node_path(items.get(index)?, segments)
            }
            Children::None => None,
        },
        name => {
            // Named children are reachable without the `children.`
            // hop, which is where `op`/`left`/`right` live.
            let Children::Named(named) = &node.children else {
                return None;
            };
            resolve_ast_value(named.get(name)?, segments)
        }
    }
}

fn resolve_ast_value<'a>(
    value: &AstValue,
    segments: impl Iterator<Item = &'a str>,
) -> Option<Resolved> {
    match value {
        AstValue::Node(node) => resolve_node_path(node, segments),
        AstValue::List(items) => {
            let mut segments = segments;
            match segments.next() {
                None => {
                    if items.is_empty() {
                        None
                    } else {
                        Some(Resolved::Exists)
                    }
                }
                Some(index) => {
                    let index: usize = index.parse().ok()?;
                    resolve_node_path(items.get(index)?, segments)
                }
            }
        }
    }
}

fn terminal_text<'a>(
    text: String,
    mut segments: impl Iterator<Item = &'a str>,
) -> Option<Resolved> {
    if segments.next().is_some() {
        return None;
    }
    Some(Resolved::Text(text))
}

fn terminal_json<'a>(
    value: Value,
    mut segments: impl Iterator<Item = &'a str>,
) -> Option<Resolved> {
    if segments.next().is_some() {
        return None;
    }
    Some(Resolved::Json(value))
}

/// Truthiness for existence checks: absent and empty string are
/// false, everything else is true.
fn truthy(resolved: &Option<Resolved>) -> bool {
    match resolved {
        None => false,
        Some(Resolved::Exists) => true,
        Some(Resolved::Text(text)) => !text.is_empty(),
        Some(Resolved::Json(value)) => match value {
            Value::Null => false,
            Value::String(text) => !text.is_empty(),
            _ => true,
        },
    }
}

fn resolved_to_string(resolved: &Resolved) -> String {
    match resolved {
        Resolved::Text(text) => text.clone(),
        Resolved::Json(value) => stringify(value),
        Resolved::Exists => String::new(),
    }
}

/// Canonical string form of a dynamic value: numbers in decimal,
/// booleans lowercase, null empty.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                f.to_string()
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write `value` at a dot path inside the state map, creating
/// intermediate objects as needed.
fn write_state(state: &mut Value, path: &str, value: Value) {
    let mut current = state;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        let map = match current {
            Value::Object(map) => map,
            other => {
                *other = Value::Object(serde_json::Map::new());
                other.as_object_mut().expect("just created an object")
            }
        };
        if index == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

//! Grammar composition: includes, subgrammars, namespacing.
//!
//! Composition turns a root grammar document plus a base path into a
//! single unified rule table:
//!
//! 1. `includes` are merged transitively (the including file wins on
//!    conflicts; cycles are an error).
//! 2. `subgrammar` references are replaced by references to the
//!    subgrammar's start rule, qualified with a PascalCase prefix
//!    derived from the file name. The subgrammar's own rules merge
//!    into the table under that prefix.
//! 3. Inside a subgrammar, bare references to its own rules are
//!    prefixed; references it does not define are left bare and so
//!    resolve against the root table. That fallback is what lets a
//!    parent and child reference each other without looping at
//!    compile time.
//!
//! Every loaded file is cached by normalized path, so repeated
//! references load each grammar at most once.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

use crate::error::{GrammarError, GrammarErrorKind};
use crate::grammar::raw::{RawExpr, RawGrammar};
use crate::grammar::{compile, loader, validate, AstDirective, CompiledGrammar, ExprNode, Rule};

/// Compose and compile a grammar document.
pub fn compose(mut doc: RawGrammar, base_path: Option<&Path>) -> Result<CompiledGrammar, GrammarError> {
    let base = base_path.map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));

    let mut include_stack = Vec::new();
    merge_includes(&mut doc, &base, &mut include_stack)?;

    let start = doc.start_rule.clone().unwrap_or_else(|| "start".to_string());

    let mut loaded = Loaded::default();
    discover(&mut loaded, doc, base.clone())?;

    // Per-document reference rewriting, then subgrammar replacement.
    // Targets are resolved up front so the rewrite pass can borrow the
    // document mutably.
    let mut entry_points = BTreeSet::new();
    for i in 0..loaded.docs.len() {
        let local: BTreeSet<String> = loaded.docs[i].doc.rules.keys().cloned().collect();
        let namespace = loaded.docs[i].namespace.clone();
        let dir = loaded.docs[i].dir.clone();

        let mut pairs = Vec::new();
        for rule in loaded.docs[i].doc.rules.values() {
            collect_subgrammar_pairs(rule, &mut pairs);
        }
        let mut resolved: HashMap<(String, Option<String>), String> = HashMap::new();
        for (file, rule_override) in &pairs {
            let qualified = qualified_start(&loaded, &dir, file, rule_override.as_deref())?;
            resolved.insert((file.clone(), rule_override.clone()), qualified);
        }

        let doc = &mut loaded.docs[i].doc;
        for rule in doc.rules.values_mut() {
            if let Some(ns) = &namespace {
                rewrite_local_refs(rule, ns, &local);
            }
            rewrite_subgrammar_refs(rule, &resolved, &mut entry_points);
        }
    }

    // Merge everything into one table, subgrammar rules under their
    // namespace prefix.
    let mut rules: HashMap<String, Rule> = HashMap::new();
    let mut extra_roots: Vec<String> = entry_points.iter().cloned().collect();
    for entry in &loaded.docs {
        for (name, raw_rule) in &entry.doc.rules {
            let qualified = match &entry.namespace {
                Some(ns) => format!("{}_{}", ns, name),
                None => name.clone(),
            };
            rules.insert(qualified, compile_rule(raw_rule, name)?);
        }
        // A subgrammar's own start rule counts as an entry point even
        // when every reference uses an explicit `rule:` override.
        if let (Some(ns), Some(sub_start)) = (&entry.namespace, &entry.doc.start_rule) {
            extra_roots.push(format!("{}_{}", ns, sub_start));
        }
    }

    let lexer = match &loaded.docs[0].doc.lexer {
        Some(raw) => Some(compile::compile_lexer(raw)?),
        None => None,
    };

    let grammar = CompiledGrammar {
        start,
        rules,
        lexer,
        origin_file: None,
    };
    validate::validate(&grammar, &extra_roots, true)?;
    Ok(grammar)
}

/// Compose without touching the filesystem: every `subgrammar`
/// reference is replaced by its inline `placeholder` expression.
/// Reachability is not checked, because a placeholder grammar is
/// incomplete by design.
pub fn compose_placeholder(mut doc: RawGrammar) -> Result<CompiledGrammar, GrammarError> {
    for (name, rule) in doc.rules.iter_mut() {
        check_leaf_subgrammar_conflict(name, rule)?;
        replace_with_placeholders(rule);
    }

    let start = doc.start_rule.clone().unwrap_or_else(|| "start".to_string());
    let mut rules = HashMap::new();
    for (name, raw_rule) in &doc.rules {
        rules.insert(name.clone(), compile_rule(raw_rule, name)?);
    }
    let lexer = match &doc.lexer {
        Some(raw) => Some(compile::compile_lexer(raw)?),
        None => None,
    };

    let grammar = CompiledGrammar {
        start,
        rules,
        lexer,
        origin_file: None,
    };
    validate::validate(&grammar, &[], false)?;
    Ok(grammar)
}

/// A rule compiles with its `ast` block split off as the rule-level
/// directive; the body expression itself carries no directive.
fn compile_rule(raw: &RawExpr, name: &str) -> Result<Rule, GrammarError> {
    let compiled = compile::compile_expr(raw, name)?;
    Ok(Rule {
        ast: compiled.ast,
        body: ExprNode {
            kind: compiled.kind,
            ast: AstDirective::default(),
        },
    })
}

// ---------------------------------------------------------------------------
// Includes
// ---------------------------------------------------------------------------

fn merge_includes(
    doc: &mut RawGrammar,
    dir: &Path,
    stack: &mut Vec<PathBuf>,
) -> Result<(), GrammarError> {
    let includes = std::mem::take(&mut doc.includes);
    for include in includes {
        let path = normalize(&dir.join(&include));
        if stack.contains(&path) {
            return Err(GrammarError::new(
                GrammarErrorKind::IncludeCycle,
                format!("include cycle through '{}'", path.display()),
            )
            .in_file(path));
        }
        let mut included = loader::load_grammar_file(&path)?;
        stack.push(path.clone());
        let included_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        merge_includes(&mut included, &included_dir, stack)?;
        stack.pop();

        // The including file's rules win on conflict.
        for (name, rule) in included.rules {
            doc.rules.entry(name).or_insert(rule);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subgrammar discovery and rewriting
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Loaded {
    docs: Vec<LoadedDoc>,
    /// Normalized path to index into `docs`.
    by_path: HashMap<PathBuf, usize>,
}

struct LoadedDoc {
    doc: RawGrammar,
    /// Directory that relative paths inside this document resolve
    /// against.
    dir: PathBuf,
    /// `None` for the root grammar.
    namespace: Option<String>,
}

/// Breadth-first load of every grammar reachable through `subgrammar`
/// directives. Each file loads at most once.
fn discover(loaded: &mut Loaded, root: RawGrammar, root_dir: PathBuf) -> Result<(), GrammarError> {
    loaded.docs.push(LoadedDoc {
        doc: root,
        dir: root_dir,
        namespace: None,
    });

    let mut next = 0;
    while next < loaded.docs.len() {
        let mut files = Vec::new();
        {
            let entry = &loaded.docs[next];
            for (name, rule) in &entry.doc.rules {
                check_leaf_subgrammar_conflict(name, rule)?;
                collect_subgrammar_files(rule, &mut files);
            }
        }
        let dir = loaded.docs[next].dir.clone();
        for file in files {
            let path = normalize(&dir.join(&file));
            if loaded.by_path.contains_key(&path) {
                continue;
            }
            let mut doc = loader::load_grammar_file(&path).map_err(|e| GrammarError {
                kind: GrammarErrorKind::SubgrammarNotFound,
                message: format!("subgrammar '{}' could not be loaded: {}", file, e.message),
                file: Some(path.clone()),
                rule: None,
            })?;
            let sub_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
            let mut include_stack = vec![path.clone()];
            merge_includes(&mut doc, &sub_dir, &mut include_stack)?;
            let index = loaded.docs.len();
            loaded.docs.push(LoadedDoc {
                doc,
                dir: sub_dir,
                namespace: Some(namespace_of(&path)),
            });
            loaded.by_path.insert(path, index);
        }
        next += 1;
    }
    Ok(())
}

fn collect_subgrammar_files(expr: &RawExpr, out: &mut Vec<String>) {
    if let Some(sub) = &expr.subgrammar {
        out.push(sub.file.clone());
    }
    for child in expr.children() {
        collect_subgrammar_files(child, out);
    }
}

fn collect_subgrammar_pairs(expr: &RawExpr, out: &mut Vec<(String, Option<String>)>) {
    if let Some(sub) = &expr.subgrammar {
        out.push((sub.file.clone(), sub.rule.clone()));
    }
    for child in expr.children() {
        collect_subgrammar_pairs(child, out);
    }
}

/// The namespace-qualified start rule a `subgrammar` reference in
/// `dir` resolves to.
fn qualified_start(
    loaded: &Loaded,
    dir: &Path,
    file: &str,
    rule_override: Option<&str>,
) -> Result<String, GrammarError> {
    let path = normalize(&dir.join(file));
    let index = *loaded.by_path.get(&path).ok_or_else(|| {
        GrammarError::new(
            GrammarErrorKind::SubgrammarNotFound,
            format!("subgrammar '{}' was never loaded", file),
        )
    })?;
    let entry = &loaded.docs[index];
    let start = match rule_override {
        Some(rule) => rule.to_string(),
        None => entry.doc.start_rule.clone().ok_or_else(|| {
            GrammarError::new(
                GrammarErrorKind::MalformedDirective,
                format!(
                    "subgrammar '{}' has no 'start_rule' and the reference names no 'rule'",
                    file
                ),
            )
        })?,
    };
    let namespace = entry
        .namespace
        .clone()
        .unwrap_or_else(|| namespace_of(&path));
    Ok(format!("{}_{}", namespace, start))
}

/// Prefix bare references to this document's own rules. References to
/// names the document does not define stay bare and fall back to the
/// root table.
fn rewrite_local_refs(expr: &mut RawExpr, namespace: &str, local: &BTreeSet<String>) {
    if let Some(name) = &expr.rule {
        if local.contains(name) {
            expr.rule = Some(format!("{}_{}", namespace, name));
        }
    }
    for child in expr.children_mut() {
        rewrite_local_refs(child, namespace, local);
    }
}

/// Replace each `subgrammar` directive with a reference to its
/// qualified start rule, keeping the directive's `ast` block.
fn rewrite_subgrammar_refs(
    expr: &mut RawExpr,
    resolved: &HashMap<(String, Option<String>), String>,
    entry_points: &mut BTreeSet<String>,
) {
    if let Some(sub) = expr.subgrammar.take() {
        let qualified = resolved[&(sub.file.clone(), sub.rule.clone())].clone();
        entry_points.insert(qualified.clone());
        expr.rule = Some(qualified);
        return;
    }
    for child in expr.children_mut() {
        rewrite_subgrammar_refs(child, resolved, entry_points);
    }
}

fn check_leaf_subgrammar_conflict(name: &str, rule: &RawExpr) -> Result<(), GrammarError> {
    let is_leaf = rule.ast.as_ref().map(|a| a.leaf).unwrap_or(false);
    if is_leaf && rule.contains_subgrammar() {
        return Err(GrammarError::new(
            GrammarErrorKind::MalformedDirective,
            "a 'leaf' rule cannot contain a 'subgrammar' directive",
        )
        .in_rule(name));
    }
    Ok(())
}

/// Substitute each `subgrammar` directive's `placeholder` expression
/// (an empty sequence when none is given).
fn replace_with_placeholders(expr: &mut RawExpr) {
    if let Some(sub) = expr.subgrammar.take() {
        let placeholder = sub
            .placeholder
            .map(|b| *b)
            .unwrap_or_else(|| RawExpr {
                sequence: Some(Vec::new()),
                ..RawExpr::default()
            });
        overlay_placeholder(expr, placeholder);
        return;
    }
    for child in expr.children_mut() {
        replace_with_placeholders(child);
    }
}

fn overlay_placeholder(expr: &mut RawExpr, placeholder: RawExpr) {
    expr.literal = placeholder.literal;
    expr.regex = placeholder.regex;
    expr.token = placeholder.token;
    expr.rule = placeholder.rule;
    expr.sequence = placeholder.sequence;
    expr.choice = placeholder.choice;
    expr.zero_or_more = placeholder.zero_or_more;
    expr.one_or_more = placeholder.one_or_more;
    expr.optional = placeholder.optional;
    expr.positive_lookahead = placeholder.positive_lookahead;
    expr.negative_lookahead = placeholder.negative_lookahead;
    if expr.ast.is_none() {
        expr.ast = placeholder.ast;
    }
}

// ---------------------------------------------------------------------------
// Paths and namespaces
// ---------------------------------------------------------------------------

/// PascalCase namespace derived from a grammar file name:
/// `path_parser.yaml` becomes `PathParser`.
pub fn namespace_of(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.replace('-', "_")
        .split('_')
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lexical path normalization: resolves `.` and `..` without touching
/// the filesystem, so cycle detection and caching work on equal paths.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_are_pascal_case() {
        assert_eq!(namespace_of(Path::new("path_parser.yaml")), "PathParser");
        assert_eq!(namespace_of(Path::new("dir/child.yaml")), "Child");
        assert_eq!(namespace_of(Path::new("two-words.yaml")), "TwoWords");
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        assert_eq!(
            normalize(Path::new("a/b/../c/./d.yaml")),
            PathBuf::from("a/c/d.yaml")
        );
    }

    #[test]
    fn placeholder_compile_substitutes_inline_expressions() {
        let doc = RawGrammar::from_yaml(
            r#"
start_rule: main
rules:
  main:
    sequence:
      - { literal: "use ", ast: { discard: true } }
      - subgrammar:
          file: path_parser.yaml
          placeholder: { regex: '[a-z/]+' }
        ast: { name: path }
"#,
        )
        .unwrap();
        let grammar = compose_placeholder(doc).unwrap();
        assert!(grammar.rules.contains_key("main"));
    }

    #[test]
    fn placeholder_compile_defaults_to_empty_sequence() {
        let doc = RawGrammar::from_yaml(
            r#"
start_rule: main
rules:
  main:
    sequence:
      - literal: "a"
      - subgrammar: { file: other.yaml }
"#,
        )
        .unwrap();
        let grammar = compose_placeholder(doc).unwrap();
        assert!(grammar.rules.contains_key("main"));
    }

    #[test]
    fn leaf_rules_cannot_contain_subgrammars() {
        let doc = RawGrammar::from_yaml(
            r#"
start_rule: main
rules:
  main:
    sequence:
      - subgrammar: { file: other.yaml }
    ast: { leaf: true }
"#,
        )
        .unwrap();
        let err = compose_placeholder(doc).unwrap_err();
        assert_eq!(err.kind, GrammarErrorKind::MalformedDirective);
        assert_eq!(err.rule.as_deref(), Some("main"));
    }
}

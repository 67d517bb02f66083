//! Grammar composition across files: includes, subgrammars with
//! namespacing, parent fallback for unresolved child references, and
//! placeholder compilation.

use koine::{AstValue, GrammarErrorKind, Parser, RawGrammar};
use std::path::Path;

fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/grammars")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

#[test]
fn subgrammar_rules_are_namespaced_and_parent_fallback_links_cycles() {
    let parser = Parser::from_file(fixture("parent.yaml")).unwrap();
    let ast = match parser.parse("a_start b_start parent_text").unwrap() {
        Some(AstValue::Node(node)) => node,
        other => panic!("expected a node, got {:?}", other),
    };
    assert_eq!(ast.tag, "start");

    // The subgrammar's start rule landed under its PascalCase prefix.
    let child = ast.named("child").expect("child slot");
    assert_eq!(child.tag, "Child_c_start");

    // `marker` resolved inside the child's own (prefixed) table.
    let first = child.named("first").expect("first slot");
    assert_eq!(first.tag, "Child_marker");
    assert_eq!(first.text.as_deref(), Some("a_start"));

    // `parent_only_rule` is not defined by the child; the bare
    // reference fell back to the parent's table.
    let second = child.named("second").expect("second slot");
    assert_eq!(second.tag, "parent_only_rule");
    assert_eq!(second.text.as_deref(), Some("b_start"));

    let rest = ast.named("rest").expect("rest slot");
    assert_eq!(rest.text.as_deref(), Some("parent_text"));
}

#[test]
fn qualified_rules_exist_in_the_compiled_table() {
    let parser = Parser::from_file(fixture("parent.yaml")).unwrap();
    let grammar = parser.grammar();
    assert!(grammar.rules.contains_key("Child_c_start"));
    assert!(grammar.rules.contains_key("Child_marker"));
    assert!(grammar.rules.contains_key("parent_only_rule"));
    assert!(!grammar.rules.contains_key("c_start"));
}

#[test]
fn includes_merge_rules_from_other_files() {
    let parser = Parser::from_file(fixture("main_with_include.yaml")).unwrap();
    let ast = match parser.parse("hello world").unwrap() {
        Some(AstValue::Node(node)) => node,
        other => panic!("expected a node, got {:?}", other),
    };
    let who = ast.named("who").expect("who slot");
    assert_eq!(who.text.as_deref(), Some("world"));
}

#[test]
fn the_including_file_wins_rule_conflicts() {
    let parser = Parser::from_file(fixture("override_main.yaml")).unwrap();
    // The includer's uppercase `word` shadows the included one.
    assert!(parser.parse("hello WORLD").is_ok());
    assert!(parser.parse("hello world").is_err());
}

#[test]
fn include_cycles_are_detected() {
    let err = koine::compile_grammar_from_file(fixture("cycle_a.yaml")).unwrap_err();
    assert_eq!(err.kind, GrammarErrorKind::IncludeCycle);
}

#[test]
fn missing_subgrammar_files_are_reported() {
    let err = koine::compile_grammar_from_file(fixture("missing_sub.yaml")).unwrap_err();
    assert_eq!(err.kind, GrammarErrorKind::SubgrammarNotFound);
}

#[test]
fn placeholder_compilation_needs_no_files() {
    let doc = RawGrammar::from_yaml(
        r#"
start_rule: use_statement
rules:
  use_statement:
    sequence:
      - { literal: "use ", ast: { discard: true } }
      - subgrammar:
          file: path_parser.yaml
          placeholder: { regex: '[a-z/]+' }
        ast: { name: path }
"#,
    )
    .unwrap();
    let grammar = koine::compile_placeholder(doc).unwrap();
    let parser = Parser::new(grammar);
    let ast = match parser.parse("use some/module").unwrap() {
        Some(AstValue::Node(node)) => node,
        other => panic!("expected a node, got {:?}", other),
    };
    let path = ast.named("path").expect("path slot");
    assert_eq!(path.text.as_deref(), Some("some/module"));
}

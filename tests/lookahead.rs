//! Lookahead-based disambiguation of overlapping command forms.

use koine::{AstValue, Children, KoineError, Parser, RawGrammar};

const COMMANDS: &str = r#"
start_rule: command
rules:
  command:
    ast: { promote: true }
    choice:
      - { rule: clone_to_statement }
      - { rule: clone_statement }
  clone_to_statement:
    ast: { tag: clone_to }
    sequence:
      - { literal: "CLONE ", ast: { discard: true } }
      - positive_lookahead:
          sequence:
            - { rule: path }
            - { literal: " TO " }
      - { rule: path, ast: { name: source } }
      - { literal: " TO ", ast: { discard: true } }
      - { rule: path, ast: { name: destination } }
  clone_statement:
    ast: { tag: clone }
    sequence:
      - { literal: "CLONE ", ast: { discard: true } }
      - { rule: path, ast: { name: source } }
      - negative_lookahead: { literal: " TO " }
  path:
    regex: '/[A-Za-z0-9_/]+'
"#;

fn parser() -> Parser {
    let grammar =
        koine::compile_grammar(RawGrammar::from_yaml(COMMANDS).unwrap(), None).unwrap();
    Parser::new(grammar)
}

#[test]
fn clone_with_target_takes_the_guarded_branch() {
    let ast = match parser().parse("CLONE /a/b TO /c/d").unwrap() {
        Some(AstValue::Node(node)) => node,
        other => panic!("expected a node, got {:?}", other),
    };
    assert_eq!(ast.tag, "clone_to");
    assert_eq!(ast.text.as_deref(), Some("CLONE /a/b TO /c/d"));
    assert_eq!((ast.line, ast.col), (1, 1));

    let source = ast.named("source").expect("source child");
    assert_eq!(source.tag, "path");
    assert_eq!(source.text.as_deref(), Some("/a/b"));
    assert_eq!((source.line, source.col), (1, 7));

    let destination = ast.named("destination").expect("destination child");
    assert_eq!(destination.text.as_deref(), Some("/c/d"));
    assert_eq!((destination.line, destination.col), (1, 15));
}

#[test]
fn clone_without_target_takes_the_plain_branch() {
    let ast = match parser().parse("CLONE /another/repo").unwrap() {
        Some(AstValue::Node(node)) => node,
        other => panic!("expected a node, got {:?}", other),
    };
    assert_eq!(ast.tag, "clone");
    let source = ast.named("source").expect("source child");
    assert_eq!(source.text.as_deref(), Some("/another/repo"));
    assert_eq!((source.line, source.col), (1, 7));
    match &ast.children {
        Children::Named(children) => assert!(!children.contains_key("destination")),
        other => panic!("expected keyed children, got {:?}", other),
    }
}

#[test]
fn dangling_to_fails_gracefully() {
    let err = match parser().parse("CLONE /bad/repo TO") {
        Err(KoineError::Parse(err)) => err,
        other => panic!("expected a parse error, got {:?}", other.map(|_| ())),
    };
    assert!(err.message.contains("Syntax error"));
    assert_eq!(err.line, 1);
}

#[test]
fn lookaheads_leave_no_trace_in_the_ast() {
    let ast = match parser().parse("CLONE /a/b TO /c/d").unwrap() {
        Some(AstValue::Node(node)) => node,
        other => panic!("expected a node, got {:?}", other),
    };
    match &ast.children {
        Children::Named(children) => {
            assert_eq!(children.len(), 2, "only the named children survive");
        }
        other => panic!("expected keyed children, got {:?}", other),
    }
}

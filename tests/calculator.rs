//! End-to-end calculator scenarios: precedence, associativity, and
//! LISP transpilation.

use koine::{AstNode, AstValue, Children, Parser, RawGrammar, Transpiler};
use serde_json::json;
use std::collections::BTreeMap;

const CALCULATOR: &str = r#"
start_rule: expression
rules:
  expression: { rule: additive }
  additive:
    ast: { structure: left_associative_op }
    sequence:
      - { rule: multiplicative }
      - zero_or_more:
          sequence:
            - { rule: _ }
            - { rule: add_op }
            - { rule: _ }
            - { rule: multiplicative }
  multiplicative:
    ast: { structure: left_associative_op }
    sequence:
      - { rule: power }
      - zero_or_more:
          sequence:
            - { rule: _ }
            - { rule: mul_op }
            - { rule: _ }
            - { rule: power }
  power:
    ast: { structure: right_associative_op }
    sequence:
      - { rule: primary }
      - optional:
          sequence:
            - { rule: _ }
            - { rule: power_op }
            - { rule: _ }
            - { rule: power }
  primary:
    ast: { promote: true }
    choice:
      - { rule: number }
      - { rule: parens }
  parens:
    ast: { promote: true }
    sequence:
      - { literal: "(", ast: { discard: true } }
      - { rule: expression }
      - { literal: ")", ast: { discard: true } }
  number:
    regex: '-?\d+(\.\d+)?'
    ast: { type: number }
  add_op: { regex: '[+-]' }
  mul_op: { regex: '[*/]' }
  power_op: { literal: "^" }
  _: { regex: '[ \t]*', ast: { discard: true } }
"#;

const TO_LISP: &str = r#"
rules:
  binary_op: { template: "({op} {left} {right})" }
  number: { use: value }
  add_op:
    cases:
      - if: { path: "node.text", equals: "+" }
        then: "add"
      - default: "sub"
  mul_op:
    cases:
      - if: { path: "node.text", equals: "*" }
        then: "mul"
      - default: "div"
  power_op: { value: "pow" }
"#;

fn parser() -> Parser {
    let grammar = koine::compile_grammar(RawGrammar::from_yaml(CALCULATOR).unwrap(), None)
        .expect("calculator grammar compiles");
    Parser::new(grammar)
}

fn transpiler() -> Transpiler {
    Transpiler::from_yaml(TO_LISP).unwrap()
}

fn number(text: &str, col: usize, value: i64) -> AstNode {
    let mut node = AstNode::leaf("number", text, 1, col);
    node.value = Some(json!(value));
    node
}

fn op(tag: &str, text: &str, col: usize) -> AstNode {
    AstNode::leaf(tag, text, 1, col)
}

fn binary(op: AstNode, left: AstNode, right: AstNode) -> AstNode {
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

fn parse_node(text: &str) -> AstNode {
    match parser().parse(text).expect("parse succeeds") {
        Some(AstValue::Node(node)) => node,
        other => panic!("expected a single root node, got {:?}", other),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let ast = parse_node("1 + 2 * 3");
    let expected = binary(
        op("add_op", "+", 3),
        number("1", 1, 1),
        binary(op("mul_op", "*", 7), number("2", 5, 2), number("3", 9, 3)),
    );
    assert_eq!(ast, expected);
}

#[test]
fn subtraction_is_left_associative() {
    let ast = parse_node("8 - 2 - 1");
    let expected = binary(
        op("add_op", "-", 7),
        binary(op("add_op", "-", 3), number("8", 1, 8), number("2", 5, 2)),
        number("1", 9, 1),
    );
    assert_eq!(ast, expected);
}

#[test]
fn power_is_right_associative() {
    let ast = parse_node("2 ^ 3 ^ 2");
    let expected = binary(
        op("power_op", "^", 3),
        number("2", 1, 2),
        binary(op("power_op", "^", 7), number("3", 5, 3), number("2", 9, 2)),
    );
    assert_eq!(ast, expected);
}

#[test]
fn parentheses_group_before_power() {
    let ast = parse_node("(2 * 3) ^ 5");
    let expected = binary(
        op("power_op", "^", 9),
        binary(op("mul_op", "*", 4), number("2", 2, 2), number("3", 6, 3)),
        number("5", 11, 5),
    );
    assert_eq!(ast, expected);
}

#[test]
fn transpiles_to_lisp() {
    let cases = [
        ("1 + 2 * 3", "(add 1 (mul 2 3))"),
        ("8 - 2 - 1", "(sub (sub 8 2) 1)"),
        ("2 ^ 3 ^ 2", "(pow 2 (pow 3 2))"),
        ("(2 * 3) ^ 5", "(pow (mul 2 3) 5)"),
        ("((2 + 3) * 4) ^ 5", "(pow (mul (add 2 3) 4) 5)"),
    ];
    let parser = parser();
    let transpiler = transpiler();
    for (input, expected) in cases {
        let ast = parser.parse(input).unwrap().expect("non-empty AST");
        let out = transpiler.transpile_value(&ast).unwrap();
        assert_eq!(out, expected, "for input {:?}", input);
    }
}

#[test]
fn float_and_integral_number_values() {
    let ast = parse_node("2.5 + 3.0");
    match &ast.children {
        Children::Named(children) => {
            let left = children["left"].as_node().unwrap();
            let right = children["right"].as_node().unwrap();
            assert_eq!(left.value, Some(json!(2.5)));
            // An integral float coerces to an integer.
            assert_eq!(right.value, Some(json!(3)));
        }
        other => panic!("expected keyed children, got {:?}", other),
    }
}

#[test]
fn single_operand_produces_no_operator_node() {
    let ast = parse_node("42");
    assert_eq!(ast.tag, "number");
    assert_eq!(ast.value, Some(json!(42)));
}

#[test]
fn repeated_parses_are_deterministic() {
    let parser = parser();
    let first = parser.parse("(1 + 2) * 3 ^ 4").unwrap();
    let second = parser.parse("(1 + 2) * 3 ^ 4").unwrap();
    assert_eq!(first, second);
}

#[test]
fn malformed_input_reports_a_position() {
    let err = match parser().parse("1 + ") {
        Err(koine::KoineError::Parse(err)) => err,
        other => panic!("expected a parse error, got {:?}", other.map(|_| ())),
    };
    assert_eq!(err.line, 1);
    assert!(err.col >= 3);
    assert!(err.message.starts_with("Syntax error"));
}

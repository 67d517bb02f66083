//! Property-based tests for the parser and transpiler using
//! generated inputs.

use koine::{AstNode, AstValue, Children, Parser, RawGrammar, Transpiler};
use proptest::prelude::*;

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
      - { rule: number }
      - zero_or_more:
          sequence:
            - { rule: _ }
            - { rule: mul_op }
            - { rule: _ }
            - { rule: number }
  number:
    regex: '\d+'
    ast: { type: number }
  add_op: { regex: '[+-]' }
  mul_op: { regex: '[*/]' }
  _: { regex: '[ ]*', ast: { discard: true } }
"#;

fn calculator() -> Parser {
    Parser::new(
        koine::compile_grammar(RawGrammar::from_yaml(CALCULATOR).unwrap(), None).unwrap(),
    )
}

/// `a op b op c ...` rendered with single spaces.
fn chain(operands: &[u32], ops: &[char]) -> String {
    let mut out = operands[0].to_string();
    for (value, op) in operands[1..].iter().zip(ops.iter()) {
        out.push_str(&format!(" {} {}", op, value));
    }
    out
}

fn walk(node: &AstNode, visit: &mut impl FnMut(&AstNode)) {
    visit(node);
    match &node.children {
        Children::None => {}
        Children::List(items) => {
            for item in items {
                walk(item, visit);
            }
        }
        Children::Named(named) => {
            for value in named.values() {
                match value {
                    AstValue::Node(child) => walk(child, visit),
                    AstValue::List(items) => {
                        for item in items {
                            walk(item, visit);
                        }
                    }
                }
            }
        }
    }
}

/// Depth of the `left` spine of a binary_op tree.
fn left_depth(node: &AstNode) -> usize {
    if node.tag != "binary_op" {
        return 0;
    }
    1 + node.named("left").map(left_depth).unwrap_or(0)
}

proptest! {
    #[test]
    fn parsing_is_deterministic(
        operands in prop::collection::vec(0u32..1000, 1..6),
        ops in prop::collection::vec(prop::sample::select(vec!['+', '-', '*', '/']), 5),
    ) {
        let input = chain(&operands, &ops);
        let parser = calculator();
        let first = parser.parse(&input).unwrap();
        let second = parser.parse(&input).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn leaf_text_matches_the_source_slice(
        operands in prop::collection::vec(0u32..1000, 1..6),
        ops in prop::collection::vec(prop::sample::select(vec!['+', '-', '*', '/']), 5),
    ) {
        let input = chain(&operands, &ops);
        let chars: Vec<char> = input.chars().collect();
        let ast = calculator().parse(&input).unwrap().expect("non-empty AST");
        if let AstValue::Node(root) = &ast {
            let mut ok = true;
            walk(root, &mut |node| {
                if let Some(text) = &node.text {
                    // Single-line input: the column gives the offset.
                    let offset = node.col - 1;
                    let slice: String =
                        chars[offset..offset + text.chars().count()].iter().collect();
                    if slice != *text {
                        ok = false;
                    }
                }
            });
            prop_assert!(ok, "a leaf's text diverged from its source slice");
        }
    }

    #[test]
    fn discarded_rules_never_reach_the_ast(
        operands in prop::collection::vec(0u32..1000, 1..6),
        ops in prop::collection::vec(prop::sample::select(vec!['+', '-', '*', '/']), 5),
    ) {
        let input = chain(&operands, &ops);
        let ast = calculator().parse(&input).unwrap().expect("non-empty AST");
        if let AstValue::Node(root) = &ast {
            walk(root, &mut |node| {
                assert_ne!(node.tag, "_", "a discarded rule appeared in the AST");
            });
        }
    }

    #[test]
    fn same_precedence_chains_fold_left(
        operands in prop::collection::vec(0u32..100, 2..6),
    ) {
        let ops: Vec<char> = vec!['-'; operands.len() - 1];
        let input = chain(&operands, &ops);
        let ast = calculator().parse(&input).unwrap().expect("non-empty AST");
        let AstValue::Node(root) = ast else { panic!("expected a node") };
        // n operands fold into a left spine of n-1 operator nodes.
        prop_assert_eq!(left_depth(&root), operands.len() - 1);
        // The rightmost operand sits directly at the top.
        let top_right = root.named("right").expect("right child");
        let expected = operands.last().unwrap().to_string();
        prop_assert_eq!(top_right.text.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn transpiler_fallback_emits_value_or_text(
        value in 0i64..10_000,
        word in "[a-z]{1,12}",
    ) {
        let transpiler = Transpiler::from_yaml("rules: {}").unwrap();
        let with_value = AstNode::leaf("mystery", value.to_string(), 1, 1)
            .with_value(serde_json::json!(value));
        prop_assert_eq!(
            transpiler.transpile(&with_value).unwrap(),
            value.to_string()
        );
        let with_text = AstNode::leaf("mystery", word.clone(), 1, 1);
        prop_assert_eq!(transpiler.transpile(&with_text).unwrap(), word);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn indents_and_dedents_always_balance(
        levels in prop::collection::vec(0usize..4, 1..12),
    ) {
        let grammar = koine::compile_grammar(
            RawGrammar::from_yaml(
                r#"
start_rule: doc
lexer:
  tokens:
    - { regex: '\n[ ]*', action: handle_indent }
    - { regex: '[a-z]+', token: WORD }
rules:
  doc:
    one_or_more:
      choice:
        - { token: WORD }
        - { token: NEWLINE, ast: { discard: true } }
        - { token: INDENT, ast: { discard: true } }
        - { token: DEDENT, ast: { discard: true } }
"#,
            )
            .unwrap(),
            None,
        )
        .unwrap();
        let lexer = grammar.lexer.as_ref().unwrap();

        // The first line starts at level zero; successive lines may
        // indent by at most one level but dedent any number of
        // levels. Documents of that shape always lex cleanly.
        let mut clamped = Vec::new();
        let mut previous = 0usize;
        for (i, &level) in levels.iter().enumerate() {
            let level = if i == 0 { 0 } else { level.min(previous + 1) };
            clamped.push(level);
            previous = level;
        }
        let source: String = clamped
            .iter()
            .enumerate()
            .map(|(i, level)| {
                let prefix = if i == 0 { "" } else { "\n" };
                format!("{}{}word", prefix, "  ".repeat(*level))
            })
            .collect();

        let tokens = lexer.tokenize(&source).unwrap();
        let indents = tokens.iter().filter(|t| t.kind == "INDENT").count();
        let dedents = tokens.iter().filter(|t| t.kind == "DEDENT").count();
        prop_assert_eq!(indents, dedents);
    }
}

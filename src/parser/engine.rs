//! The PEG recognizer.
//!
//! One interpreter walks `ExprKind` over either the character stream
//! or the token stream. Failure is a first-class return value, never
//! an error: the recognizer rewinds and tries the next alternative,
//! and only the entry point in `parser::mod` turns a root-level
//! failure into a user-visible `ParseError`. While backtracking, the
//! farthest failure position (with the terminals expected there and
//! the rule stack) is retained for reporting. Failures inside
//! lookaheads are not recorded: a failed lookahead is normal control
//! flow.

use std::collections::BTreeSet;

use crate::grammar::{CompiledGrammar, ExprKind, ExprNode};
use crate::lexer::Token;
use crate::parser::fragment::Fragment;

/// The recognizer's input: characters or tokens, never both.
pub(crate) enum Input<'a> {
    Chars {
        text: &'a str,
        /// `byte_index[i]` is the byte offset of character `i`, with a
        /// final entry for the end of the text.
        byte_index: Vec<usize>,
    },
    Tokens { tokens: &'a [Token] },
}

impl<'a> Input<'a> {
    pub fn chars(text: &'a str) -> Self {
        let mut byte_index: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        byte_index.push(text.len());
        Input::Chars { text, byte_index }
    }

    pub fn tokens(tokens: &'a [Token]) -> Self {
        Input::Tokens { tokens }
    }

    /// Total number of cursor positions.
    pub fn len(&self) -> usize {
        match self {
            Input::Chars { byte_index, .. } => byte_index.len() - 1,
            Input::Tokens { tokens } => tokens.len(),
        }
    }

    /// The source slice between two character positions. Only
    /// meaningful in character mode.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        match self {
            Input::Chars { text, byte_index } => &text[byte_index[start]..byte_index[end]],
            Input::Tokens { .. } => "",
        }
    }

    pub fn token_at(&self, pos: usize) -> Option<&'a Token> {
        match self {
            Input::Tokens { tokens } => tokens.get(pos),
            Input::Chars { .. } => None,
        }
    }
}

/// The farthest failure seen so far.
#[derive(Debug, Default, Clone)]
pub(crate) struct Farthest {
    pub at: usize,
    pub expected: BTreeSet<String>,
    pub rule_stack: Vec<String>,
    pub any: bool,
}

pub(crate) struct Recognizer<'g, 'a> {
    grammar: &'g CompiledGrammar,
    input: &'a Input<'a>,
    rule_stack: Vec<&'g str>,
    lookahead_depth: usize,
    pub farthest: Farthest,
}

impl<'g, 'a> Recognizer<'g, 'a> {
    pub fn new(grammar: &'g CompiledGrammar, input: &'a Input<'a>) -> Self {
        Recognizer {
            grammar,
            input,
            rule_stack: Vec::new(),
            lookahead_depth: 0,
            farthest: Farthest::default(),
        }
    }

    /// Recognize `rule` at position 0. On success the returned
    /// fragment is the rule application; the cursor end is inside it.
    pub fn recognize(&mut self, rule: &'g str) -> Option<Fragment> {
        let body = &self.grammar.rules[rule].body;
        self.rule_stack.push(rule);
        let result = self.eval(body, 0).map(|(inner, end)| Fragment::Rule {
            name: rule.to_string(),
            start: 0,
            end,
            inner: Box::new(inner),
        });
        self.rule_stack.pop();
        result
    }

    fn eval(&mut self, expr: &'g ExprNode, pos: usize) -> Option<(Fragment, usize)> {
        match &expr.kind {
            ExprKind::Literal(text) => self.match_literal(text, pos),
            ExprKind::Regex(pattern) => match self.input {
                Input::Chars { text, byte_index } => {
                    let rest = &text[byte_index[pos]..];
                    match pattern.match_len(rest) {
                        Some(byte_len) => {
                            let advance = rest[..byte_len].chars().count();
                            Some((
                                Fragment::Terminal {
                                    start: pos,
                                    end: pos + advance,
                                },
                                pos + advance,
                            ))
                        }
                        None => {
                            self.fail(pos, format!("/{}/", pattern.source));
                            None
                        }
                    }
                }
                Input::Tokens { .. } => {
                    self.fail(pos, format!("/{}/", pattern.source));
                    None
                }
            },
            ExprKind::Token(kind) => match self.input.token_at(pos) {
                Some(token) if token.kind == *kind => Some((
                    Fragment::Terminal {
                        start: pos,
                        end: pos + 1,
                    },
                    pos + 1,
                )),
                _ => {
                    self.fail(pos, kind.clone());
                    None
                }
            },
            ExprKind::Ref(name) => {
                let rule = &self.grammar.rules[name];
                self.rule_stack.push(name);
                let result = self.eval(&rule.body, pos);
                self.rule_stack.pop();
                let (inner, end) = result?;
                Some((
                    Fragment::Rule {
                        name: name.clone(),
                        start: pos,
                        end,
                        inner: Box::new(inner),
                    },
                    end,
                ))
            }
            ExprKind::Sequence(parts) => {
                let mut cursor = pos;
                let mut fragments = Vec::with_capacity(parts.len());
                for part in parts {
                    let (fragment, next) = self.eval(part, cursor)?;
                    fragments.push(fragment);
                    cursor = next;
                }
                Some((
                    Fragment::Seq {
                        start: pos,
                        end: cursor,
                        parts: fragments,
                    },
                    cursor,
                ))
            }
            ExprKind::Choice(alts) => {
                for (alt, candidate) in alts.iter().enumerate() {
                    if let Some((fragment, end)) = self.eval(candidate, pos) {
                        return Some((
                            Fragment::Choice {
                                start: pos,
                                end,
                                alt,
                                inner: Box::new(fragment),
                            },
                            end,
                        ));
                    }
                }
                None
            }
            ExprKind::ZeroOrMore(inner) => {
                let (items, end) = self.repeat(inner, pos);
                Some((
                    Fragment::Repeat {
                        start: pos,
                        end,
                        items,
                    },
                    end,
                ))
            }
            ExprKind::OneOrMore(inner) => {
                let (first, after_first) = self.eval(inner, pos)?;
                let mut items = vec![first];
                let end = if after_first > pos {
                    let (rest, end) = self.repeat(inner, after_first);
                    items.extend(rest);
                    end
                } else {
                    // The first repetition matched without consuming
                    // anything; stop before looping forever.
                    after_first
                };
                Some((
                    Fragment::Repeat {
                        start: pos,
                        end,
                        items,
                    },
                    end,
                ))
            }
            ExprKind::Optional(inner) => match self.eval(inner, pos) {
                Some((fragment, end)) => Some((
                    Fragment::Opt {
                        start: pos,
                        end,
                        inner: Some(Box::new(fragment)),
                    },
                    end,
                )),
                None => Some((
                    Fragment::Opt {
                        start: pos,
                        end: pos,
                        inner: None,
                    },
                    pos,
                )),
            },
            ExprKind::PosLookahead(inner) => {
                self.lookahead_depth += 1;
                let matched = self.eval(inner, pos).is_some();
                self.lookahead_depth -= 1;
                if matched {
                    Some((Fragment::Empty { at: pos }, pos))
                } else {
                    None
                }
            }
            ExprKind::NegLookahead(inner) => {
                self.lookahead_depth += 1;
                let matched = self.eval(inner, pos).is_some();
                self.lookahead_depth -= 1;
                if matched {
                    None
                } else {
                    Some((Fragment::Empty { at: pos }, pos))
                }
            }
        }
    }

    /// Greedy repetition. An iteration that succeeds without
    /// consuming input ends the loop.
    fn repeat(&mut self, inner: &'g ExprNode, pos: usize) -> (Vec<Fragment>, usize) {
        let mut items = Vec::new();
        let mut cursor = pos;
        while let Some((fragment, next)) = self.eval(inner, cursor) {
            if next == cursor {
                break;
            }
            items.push(fragment);
            cursor = next;
        }
        (items, cursor)
    }

    fn match_literal(&mut self, text: &str, pos: usize) -> Option<(Fragment, usize)> {
        match self.input {
            Input::Chars {
                text: source,
                byte_index,
            } => {
                let rest = &source[byte_index[pos]..];
                if rest.starts_with(text) {
                    let advance = text.chars().count();
                    Some((
                        Fragment::Terminal {
                            start: pos,
                            end: pos + advance,
                        },
                        pos + advance,
                    ))
                } else {
                    self.fail(pos, format!("literal \"{}\"", text));
                    None
                }
            }
            Input::Tokens { .. } => {
                self.fail(pos, format!("literal \"{}\"", text));
                None
            }
        }
    }

    /// Record a terminal failure for error reporting, unless we are
    /// inside a lookahead.
    fn fail(&mut self, pos: usize, expected: String) {
        if self.lookahead_depth > 0 {
            return;
        }
        if !self.farthest.any || pos > self.farthest.at {
            self.farthest.any = true;
            self.farthest.at = pos;
            self.farthest.expected.clear();
            self.farthest.expected.insert(expected);
            self.farthest.rule_stack =
                self.rule_stack.iter().map(|r| r.to_string()).collect();
        } else if pos == self.farthest.at {
            self.farthest.expected.insert(expected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::raw::RawGrammar;
    use crate::grammar::CompiledGrammar;

    fn grammar(yaml: &str) -> CompiledGrammar {
        CompiledGrammar::compile(RawGrammar::from_yaml(yaml).unwrap(), None).unwrap()
    }

    fn recognize(grammar: &CompiledGrammar, text: &str) -> Option<(Fragment, usize)> {
        let input = Input::chars(text);
        let mut recognizer = Recognizer::new(grammar, &input);
        let fragment = recognizer.recognize(&grammar.start)?;
        let end = fragment.end();
        Some((fragment, end))
    }

    #[test]
    fn ordered_choice_commits_to_the_first_match() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    choice:
      - { literal: "ab" }
      - { literal: "abc" }
"#,
        );
        // PEG semantics: "ab" wins even though "abc" would be longer.
        let (fragment, end) = recognize(&g, "abc").unwrap();
        assert_eq!(end, 2);
        match fragment {
            Fragment::Rule { inner, .. } => match *inner {
                Fragment::Choice { alt, .. } => assert_eq!(alt, 0),
                other => panic!("unexpected fragment: {:?}", other),
            },
            other => panic!("unexpected fragment: {:?}", other),
        }
    }

    #[test]
    fn sequence_rewinds_entirely_on_failure() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    choice:
      - sequence:
          - { literal: "a" }
          - { literal: "x" }
      - { literal: "ab" }
"#,
        );
        let (_, end) = recognize(&g, "ab").unwrap();
        assert_eq!(end, 2);
    }

    #[test]
    fn greedy_repetition_consumes_everything_it_can() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    one_or_more: { regex: '[ab]' }
"#,
        );
        let (_, end) = recognize(&g, "abba!").unwrap();
        assert_eq!(end, 4);
    }

    #[test]
    fn empty_repetition_does_not_loop() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    sequence:
      - zero_or_more: { regex: '[a-z]*' }
      - { literal: "!" }
"#,
        );
        let (_, end) = recognize(&g, "abc!").unwrap();
        assert_eq!(end, 4);
    }

    #[test]
    fn lookaheads_do_not_consume() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    sequence:
      - positive_lookahead: { literal: "ab" }
      - { regex: '[a-z]+' }
"#,
        );
        let (_, end) = recognize(&g, "abc").unwrap();
        assert_eq!(end, 3);
    }

    #[test]
    fn negative_lookahead_blocks_a_match() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    sequence:
      - negative_lookahead: { literal: "x" }
      - { regex: '[a-z]+' }
"#,
        );
        assert!(recognize(&g, "xyz").is_none());
        assert!(recognize(&g, "abc").is_some());
    }

    #[test]
    fn farthest_failure_wins_over_the_last_failure() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    choice:
      - sequence:
          - { literal: "aaa" }
          - { literal: "b" }
      - { literal: "z" }
"#,
        );
        let input = Input::chars("aaac");
        let mut recognizer = Recognizer::new(&g, &input);
        assert!(recognizer.recognize("main").is_none());
        // The deep failure at offset 3 is reported, not the outer
        // choice's failure at offset 0.
        assert_eq!(recognizer.farthest.at, 3);
        assert!(recognizer
            .farthest
            .expected
            .contains("literal \"b\""));
    }

    #[test]
    fn failures_inside_lookaheads_are_not_recorded() {
        let g = grammar(
            r#"
start_rule: main
rules:
  main:
    sequence:
      - negative_lookahead: { literal: "xyzzy" }
      - { literal: "a" }
"#,
        );
        let input = Input::chars("b");
        let mut recognizer = Recognizer::new(&g, &input);
        assert!(recognizer.recognize("main").is_none());
        assert_eq!(recognizer.farthest.at, 0);
        assert!(recognizer.farthest.expected.contains("literal \"a\""));
        assert_eq!(recognizer.farthest.expected.len(), 1);
    }
}

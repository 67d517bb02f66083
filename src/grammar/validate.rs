//! Static validation of a compiled grammar.
//!
//! Runs after composition, before the grammar is handed to callers:
//! reference resolution, reachability from the start rule, terminal
//! mode consistency, structure-directive shape checks, the
//! named-sequence consistency check, and the always-empty-rule lint.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::error::{GrammarError, GrammarErrorKind};
use crate::grammar::{CompiledGrammar, ExprKind, ExprNode, Structure};

/// Validate `grammar`. `extra_roots` are additional reachability
/// roots (subgrammar entry points). `full_lint` is off for
/// placeholder compilation, where the grammar is incomplete by
/// design.
pub fn validate(
    grammar: &CompiledGrammar,
    extra_roots: &[String],
    full_lint: bool,
) -> Result<(), GrammarError> {
    if !grammar.rules.contains_key(&grammar.start) {
        return Err(GrammarError::new(
            GrammarErrorKind::UnknownRule,
            format!("start rule '{}' is not defined", grammar.start),
        ));
    }

    for (name, rule) in &grammar.rules {
        check_expr(grammar, name, &rule.body)?;
        check_structure_shape(name, &rule.ast.structure, &rule.body)?;
    }

    if full_lint {
        check_reachability(grammar, extra_roots)?;
        check_always_empty(grammar)?;
    }

    Ok(())
}

/// Per-expression checks: reference resolution, terminal mode,
/// inline structure directives, named-sequence consistency.
fn check_expr(grammar: &CompiledGrammar, rule: &str, expr: &ExprNode) -> Result<(), GrammarError> {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Regex(_) => {
            if grammar.lexer.is_some() {
                return Err(GrammarError::new(
                    GrammarErrorKind::BadStructure,
                    "'literal' and 'regex' are not supported when a lexer is defined; use 'token' instead",
                )
                .in_rule(rule));
            }
        }
        ExprKind::Token(name) => match &grammar.lexer {
            None => {
                return Err(GrammarError::new(
                    GrammarErrorKind::BadStructure,
                    "'token' requires the grammar to define a lexer",
                )
                .in_rule(rule));
            }
            Some(lexer) => {
                if !lexer.token_names().contains(&name.as_str()) {
                    return Err(GrammarError::new(
                        GrammarErrorKind::UnknownRule,
                        format!("token '{}' is not defined by the lexer", name),
                    )
                    .in_rule(rule));
                }
            }
        },
        ExprKind::Ref(target) => {
            if !grammar.rules.contains_key(target) {
                return Err(GrammarError::new(
                    GrammarErrorKind::UnknownRule,
                    format!("rule '{}' is not defined", target),
                )
                .in_rule(rule));
            }
        }
        ExprKind::Sequence(parts) => {
            check_named_sequence(grammar, rule, parts)?;
        }
        _ => {}
    }

    if expr.ast.structure.is_some() {
        check_structure_shape(rule, &expr.ast.structure, expr)?;
    }

    for child in expr.children() {
        check_expr(grammar, rule, child)?;
    }
    Ok(())
}

/// In a sequence where any part is named, every part must be named,
/// a lookahead, or discarded. Anything else would survive shaping
/// with nowhere to go in the keyed children map.
fn check_named_sequence(
    grammar: &CompiledGrammar,
    rule: &str,
    parts: &[ExprNode],
) -> Result<(), GrammarError> {
    if !parts.iter().any(|p| p.ast.name.is_some()) {
        return Ok(());
    }
    for (index, part) in parts.iter().enumerate() {
        let accounted_for = part.ast.name.is_some()
            || part.is_lookahead()
            || part_is_discarded(grammar, part);
        if !accounted_for {
            return Err(GrammarError::new(
                GrammarErrorKind::BadStructure,
                format!(
                    "sequence part #{} has no 'name' but its siblings are named; name it or discard it",
                    index
                ),
            )
            .in_rule(rule));
        }
    }
    Ok(())
}

fn part_is_discarded(grammar: &CompiledGrammar, part: &ExprNode) -> bool {
    if part.ast.discard {
        return true;
    }
    match &part.kind {
        ExprKind::Ref(target) => grammar
            .rules
            .get(target)
            .map(|r| r.ast.discard)
            .unwrap_or(false),
        ExprKind::Token(name) => grammar
            .lexer
            .as_ref()
            .and_then(|l| l.def_for(name))
            .map(|d| d.discard)
            .unwrap_or(false),
        _ => false,
    }
}

/// Shape requirements for `structure` directives.
fn check_structure_shape(
    rule: &str,
    structure: &Option<Structure>,
    body: &ExprNode,
) -> Result<(), GrammarError> {
    let bad = |message: String| {
        Err(GrammarError::new(GrammarErrorKind::BadStructure, message).in_rule(rule))
    };
    match structure {
        None => Ok(()),
        Some(Structure::LeftAssociativeOp) => match &body.kind {
            ExprKind::Sequence(parts) if parts.len() == 2 => match &parts[1].kind {
                ExprKind::ZeroOrMore(inner)
                    if matches!(inner.kind, ExprKind::Sequence(_)) =>
                {
                    Ok(())
                }
                _ => bad(
                    "'left_associative_op' requires a sequence of (base, zero_or_more(sequence(.. op .. base)))"
                        .into(),
                ),
            },
            _ => bad(
                "'left_associative_op' requires a sequence of (base, zero_or_more(sequence(.. op .. base)))"
                    .into(),
            ),
        },
        Some(Structure::RightAssociativeOp) => match &body.kind {
            ExprKind::Sequence(parts) if parts.len() == 2 => match &parts[1].kind {
                ExprKind::Optional(inner) if matches!(inner.kind, ExprKind::Sequence(_)) => Ok(()),
                _ => bad(
                    "'right_associative_op' requires a sequence of (base, optional(sequence(.. op .. self)))"
                        .into(),
                ),
            },
            _ => bad(
                "'right_associative_op' requires a sequence of (base, optional(sequence(.. op .. self)))"
                    .into(),
            ),
        },
        Some(Structure::Mapped(mapped)) => match &body.kind {
            ExprKind::Sequence(parts) => {
                for (name, index) in &mapped.children {
                    if *index >= parts.len() {
                        return bad(format!(
                            "map_children entry '{}' points at part #{} but the sequence has {} parts",
                            name,
                            index,
                            parts.len()
                        ));
                    }
                }
                Ok(())
            }
            _ => bad("'map_children' requires the rule body to be a sequence".into()),
        },
    }
}

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

fn check_reachability(
    grammar: &CompiledGrammar,
    extra_roots: &[String],
) -> Result<(), GrammarError> {
    let mut reachable: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(&grammar.start);
    for root in extra_roots {
        if grammar.rules.contains_key(root) {
            queue.push_back(root);
        }
    }

    while let Some(name) = queue.pop_front() {
        if !reachable.insert(name) {
            continue;
        }
        if let Some(rule) = grammar.rules.get(name) {
            collect_refs(&rule.body, &mut |target| {
                if let Some((key, _)) = grammar.rules.get_key_value(target) {
                    if !reachable.contains(key.as_str()) {
                        queue.push_back(key);
                    }
                }
            });
        }
    }

    let unreachable: Vec<&str> = grammar
        .rules
        .keys()
        .map(|k| k.as_str())
        .filter(|name| !reachable.contains(name))
        .collect();
    if !unreachable.is_empty() {
        let mut names: Vec<&str> = unreachable;
        names.sort_unstable();
        return Err(GrammarError::new(
            GrammarErrorKind::Unreachable,
            format!("unreachable rules detected: {}", names.join(", ")),
        ));
    }
    Ok(())
}

fn collect_refs(expr: &ExprNode, visit: &mut impl FnMut(&str)) {
    if let ExprKind::Ref(target) = &expr.kind {
        visit(target);
    }
    for child in expr.children() {
        collect_refs(child, visit);
    }
}

// ---------------------------------------------------------------------------
// Always-empty lint
// ---------------------------------------------------------------------------

/// A rule that is not marked `discard` but can only ever shape to
/// nothing is almost always a grammar mistake; require the intent to
/// be spelled out.
fn check_always_empty(grammar: &CompiledGrammar) -> Result<(), GrammarError> {
    let mut memo: HashMap<String, bool> = HashMap::new();
    let mut offenders: Vec<&str> = Vec::new();
    for (name, rule) in &grammar.rules {
        if rule.ast.discard || rule.body.is_lookahead() {
            continue;
        }
        if rule_always_empty(grammar, name, &mut memo) {
            offenders.push(name);
        }
    }
    if !offenders.is_empty() {
        offenders.sort_unstable();
        return Err(GrammarError::new(
            GrammarErrorKind::BadStructure,
            format!(
                "these rules always produce an empty AST; add 'ast: {{ discard: true }}' if that is intended: {}",
                offenders.join(", ")
            ),
        ));
    }
    Ok(())
}

fn rule_always_empty(grammar: &CompiledGrammar, name: &str, memo: &mut HashMap<String, bool>) -> bool {
    if let Some(known) = memo.get(name) {
        return *known;
    }
    // Recursion guard: a rule is assumed non-empty while its own
    // emptiness is being computed.
    memo.insert(name.to_string(), false);
    let rule = match grammar.rules.get(name) {
        Some(rule) => rule,
        None => return false,
    };
    let empty = if rule.ast.discard {
        true
    } else if rule.ast.structure.is_some() || rule.ast.leaf {
        false
    } else {
        expr_always_empty(grammar, &rule.body, memo)
    };
    memo.insert(name.to_string(), empty);
    empty
}

fn expr_always_empty(
    grammar: &CompiledGrammar,
    expr: &ExprNode,
    memo: &mut HashMap<String, bool>,
) -> bool {
    if expr.ast.discard {
        return true;
    }
    if expr.ast.structure.is_some() || expr.ast.leaf {
        return false;
    }
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Regex(_) => false,
        ExprKind::Token(name) => grammar
            .lexer
            .as_ref()
            .and_then(|l| l.def_for(name))
            .map(|d| d.discard)
            .unwrap_or(false),
        ExprKind::Ref(target) => rule_always_empty(grammar, target, memo),
        ExprKind::Sequence(parts) => {
            if parts.iter().any(|p| p.ast.name.is_some()) {
                return false;
            }
            parts.iter().all(|p| expr_always_empty(grammar, p, memo))
        }
        ExprKind::Choice(alts) => alts.iter().all(|a| expr_always_empty(grammar, a, memo)),
        ExprKind::ZeroOrMore(inner) | ExprKind::OneOrMore(inner) | ExprKind::Optional(inner) => {
            expr_always_empty(grammar, inner, memo)
        }
        ExprKind::PosLookahead(_) | ExprKind::NegLookahead(_) => true,
    }
}

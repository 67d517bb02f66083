//! Conversion from the raw document model to the compiled model.
//!
//! This stage enforces the exactly-one-structural-key rule, compiles
//! every pattern once, and rejects malformed directives. Reference
//! resolution and reachability run afterwards in `validate`.

use regex::Regex;

use crate::error::{GrammarError, GrammarErrorKind};
use crate::grammar::raw::{
    RawAst, RawCoercion, RawExpr, RawLexer, RawStructure, RawTokenAction, RawTokenDef,
};
use crate::grammar::{
    AstDirective, Coercion, ExprKind, ExprNode, LexerSpec, MappedStructure, Pattern, Structure,
    TokenAction, TokenDef,
};

fn malformed(message: String, rule: &str) -> GrammarError {
    GrammarError::new(GrammarErrorKind::MalformedDirective, message).in_rule(rule)
}

/// Compile one rule body.
pub fn compile_expr(raw: &RawExpr, rule: &str) -> Result<ExprNode, GrammarError> {
    let keys = raw.structural_keys();
    if keys.len() != 1 {
        return Err(malformed(
            format!(
                "rule body must have exactly one structural key, found {:?}",
                keys
            ),
            rule,
        ));
    }

    let kind = match keys[0] {
        "literal" => ExprKind::Literal(raw.literal.clone().unwrap()),
        "regex" => ExprKind::Regex(compile_pattern(raw.regex.as_deref().unwrap(), rule)?),
        "token" => ExprKind::Token(raw.token.clone().unwrap()),
        "rule" => ExprKind::Ref(raw.rule.clone().unwrap()),
        "sequence" => {
            let parts = raw.sequence.as_ref().unwrap();
            ExprKind::Sequence(
                parts
                    .iter()
                    .map(|p| compile_expr(p, rule))
                    .collect::<Result<_, _>>()?,
            )
        }
        "choice" => {
            let alts = raw.choice.as_ref().unwrap();
            if alts.is_empty() {
                return Err(malformed("a choice must have at least one alternative".into(), rule));
            }
            ExprKind::Choice(
                alts.iter()
                    .map(|a| compile_expr(a, rule))
                    .collect::<Result<_, _>>()?,
            )
        }
        "zero_or_more" => ExprKind::ZeroOrMore(Box::new(compile_expr(
            raw.zero_or_more.as_ref().unwrap(),
            rule,
        )?)),
        "one_or_more" => ExprKind::OneOrMore(Box::new(compile_expr(
            raw.one_or_more.as_ref().unwrap(),
            rule,
        )?)),
        "optional" => ExprKind::Optional(Box::new(compile_expr(
            raw.optional.as_ref().unwrap(),
            rule,
        )?)),
        "positive_lookahead" => ExprKind::PosLookahead(Box::new(compile_expr(
            raw.positive_lookahead.as_ref().unwrap(),
            rule,
        )?)),
        "negative_lookahead" => ExprKind::NegLookahead(Box::new(compile_expr(
            raw.negative_lookahead.as_ref().unwrap(),
            rule,
        )?)),
        "subgrammar" => {
            // The composer replaces subgrammar references before
            // compilation; one surviving here was never resolved.
            return Err(malformed(
                "unresolved subgrammar reference; compile through the grammar composer".into(),
                rule,
            ));
        }
        _ => unreachable!(),
    };

    let ast = match &raw.ast {
        Some(raw_ast) => compile_directive(raw_ast, rule)?,
        None => AstDirective::default(),
    };

    check_directive_conflicts(&ast, rule)?;

    Ok(ExprNode { kind, ast })
}

pub fn compile_directive(raw: &RawAst, rule: &str) -> Result<AstDirective, GrammarError> {
    let structure = match &raw.structure {
        None => None,
        Some(RawStructure::Name(name)) => match name.as_str() {
            "left_associative_op" => Some(Structure::LeftAssociativeOp),
            "right_associative_op" => Some(Structure::RightAssociativeOp),
            other => {
                return Err(malformed(
                    format!("unknown structure directive '{}'", other),
                    rule,
                ))
            }
        },
        Some(RawStructure::Mapped { tag, map_children }) => {
            if map_children.is_empty() {
                return Err(malformed("map_children must not be empty".into(), rule));
            }
            Some(Structure::Mapped(MappedStructure {
                tag: tag.clone(),
                children: map_children
                    .iter()
                    .map(|(name, mapping)| (name.clone(), mapping.from_child))
                    .collect(),
            }))
        }
    };

    Ok(AstDirective {
        tag: raw.tag.clone(),
        name: raw.name.clone(),
        discard: raw.discard,
        promote: raw.promote,
        leaf: raw.leaf,
        coerce: raw.coerce.map(|c| match c {
            RawCoercion::Number => Coercion::Number,
            RawCoercion::Bool => Coercion::Bool,
            RawCoercion::Null => Coercion::Null,
        }),
        structure,
    })
}

fn check_directive_conflicts(ast: &AstDirective, rule: &str) -> Result<(), GrammarError> {
    if ast.promote && ast.structure.is_some() {
        return Err(malformed(
            "'promote' and 'structure' directives are mutually exclusive".into(),
            rule,
        ));
    }
    if ast.promote && ast.discard {
        return Err(malformed(
            "'promote: true' is redundant when 'discard: true' is also present".into(),
            rule,
        ));
    }
    Ok(())
}

/// Compile a pattern, anchoring it at the cursor and rewriting `\Z`
/// (end of input) to the `\z` the regex engine understands.
pub fn compile_pattern(source: &str, rule: &str) -> Result<Pattern, GrammarError> {
    let translated = translate_end_anchor(source);
    let anchored = format!("^(?:{})", translated);
    let regex = Regex::new(&anchored).map_err(|e| {
        malformed(format!("invalid regex '{}': {}", source, e), rule)
    })?;
    Ok(Pattern {
        source: source.to_string(),
        regex,
    })
}

/// Rewrite `\Z` escapes to `\z`, leaving escaped backslashes alone.
fn translate_end_anchor(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('Z') => out.push_str(r"\z"),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Compile the `lexer` block.
pub fn compile_lexer(raw: &RawLexer) -> Result<LexerSpec, GrammarError> {
    let mut tokens = Vec::with_capacity(raw.tokens.len());
    let mut newline_token = String::from("NEWLINE");
    let mut layout_entries = 0usize;

    for (index, def) in raw.tokens.iter().enumerate() {
        let context = format!("lexer token #{}", index);
        tokens.push(compile_token_def(
            def,
            &context,
            &mut newline_token,
            &mut layout_entries,
        )?);
    }

    if layout_entries > 1 {
        return Err(GrammarError::new(
            GrammarErrorKind::MalformedDirective,
            "at most one lexer entry may carry 'action: handle_indent'",
        ));
    }

    let handles_layout = layout_entries == 1;
    let spec = LexerSpec {
        tokens,
        newline_token,
        handles_layout,
    };

    if handles_layout {
        for def in &spec.tokens {
            if def.action == Some(TokenAction::HandleIndent) {
                continue;
            }
            if let Some(name) = def.token.as_deref() {
                if name == "INDENT" || name == "DEDENT" || name == spec.newline_token {
                    return Err(GrammarError::new(
                        GrammarErrorKind::MalformedDirective,
                        format!(
                            "token name '{}' is reserved while 'handle_indent' is in use",
                            name
                        ),
                    ));
                }
            }
        }
    }

    Ok(spec)
}

fn compile_token_def(
    raw: &RawTokenDef,
    context: &str,
    newline_token: &mut String,
    layout_entries: &mut usize,
) -> Result<TokenDef, GrammarError> {
    let action = raw.action.map(|a| match a {
        RawTokenAction::Skip => TokenAction::Skip,
        RawTokenAction::HandleIndent => TokenAction::HandleIndent,
    });

    match action {
        Some(TokenAction::Skip) => {
            if raw.token.is_some() {
                return Err(malformed(
                    "a skipped entry must not also name a token".into(),
                    context,
                ));
            }
        }
        Some(TokenAction::HandleIndent) => {
            *layout_entries += 1;
            // The optional `token` renames the same-level newline.
            if let Some(name) = &raw.token {
                *newline_token = name.clone();
            }
        }
        None => {
            if raw.token.is_none() {
                return Err(malformed(
                    "a lexer entry needs either a 'token' name or an 'action'".into(),
                    context,
                ));
            }
        }
    }

    let (coerce, discard) = match &raw.ast {
        Some(ast) => {
            let compiled = compile_directive(ast, context)?;
            (compiled.coerce, compiled.discard)
        }
        None => (None, false),
    };

    Ok(TokenDef {
        pattern: compile_pattern(&raw.regex, context)?,
        token: raw.token.clone(),
        action,
        coerce,
        discard,
    })
}

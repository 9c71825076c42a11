//! Boolean conditions for `if`, `while` and `when`.
//!
//! Precedence, lowest first: `or`, `and`, `not`/`!`, parentheses, then a
//! single comparison. Comparison operators have no precedence among
//! themselves; the first one found in this order wins:
//!
//! | Operator | Meaning |
//! |---|---|
//! | `is empty`, `is not empty`, `is defined`, `is not defined` | suffix tests |
//! | `matches` | case-insensitive regex |
//! | `contains`, `startswith`, `endswith` | case-insensitive substring tests (`contains` checks list elements) |
//! | `!=`, `==` | numeric when both sides are numbers, else case-insensitive text |
//! | `>=`, `<=`, `>`, `<` | numeric only; false for non-numbers |
//!
//! Operands are quoted literals, variable names, `${...}` references or
//! bare text. Operator keywords inside quotes are ignored.

use super::context::ScriptContext;
use super::value::{Value, parse_numeric};
use regex::RegexBuilder;

const EPSILON: f64 = 1e-9;

const SUFFIX_TESTS: &[(&str, SuffixTest)] = &[
    (" is not empty", SuffixTest::NotEmpty),
    (" is empty", SuffixTest::Empty),
    (" is not defined", SuffixTest::NotDefined),
    (" is defined", SuffixTest::Defined),
];

const OPERATORS: &[(&str, Op)] = &[
    (" matches ", Op::Matches),
    (" contains ", Op::Contains),
    (" startswith ", Op::StartsWith),
    (" endswith ", Op::EndsWith),
    ("!=", Op::Ne),
    ("==", Op::Eq),
    (">=", Op::Ge),
    ("<=", Op::Le),
    (">", Op::Gt),
    ("<", Op::Lt),
];

#[derive(Debug, Clone, Copy)]
enum SuffixTest {
    Empty,
    NotEmpty,
    Defined,
    NotDefined,
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Matches,
    Contains,
    StartsWith,
    EndsWith,
    Ne,
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

/// Evaluate `expression` against the variables in `ctx`.
pub fn evaluate(expression: &str, ctx: &ScriptContext) -> bool {
    let expr = strip_outer_parens(expression.trim());
    if expr.is_empty() {
        return false;
    }

    let alternatives = split_top_level(expr, " or ");
    if alternatives.len() > 1 {
        return alternatives.iter().any(|part| evaluate(part, ctx));
    }
    let conjuncts = split_top_level(expr, " and ");
    if conjuncts.len() > 1 {
        return conjuncts.iter().all(|part| evaluate(part, ctx));
    }

    if let Some(rest) = strip_prefix_ci(expr, "not ") {
        return !evaluate(rest, ctx);
    }
    if let Some(rest) = expr.strip_prefix('!') {
        if !rest.starts_with('=') {
            return !evaluate(rest, ctx);
        }
    }

    compare(expr, ctx)
}

fn compare(expr: &str, ctx: &ScriptContext) -> bool {
    for (suffix, test) in SUFFIX_TESTS {
        if let Some(subject) = strip_suffix_ci(expr, suffix) {
            return suffix_test(subject.trim(), *test, ctx);
        }
    }

    for (token, op) in OPERATORS {
        if let Some(at) = find_top_level(expr, token) {
            let lhs = resolve(&expr[..at], ctx);
            let rhs = resolve(&expr[at + token.len()..], ctx);
            return apply(*op, &lhs, &rhs);
        }
    }

    truthy_operand(expr, ctx)
}

fn suffix_test(subject: &str, test: SuffixTest, ctx: &ScriptContext) -> bool {
    match test {
        SuffixTest::Empty => resolve(subject, ctx).is_empty(),
        SuffixTest::NotEmpty => !resolve(subject, ctx).is_empty(),
        SuffixTest::Defined => ctx.has(reference_name(subject)),
        SuffixTest::NotDefined => !ctx.has(reference_name(subject)),
    }
}

fn apply(op: Op, lhs: &Value, rhs: &Value) -> bool {
    let text = |v: &Value| v.as_string().to_lowercase();
    match op {
        Op::Matches => RegexBuilder::new(&rhs.as_string())
            .case_insensitive(true)
            .build()
            .is_ok_and(|re| re.is_match(&lhs.as_string())),
        Op::Contains => match lhs {
            Value::List(items) => {
                let needle = rhs.as_string();
                items.iter().any(|item| item.eq_ignore_ascii_case(&needle))
            }
            _ => text(lhs).contains(&text(rhs)),
        },
        Op::StartsWith => text(lhs).starts_with(&text(rhs)),
        Op::EndsWith => text(lhs).ends_with(&text(rhs)),
        Op::Eq => equals(lhs, rhs),
        Op::Ne => !equals(lhs, rhs),
        Op::Ge => ordered(lhs, rhs, |a, b| a >= b),
        Op::Le => ordered(lhs, rhs, |a, b| a <= b),
        Op::Gt => ordered(lhs, rhs, |a, b| a > b),
        Op::Lt => ordered(lhs, rhs, |a, b| a < b),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Scalar(s) => parse_numeric(s),
        Value::List(_) => None,
    }
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (number(lhs), number(rhs)) {
        (Some(a), Some(b)) => (a - b).abs() < EPSILON,
        _ => lhs.as_string().trim().to_lowercase() == rhs.as_string().trim().to_lowercase(),
    }
}

fn ordered(lhs: &Value, rhs: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (number(lhs), number(rhs)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Resolve an operand: quoted literal, variable, `${...}` reference or text.
/// An undefined `${name}` resolves to an empty value.
fn resolve(token: &str, ctx: &ScriptContext) -> Value {
    let token = token.trim();
    if let Some(inner) = unquote(token) {
        return Value::Scalar(ctx.substitute(inner));
    }
    let name = reference_name(token);
    let is_reference = name != token;
    if is_reference && name.contains('[') {
        let text = ctx.substitute(token);
        return if text == token { Value::default() } else { Value::Scalar(text) };
    }
    if let Some(value) = ctx.get(name) {
        return value.clone();
    }
    if is_reference {
        return Value::default();
    }
    Value::Scalar(ctx.substitute(token))
}

/// A lone operand: undefined names and unresolved references are false.
fn truthy_operand(token: &str, ctx: &ScriptContext) -> bool {
    let token = token.trim();
    if let Some(inner) = unquote(token) {
        return Value::Scalar(ctx.substitute(inner)).is_truthy();
    }
    if is_identifier(token) && !ctx.has(token) {
        return token.eq_ignore_ascii_case("true");
    }
    let value = resolve(token, ctx);
    if value.as_string().contains("${") {
        return false;
    }
    match number(&value) {
        Some(n) => n != 0.0,
        None => value.is_truthy(),
    }
}

/// `${name}` → `name`; anything else is returned as is.
fn reference_name(token: &str) -> &str {
    token
        .strip_prefix("${")
        .and_then(|t| t.strip_suffix('}'))
        .map(str::trim)
        .unwrap_or(token)
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn unquote(token: &str) -> Option<&str> {
    let first = token.chars().next()?;
    if (first == '"' || first == '\'') && token.len() >= 2 && token.ends_with(first) {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

fn strip_suffix_ci<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let start = text.len().checked_sub(suffix.len())?;
    let tail = text.get(start..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &text[..start])
}

/// Remove parentheses wrapping the whole expression.
fn strip_outer_parens(mut expr: &str) -> &str {
    while expr.starts_with('(') && expr.ends_with(')') && closing_paren(expr) == Some(expr.len() - 1)
    {
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

fn closing_paren(expr: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote = None;
    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte offset of the first `token` outside quotes and parentheses,
/// compared case-insensitively.
fn find_top_level(expr: &str, token: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote = None;
    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                continue;
            }
            (Some(_), _) => continue,
            (None, '"' | '\'') => {
                quote = Some(c);
                continue;
            }
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && strip_prefix_ci(&expr[i..], token).is_some() {
            return Some(i);
        }
    }
    None
}

fn split_top_level<'a>(expr: &'a str, token: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = expr;
    while let Some(at) = find_top_level(rest, token) {
        parts.push(rest[..at].trim());
        rest = &rest[at + token.len()..];
    }
    parts.push(rest.trim());
    parts
}

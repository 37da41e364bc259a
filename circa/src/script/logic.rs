//! Boolean condition solver for `if` and `while`.
//!
//! Conditions arrive with `%var`/`$fn()` already extracted.  Each primitive
//! comparison solves to 1 or 0, `&&` multiplies, `||` adds, and the result
//! is a double: nonzero means true.  Membership and role predicates (`?#`,
//! `?@`, `?%`, `?+`, `?-`) query the host's channel state.
//!
//! `$NULL` and a literal `\n` are sentinel tokens for the empty string and
//! newline, recognized on either side of a comparison.

use crate::host::{Host, Role};

/// Evaluate a condition.  Nonzero is true.
pub fn solve(host: &dyn Host, expr: &str) -> Result<bool, String> {
    Ok(solve_num(host, expr)? != 0.0)
}

fn solve_num(host: &dyn Host, expr: &str) -> Result<f64, String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err("empty condition".to_owned());
    }
    let mut sum = 0.0;
    for part in split_top(expr, "||") {
        sum += solve_and(host, part)?;
    }
    Ok(sum)
}

fn solve_and(host: &dyn Host, expr: &str) -> Result<f64, String> {
    let mut product = 1.0;
    for part in split_top(expr, "&&") {
        product *= solve_atom(host, part)?;
    }
    Ok(product)
}

fn solve_atom(host: &dyn Host, expr: &str) -> Result<f64, String> {
    let expr = expr.trim();
    if let Some(inner) = unwrap_parens(expr) {
        return solve_num(host, inner);
    }
    solve_primitive(host, expr)
}

/// A single comparison, or a bare value treated as a number.
fn solve_primitive(host: &dyn Host, expr: &str) -> Result<f64, String> {
    const OPS: [&str; 9] = ["==", "!=", "<=", ">=", "?#", "?@", "?%", "?+", "?-", ];
    for op in OPS {
        if let Some((lhs, rhs)) = split_once_top(expr, op) {
            return Ok(bool_num(solve_bool(host, lhs, op, rhs)));
        }
    }
    // Single-char orderings last so `<=`/`>=` are not split at `<`/`>`.
    for op in ["<", ">"] {
        if let Some((lhs, rhs)) = split_once_top(expr, op) {
            return Ok(bool_num(solve_bool(host, lhs, op, rhs)));
        }
    }
    Ok(as_num(&sentinel(expr)))
}

fn solve_bool(host: &dyn Host, lhs: &str, op: &str, rhs: &str) -> bool {
    let lhs = sentinel(lhs);
    let rhs = sentinel(rhs);
    match op {
        "==" => lhs.eq_ignore_ascii_case(&rhs),
        "!=" => !lhs.eq_ignore_ascii_case(&rhs),
        "<" => as_num(&lhs) < as_num(&rhs),
        ">" => as_num(&lhs) > as_num(&rhs),
        "<=" => as_num(&lhs) <= as_num(&rhs),
        ">=" => as_num(&lhs) >= as_num(&rhs),
        // nick ?# channel — membership and role predicates.
        "?#" => host.is_on(&rhs, &lhs),
        "?@" => host.role_of(&rhs, &lhs) == Some(Role::Op),
        "?%" => host.role_of(&rhs, &lhs) == Some(Role::HalfOp),
        "?+" => host.role_of(&rhs, &lhs) == Some(Role::Voice),
        "?-" => host.is_on(&rhs, &lhs) && host.role_of(&rhs, &lhs).is_none(),
        _ => false,
    }
}

fn bool_num(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Numbers parse leniently: anything unparseable is 0.
fn as_num(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

fn sentinel(s: &str) -> String {
    let s = s.trim();
    if s.eq_ignore_ascii_case("$null") {
        String::new()
    } else if s == "\\n" {
        "\n".to_owned()
    } else {
        s.to_owned()
    }
}

/// Is `expr` one parenthesized group?  Returns the interior if so.
fn unwrap_parens(expr: &str) -> Option<&str> {
    let inner = expr.strip_prefix('(')?.strip_suffix(')')?;
    // The opening paren must match the final one, not an earlier close.
    let mut depth = 1i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(inner)
}

/// Split on every occurrence of `sep` at paren depth 0.
fn split_top<'a>(expr: &'a str, sep: &str) -> Vec<&'a str> {
    let bytes = expr.as_bytes();
    let sep_bytes = sep.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && bytes[i..].starts_with(sep_bytes) => {
                parts.push(&expr[start..i]);
                i += sep_bytes.len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}

/// First occurrence of `op` at depth 0, or None.
fn split_once_top<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let bytes = expr.as_bytes();
    let op_bytes = op.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && bytes[i..].starts_with(op_bytes) => {
                return Some((&expr[..i], &expr[i + op_bytes.len()..]));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

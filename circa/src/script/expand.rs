//! Text extraction: `%var` interpolation and `$fn(…)` calls.
//!
//! Nearly every statement funnels its text through [`extract`] before doing
//! anything with it.  Variables resolve against the active frame then
//! globals; an unset variable interpolates as the empty string.  Function
//! calls are recursive: each comma-separated argument is extracted before
//! the call, and nested calls are arguments like any other.
//!
//! `\` escapes the next character verbatim (`\%`, `\$`, `\,`, `\;`); a `\`
//! with nothing after it is a hard error.  A `%` or `$` that does not start
//! a resolvable sequence passes through untouched, so `100%` and `US$5`
//! survive extraction.

use crate::host::Host;

use super::builtins;
use super::interp::Interp;

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Extract `text` against the interpreter's current environment.
pub fn extract(interp: &mut Interp, host: &mut dyn Host, text: &str) -> Result<String, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => match chars.get(i + 1) {
                Some(&c) => {
                    out.push(c);
                    i += 2;
                }
                None => return Err("dangling escape at end of text".to_owned()),
            },
            '%' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident(chars[end]) {
                    end += 1;
                }
                if end == start {
                    out.push('%');
                    i += 1;
                } else {
                    let name: String = chars[start..end].iter().collect();
                    if let Some(v) = interp.env().get(&name) {
                        out.push_str(&v.as_text());
                    }
                    i = end;
                }
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident(chars[end]) {
                    end += 1;
                }
                if end == start || chars.get(end) != Some(&'(') {
                    // `$NULL`, `US$5` and friends pass through.
                    out.push('$');
                    i += 1;
                } else {
                    let name: String = chars[start..end].iter().collect();
                    let (raw_args, after) = scan_args(&chars, end, &name)?;
                    let mut args = Vec::with_capacity(raw_args.len());
                    for raw in raw_args {
                        args.push(extract(interp, host, raw.trim())?);
                    }
                    out.push_str(&call(interp, host, &name, &args)?);
                    i = after;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Scan the argument list starting at the `(` at `open`.  Returns the raw
/// argument strings (split at top-level commas) and the index past `)`.
fn scan_args(chars: &[char], open: usize, name: &str) -> Result<(Vec<String>, usize), String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 1;
    let mut i = open + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                // Keep the pair; the recursive extract consumes it.
                current.push('\\');
                if let Some(&c) = chars.get(i + 1) {
                    current.push(c);
                    i += 2;
                    continue;
                }
                return Err(format!("dangling escape in ${name}(…)"));
            }
            '(' => {
                depth += 1;
                current.push('(');
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if !current.trim().is_empty() || !args.is_empty() {
                        args.push(current);
                    }
                    return Ok((args, i + 1));
                }
                current.push(')');
            }
            ',' if depth == 1 => {
                args.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
        i += 1;
    }
    Err(format!("unterminated ${name}( call"))
}

/// Builtins first, then user functions with exact arity.
fn call(
    interp: &mut Interp,
    host: &mut dyn Host,
    name: &str,
    args: &[String],
) -> Result<String, String> {
    if let Some(result) = builtins::call_builtin(interp, host, name, args) {
        return result;
    }
    if interp.program().function(name).is_some() {
        return interp.runf(host, name, args, false);
    }
    Err(format!("unknown function ${name}()"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use crate::script::loader;
    use crate::script::value::Value;

    fn interp_with(src: &str) -> Interp {
        Interp::new(loader::load_str("test.cs", src).expect("load failed"))
    }

    fn run(interp: &mut Interp, text: &str) -> String {
        let mut host = RecordingHost::new();
        extract(interp, &mut host, text).expect("extract failed")
    }

    #[test]
    fn plain_text_passes_through() {
        let mut interp = interp_with("");
        assert_eq!(run(&mut interp, "hello world"), "hello world");
    }

    #[test]
    fn variable_interpolation() {
        let mut interp = interp_with("");
        interp.env_mut().set("a", Value::from("1"));
        interp.env_mut().set("b", Value::from("2"));
        assert_eq!(run(&mut interp, "%a-%b"), "1-2");
    }

    #[test]
    fn unset_variable_is_empty() {
        let mut interp = interp_with("");
        assert_eq!(run(&mut interp, "[%nope]"), "[]");
    }

    #[test]
    fn longest_ident_run_wins() {
        let mut interp = interp_with("");
        interp.env_mut().set("a", Value::from("1"));
        interp.env_mut().set("ab", Value::from("2"));
        assert_eq!(run(&mut interp, "%ab"), "2");
        assert_eq!(run(&mut interp, "%a.b"), "1.b");
    }

    #[test]
    fn binary_variable_renders_lossily() {
        let mut interp = interp_with("");
        interp.env_mut().set("raw", Value::Binary(b"abc".to_vec()));
        assert_eq!(run(&mut interp, "%raw"), "abc");
    }

    #[test]
    fn escapes_pass_verbatim() {
        let mut interp = interp_with("");
        interp.env_mut().set("x", Value::from("1"));
        assert_eq!(run(&mut interp, r"100\%"), "100%");
        assert_eq!(run(&mut interp, r"\%x"), "%x");
        assert_eq!(run(&mut interp, r"\$glue(a)"), "$glue(a)");
    }

    #[test]
    fn dangling_escape_is_error() {
        let mut interp = interp_with("");
        let mut host = RecordingHost::new();
        assert!(extract(&mut interp, &mut host, "oops\\").is_err());
    }

    #[test]
    fn literal_percent_and_dollar_pass_through() {
        let mut interp = interp_with("");
        assert_eq!(run(&mut interp, "50% off for US$5"), "50% off for US$5");
        assert_eq!(run(&mut interp, "$NULL"), "$NULL");
    }

    #[test]
    fn builtin_call() {
        let mut interp = interp_with("");
        assert_eq!(run(&mut interp, "$glue(x,y,z)"), "xyz");
        assert_eq!(run(&mut interp, "$upper(abc)"), "ABC");
    }

    #[test]
    fn nested_calls() {
        let mut interp = interp_with("");
        assert_eq!(run(&mut interp, "$glue($glue(a,b),c)"), "abc");
    }

    #[test]
    fn args_are_extracted_before_call() {
        let mut interp = interp_with("");
        interp.env_mut().set("w", Value::from("orl"));
        assert_eq!(run(&mut interp, "$glue(w,%w,d)"), "world");
    }

    #[test]
    fn user_function_call() {
        let mut interp = interp_with("function twice(x) {\nreturn %x%x\n}");
        assert_eq!(run(&mut interp, "$twice(ab)"), "abab");
    }

    #[test]
    fn user_function_exact_arity_enforced() {
        let mut interp = interp_with("function f(a, b) {\nreturn %a%b\n}");
        let mut host = RecordingHost::new();
        assert!(extract(&mut interp, &mut host, "$f(1)").is_err());
    }

    #[test]
    fn unknown_function_is_error() {
        let mut interp = interp_with("");
        let mut host = RecordingHost::new();
        let err = extract(&mut interp, &mut host, "$nosuch(1)").unwrap_err();
        assert!(err.contains("nosuch"));
    }

    #[test]
    fn unterminated_call_is_error() {
        let mut interp = interp_with("");
        let mut host = RecordingHost::new();
        assert!(extract(&mut interp, &mut host, "$glue(a,b").is_err());
    }

    #[test]
    fn empty_arg_list() {
        let mut interp = interp_with("function zero() {\nreturn ok\n}");
        assert_eq!(run(&mut interp, "$zero()"), "ok");
    }

    #[test]
    fn escaped_comma_stays_in_argument() {
        let mut interp = interp_with("");
        assert_eq!(run(&mut interp, r"$glue(a\,b,c)"), "a,bc");
    }
}

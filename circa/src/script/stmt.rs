//! Statement AST and function-body parser.
//!
//! Function bodies are parsed once at load time into a small statement tree;
//! the executor walks the tree instead of re-scanning source text.  Blocks
//! are line-oriented: `if`/`while` headers end with `{` on the same line, and
//! a block closes on a line beginning with `}` (optionally `} else {` /
//! `} else if (…) {`).
//!
//! Argument text for `sock`, file operations, timers, `toolbar` and `dlg` is
//! kept raw here — it may contain `%`/`$` sequences that only make sense
//! after extraction, so those statements are decoded at run time.

use super::loader::{LoadError, LoadErrorKind};

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `if (<logic>) { … } [else { … }]`
    If {
        cond: String,
        then_block: Vec<Stmt>,
        else_block: Vec<Stmt>,
    },
    /// `while (<logic>) { … }`
    While { cond: String, body: Vec<Stmt> },
    Break,
    Continue,
    /// `var %x value` / `local var %x value`
    Var {
        name: String,
        value: String,
        local: bool,
    },
    /// `del %x [%y …]`
    Del { names: Vec<String> },
    /// `inc %x [step]` / `dec %x [step]`
    Inc { name: String, step: Option<String> },
    Dec { name: String, step: Option<String> },
    /// `sock -<switches> name [args]` (decoded after extraction)
    Sock { args: String },
    /// `fread fd %var` / `fread -b fd n %var`
    FileRead { args: String },
    /// `fwrite fd text` / `fwrite -b fd %var`
    FileWrite { args: String },
    /// `fseek fd pos`
    FileSeek { args: String },
    /// `fclose fd`
    FileClose { args: String },
    /// `timer name secs function`, `timer -d name`, or one-shot `stimer …`
    Timer { args: String, once: bool },
    /// `toolbar -a|-i|-d|-f …`
    Toolbar { args: String },
    /// `dlg -s|-h|-c|-l|-i|-d|-e …`
    Dlg { args: String },
    /// `return <expr>`
    Return { value: String },
    /// Anything else: extracted, then dispatched as a command line.
    CommandLine { line: String },
}

/// Parse the interior lines of a function body.
///
/// `lines` carries `(compacted_line, text)` pairs so errors can point at the
/// offending source line.
pub fn parse_body(lines: &[(u32, String)]) -> Result<Vec<Stmt>, LoadError> {
    let mut parser = BodyParser { lines, pos: 0 };
    let stmts = parser.parse_block(None)?;
    if parser.pos < lines.len() {
        let (line, text) = &lines[parser.pos];
        return Err(LoadError::new(LoadErrorKind::UnmatchedBrace, text, *line));
    }
    Ok(stmts)
}

// ── Body parser ───────────────────────────────────────────────────────────────

struct BodyParser<'a> {
    lines: &'a [(u32, String)],
    pos: usize,
}

impl<'a> BodyParser<'a> {
    fn peek(&self) -> Option<&(u32, String)> {
        self.lines.get(self.pos)
    }

    /// Parse statements until a closing `}` line (left unconsumed) or EOF.
    ///
    /// `opened_at` is `Some(line)` when inside a block; hitting EOF there is
    /// an unmatched-brace error.
    fn parse_block(&mut self, opened_at: Option<u32>) -> Result<Vec<Stmt>, LoadError> {
        let mut stmts = Vec::new();
        loop {
            let (line, text) = match self.peek() {
                Some((l, t)) => (*l, t.clone()),
                None => {
                    if let Some(open_line) = opened_at {
                        return Err(LoadError::new(LoadErrorKind::UnmatchedBrace, "{", open_line));
                    }
                    break;
                }
            };
            if closes_block(&text) {
                if opened_at.is_none() {
                    return Err(LoadError::new(LoadErrorKind::UnmatchedBrace, "}", line));
                }
                break; // caller consumes the `}` line
            }
            self.pos += 1;
            stmts.push(self.parse_one(line, &text)?);
        }
        Ok(stmts)
    }

    fn parse_one(&mut self, line: u32, text: &str) -> Result<Stmt, LoadError> {
        let (word, rest) = split_word(text);
        match word.to_ascii_lowercase().as_str() {
            "if" => self.parse_if(line, rest),
            "while" => self.parse_while(line, rest),
            "break" => Ok(Stmt::Break),
            "continue" => Ok(Stmt::Continue),
            "var" => parse_var(line, rest, false),
            "local" => {
                let (next, rest) = split_word(rest);
                if !next.eq_ignore_ascii_case("var") {
                    return Err(LoadError::new(LoadErrorKind::UnexpectedToken, next, line));
                }
                parse_var(line, rest, true)
            }
            "del" => {
                let names: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
                if names.is_empty() || names.iter().any(|n| !n.starts_with('%')) {
                    return Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line));
                }
                Ok(Stmt::Del { names })
            }
            "inc" => parse_step(line, rest).map(|(name, step)| Stmt::Inc { name, step }),
            "dec" => parse_step(line, rest).map(|(name, step)| Stmt::Dec { name, step }),
            "sock" => Ok(Stmt::Sock {
                args: rest.to_owned(),
            }),
            "fread" => Ok(Stmt::FileRead {
                args: rest.to_owned(),
            }),
            "fwrite" => Ok(Stmt::FileWrite {
                args: rest.to_owned(),
            }),
            "fseek" => Ok(Stmt::FileSeek {
                args: rest.to_owned(),
            }),
            "fclose" => Ok(Stmt::FileClose {
                args: rest.to_owned(),
            }),
            "timer" => Ok(Stmt::Timer {
                args: rest.to_owned(),
                once: false,
            }),
            "stimer" => Ok(Stmt::Timer {
                args: rest.to_owned(),
                once: true,
            }),
            "toolbar" => Ok(Stmt::Toolbar {
                args: rest.to_owned(),
            }),
            "dlg" => Ok(Stmt::Dlg {
                args: rest.to_owned(),
            }),
            "return" => Ok(Stmt::Return {
                value: rest.to_owned(),
            }),
            _ => Ok(Stmt::CommandLine {
                line: text.to_owned(),
            }),
        }
    }

    fn parse_if(&mut self, line: u32, rest: &str) -> Result<Stmt, LoadError> {
        let cond = parse_cond_header(line, rest)?;
        let then_block = self.parse_block(Some(line))?;
        let else_block = self.parse_else(line)?;
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    /// Consume the `}` closing a then-block and parse any `else` tail.
    fn parse_else(&mut self, if_line: u32) -> Result<Vec<Stmt>, LoadError> {
        let (close_line, close_text) = match self.peek() {
            Some((l, t)) => (*l, t.clone()),
            None => return Err(LoadError::new(LoadErrorKind::UnmatchedBrace, "{", if_line)),
        };
        self.pos += 1; // consume the `}` line

        let tail = close_text[1..].trim(); // after the leading `}`
        if tail.is_empty() {
            return Ok(Vec::new());
        }
        let (word, rest) = split_word(tail);
        if !word.eq_ignore_ascii_case("else") {
            return Err(LoadError::new(
                LoadErrorKind::UnexpectedToken,
                word,
                close_line,
            ));
        }

        let rest = rest.trim();
        if rest == "{" {
            let block = self.parse_block(Some(close_line))?;
            self.expect_bare_close(close_line)?;
            return Ok(block);
        }
        // `} else if (…) {` — chain as a nested If.
        let (word, if_rest) = split_word(rest);
        if word.eq_ignore_ascii_case("if") {
            return Ok(vec![self.parse_if(close_line, if_rest)?]);
        }
        Err(LoadError::new(
            LoadErrorKind::UnexpectedToken,
            rest,
            close_line,
        ))
    }

    fn parse_while(&mut self, line: u32, rest: &str) -> Result<Stmt, LoadError> {
        let cond = parse_cond_header(line, rest)?;
        let body = self.parse_block(Some(line))?;
        self.expect_bare_close(line)?;
        Ok(Stmt::While { cond, body })
    }

    /// Consume a lone `}` line (no `else` tail allowed).
    fn expect_bare_close(&mut self, opened_at: u32) -> Result<(), LoadError> {
        match self.peek() {
            Some((_, text)) if text.trim() == "}" => {
                self.pos += 1;
                Ok(())
            }
            Some((line, text)) => Err(LoadError::new(
                LoadErrorKind::UnexpectedToken,
                text,
                *line,
            )),
            None => Err(LoadError::new(LoadErrorKind::UnmatchedBrace, "{", opened_at)),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Does this line close the enclosing block?
fn closes_block(text: &str) -> bool {
    text.starts_with('}')
}

/// Split off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Parse `(cond) {` — the condition in balanced parens, then `{`, all on the
/// header line.
fn parse_cond_header(line: u32, rest: &str) -> Result<String, LoadError> {
    let rest = rest.trim_start();
    if !rest.starts_with('(') {
        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line));
    }
    let mut depth = 0i32;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let cond = rest[1..i].trim().to_owned();
                    let after = rest[i + 1..].trim();
                    if after != "{" {
                        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, after, line));
                    }
                    return Ok(cond);
                }
            }
            _ => {}
        }
    }
    Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line))
}

fn parse_var(line: u32, rest: &str, local: bool) -> Result<Stmt, LoadError> {
    let (name, value) = split_word(rest);
    if !name.starts_with('%') || name.len() < 2 {
        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, name, line));
    }
    Ok(Stmt::Var {
        name: name.to_owned(),
        value: value.to_owned(),
        local,
    })
}

fn parse_step(line: u32, rest: &str) -> Result<(String, Option<String>), LoadError> {
    let (name, step) = split_word(rest);
    if !name.starts_with('%') || name.len() < 2 {
        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, name, line));
    }
    let step = step.trim();
    Ok((
        name.to_owned(),
        if step.is_empty() {
            None
        } else {
            Some(step.to_owned())
        },
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Stmt> {
        let lines: Vec<(u32, String)> = src
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .enumerate()
            .map(|(i, l)| (i as u32 + 1, l.to_owned()))
            .collect();
        parse_body(&lines).expect("parse failed")
    }

    fn parse_err(src: &str) -> LoadError {
        let lines: Vec<(u32, String)> = src
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .enumerate()
            .map(|(i, l)| (i as u32 + 1, l.to_owned()))
            .collect();
        parse_body(&lines).expect_err("expected parse error")
    }

    #[test]
    fn empty_body() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn var_stmt() {
        let stmts = parse("var %x hello world");
        assert_eq!(
            stmts[0],
            Stmt::Var {
                name: "%x".into(),
                value: "hello world".into(),
                local: false
            }
        );
    }

    #[test]
    fn local_var_stmt() {
        let stmts = parse("local var %x 1");
        assert!(matches!(&stmts[0], Stmt::Var { local: true, .. }));
    }

    #[test]
    fn local_without_var_rejected() {
        let err = parse_err("local %x 1");
        assert_eq!(err.kind, LoadErrorKind::UnexpectedToken);
    }

    #[test]
    fn var_requires_percent_name() {
        let err = parse_err("var x 1");
        assert_eq!(err.kind, LoadErrorKind::UnexpectedToken);
    }

    #[test]
    fn inc_with_and_without_step() {
        let stmts = parse("inc %i\ninc %i 5\ndec %i 2");
        assert_eq!(
            stmts[0],
            Stmt::Inc {
                name: "%i".into(),
                step: None
            }
        );
        assert_eq!(
            stmts[1],
            Stmt::Inc {
                name: "%i".into(),
                step: Some("5".into())
            }
        );
        assert_eq!(
            stmts[2],
            Stmt::Dec {
                name: "%i".into(),
                step: Some("2".into())
            }
        );
    }

    #[test]
    fn del_multiple() {
        let stmts = parse("del %a %b");
        assert_eq!(
            stmts[0],
            Stmt::Del {
                names: vec!["%a".into(), "%b".into()]
            }
        );
    }

    #[test]
    fn if_block() {
        let stmts = parse("if (%x == 1) {\nsay one\n}");
        match &stmts[0] {
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                assert_eq!(cond, "%x == 1");
                assert_eq!(then_block.len(), 1);
                assert!(else_block.is_empty());
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn if_else_block() {
        let stmts = parse("if (%x == 1) {\nsay one\n} else {\nsay other\n}");
        match &stmts[0] {
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                assert_eq!(then_block.len(), 1);
                assert_eq!(else_block.len(), 1);
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn else_if_chain() {
        let stmts = parse(
            "if (%x == 1) {\nsay one\n} else if (%x == 2) {\nsay two\n} else {\nsay many\n}",
        );
        match &stmts[0] {
            Stmt::If { else_block, .. } => {
                assert_eq!(else_block.len(), 1);
                assert!(matches!(&else_block[0], Stmt::If { .. }));
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn while_with_break_continue() {
        let stmts = parse("while (%i < 10) {\ninc %i\ncontinue\nbreak\n}");
        match &stmts[0] {
            Stmt::While { cond, body } => {
                assert_eq!(cond, "%i < 10");
                assert_eq!(body[1], Stmt::Continue);
                assert_eq!(body[2], Stmt::Break);
            }
            other => panic!("expected While, got {other:?}"),
        }
    }

    #[test]
    fn nested_while() {
        let stmts = parse("while (%i < 3) {\nwhile (%j < 3) {\ninc %j\n}\ninc %i\n}");
        match &stmts[0] {
            Stmt::While { body, .. } => {
                assert!(matches!(&body[0], Stmt::While { .. }));
            }
            other => panic!("expected While, got {other:?}"),
        }
    }

    #[test]
    fn header_without_brace_rejected() {
        let err = parse_err("if (%x == 1)\nsay one\n}");
        assert_eq!(err.kind, LoadErrorKind::UnexpectedToken);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn missing_close_rejected() {
        let err = parse_err("while (%i < 3) {\ninc %i");
        assert_eq!(err.kind, LoadErrorKind::UnmatchedBrace);
    }

    #[test]
    fn stray_close_rejected() {
        let err = parse_err("say hi\n}");
        assert_eq!(err.kind, LoadErrorKind::UnmatchedBrace);
    }

    #[test]
    fn unknown_keyword_is_command_line() {
        let stmts = parse("msg #rust hello %who");
        assert_eq!(
            stmts[0],
            Stmt::CommandLine {
                line: "msg #rust hello %who".into()
            }
        );
    }

    #[test]
    fn keywords_case_insensitive() {
        let stmts = parse("VAR %x 1\nReturn %x");
        assert!(matches!(&stmts[0], Stmt::Var { .. }));
        assert!(matches!(&stmts[1], Stmt::Return { .. }));
    }

    #[test]
    fn timer_variants() {
        let stmts = parse("timer poll 30 doPoll\nstimer once 5 doOnce");
        assert_eq!(
            stmts[0],
            Stmt::Timer {
                args: "poll 30 doPoll".into(),
                once: false
            }
        );
        assert_eq!(
            stmts[1],
            Stmt::Timer {
                args: "once 5 doOnce".into(),
                once: true
            }
        );
    }
}

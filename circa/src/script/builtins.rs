//! Built-in `$function()`s.
//!
//! Tried before user functions by the extractor.  Everything takes and
//! returns text; numeric builtins parse leniently (unparseable input reads
//! as 0) and print integral results without a fraction.  String positions
//! are 1-based, like the scripts expect.

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::host::Host;

use super::env::SockHandle;
use super::interp::Interp;
use super::value::Value;

/// Dispatch a builtin.  `None` means "no such builtin, try user functions".
pub fn call_builtin(
    interp: &mut Interp,
    host: &mut dyn Host,
    name: &str,
    args: &[String],
) -> Option<Result<String, String>> {
    let r = match name.to_ascii_lowercase().as_str() {
        // ── Strings ──────────────────────────────────────────────────────
        "len" => Ok(num_out(arg(args, 0).chars().count() as f64)),
        "upper" => Ok(arg(args, 0).to_uppercase()),
        "lower" => Ok(arg(args, 0).to_lowercase()),
        "strip" => Ok(arg(args, 0).trim().to_owned()),
        "left" => Ok(take_left(arg(args, 0), num(args, 1) as usize)),
        "right" => Ok(take_right(arg(args, 0), num(args, 1) as usize)),
        "mid" => Ok(take_mid(
            arg(args, 0),
            num(args, 1) as usize,
            args.get(2).map(|a| a.trim().parse().unwrap_or(0)),
        )),
        "index" => Ok(num_out(index_of(arg(args, 0), arg(args, 1)) as f64)),
        "token" => Ok(token(arg(args, 0), num(args, 1) as usize, args.get(2))),
        "tokens" => Ok(num_out(token_count(arg(args, 0), args.get(1)) as f64)),
        "replace" => Ok(arg(args, 0).replace(arg(args, 1), arg(args, 2))),
        "chr" => Ok(char::from_u32(num(args, 0) as u32)
            .map(String::from)
            .unwrap_or_default()),
        "asc" => Ok(num_out(
            arg(args, 0).chars().next().map(|c| c as u32).unwrap_or(0) as f64,
        )),
        "glue" => Ok(args.concat()),
        "rep" => Ok(arg(args, 0).repeat(num(args, 1).max(0.0) as usize)),

        // ── Arithmetic ───────────────────────────────────────────────────
        "calc" => calc(arg(args, 0)).map(num_out),
        "abs" => Ok(num_out(num(args, 0).abs())),
        "floor" => Ok(num_out(num(args, 0).floor())),
        "ceil" => Ok(num_out(num(args, 0).ceil())),
        "round" => Ok(num_out(num(args, 0).round())),
        "sqrt" => Ok(num_out(num(args, 0).sqrt())),
        "pow" => Ok(num_out(num(args, 0).powf(num(args, 1)))),
        "sin" => Ok(num_out(num(args, 0).sin())),
        "cos" => Ok(num_out(num(args, 0).cos())),
        "tan" => Ok(num_out(num(args, 0).tan())),
        "asin" => Ok(num_out(num(args, 0).asin())),
        "acos" => Ok(num_out(num(args, 0).acos())),
        "atan" => Ok(num_out(num(args, 0).atan())),
        "log" => Ok(num_out(num(args, 0).ln())),
        "exp" => Ok(num_out(num(args, 0).exp())),
        "rand" => Ok(num_out(rand(args))),

        // ── Files ────────────────────────────────────────────────────────
        "exists" => Ok(flag(std::fs::metadata(arg(args, 0)).is_ok())),
        "fsize" => Ok(num_out(
            std::fs::metadata(arg(args, 0))
                .map(|m| m.len() as f64)
                .unwrap_or(-1.0),
        )),
        "fopen" => Ok(num_out(
            interp
                .env_mut()
                .open_file(arg(args, 0), arg(args, 1))
                .map(|fd| fd as f64)
                .unwrap_or(-1.0),
        )),

        // ── Time ─────────────────────────────────────────────────────────
        "time" => Ok(num_out(unix_now() as f64)),
        "ctime" => Ok(format_ctime(if args.is_empty() {
            unix_now()
        } else {
            num(args, 0) as i64
        })),

        // ── Misc ─────────────────────────────────────────────────────────
        "null" => Ok(String::new()),
        "version" => Ok(env!("CARGO_PKG_VERSION").to_owned()),
        "match" => regex::Regex::new(arg(args, 1))
            .map(|re| flag(re.is_match(arg(args, 0))))
            .map_err(|e| format!("bad pattern in $match(): {e}")),

        // ── Host and environment introspection ───────────────────────────
        "me" => Ok(host.nick()),
        "channel" => Ok(host.channel()),
        "server" => Ok(host.server()),
        "window" => Ok(flag(host.window_exists(arg(args, 0)))),
        "dlgtext" => match interp.env().dialog(arg(args, 0)) {
            Some(dlg) => Ok(dlg.text(arg(args, 1)).unwrap_or_default().to_owned()),
            None => Err(format!("no such dialog '{}'", arg(args, 0))),
        },
        "sockbuf" => interp
            .env_mut()
            .stream_mut(arg(args, 0))
            .map(|s| num_out(s.buffered_len() as f64)),
        "sockname" => match interp.env_mut().socket_mut(arg(args, 0)) {
            Ok(SockHandle::Stream(s)) => Ok(s.peer()),
            Ok(SockHandle::Listener(l)) => Ok(num_out(l.port() as f64)),
            Err(e) => Err(e),
        },
        "timerexists" => Ok(flag(interp.env().timer_exists(arg(args, 0)))),

        _ => return None,
    };
    Some(r)
}

// ── Argument helpers ──────────────────────────────────────────────────────────

fn arg(args: &[String], i: usize) -> &str {
    args.get(i).map(|s| s.as_str()).unwrap_or("")
}

fn num(args: &[String], i: usize) -> f64 {
    arg(args, i).trim().parse().unwrap_or(0.0)
}

fn num_out(n: f64) -> String {
    Value::from_num(n).as_text()
}

fn flag(b: bool) -> String {
    if b { "1" } else { "0" }.to_owned()
}

// ── String helpers ────────────────────────────────────────────────────────────

fn take_left(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn take_right(s: &str, n: usize) -> String {
    let len = s.chars().count();
    s.chars().skip(len.saturating_sub(n)).collect()
}

/// 1-based start; `len` of `None` means "to the end".
fn take_mid(s: &str, start: usize, len: Option<usize>) -> String {
    let skip = start.saturating_sub(1);
    match len {
        Some(n) => s.chars().skip(skip).take(n).collect(),
        None => s.chars().skip(skip).collect(),
    }
}

/// 1-based position of `needle`, 0 when absent.
fn index_of(s: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    match s.find(needle) {
        Some(byte_pos) => s[..byte_pos].chars().count() + 1,
        None => 0,
    }
}

fn split_tokens<'a>(s: &'a str, delim: Option<&String>) -> Vec<&'a str> {
    match delim.map(|d| d.as_str()).filter(|d| !d.is_empty()) {
        Some(d) => s.split(d).collect(),
        None => s.split_whitespace().collect(),
    }
}

/// 1-based `n`th token; empty when out of range.
fn token(s: &str, n: usize, delim: Option<&String>) -> String {
    if n == 0 {
        return String::new();
    }
    split_tokens(s, delim)
        .get(n - 1)
        .map(|t| (*t).to_owned())
        .unwrap_or_default()
}

fn token_count(s: &str, delim: Option<&String>) -> usize {
    if s.is_empty() {
        return 0;
    }
    split_tokens(s, delim).len()
}

// ── $calc() ───────────────────────────────────────────────────────────────────

/// Tiny arithmetic evaluator: `+ - * / %`, unary minus, parentheses.
fn calc(expr: &str) -> Result<f64, String> {
    let chars: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let mut p = Calc { chars: &chars, pos: 0 };
    let v = p.sum()?;
    if p.pos != p.chars.len() {
        return Err(format!("bad arithmetic near '{}'", p.rest()));
    }
    Ok(v)
}

struct Calc<'a> {
    chars: &'a [char],
    pos: usize,
}

impl<'a> Calc<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }

    fn sum(&mut self) -> Result<f64, String> {
        let mut v = self.product()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.product()?;
            if op == '+' {
                v += rhs;
            } else {
                v -= rhs;
            }
        }
        Ok(v)
    }

    fn product(&mut self) -> Result<f64, String> {
        let mut v = self.unary()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            match op {
                '*' => v *= rhs,
                '/' => v /= rhs, // IEEE semantics: x/0 is inf/nan
                _ => v %= rhs,
            }
        }
        Ok(v)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.peek() == Some('-') {
            self.pos += 1;
            return Ok(-self.unary()?);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let v = self.sum()?;
                if self.peek() != Some(')') {
                    return Err("unmatched paren in arithmetic".to_owned());
                }
                self.pos += 1;
                Ok(v)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                text.parse()
                    .map_err(|_| format!("bad number '{text}'"))
            }
            _ => Err(format!("bad arithmetic near '{}'", self.rest())),
        }
    }
}

// ── $rand() ───────────────────────────────────────────────────────────────────

thread_local! {
    static RNG: Cell<u64> = Cell::new(seed());
}

fn seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e3779b97f4a7c15)
        | 1
}

fn next_u64() -> u64 {
    RNG.with(|cell| {
        // xorshift64*
        let mut x = cell.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        cell.set(x);
        x.wrapping_mul(0x2545f4914f6cdd1d)
    })
}

/// `$rand(n)` → 0..n-1; `$rand(a, b)` → a..=b.
fn rand(args: &[String]) -> f64 {
    let r = next_u64();
    match args.len() {
        0 => 0.0,
        1 => {
            let n = num(args, 0).max(0.0) as u64;
            if n == 0 {
                0.0
            } else {
                (r % n) as f64
            }
        }
        _ => {
            let a = num(args, 0) as i64;
            let b = num(args, 1) as i64;
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let span = (hi - lo + 1) as u64;
            lo as f64 + (r % span) as f64
        }
    }
}

// ── Time ──────────────────────────────────────────────────────────────────────

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Format an epoch as `YYYY-MM-DD HH:MM:SS` UTC.
fn format_ctime(epoch: i64) -> String {
    let days = epoch.div_euclid(86_400);
    let secs = epoch.rem_euclid(86_400);
    let (y, m, d) = civil_from_days(days);
    format!(
        "{y:04}-{m:02}-{d:02} {:02}:{:02}:{:02}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60
    )
}

/// Days since 1970-01-01 → (year, month, day).  Howard Hinnant's algorithm.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

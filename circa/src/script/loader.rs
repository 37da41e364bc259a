//! Block loader: compacted source → immutable [`Program`].
//!
//! One pass over the stripped lines.  At the top level (and inside a
//! `script "name" { … }` wrapper) the loader expects block keywords:
//! `meta`, `function`, `menu`, `dialog`.  `meta` carries the wiring
//! sub-statements (`include`, `command`, `event`, `timer`); `function`
//! bodies are parsed into statement trees right here, so nothing is
//! re-scanned at call time.
//!
//! Reloading builds a fresh `Program` and replaces the old one wholesale.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::event::EventKind;

use super::stmt::{self, Stmt};
use super::strip::{self, Compacted};

// ── Errors ────────────────────────────────────────────────────────────────────

/// What went wrong at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    UnterminatedEscape,
    UnmatchedBrace,
    UnexpectedToken,
    UnexpectedEof,
    MalformedHeader,
    UnknownBlock,
    UnknownMeta,
    UnknownEvent,
    DuplicateTimer,
    DuplicateFunction,
    DuplicateControl,
    IncludeCycle,
    Io,
}

impl LoadErrorKind {
    fn describe(self) -> &'static str {
        match self {
            LoadErrorKind::UnterminatedEscape => "line ends with an unterminated escape",
            LoadErrorKind::UnmatchedBrace => "unmatched brace",
            LoadErrorKind::UnexpectedToken => "unexpected token",
            LoadErrorKind::UnexpectedEof => "unexpected end of file",
            LoadErrorKind::MalformedHeader => "malformed function header",
            LoadErrorKind::UnknownBlock => "unknown block keyword",
            LoadErrorKind::UnknownMeta => "unknown meta statement",
            LoadErrorKind::UnknownEvent => "unknown event name",
            LoadErrorKind::DuplicateTimer => "duplicate timer name",
            LoadErrorKind::DuplicateFunction => "duplicate function name",
            LoadErrorKind::DuplicateControl => "duplicate dialog control name",
            LoadErrorKind::IncludeCycle => "include cycle",
            LoadErrorKind::Io => "cannot read script file",
        }
    }
}

/// A load-time failure: kind, offending token, and source line.
///
/// The parser raises these with compacted line numbers; [`load_file`] and
/// friends rewrite them to original `file:line` coordinates before they
/// reach the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub token: String,
    pub line: u32,
    pub file: String,
}

impl LoadError {
    pub fn new(kind: LoadErrorKind, token: impl Into<String>, line: u32) -> Self {
        LoadError {
            kind,
            token: token.into(),
            line,
            file: String::new(),
        }
    }

    /// Rewrite a compacted-line error to original source coordinates.
    fn resolve(mut self, file: &str, compacted: &Compacted) -> Self {
        if self.file.is_empty() {
            if let Some(loc) = compacted.origin(self.line) {
                self.line = loc.line;
                self.file = loc.file.clone();
            } else {
                self.file = file.to_owned();
            }
        }
        self
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.describe())?;
        if !self.token.is_empty() {
            write!(f, " near '{}'", self.token)?;
        }
        if self.file.is_empty() {
            write!(f, " at line {}", self.line)
        } else {
            write!(f, " at {}:{}", self.file, self.line)
        }
    }
}

impl std::error::Error for LoadError {}

// ── Program tables ────────────────────────────────────────────────────────────

/// Declared formal parameters of a function.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// Named formals, bound positionally.
    Fixed(Vec<String>),
    /// `(...)`: arguments bind as `%1..%N` plus `%0` = all, space-joined.
    Variadic,
}

/// A loaded function: formals and body parsed once, at load.
#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub name: String,
    pub params: Params,
    pub body: Vec<Stmt>,
    /// Original source line of the header, for diagnostics.
    pub line: u32,
    pub file: String,
}

/// A timer declared in a `meta` block, armed when the script is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerDecl {
    pub name: String,
    pub secs: f64,
    pub function: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    Channel,
    Query,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuItem {
    Entry { label: String, function: String },
    Separator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuDef {
    pub kind: MenuKind,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Label,
    Button,
    EditBox,
    ListBox,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlDef {
    pub kind: ControlKind,
    pub name: String,
    /// Initial text (label caption, button caption, editbox contents).
    pub text: String,
    /// Function a button invokes when pressed.
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DialogDef {
    pub name: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub controls: Vec<ControlDef>,
}

impl DialogDef {
    pub fn control(&self, name: &str) -> Option<&ControlDef> {
        self.controls
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Everything the loader produced from one script (plus its includes).
///
/// Immutable after load; a reload builds a new `Program` from scratch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Script names from `script "name" { … }` wrappers, in load order.
    pub scripts: Vec<String>,
    /// Lowercased function name → definition.
    pub functions: HashMap<String, FnDef>,
    /// Lowercased command name → function name.  Last write wins.
    pub commands: HashMap<String, String>,
    /// Event → bound function names, in registration order.
    pub events: HashMap<EventKind, Vec<String>>,
    /// Lowercased timer name → declaration.
    pub timers: HashMap<String, TimerDecl>,
    pub menus: Vec<MenuDef>,
    /// Lowercased dialog name → definition.
    pub dialogs: HashMap<String, DialogDef>,
    /// Files pulled in via `include`, in load order.
    pub includes: Vec<PathBuf>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&FnDef> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn command(&self, name: &str) -> Option<&str> {
        self.commands.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn dialog(&self, name: &str) -> Option<&DialogDef> {
        self.dialogs.get(&name.to_ascii_lowercase())
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Load a script file, following `include`s relative to it.
pub fn load_file(path: &Path) -> Result<Program, LoadError> {
    let mut loader = Loader::default();
    loader.load_path(path, 0)?;
    Ok(loader.program)
}

/// Load from an in-memory string.  `include` paths resolve against the
/// current directory.
pub fn load_str(file: &str, src: &str) -> Result<Program, LoadError> {
    let mut loader = Loader::default();
    loader.load_source(file, None, src)?;
    Ok(loader.program)
}

#[derive(Default)]
struct Loader {
    program: Program,
    /// Canonicalized include chain currently in progress, outermost first.
    /// Only a path on this stack is a cycle.
    loading: Vec<PathBuf>,
    /// Files already loaded in full; a repeat include is skipped, so a
    /// diamond (two files both including the same library) loads it once.
    loaded: HashSet<PathBuf>,
}

impl Loader {
    fn load_path(&mut self, path: &Path, at_line: u32) -> Result<(), LoadError> {
        let canon = path.canonicalize().map_err(|e| {
            LoadError::new(LoadErrorKind::Io, format!("{}: {e}", path.display()), at_line)
        })?;
        if self.loading.contains(&canon) {
            return Err(LoadError::new(
                LoadErrorKind::IncludeCycle,
                path.display().to_string(),
                at_line,
            ));
        }
        if !self.loaded.insert(canon.clone()) {
            return Ok(());
        }
        let src = std::fs::read_to_string(&canon).map_err(|e| {
            LoadError::new(LoadErrorKind::Io, format!("{}: {e}", path.display()), at_line)
        })?;
        let name = path.display().to_string();
        self.loading.push(canon.clone());
        let result = self.load_source(&name, canon.parent(), &src);
        self.loading.pop();
        result
    }

    fn load_source(&mut self, file: &str, dir: Option<&Path>, src: &str) -> Result<(), LoadError> {
        let compacted = strip::strip(file, src).map_err(|e| e.resolve(file, &Compacted::default()))?;
        let lines = numbered(&compacted);
        let mut parser = FileParser {
            lines: &lines,
            pos: 0,
            file,
        };
        let includes = parser
            .parse_blocks(&mut self.program, None)
            .map_err(|e| e.resolve(file, &compacted))?;

        for (line, rel) in includes {
            let target = resolve_include(dir, &rel);
            self.program.includes.push(target.clone());
            let origin = compacted
                .origin(line)
                .map(|loc| loc.line)
                .unwrap_or(line);
            self.load_path(&target, origin).map_err(|mut e| {
                if e.file.is_empty() {
                    e.file = file.to_owned();
                }
                e
            })?;
        }
        Ok(())
    }
}

fn numbered(compacted: &Compacted) -> Vec<(u32, String)> {
    compacted
        .lines
        .iter()
        .enumerate()
        .map(|(i, l)| (i as u32 + 1, l.clone()))
        .collect()
}

fn resolve_include(dir: Option<&Path>, arg: &str) -> PathBuf {
    let p = Path::new(arg);
    if p.is_absolute() {
        p.to_owned()
    } else {
        match dir {
            Some(d) => d.join(p),
            None => p.to_owned(),
        }
    }
}

// ── File parser ───────────────────────────────────────────────────────────────

struct FileParser<'a> {
    lines: &'a [(u32, String)],
    pos: usize,
    file: &'a str,
}

impl<'a> FileParser<'a> {
    fn next_line(&mut self) -> Option<(u32, String)> {
        let item = self.lines.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    /// Parse block keywords until EOF or, when `opened_at` is set, a `}`.
    /// Returns `include` directives as `(compacted line, path)` pairs.
    fn parse_blocks(
        &mut self,
        program: &mut Program,
        opened_at: Option<u32>,
    ) -> Result<Vec<(u32, String)>, LoadError> {
        let mut includes = Vec::new();
        loop {
            let (line, text) = match self.next_line() {
                Some(item) => item,
                None => {
                    if let Some(open_line) = opened_at {
                        return Err(LoadError::new(LoadErrorKind::UnexpectedEof, "{", open_line));
                    }
                    return Ok(includes);
                }
            };
            if text == "}" {
                if opened_at.is_none() {
                    return Err(LoadError::new(LoadErrorKind::UnmatchedBrace, "}", line));
                }
                return Ok(includes);
            }
            let (word, rest) = split_word(&text);
            match word.to_ascii_lowercase().as_str() {
                "script" => {
                    let name = parse_script_header(line, rest)?;
                    program.scripts.push(name);
                    includes.extend(self.parse_blocks(program, Some(line))?);
                }
                "meta" => {
                    expect_open(line, rest)?;
                    includes.extend(self.parse_meta(program, line)?);
                }
                "function" => self.parse_function(program, line, rest)?,
                "menu" => self.parse_menu(program, line, rest)?,
                "dialog" => self.parse_dialog(program, line, rest)?,
                other => {
                    return Err(LoadError::new(LoadErrorKind::UnknownBlock, other, line));
                }
            }
        }
    }

    fn parse_meta(
        &mut self,
        program: &mut Program,
        opened_at: u32,
    ) -> Result<Vec<(u32, String)>, LoadError> {
        let mut includes = Vec::new();
        loop {
            let (line, text) = self
                .next_line()
                .ok_or_else(|| LoadError::new(LoadErrorKind::UnexpectedEof, "meta", opened_at))?;
            if text == "}" {
                return Ok(includes);
            }
            let (word, rest) = split_word(&text);
            match word.to_ascii_lowercase().as_str() {
                "include" => {
                    if rest.is_empty() {
                        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, "include", line));
                    }
                    includes.push((line, rest.to_owned()));
                }
                "command" => {
                    let (name, function) = split_word(rest);
                    if name.is_empty() || function.is_empty() {
                        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line));
                    }
                    // Last write wins.
                    program
                        .commands
                        .insert(name.to_ascii_lowercase(), function.to_owned());
                }
                "event" => {
                    let (name, function) = split_word(rest);
                    let kind: EventKind = name
                        .parse()
                        .map_err(|()| LoadError::new(LoadErrorKind::UnknownEvent, name, line))?;
                    if function.is_empty() {
                        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line));
                    }
                    program
                        .events
                        .entry(kind)
                        .or_default()
                        .push(function.to_owned());
                }
                "timer" => {
                    let (name, rest) = split_word(rest);
                    let (secs, function) = split_word(rest);
                    let secs: f64 = secs.parse().map_err(|_| {
                        LoadError::new(LoadErrorKind::UnexpectedToken, secs, line)
                    })?;
                    if name.is_empty() || function.is_empty() {
                        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, text.as_str(), line));
                    }
                    let key = name.to_ascii_lowercase();
                    if program.timers.contains_key(&key) {
                        return Err(LoadError::new(LoadErrorKind::DuplicateTimer, name, line));
                    }
                    program.timers.insert(
                        key,
                        TimerDecl {
                            name: name.to_owned(),
                            secs,
                            function: function.to_owned(),
                        },
                    );
                }
                other => {
                    return Err(LoadError::new(LoadErrorKind::UnknownMeta, other, line));
                }
            }
        }
    }

    fn parse_function(
        &mut self,
        program: &mut Program,
        line: u32,
        rest: &str,
    ) -> Result<(), LoadError> {
        let (name, params) = parse_fn_header(line, rest)?;
        let body_lines = self.collect_body(line)?;
        let body = stmt::parse_body(&body_lines)?;

        let key = name.to_ascii_lowercase();
        if program.functions.contains_key(&key) {
            return Err(LoadError::new(LoadErrorKind::DuplicateFunction, name, line));
        }
        program.functions.insert(
            key,
            FnDef {
                name,
                params,
                body,
                line,
                file: self.file.to_owned(),
            },
        );
        Ok(())
    }

    /// Collect a block's interior lines, tracking brace depth at line
    /// granularity: a line ending in `{` (not `\{`) opens, a line starting
    /// with `}` closes.  The final `}` is consumed, not returned.
    fn collect_body(&mut self, opened_at: u32) -> Result<Vec<(u32, String)>, LoadError> {
        let mut depth = 1i32;
        let mut body = Vec::new();
        loop {
            let (line, text) = self
                .next_line()
                .ok_or_else(|| LoadError::new(LoadErrorKind::UnmatchedBrace, "{", opened_at))?;
            if text.starts_with('}') {
                depth -= 1;
                if depth == 0 {
                    if text != "}" {
                        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, text.as_str(), line));
                    }
                    return Ok(body);
                }
            }
            if opens_block(&text) {
                depth += 1;
            }
            body.push((line, text));
        }
    }

    fn parse_menu(&mut self, program: &mut Program, line: u32, rest: &str) -> Result<(), LoadError> {
        let (kind_word, tail) = split_word(rest);
        let kind = match kind_word.to_ascii_lowercase().as_str() {
            "channel" => MenuKind::Channel,
            "query" => MenuKind::Query,
            "status" => MenuKind::Status,
            other => return Err(LoadError::new(LoadErrorKind::UnexpectedToken, other, line)),
        };
        expect_open(line, tail)?;

        let mut items = Vec::new();
        loop {
            let (item_line, text) = self
                .next_line()
                .ok_or_else(|| LoadError::new(LoadErrorKind::UnexpectedEof, "menu", line))?;
            if text == "}" {
                break;
            }
            if text == "-" {
                items.push(MenuItem::Separator);
                continue;
            }
            let (label, function) = match take_quoted(&text) {
                Some((label, rest)) => (label, rest.trim().to_owned()),
                None => {
                    let (l, f) = split_word(&text);
                    (l.to_owned(), f.to_owned())
                }
            };
            if label.is_empty() || function.is_empty() || function.contains(char::is_whitespace) {
                return Err(LoadError::new(
                    LoadErrorKind::UnexpectedToken,
                    text.as_str(),
                    item_line,
                ));
            }
            items.push(MenuItem::Entry { label, function });
        }
        program.menus.push(MenuDef { kind, items });
        Ok(())
    }

    fn parse_dialog(
        &mut self,
        program: &mut Program,
        line: u32,
        rest: &str,
    ) -> Result<(), LoadError> {
        let (name, tail) = split_word(rest);
        if name.is_empty() {
            return Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line));
        }
        expect_open(line, tail)?;

        let mut def = DialogDef {
            name: name.to_owned(),
            ..DialogDef::default()
        };
        loop {
            let (item_line, text) = self
                .next_line()
                .ok_or_else(|| LoadError::new(LoadErrorKind::UnexpectedEof, "dialog", line))?;
            if text == "}" {
                break;
            }
            let (word, rest) = split_word(&text);
            match word.to_ascii_lowercase().as_str() {
                "title" => {
                    def.title = match take_quoted(rest) {
                        Some((t, _)) => t,
                        None => rest.to_owned(),
                    };
                }
                "size" => {
                    let (w, h) = split_word(rest);
                    def.width = w.parse().map_err(|_| {
                        LoadError::new(LoadErrorKind::UnexpectedToken, w, item_line)
                    })?;
                    def.height = h.trim().parse().map_err(|_| {
                        LoadError::new(LoadErrorKind::UnexpectedToken, h, item_line)
                    })?;
                }
                kind @ ("label" | "button" | "editbox" | "listbox") => {
                    let kind = match kind {
                        "label" => ControlKind::Label,
                        "button" => ControlKind::Button,
                        "editbox" => ControlKind::EditBox,
                        _ => ControlKind::ListBox,
                    };
                    let (ctl_name, tail) = split_word(rest);
                    if ctl_name.is_empty() {
                        return Err(LoadError::new(
                            LoadErrorKind::UnexpectedToken,
                            text.as_str(),
                            item_line,
                        ));
                    }
                    if def.control(ctl_name).is_some() {
                        return Err(LoadError::new(
                            LoadErrorKind::DuplicateControl,
                            ctl_name,
                            item_line,
                        ));
                    }
                    let (ctl_text, tail) = match take_quoted(tail) {
                        Some((t, rest)) => (t, rest.trim().to_owned()),
                        None => (String::new(), tail.to_owned()),
                    };
                    def.controls.push(ControlDef {
                        kind,
                        name: ctl_name.to_owned(),
                        text: ctl_text,
                        function: tail,
                    });
                }
                other => {
                    return Err(LoadError::new(LoadErrorKind::UnexpectedToken, other, item_line));
                }
            }
        }

        program.dialogs.insert(name.to_ascii_lowercase(), def);
        Ok(())
    }
}

// ── Header parsing ────────────────────────────────────────────────────────────

/// `script "name" {` (quotes optional).
fn parse_script_header(line: u32, rest: &str) -> Result<String, LoadError> {
    let (name, tail) = match take_quoted(rest) {
        Some((name, tail)) => (name, tail.trim().to_owned()),
        None => {
            let (n, t) = split_word(rest);
            (n.to_owned(), t.to_owned())
        }
    };
    if name.is_empty() {
        return Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line));
    }
    expect_open(line, &tail)?;
    Ok(name)
}

/// `name(a, b) {` or `name(...) {`, all on the header line.
fn parse_fn_header(line: u32, rest: &str) -> Result<(String, Params), LoadError> {
    let open = rest
        .find('(')
        .ok_or_else(|| LoadError::new(LoadErrorKind::MalformedHeader, rest, line))?;
    let close = rest
        .find(')')
        .ok_or_else(|| LoadError::new(LoadErrorKind::MalformedHeader, rest, line))?;
    if close < open {
        return Err(LoadError::new(LoadErrorKind::MalformedHeader, rest, line));
    }

    let name = rest[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(LoadError::new(LoadErrorKind::MalformedHeader, name, line));
    }
    if rest[close + 1..].trim() != "{" {
        return Err(LoadError::new(LoadErrorKind::MalformedHeader, rest, line));
    }

    let inner = rest[open + 1..close].trim();
    let params = if inner.is_empty() {
        Params::Fixed(Vec::new())
    } else if inner == "..." {
        Params::Variadic
    } else {
        let mut names = Vec::new();
        for piece in inner.split(',') {
            let p = piece.trim();
            if p.is_empty() || !p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(LoadError::new(LoadErrorKind::MalformedHeader, piece, line));
            }
            names.push(p.to_owned());
        }
        Params::Fixed(names)
    };
    Ok((name.to_owned(), params))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn expect_open(line: u32, rest: &str) -> Result<(), LoadError> {
    if rest.trim() == "{" {
        Ok(())
    } else {
        Err(LoadError::new(LoadErrorKind::UnexpectedToken, rest, line))
    }
}

/// A line ending in `{` opens a block, unless the brace is escaped.
fn opens_block(text: &str) -> bool {
    text.ends_with('{') && !text.ends_with("\\{")
}

/// Leading `"quoted text"` → `(text, remainder)`.
fn take_quoted(s: &str) -> Option<(String, &str)> {
    let s = s.trim_start();
    let rest = s.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some((rest[..end].to_owned(), &rest[end + 1..]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn load(src: &str) -> Program {
        load_str("test.cs", src).expect("load failed")
    }

    fn load_err(src: &str) -> LoadError {
        load_str("test.cs", src).expect_err("expected load error")
    }

    #[test]
    fn empty_source() {
        let p = load("");
        assert!(p.functions.is_empty());
        assert!(p.commands.is_empty());
    }

    #[test]
    fn simple_function() {
        let p = load("function greet(who) {\nsay hi %who\n}");
        let f = p.function("greet").unwrap();
        assert_eq!(f.params, Params::Fixed(vec!["who".into()]));
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn function_lookup_case_insensitive() {
        let p = load("function Greet() {\n}");
        assert!(p.function("GREET").is_some());
        assert_eq!(p.function("greet").unwrap().name, "Greet");
    }

    #[test]
    fn variadic_params() {
        let p = load("function log(...) {\n}");
        assert_eq!(p.function("log").unwrap().params, Params::Variadic);
    }

    #[test]
    fn duplicate_function_rejected() {
        let err = load_err("function f() {\n}\nfunction F() {\n}");
        assert_eq!(err.kind, LoadErrorKind::DuplicateFunction);
    }

    #[test]
    fn script_wrapper_block() {
        let p = load("script \"autogreet\" {\nfunction f() {\n}\n}");
        assert_eq!(p.scripts, vec!["autogreet"]);
        assert!(p.function("f").is_some());
    }

    #[test]
    fn meta_wiring() {
        let p = load(
            "meta {\ncommand greet doGreet\nevent te_join onJoin\nevent te_join logJoin\ntimer poll 30 doPoll\n}",
        );
        assert_eq!(p.command("GREET"), Some("doGreet"));
        assert_eq!(
            p.events[&EventKind::Join],
            vec!["onJoin".to_owned(), "logJoin".to_owned()]
        );
        assert_eq!(p.timers["poll"].secs, 30.0);
    }

    #[test]
    fn command_last_write_wins() {
        let p = load("meta {\ncommand x f1\ncommand x f2\n}");
        assert_eq!(p.command("x"), Some("f2"));
    }

    #[test]
    fn duplicate_timer_rejected() {
        let err = load_err("meta {\ntimer poll 30 a\ntimer POLL 60 b\n}");
        assert_eq!(err.kind, LoadErrorKind::DuplicateTimer);
        assert_eq!(err.token, "POLL");
    }

    #[test]
    fn unknown_event_rejected() {
        let err = load_err("meta {\nevent te_bogus f\n}");
        assert_eq!(err.kind, LoadErrorKind::UnknownEvent);
        assert_eq!(err.token, "te_bogus");
    }

    #[test]
    fn unknown_block_rejected() {
        let err = load_err("blorp {\n}");
        assert_eq!(err.kind, LoadErrorKind::UnknownBlock);
        assert_eq!(err.token, "blorp");
    }

    #[test]
    fn unknown_meta_rejected() {
        let err = load_err("meta {\nfrobnicate x\n}");
        assert_eq!(err.kind, LoadErrorKind::UnknownMeta);
    }

    #[test]
    fn malformed_header_reports_line() {
        let err = load_err("function ok() {\n}\nfunction f( {\n}");
        assert_eq!(err.kind, LoadErrorKind::MalformedHeader);
        assert_eq!(err.line, 3);
        assert_eq!(err.file, "test.cs");
    }

    #[test]
    fn header_split_across_lines_rejected() {
        let err = load_err("function f(a,\nb) {\n}");
        assert_eq!(err.kind, LoadErrorKind::MalformedHeader);
    }

    #[test]
    fn unmatched_brace_rejected() {
        let err = load_err("function f() {\nsay hi");
        assert_eq!(err.kind, LoadErrorKind::UnmatchedBrace);
    }

    #[test]
    fn stray_close_rejected() {
        let err = load_err("}");
        assert_eq!(err.kind, LoadErrorKind::UnmatchedBrace);
    }

    #[test]
    fn nested_blocks_collected() {
        let p = load("function f() {\nif (%x == 1) {\nsay one\n} else {\nsay two\n}\n}");
        let f = p.function("f").unwrap();
        assert!(matches!(&f.body[0], Stmt::If { .. }));
    }

    #[test]
    fn menu_block() {
        let p = load("menu channel {\n\"Give Ops\" giveOps\n-\nkick kickUser\n}");
        assert_eq!(p.menus.len(), 1);
        assert_eq!(p.menus[0].kind, MenuKind::Channel);
        assert_eq!(
            p.menus[0].items,
            vec![
                MenuItem::Entry {
                    label: "Give Ops".into(),
                    function: "giveOps".into()
                },
                MenuItem::Separator,
                MenuItem::Entry {
                    label: "kick".into(),
                    function: "kickUser".into()
                },
            ]
        );
    }

    #[test]
    fn dialog_block() {
        let p = load(
            "dialog prefs {\ntitle \"Preferences\"\nsize 320 200\nlabel caption \"Nick:\"\neditbox nickbox \"circa\"\nbutton ok \"OK\" savePrefs\n}",
        );
        let d = p.dialog("PREFS").unwrap();
        assert_eq!(d.title, "Preferences");
        assert_eq!((d.width, d.height), (320, 200));
        assert_eq!(d.controls.len(), 3);
        assert_eq!(d.control("ok").unwrap().function, "savePrefs");
        assert_eq!(d.control("nickbox").unwrap().kind, ControlKind::EditBox);
    }

    #[test]
    fn duplicate_control_rejected() {
        let err = load_err("dialog d {\nlabel x \"a\"\nbutton x \"b\" f\n}");
        assert_eq!(err.kind, LoadErrorKind::DuplicateControl);
        assert_eq!(err.token, "x");
    }

    #[test]
    fn error_line_maps_past_comments() {
        // Compacted line 1 is original line 3.
        let err = load_err("; banner\n\nblorp {\n}");
        assert_eq!(err.kind, LoadErrorKind::UnknownBlock);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn reload_is_idempotent() {
        let src = "meta {\ncommand g doGreet\nevent te_join onJoin\n}\nfunction doGreet(who) {\nsay hi %who\n}";
        let a = load(src);
        let b = load(src);
        assert_eq!(a, b);
    }

    #[test]
    fn include_pulls_in_functions() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib.cs");
        std::fs::File::create(&lib)
            .unwrap()
            .write_all(b"function helper() {\n}\n")
            .unwrap();
        let main = dir.path().join("main.cs");
        std::fs::File::create(&main)
            .unwrap()
            .write_all(b"meta {\ninclude lib.cs\n}\nfunction top() {\n}\n")
            .unwrap();

        let p = load_file(&main).unwrap();
        assert!(p.function("top").is_some());
        assert!(p.function("helper").is_some());
        assert_eq!(p.includes.len(), 1);
    }

    #[test]
    fn diamond_include_loads_shared_library_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("lib.cs"))
            .unwrap()
            .write_all(b"function shared() {\n}\n")
            .unwrap();
        for name in ["a.cs", "b.cs"] {
            std::fs::File::create(dir.path().join(name))
                .unwrap()
                .write_all(b"meta {\ninclude lib.cs\n}\n")
                .unwrap();
        }
        let main = dir.path().join("main.cs");
        std::fs::File::create(&main)
            .unwrap()
            .write_all(b"meta {\ninclude a.cs\ninclude b.cs\n}\nfunction top() {\n}\n")
            .unwrap();

        // The second include of lib.cs is skipped, so `shared` is not a
        // duplicate definition.
        let p = load_file(&main).unwrap();
        assert!(p.function("top").is_some());
        assert!(p.function("shared").is_some());
    }

    #[test]
    fn include_cycle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.cs");
        let b = dir.path().join("b.cs");
        std::fs::File::create(&a)
            .unwrap()
            .write_all(b"meta {\ninclude b.cs\n}\n")
            .unwrap();
        std::fs::File::create(&b)
            .unwrap()
            .write_all(b"meta {\ninclude a.cs\n}\n")
            .unwrap();

        let err = load_file(&a).unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::IncludeCycle);
    }

    #[test]
    fn missing_include_is_io_error() {
        let err = load_str("t.cs", "meta {\ninclude /nonexistent/nope.cs\n}").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::Io);
    }
}

//! The statement executor.
//!
//! [`Interp`] owns the loaded [`Program`] and the mutable [`Environment`];
//! the host is borrowed per call.  `runf` is the single entry point for
//! running a function: command dispatch, event firing, timer callbacks and
//! `$fn()` extraction all funnel through it.
//!
//! Control flow inside a body is a [`Flow`] signal propagated up by the
//! statement evaluator; `break`/`continue` that escape every loop in the
//! call surface as runtime errors rather than being swallowed.

use std::time::Instant;

use crate::event::EventKind;
use crate::host::{Host, HostAction};

use super::env::{Environment, SockHandle};
use super::expand;
use super::loader::{Params, Program};
use super::logic;
use super::stmt::Stmt;
use super::value::Value;

/// Deepest allowed `runf` nesting.  Recursive scripts hit this instead of
/// overflowing the real stack.
const MAX_DEPTH: usize = 100;

/// Result of executing a statement or block.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(String),
}

pub struct Interp {
    program: Program,
    env: Environment,
    depth: usize,
}

impl Interp {
    pub fn new(program: Program) -> Self {
        Interp {
            program,
            env: Environment::new(),
            depth: 0,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Swap in a freshly loaded program.  A reload replaces everything
    /// atomically: variables, open files, sockets, timers and dialog
    /// instances are discarded along with the old tables.
    pub fn replace_program(&mut self, program: Program) {
        self.program = program;
        self.env = Environment::new();
        self.depth = 0;
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Arm the timers declared in `meta` blocks.  Called once after load.
    pub fn arm_declared_timers(&mut self, now: Instant) {
        let decls: Vec<_> = self.program.timers.values().cloned().collect();
        for d in decls {
            // The loader already rejected duplicates.
            let _ = self.env.add_timer(&d.name, d.secs, &d.function, false, now);
        }
    }

    // ── Dispatch surface ──────────────────────────────────────────────────

    /// Run every function bound to `kind`, in registration order.  One
    /// binding's failure does not stop the others; errors are returned.
    pub fn fire_event(
        &mut self,
        host: &mut dyn Host,
        kind: EventKind,
        args: &[String],
    ) -> Vec<String> {
        let bound = self.program.events.get(&kind).cloned().unwrap_or_default();
        let mut errors = Vec::new();
        for function in bound {
            if let Err(e) = self.runf(host, &function, args, true) {
                errors.push(format!("{} -> {function}: {e}", kind.name()));
            }
        }
        errors
    }

    /// Run a script-registered `/command` with relaxed arity.
    pub fn run_slash_command(
        &mut self,
        host: &mut dyn Host,
        name: &str,
        args: &[String],
    ) -> Result<String, String> {
        match self.program.command(name) {
            Some(function) => {
                let function = function.to_owned();
                self.runf(host, &function, args, true)
            }
            None => Err(format!("unknown command '{name}'")),
        }
    }

    /// Fire due timers.  Each callback gets the timer name as its argument.
    pub fn tick(&mut self, host: &mut dyn Host, now: Instant) -> Vec<String> {
        let due = self.env.tick(now);
        let mut errors = Vec::new();
        for (timer, function) in due {
            if let Err(e) = self.runf(host, &function, &[timer.clone()], true) {
                errors.push(format!("timer {timer} -> {function}: {e}"));
            }
        }
        errors
    }

    // ── runf ──────────────────────────────────────────────────────────────

    /// Run a function to completion and return its value (empty when the
    /// body falls off the end without `return`).
    pub fn runf(
        &mut self,
        host: &mut dyn Host,
        name: &str,
        args: &[String],
        ignore_arity: bool,
    ) -> Result<String, String> {
        let def = self
            .program
            .function(name)
            .cloned()
            .ok_or_else(|| format!("no such function '{name}'"))?;

        if self.depth >= MAX_DEPTH {
            return Err(format!("call depth limit reached in '{name}'"));
        }

        if let Params::Fixed(formals) = &def.params {
            if !ignore_arity && formals.len() != args.len() {
                return Err(format!(
                    "'{}' takes {} argument(s), got {}",
                    def.name,
                    formals.len(),
                    args.len()
                ));
            }
        }

        self.depth += 1;
        self.env.push_frame();
        match &def.params {
            Params::Variadic => {
                self.env.bind_local("0", Value::from(args.join(" ")));
                for (i, a) in args.iter().enumerate() {
                    self.env.bind_local(&(i + 1).to_string(), Value::from(a.clone()));
                }
            }
            Params::Fixed(formals) => {
                for (j, formal) in formals.iter().enumerate() {
                    // Surplus actuals fold, space-joined, into the last
                    // formal; missing trailing ones bind empty.
                    let v = if j + 1 == formals.len() && args.len() > formals.len() {
                        args[j..].join(" ")
                    } else {
                        args.get(j).cloned().unwrap_or_default()
                    };
                    self.env.bind_local(formal, Value::from(v));
                }
            }
        }

        let flow = self.exec_block(host, &def.body);
        self.env.pop_frame();
        self.depth -= 1;

        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(String::new()),
            Flow::Break => Err(format!("'break' outside of a loop in '{}'", def.name)),
            Flow::Continue => Err(format!("'continue' outside of a loop in '{}'", def.name)),
        }
    }

    // ── Statement evaluation ──────────────────────────────────────────────

    fn exec_block(&mut self, host: &mut dyn Host, stmts: &[Stmt]) -> Result<Flow, String> {
        for stmt in stmts {
            match self.exec_stmt(host, stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, host: &mut dyn Host, stmt: &Stmt) -> Result<Flow, String> {
        match stmt {
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.solve_cond(host, cond)? {
                    self.exec_block(host, then_block)
                } else {
                    self.exec_block(host, else_block)
                }
            }
            Stmt::While { cond, body } => {
                while self.solve_cond(host, cond)? {
                    match self.exec_block(host, body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Var { name, value, local } => {
                let name = self.merge_var_name(host, name)?;
                let value = expand::extract(self, host, value)?;
                if *local {
                    self.env.bind_local(&name, Value::from(value));
                } else {
                    self.env.set(&name, Value::from(value));
                }
                Ok(Flow::Normal)
            }
            Stmt::Del { names } => {
                for name in names {
                    let name = self.merge_var_name(host, name)?;
                    self.env.delete(&name);
                }
                Ok(Flow::Normal)
            }
            Stmt::Inc { name, step } => self.step_var(host, name, step, 1.0),
            Stmt::Dec { name, step } => self.step_var(host, name, step, -1.0),
            Stmt::Sock { args } => self.exec_sock(host, args),
            Stmt::FileRead { args } => self.exec_fread(host, args),
            Stmt::FileWrite { args } => self.exec_fwrite(host, args),
            Stmt::FileSeek { args } => self.exec_fseek(host, args),
            Stmt::FileClose { args } => self.exec_fclose(host, args),
            Stmt::Timer { args, once } => self.exec_timer(host, args, *once),
            Stmt::Toolbar { args } => self.exec_toolbar(host, args),
            Stmt::Dlg { args } => self.exec_dlg(host, args),
            Stmt::Return { value } => {
                let v = expand::extract(self, host, value)?;
                Ok(Flow::Return(v))
            }
            Stmt::CommandLine { line } => {
                let line = expand::extract(self, host, line)?;
                let (word, rest) = split_word(&line);
                if let Some(function) = self.program.command(word).map(str::to_owned) {
                    let args: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
                    self.runf(host, &function, &args, true)?;
                } else if word.eq_ignore_ascii_case("raw") {
                    host.send_raw(rest);
                } else {
                    host.run_command(&line);
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn solve_cond(&mut self, host: &mut dyn Host, cond: &str) -> Result<bool, String> {
        let extracted = expand::extract(self, host, cond)?;
        logic::solve(&*host, &extracted)
    }

    /// Resolve a possibly computed variable name: `%arr+%i` concatenates
    /// the literal pieces with the values of the `%`-pieces.
    fn merge_var_name(&mut self, _host: &mut dyn Host, name: &str) -> Result<String, String> {
        let stripped = name.strip_prefix('%').unwrap_or(name);
        if !stripped.contains('+') {
            return Ok(stripped.to_owned());
        }
        let mut merged = String::new();
        for piece in stripped.split('+') {
            match piece.strip_prefix('%') {
                Some(var) => {
                    if let Some(v) = self.env.get(var) {
                        merged.push_str(&v.as_text());
                    }
                }
                None => merged.push_str(piece),
            }
        }
        if merged.is_empty() {
            return Err(format!("variable name '{name}' resolved to nothing"));
        }
        Ok(merged)
    }

    /// `inc`/`dec`: lenient by design, a non-numeric value reads as 0.
    fn step_var(
        &mut self,
        host: &mut dyn Host,
        name: &str,
        step: &Option<String>,
        sign: f64,
    ) -> Result<Flow, String> {
        let name = self.merge_var_name(host, name)?;
        let delta = match step {
            Some(s) => expand::extract(self, host, s)?.trim().parse().unwrap_or(1.0),
            None => 1.0,
        };
        let current = self.env.get(&name).map(Value::as_num).unwrap_or(0.0);
        self.env.set(&name, Value::from_num(current + sign * delta));
        Ok(Flow::Normal)
    }

    // ── sock ──────────────────────────────────────────────────────────────

    fn exec_sock(&mut self, host: &mut dyn Host, args: &str) -> Result<Flow, String> {
        let (sw, rest) = split_word(args);
        let letters = sw
            .strip_prefix('-')
            .ok_or_else(|| "sock: missing switches".to_owned())?;
        let mut binary = false;
        let mut primary: Option<char> = None;
        for c in letters.chars() {
            match c {
                'b' => binary = true,
                'o' | 'l' | 'a' | 'd' | 'r' | 'w' | 'c' => {
                    if primary.replace(c).is_some() {
                        return Err("sock: more than one primary action".to_owned());
                    }
                }
                other => return Err(format!("sock: unknown switch '-{other}'")),
            }
        }
        let primary = primary.ok_or_else(|| "sock: no primary action".to_owned())?;
        if binary && !matches!(primary, 'r' | 'w') {
            return Err("sock: -b only applies to -r and -w".to_owned());
        }

        let (name_tok, rest) = split_word(rest);
        let name = expand::extract(self, host, name_tok)?;
        if name.is_empty() {
            return Err("sock: missing socket name".to_owned());
        }

        match primary {
            'o' => {
                let (host_tok, rest) = split_word(rest);
                let (port_tok, _) = split_word(rest);
                let peer = expand::extract(self, host, host_tok)?;
                let port = self.parse_port(host, port_tok)?;
                let stream = host.socket_factory().connect(&peer, port)?;
                self.env.add_socket(&name, SockHandle::Stream(stream))?;
            }
            'l' => {
                let (port_tok, _) = split_word(rest);
                let port = self.parse_port(host, port_tok)?;
                let listener = host.socket_factory().listen(port)?;
                self.env.add_socket(&name, SockHandle::Listener(listener))?;
            }
            'a' => {
                let (from_tok, _) = split_word(rest);
                let from = expand::extract(self, host, from_tok)?;
                let accepted = self
                    .env
                    .listener_mut(&from)?
                    .accept_pending()
                    .ok_or_else(|| format!("sock: no pending connection on '{from}'"))?;
                self.env.add_socket(&name, SockHandle::Stream(accepted))?;
            }
            'd' => {
                if !self.env.listener_mut(&name)?.decline_pending() {
                    return Err(format!("sock: no pending connection on '{name}'"));
                }
            }
            'r' => {
                let (var_tok, _) = split_word(rest);
                let target = match var_tok.strip_prefix('%') {
                    Some(v) if !v.is_empty() => v,
                    Some(_) => return Err("sock: bad read target".to_owned()),
                    None if var_tok.is_empty() => "sockread",
                    None => {
                        return Err(format!(
                            "sock: read target '{var_tok}' must be a %variable"
                        ))
                    }
                };
                let data = self.env.stream_mut(&name)?.read_buffered();
                let value = if binary {
                    Value::Binary(data)
                } else {
                    Value::Text(String::from_utf8_lossy(&data).into_owned())
                };
                self.env.set(target, value);
            }
            'w' => {
                if binary {
                    let (var_tok, _) = split_word(rest);
                    let var = var_tok
                        .strip_prefix('%')
                        .ok_or_else(|| "sock: -wb needs a %variable".to_owned())?;
                    let data = self
                        .env
                        .get(var)
                        .map(|v| v.as_bytes().to_vec())
                        .unwrap_or_default();
                    self.env.stream_mut(&name)?.write(&data)?;
                } else {
                    let mut text = expand::extract(self, host, rest)?;
                    text.push('\n');
                    self.env.stream_mut(&name)?.write(text.as_bytes())?;
                }
            }
            'c' => self.env.close_socket(&name)?,
            _ => unreachable!(),
        }
        Ok(Flow::Normal)
    }

    fn parse_port(&mut self, host: &mut dyn Host, tok: &str) -> Result<u16, String> {
        let s = expand::extract(self, host, tok)?;
        s.trim()
            .parse()
            .map_err(|_| format!("sock: bad port '{s}'"))
    }

    // ── Files ─────────────────────────────────────────────────────────────

    fn parse_fd(&mut self, host: &mut dyn Host, tok: &str) -> Result<i64, String> {
        let s = expand::extract(self, host, tok)?;
        s.trim()
            .parse()
            .map_err(|_| format!("bad file descriptor '{s}'"))
    }

    fn exec_fread(&mut self, host: &mut dyn Host, args: &str) -> Result<Flow, String> {
        let (first, rest) = split_word(args);
        if first == "-b" {
            let (fd_tok, rest) = split_word(rest);
            let (n_tok, rest) = split_word(rest);
            let (var_tok, _) = split_word(rest);
            let fd = self.parse_fd(host, fd_tok)?;
            let n = expand::extract(self, host, n_tok)?
                .trim()
                .parse()
                .map_err(|_| format!("fread: bad byte count '{n_tok}'"))?;
            let var = var_tok
                .strip_prefix('%')
                .ok_or_else(|| "fread: target must be a %variable".to_owned())?;
            let bytes = self.env.read_bytes(fd, n)?;
            self.env.set(var, Value::Binary(bytes));
        } else {
            let (var_tok, _) = split_word(rest);
            let fd = self.parse_fd(host, first)?;
            let var = var_tok
                .strip_prefix('%')
                .ok_or_else(|| "fread: target must be a %variable".to_owned())?;
            let line = self.env.read_line(fd)?;
            self.env.set(var, Value::from(line));
        }
        Ok(Flow::Normal)
    }

    fn exec_fwrite(&mut self, host: &mut dyn Host, args: &str) -> Result<Flow, String> {
        let (first, rest) = split_word(args);
        if first == "-b" {
            let (fd_tok, rest) = split_word(rest);
            let (var_tok, _) = split_word(rest);
            let fd = self.parse_fd(host, fd_tok)?;
            let var = var_tok
                .strip_prefix('%')
                .ok_or_else(|| "fwrite: source must be a %variable".to_owned())?;
            let data = self
                .env
                .get(var)
                .map(|v| v.as_bytes().to_vec())
                .unwrap_or_default();
            self.env.write_bytes(fd, &data)?;
        } else {
            let fd = self.parse_fd(host, first)?;
            let text = expand::extract(self, host, rest)?;
            self.env.write_line(fd, &text)?;
        }
        Ok(Flow::Normal)
    }

    fn exec_fseek(&mut self, host: &mut dyn Host, args: &str) -> Result<Flow, String> {
        let (fd_tok, rest) = split_word(args);
        let (pos_tok, _) = split_word(rest);
        let fd = self.parse_fd(host, fd_tok)?;
        let pos = expand::extract(self, host, pos_tok)?
            .trim()
            .parse()
            .map_err(|_| format!("fseek: bad position '{pos_tok}'"))?;
        self.env.seek(fd, pos)?;
        Ok(Flow::Normal)
    }

    fn exec_fclose(&mut self, host: &mut dyn Host, args: &str) -> Result<Flow, String> {
        let (fd_tok, _) = split_word(args);
        let fd = self.parse_fd(host, fd_tok)?;
        self.env.close_file(fd)?;
        Ok(Flow::Normal)
    }

    // ── Timers ────────────────────────────────────────────────────────────

    fn exec_timer(&mut self, host: &mut dyn Host, args: &str, once: bool) -> Result<Flow, String> {
        let (first, rest) = split_word(args);
        if first == "-d" {
            let (name_tok, _) = split_word(rest);
            let name = expand::extract(self, host, name_tok)?;
            // Cancelling a timer that already fired or never existed is fine.
            self.env.cancel_timer(&name);
            return Ok(Flow::Normal);
        }
        let (secs_tok, rest) = split_word(rest);
        let (fn_tok, _) = split_word(rest);
        let name = expand::extract(self, host, first)?;
        let secs: f64 = expand::extract(self, host, secs_tok)?
            .trim()
            .parse()
            .map_err(|_| format!("timer: bad interval '{secs_tok}'"))?;
        let function = expand::extract(self, host, fn_tok)?;
        if name.is_empty() || function.is_empty() {
            return Err("timer: expected 'timer name seconds function'".to_owned());
        }
        self.env
            .add_timer(&name, secs, &function, once, Instant::now())?;
        Ok(Flow::Normal)
    }

    // ── Toolbar and dialogs ───────────────────────────────────────────────

    fn exec_toolbar(&mut self, host: &mut dyn Host, args: &str) -> Result<Flow, String> {
        let (sw, rest) = split_word(args);
        match sw {
            "-a" => {
                let (name_tok, rest) = split_word(rest);
                let name = expand::extract(self, host, name_tok)?;
                let (label, rest) = match take_quoted(rest) {
                    Some((label, tail)) => (label, tail.trim_start().to_owned()),
                    None => {
                        let (l, t) = split_word(rest);
                        (l.to_owned(), t.to_owned())
                    }
                };
                let label = expand::extract(self, host, &label)?;
                let (fn_tok, _) = split_word(&rest);
                let function = expand::extract(self, host, fn_tok)?;
                if name.is_empty() || function.is_empty() {
                    return Err("toolbar: expected '-a name label function'".to_owned());
                }
                host.action(HostAction::ToolbarAdd {
                    name,
                    label,
                    function,
                });
            }
            "-i" => {
                let (name_tok, rest) = split_word(rest);
                let name = expand::extract(self, host, name_tok)?;
                let path = expand::extract(self, host, rest)?;
                host.action(HostAction::ToolbarIcon { name, path });
            }
            "-d" => {
                let (name_tok, _) = split_word(rest);
                let name = expand::extract(self, host, name_tok)?;
                host.action(HostAction::ToolbarDelete { name });
            }
            "-f" => {
                let (name_tok, _) = split_word(rest);
                let name = expand::extract(self, host, name_tok)?;
                host.action(HostAction::ToolbarFlip { name });
            }
            other => return Err(format!("toolbar: unknown switch '{other}'")),
        }
        Ok(Flow::Normal)
    }

    fn exec_dlg(&mut self, host: &mut dyn Host, args: &str) -> Result<Flow, String> {
        let (sw, rest) = split_word(args);
        let (name_tok, rest) = split_word(rest);
        let name = expand::extract(self, host, name_tok)?;
        match sw {
            "-l" => {
                let def = self
                    .program
                    .dialog(&name)
                    .cloned()
                    .ok_or_else(|| format!("no such dialog '{name}'"))?;
                self.env.load_dialog(def);
            }
            "-s" => {
                self.env.dialog_mut(&name)?.visible = true;
                host.action(HostAction::DialogShow { name });
            }
            "-h" => {
                self.env.dialog_mut(&name)?.visible = false;
                host.action(HostAction::DialogHide { name });
            }
            "-c" => {
                if !self.env.close_dialog(&name) {
                    return Err(format!("no such dialog '{name}'"));
                }
                host.action(HostAction::DialogClose { name });
            }
            "-i" | "-d" | "-e" => {
                let (ctl_tok, rest) = split_word(rest);
                let control = expand::extract(self, host, ctl_tok)?;
                let text = if sw == "-d" {
                    String::new()
                } else {
                    expand::extract(self, host, rest)?
                };
                let dlg = self.env.dialog_mut(&name)?;
                let ok = if sw == "-e" {
                    dlg.append_line(&control, &text)
                } else {
                    dlg.set_text(&control, &text)
                };
                if !ok {
                    return Err(format!("no control '{control}' in dialog '{name}'"));
                }
                host.action(HostAction::DialogUpdate {
                    dialog: name,
                    control,
                });
            }
            other => return Err(format!("dlg: unknown switch '{other}'")),
        }
        Ok(Flow::Normal)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn take_quoted(s: &str) -> Option<(String, &str)> {
    let rest = s.trim_start().strip_prefix('"')?;
    let end = rest.find('"')?;
    Some((rest[..end].to_owned(), &rest[end + 1..]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

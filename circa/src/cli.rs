//! Headless command-line host.
//!
//! `circa <script.cs>` loads a script and drops into a small prompt loop:
//! lines starting with `/` dispatch as slash commands, everything else
//! fires `te_input`.  `--check` just loads and reports, `--call f a b`
//! runs one function and prints its return value.  Useful for developing
//! scripts without a client attached.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Instant;

use crate::event::EventKind;
use crate::host::{Host, HostAction, Role, SocketFactory};
use crate::script::{loader, Interp};

pub struct Args {
    pub script: PathBuf,
    pub check: bool,
    pub call: Option<(String, Vec<String>)>,
}

const USAGE: &str = "usage: circa [--check] [--call FUNCTION [ARG…]] SCRIPT";

pub fn parse_args<I: IntoIterator<Item = String>>(argv: I) -> Result<Args, String> {
    let mut script = None;
    let mut check = false;
    let mut call = None;
    let mut argv = argv.into_iter();

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--check" => check = true,
            "--call" => {
                let function = argv.next().ok_or_else(|| USAGE.to_owned())?;
                let mut rest: Vec<String> = argv.by_ref().collect();
                // The script path is the last positional.
                let path = rest.pop().ok_or_else(|| USAGE.to_owned())?;
                script = Some(PathBuf::from(path));
                call = Some((function, rest));
            }
            "--help" | "-h" => return Err(USAGE.to_owned()),
            other if other.starts_with('-') => {
                return Err(format!("unknown option '{other}'\n{USAGE}"));
            }
            other => script = Some(resolve_script(other)),
        }
    }

    Ok(Args {
        script: script.ok_or_else(|| USAGE.to_owned())?,
        check,
        call,
    })
}

/// Bare names that don't exist locally are tried in the user script dir.
fn resolve_script(arg: &str) -> PathBuf {
    let direct = PathBuf::from(arg);
    if direct.exists() {
        return direct;
    }
    match directories::ProjectDirs::from("", "", "circa") {
        Some(dirs) => {
            let candidate = dirs.config_dir().join("scripts").join(arg);
            if candidate.exists() {
                candidate
            } else {
                direct
            }
        }
        None => direct,
    }
}

/// A [`Host`] that prints to stdout, for the headless binary.
pub struct ConsoleHost {
    pub nick: String,
    factory: Box<dyn SocketFactory>,
}

impl ConsoleHost {
    pub fn new(factory: Box<dyn SocketFactory>) -> Self {
        ConsoleHost {
            nick: "circa".to_owned(),
            factory,
        }
    }
}

impl Host for ConsoleHost {
    fn run_command(&mut self, line: &str) {
        println!("-> {line}");
    }

    fn send_raw(&mut self, line: &str) {
        println!(">> {line}");
    }

    fn notice(&mut self, text: &str) {
        println!("!! {text}");
    }

    fn nick(&self) -> String {
        self.nick.clone()
    }

    fn channel(&self) -> String {
        String::new()
    }

    fn server(&self) -> String {
        String::new()
    }

    fn window_exists(&self, _name: &str) -> bool {
        false
    }

    fn is_on(&self, _channel: &str, _nick: &str) -> bool {
        false
    }

    fn role_of(&self, _channel: &str, _nick: &str) -> Option<Role> {
        None
    }

    fn action(&mut self, action: HostAction) {
        println!("ui {action:?}");
    }

    fn socket_factory(&mut self) -> &mut dyn SocketFactory {
        self.factory.as_mut()
    }
}

/// Run the CLI.  Returns the process exit code.
pub fn run(args: Args, factory: Box<dyn SocketFactory>) -> i32 {
    let program = match loader::load_file(&args.script) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("circa: {e}");
            return 1;
        }
    };
    if args.check {
        println!(
            "{}: {} function(s), {} command(s), {} event binding(s)",
            args.script.display(),
            program.functions.len(),
            program.commands.len(),
            program.events.values().map(Vec::len).sum::<usize>(),
        );
        return 0;
    }

    let mut interp = Interp::new(program);
    let mut host = ConsoleHost::new(factory);
    interp.arm_declared_timers(Instant::now());
    let errors = interp.fire_event(&mut host, EventKind::Load, &[]);
    report(&mut host, errors);

    if let Some((function, call_args)) = args.call {
        return match interp.runf(&mut host, &function, &call_args, true) {
            Ok(v) => {
                if !v.is_empty() {
                    println!("{v}");
                }
                0
            }
            Err(e) => {
                eprintln!("circa: {e}");
                1
            }
        };
    }

    prompt_loop(&mut interp, &mut host);
    let errors = interp.fire_event(&mut host, EventKind::Unload, &[]);
    report(&mut host, errors);
    0
}

fn prompt_loop(interp: &mut Interp, host: &mut ConsoleHost) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let errors = interp.tick(host, Instant::now());
        report(host, errors);

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(cmd) = line.strip_prefix('/') {
            let mut words = cmd.split_whitespace();
            let name = match words.next() {
                Some(n) => n.to_owned(),
                None => continue,
            };
            let cmd_args: Vec<String> = words.map(str::to_owned).collect();
            match interp.run_slash_command(host, &name, &cmd_args) {
                Ok(v) if !v.is_empty() => println!("{v}"),
                Ok(_) => {}
                Err(e) => host.notice(&e),
            }
        } else {
            let args = vec![line.to_owned()];
            let errors = interp.fire_event(host, EventKind::Input, &args);
            report(host, errors);
        }
    }
}

fn report(host: &mut ConsoleHost, errors: Vec<String>) {
    for e in errors {
        host.notice(&e);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

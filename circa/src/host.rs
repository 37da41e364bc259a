//! Capability interfaces the engine consumes from the surrounding client.
//!
//! The interpreter never talks to the IRC connection, the window system, or
//! the network directly.  Everything outside the engine is reached through
//! [`Host`] (synchronous queries and command dispatch) plus the
//! [`SocketFactory`]/[`ScriptSocket`] pair for `sock` statements.  UI-facing
//! side effects the engine cannot perform itself (toolbar buttons, dialog
//! surfaces) are queued as [`HostAction`]s for the shell to drain.

/// Channel status of a nick, as the `?@`/`?%`/`?+` predicates see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Op,
    HalfOp,
    Voice,
}

/// A UI side effect queued by the interpreter for the client shell.
#[derive(Debug, Clone, PartialEq)]
pub enum HostAction {
    /// `toolbar -a name label function`
    ToolbarAdd {
        name: String,
        label: String,
        function: String,
    },
    /// `toolbar -i name path`
    ToolbarIcon { name: String, path: String },
    /// `toolbar -d name`
    ToolbarDelete { name: String },
    /// `toolbar -f name` — toggle enabled state.
    ToolbarFlip { name: String },
    /// `dlg -s name` — realise a loaded dialog on screen.
    DialogShow { name: String },
    /// `dlg -h name`
    DialogHide { name: String },
    /// `dlg -c name` — tear the dialog down.
    DialogClose { name: String },
    /// A control inside a shown dialog changed value.
    DialogUpdate { dialog: String, control: String },
}

// ── Host ──────────────────────────────────────────────────────────────────────

/// Everything the engine needs from the client it is embedded in.
pub trait Host {
    /// Dispatch a command line the engine did not recognise as a statement
    /// keyword.  The engine has already resolved script-defined commands via
    /// the command table; this receives IRC commands and anything else.
    fn run_command(&mut self, line: &str);

    /// Send a raw protocol line to the server.  Scripts reach this with
    /// `raw <line>`, bypassing the host's command layer.
    fn send_raw(&mut self, line: &str);

    /// Surface a diagnostic message to the user.
    fn notice(&mut self, text: &str);

    /// Active nickname.
    fn nick(&self) -> String;

    /// Active channel (empty when none).
    fn channel(&self) -> String;

    /// Connected server name (empty when offline).
    fn server(&self) -> String;

    /// Window lookup by name.
    fn window_exists(&self, name: &str) -> bool;

    /// Is `nick` on `channel`?
    fn is_on(&self, channel: &str, nick: &str) -> bool;

    /// Channel status of `nick` on `channel`, if any.
    fn role_of(&self, channel: &str, nick: &str) -> Option<Role>;

    /// Queue a UI side effect.
    fn action(&mut self, action: HostAction);

    /// Factory for `sock` statements.
    fn socket_factory(&mut self) -> &mut dyn SocketFactory;
}

// ── Sockets ───────────────────────────────────────────────────────────────────

/// A connected stream owned by a script.
///
/// Reads are non-blocking by contract: [`ScriptSocket::read_buffered`]
/// returns whatever has already arrived (possibly nothing) and never waits.
pub trait ScriptSocket {
    /// Queue bytes for sending.
    fn write(&mut self, data: &[u8]) -> Result<(), String>;

    /// Drain and return everything received so far.
    fn read_buffered(&mut self) -> Vec<u8>;

    /// Bytes currently buffered for reading.
    fn buffered_len(&self) -> usize;

    /// Peer description (`host:port`).
    fn peer(&self) -> String;

    fn close(&mut self);
}

/// A listening socket created by `sock -l`.
pub trait ScriptListener {
    /// Take the oldest pending connection, if one has arrived.
    fn accept_pending(&mut self) -> Option<Box<dyn ScriptSocket>>;

    /// Drop the oldest pending connection.  Returns `false` when none waited.
    fn decline_pending(&mut self) -> bool;

    /// Local port the listener is bound to.
    fn port(&self) -> u16;

    fn close(&mut self);
}

/// Creates sockets for the engine.  The engine addresses sockets purely by
/// script-chosen name; the factory only deals in connections.
pub trait SocketFactory {
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn ScriptSocket>, String>;
    fn listen(&mut self, port: u16) -> Result<Box<dyn ScriptListener>, String>;
}

// ── RecordingHost ─────────────────────────────────────────────────────────────

/// A [`Host`] that records everything, backed by loopback sockets.
///
/// Used throughout the test suites and by `--check` mode in the binary; the
/// interactive binary uses [`crate::cli::ConsoleHost`].
#[derive(Default)]
pub struct RecordingHost {
    pub commands: Vec<String>,
    pub raw_lines: Vec<String>,
    pub notices: Vec<String>,
    pub actions: Vec<HostAction>,
    pub nick: String,
    pub channel: String,
    pub server: String,
    pub windows: Vec<String>,
    /// `(channel, nick, role)` membership rows for the solver predicates.
    pub members: Vec<(String, String, Option<Role>)>,
    factory: crate::net::LoopbackFactory,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            nick: "circa".to_owned(),
            ..Self::default()
        }
    }

    /// Add a membership row used by `?#`/`?@`/`?%`/`?+`/`?-`.
    pub fn join(&mut self, channel: &str, nick: &str, role: Option<Role>) {
        self.members
            .push((channel.to_owned(), nick.to_owned(), role));
    }
}

impl Host for RecordingHost {
    fn run_command(&mut self, line: &str) {
        self.commands.push(line.to_owned());
    }

    fn send_raw(&mut self, line: &str) {
        self.raw_lines.push(line.to_owned());
    }

    fn notice(&mut self, text: &str) {
        self.notices.push(text.to_owned());
    }

    fn nick(&self) -> String {
        self.nick.clone()
    }

    fn channel(&self) -> String {
        self.channel.clone()
    }

    fn server(&self) -> String {
        self.server.clone()
    }

    fn window_exists(&self, name: &str) -> bool {
        self.windows.iter().any(|w| w.eq_ignore_ascii_case(name))
    }

    fn is_on(&self, channel: &str, nick: &str) -> bool {
        self.members
            .iter()
            .any(|(c, n, _)| c.eq_ignore_ascii_case(channel) && n.eq_ignore_ascii_case(nick))
    }

    fn role_of(&self, channel: &str, nick: &str) -> Option<Role> {
        self.members
            .iter()
            .find(|(c, n, _)| c.eq_ignore_ascii_case(channel) && n.eq_ignore_ascii_case(nick))
            .and_then(|(_, _, r)| *r)
    }

    fn action(&mut self, action: HostAction) {
        self.actions.push(action);
    }

    fn socket_factory(&mut self) -> &mut dyn SocketFactory {
        &mut self.factory
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

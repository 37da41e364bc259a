//! Script event kinds.
//!
//! Scripts bind functions to these in their `meta` block (`event te_join
//! onJoin`).  The host fires them with a positional string-argument list;
//! one event name may carry any number of bindings.

use std::str::FromStr;

/// An event the host environment can fire into the scripting engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Disconnect,
    Error,
    Join,
    Part,
    Quit,
    Kick,
    Nick,
    Msg,
    PrivMsg,
    Action,
    Notice,
    Ctcp,
    CtcpReply,
    Topic,
    Mode,
    Invite,
    Numeric,
    Raw,
    Wallops,
    Ping,
    Input,
    Key,
    Focus,
    Timer,
    Load,
    Unload,
    Dcc,
    DccChat,
    SockRead,
    SockClose,
}

impl EventKind {
    /// Every event kind, in declaration order.
    pub const ALL: &'static [EventKind] = &[
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Error,
        EventKind::Join,
        EventKind::Part,
        EventKind::Quit,
        EventKind::Kick,
        EventKind::Nick,
        EventKind::Msg,
        EventKind::PrivMsg,
        EventKind::Action,
        EventKind::Notice,
        EventKind::Ctcp,
        EventKind::CtcpReply,
        EventKind::Topic,
        EventKind::Mode,
        EventKind::Invite,
        EventKind::Numeric,
        EventKind::Raw,
        EventKind::Wallops,
        EventKind::Ping,
        EventKind::Input,
        EventKind::Key,
        EventKind::Focus,
        EventKind::Timer,
        EventKind::Load,
        EventKind::Unload,
        EventKind::Dcc,
        EventKind::DccChat,
        EventKind::SockRead,
        EventKind::SockClose,
    ];

    /// The `te_*` name scripts use in `meta` blocks.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Connect => "te_connect",
            EventKind::Disconnect => "te_disconnect",
            EventKind::Error => "te_error",
            EventKind::Join => "te_join",
            EventKind::Part => "te_part",
            EventKind::Quit => "te_quit",
            EventKind::Kick => "te_kick",
            EventKind::Nick => "te_nick",
            EventKind::Msg => "te_msg",
            EventKind::PrivMsg => "te_privmsg",
            EventKind::Action => "te_action",
            EventKind::Notice => "te_notice",
            EventKind::Ctcp => "te_ctcp",
            EventKind::CtcpReply => "te_ctcpreply",
            EventKind::Topic => "te_topic",
            EventKind::Mode => "te_mode",
            EventKind::Invite => "te_invite",
            EventKind::Numeric => "te_numeric",
            EventKind::Raw => "te_raw",
            EventKind::Wallops => "te_wallops",
            EventKind::Ping => "te_ping",
            EventKind::Input => "te_input",
            EventKind::Key => "te_key",
            EventKind::Focus => "te_focus",
            EventKind::Timer => "te_timer",
            EventKind::Load => "te_load",
            EventKind::Unload => "te_unload",
            EventKind::Dcc => "te_dcc",
            EventKind::DccChat => "te_dccchat",
            EventKind::SockRead => "te_sockread",
            EventKind::SockClose => "te_sockclose",
        }
    }
}

impl FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == lower)
            .ok_or(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

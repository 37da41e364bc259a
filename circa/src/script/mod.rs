//! The circa scripting engine.
//!
//! Scripts are plain text files of `meta`, `function`, `menu` and `dialog`
//! blocks.  [`loader`] turns one (plus its includes) into an immutable
//! [`Program`]; [`Interp`] executes it against a mutable environment, with
//! all outside effects routed through a [`crate::host::Host`].
//!
//! ```no_run
//! use circa::host::RecordingHost;
//! use circa::script::{loader, Interp};
//!
//! let program = loader::load_str(
//!     "greet.cs",
//!     "function greet(who) {\nmsg #rust hello %who\n}",
//! )?;
//! let mut interp = Interp::new(program);
//! let mut host = RecordingHost::new();
//! interp.runf(&mut host, "greet", &["ferris".to_owned()], false)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builtins;
pub mod env;
pub mod expand;
pub mod interp;
pub mod loader;
pub mod logic;
pub mod stmt;
pub mod strip;
pub mod value;

pub use interp::{Flow, Interp};
pub use loader::{LoadError, LoadErrorKind, Program};
pub use value::Value;

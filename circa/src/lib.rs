//! circa — an embeddable automation-script engine for IRC clients.
//!
//! The crate is split along the seam the language itself draws: everything
//! under [`script`] is the engine (loader, extractor, solver, executor),
//! while [`host`], [`event`] and [`net`] are the capability surface a
//! client implements to embed it.  The `circa` binary in this crate is a
//! small headless host used to exercise scripts from the command line.

pub mod cli;
pub mod event;
pub mod host;
pub mod net;
pub mod script;

//! Mutable runtime state threaded through execution.
//!
//! One [`Environment`] per attached script: global variables, a stack of
//! call frames, open files and sockets, armed timers, and loaded dialog
//! instances.  Single logical thread of control, so nothing here locks.
//!
//! Variable names are case-insensitive and live in one table per scope; a
//! name holds either a text or a binary [`Value`], last assignment wins.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::time::{Duration, Instant};

use crate::host::{ScriptListener, ScriptSocket};

use super::loader::DialogDef;
use super::value::Value;

fn key(name: &str) -> String {
    name.trim_start_matches('%').to_ascii_lowercase()
}

// ── Frames and variables ──────────────────────────────────────────────────────

/// Local bindings for one function activation.
#[derive(Default)]
pub struct Frame {
    locals: HashMap<String, Value>,
}

/// An open file descriptor.
pub enum FileHandle {
    Read(BufReader<File>),
    Write(File),
    Append(File),
}

/// A named socket handle.
pub enum SockHandle {
    Stream(Box<dyn ScriptSocket>),
    Listener(Box<dyn ScriptListener>),
}

/// An armed timer.
pub struct TimerEntry {
    pub name: String,
    pub secs: f64,
    pub function: String,
    pub once: bool,
    next_due: Instant,
}

/// A dialog loaded with `dlg -l`, ready to show.
pub struct DialogInstance {
    pub def: DialogDef,
    /// Lowercased control name → current text.
    values: HashMap<String, String>,
    pub visible: bool,
}

impl DialogInstance {
    fn new(def: DialogDef) -> Self {
        let values = def
            .controls
            .iter()
            .map(|c| (c.name.to_ascii_lowercase(), c.text.clone()))
            .collect();
        DialogInstance {
            def,
            values,
            visible: false,
        }
    }

    pub fn text(&self, control: &str) -> Option<&str> {
        self.values
            .get(&control.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Set a control's text.  Returns false for an unknown control.
    pub fn set_text(&mut self, control: &str, text: &str) -> bool {
        let k = control.to_ascii_lowercase();
        if !self.values.contains_key(&k) {
            return false;
        }
        self.values.insert(k, text.to_owned());
        true
    }

    /// Append a line to a listbox-style control.
    pub fn append_line(&mut self, control: &str, line: &str) -> bool {
        let k = control.to_ascii_lowercase();
        match self.values.get_mut(&k) {
            Some(v) => {
                if !v.is_empty() {
                    v.push('\n');
                }
                v.push_str(line);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub struct Environment {
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    files: HashMap<i64, FileHandle>,
    next_fd: i64,
    sockets: HashMap<String, SockHandle>,
    timers: HashMap<String, TimerEntry>,
    dialogs: HashMap<String, DialogInstance>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            next_fd: 1,
            ..Environment::default()
        }
    }

    // ── Variables ─────────────────────────────────────────────────────────

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Lookup: the active frame shadows globals; outer frames are invisible.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let k = key(name);
        if let Some(frame) = self.frames.last() {
            if let Some(v) = frame.locals.get(&k) {
                return Some(v);
            }
        }
        self.globals.get(&k)
    }

    /// Bind into the active frame unconditionally (parameter binding,
    /// `local var`).  Falls through to globals outside any call.
    pub fn bind_local(&mut self, name: &str, value: Value) {
        let k = key(name);
        match self.frames.last_mut() {
            Some(frame) => {
                frame.locals.insert(k, value);
            }
            None => {
                self.globals.insert(k, value);
            }
        }
    }

    /// Plain `var`: writes through to globals unless the name already
    /// shadows in the active frame.
    pub fn set(&mut self, name: &str, value: Value) {
        let k = key(name);
        if let Some(frame) = self.frames.last_mut() {
            if frame.locals.contains_key(&k) {
                frame.locals.insert(k, value);
                return;
            }
        }
        self.globals.insert(k, value);
    }

    /// `del`: the active frame first, else globals.  Unset names are fine.
    pub fn delete(&mut self, name: &str) {
        let k = key(name);
        if let Some(frame) = self.frames.last_mut() {
            if frame.locals.remove(&k).is_some() {
                return;
            }
        }
        self.globals.remove(&k);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(&key(name))
    }

    // ── Files ─────────────────────────────────────────────────────────────

    /// Open a file; modes are `r`, `w`, `a`.  Returns the new descriptor.
    pub fn open_file(&mut self, path: &str, mode: &str) -> Result<i64, String> {
        let handle = match mode {
            "r" => FileHandle::Read(BufReader::new(
                File::open(path).map_err(|e| format!("cannot open {path}: {e}"))?,
            )),
            "w" => FileHandle::Write(
                File::create(path).map_err(|e| format!("cannot open {path}: {e}"))?,
            ),
            "a" => FileHandle::Append(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| format!("cannot open {path}: {e}"))?,
            ),
            other => return Err(format!("unknown file mode '{other}'")),
        };
        let fd = self.next_fd;
        self.next_fd += 1; // descriptors are never reused
        self.files.insert(fd, handle);
        Ok(fd)
    }

    fn file_mut(&mut self, fd: i64) -> Result<&mut FileHandle, String> {
        self.files
            .get_mut(&fd)
            .ok_or_else(|| format!("invalid file descriptor {fd}"))
    }

    /// Read one line (without the newline).  Empty string at end of file.
    pub fn read_line(&mut self, fd: i64) -> Result<String, String> {
        match self.file_mut(fd)? {
            FileHandle::Read(reader) => {
                let mut line = String::new();
                reader
                    .read_line(&mut line)
                    .map_err(|e| format!("read on fd {fd} failed: {e}"))?;
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(line)
            }
            _ => Err(format!("fd {fd} is not open for reading")),
        }
    }

    /// Read up to `n` raw bytes.
    pub fn read_bytes(&mut self, fd: i64, n: usize) -> Result<Vec<u8>, String> {
        match self.file_mut(fd)? {
            FileHandle::Read(reader) => {
                let mut buf = vec![0u8; n];
                let mut filled = 0;
                while filled < n {
                    let got = reader
                        .read(&mut buf[filled..])
                        .map_err(|e| format!("read on fd {fd} failed: {e}"))?;
                    if got == 0 {
                        break;
                    }
                    filled += got;
                }
                buf.truncate(filled);
                Ok(buf)
            }
            _ => Err(format!("fd {fd} is not open for reading")),
        }
    }

    /// Write a text line (newline appended).
    pub fn write_line(&mut self, fd: i64, text: &str) -> Result<(), String> {
        let err = |e| format!("write on fd {fd} failed: {e}");
        match self.file_mut(fd)? {
            FileHandle::Write(f) | FileHandle::Append(f) => {
                f.write_all(text.as_bytes()).map_err(err)?;
                f.write_all(b"\n").map_err(err)
            }
            FileHandle::Read(_) => Err(format!("fd {fd} is not open for writing")),
        }
    }

    /// Write raw bytes, no newline.
    pub fn write_bytes(&mut self, fd: i64, data: &[u8]) -> Result<(), String> {
        match self.file_mut(fd)? {
            FileHandle::Write(f) | FileHandle::Append(f) => f
                .write_all(data)
                .map_err(|e| format!("write on fd {fd} failed: {e}")),
            FileHandle::Read(_) => Err(format!("fd {fd} is not open for writing")),
        }
    }

    pub fn seek(&mut self, fd: i64, pos: u64) -> Result<(), String> {
        let err = |e| format!("seek on fd {fd} failed: {e}");
        match self.file_mut(fd)? {
            FileHandle::Read(reader) => reader.seek(SeekFrom::Start(pos)).map(|_| ()).map_err(err),
            FileHandle::Write(f) | FileHandle::Append(f) => {
                f.seek(SeekFrom::Start(pos)).map(|_| ()).map_err(err)
            }
        }
    }

    pub fn close_file(&mut self, fd: i64) -> Result<(), String> {
        self.files
            .remove(&fd)
            .map(|_| ())
            .ok_or_else(|| format!("invalid file descriptor {fd}"))
    }

    // ── Sockets ───────────────────────────────────────────────────────────

    pub fn add_socket(&mut self, name: &str, handle: SockHandle) -> Result<(), String> {
        let k = name.to_ascii_lowercase();
        if self.sockets.contains_key(&k) {
            return Err(format!("socket '{name}' already exists"));
        }
        self.sockets.insert(k, handle);
        Ok(())
    }

    pub fn socket_mut(&mut self, name: &str) -> Result<&mut SockHandle, String> {
        self.sockets
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| format!("no such socket '{name}'"))
    }

    pub fn stream_mut(&mut self, name: &str) -> Result<&mut dyn ScriptSocket, String> {
        match self.socket_mut(name)? {
            SockHandle::Stream(s) => Ok(s.as_mut()),
            SockHandle::Listener(_) => Err(format!("socket '{name}' is a listener")),
        }
    }

    pub fn listener_mut(&mut self, name: &str) -> Result<&mut dyn ScriptListener, String> {
        match self.socket_mut(name)? {
            SockHandle::Listener(l) => Ok(l.as_mut()),
            SockHandle::Stream(_) => Err(format!("socket '{name}' is not a listener")),
        }
    }

    pub fn close_socket(&mut self, name: &str) -> Result<(), String> {
        match self.sockets.remove(&name.to_ascii_lowercase()) {
            Some(SockHandle::Stream(mut s)) => {
                s.close();
                Ok(())
            }
            Some(SockHandle::Listener(mut l)) => {
                l.close();
                Ok(())
            }
            None => Err(format!("no such socket '{name}'")),
        }
    }

    pub fn has_socket(&self, name: &str) -> bool {
        self.sockets.contains_key(&name.to_ascii_lowercase())
    }

    // ── Timers ────────────────────────────────────────────────────────────

    pub fn add_timer(
        &mut self,
        name: &str,
        secs: f64,
        function: &str,
        once: bool,
        now: Instant,
    ) -> Result<(), String> {
        let k = name.to_ascii_lowercase();
        if self.timers.contains_key(&k) {
            return Err(format!("timer '{name}' already exists"));
        }
        self.timers.insert(
            k,
            TimerEntry {
                name: name.to_owned(),
                secs,
                function: function.to_owned(),
                once,
                next_due: now + Duration::from_secs_f64(secs.max(0.0)),
            },
        );
        Ok(())
    }

    pub fn cancel_timer(&mut self, name: &str) -> bool {
        self.timers.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn timer_exists(&self, name: &str) -> bool {
        self.timers.contains_key(&name.to_ascii_lowercase())
    }

    /// Earliest deadline among armed timers, for the host's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.next_due).min()
    }

    /// Collect functions whose timers are due.  Recurring timers are
    /// rescheduled from `now`; one-shot timers are disarmed.
    pub fn tick(&mut self, now: Instant) -> Vec<(String, String)> {
        let mut due = Vec::new();
        let mut expired = Vec::new();
        for (k, t) in self.timers.iter_mut() {
            if t.next_due <= now {
                due.push((t.name.clone(), t.function.clone()));
                if t.once {
                    expired.push(k.clone());
                } else {
                    t.next_due = now + Duration::from_secs_f64(t.secs.max(0.0));
                }
            }
        }
        for k in expired {
            self.timers.remove(&k);
        }
        due.sort();
        due
    }

    // ── Dialogs ───────────────────────────────────────────────────────────

    pub fn load_dialog(&mut self, def: DialogDef) {
        self.dialogs
            .insert(def.name.to_ascii_lowercase(), DialogInstance::new(def));
    }

    pub fn dialog(&self, name: &str) -> Option<&DialogInstance> {
        self.dialogs.get(&name.to_ascii_lowercase())
    }

    pub fn dialog_mut(&mut self, name: &str) -> Result<&mut DialogInstance, String> {
        self.dialogs
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| format!("no such dialog '{name}'"))
    }

    pub fn close_dialog(&mut self, name: &str) -> bool {
        self.dialogs.remove(&name.to_ascii_lowercase()).is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::loader::{ControlDef, ControlKind};
    use std::io::Write as _;

    #[test]
    fn names_are_case_insensitive_and_percent_stripped() {
        let mut env = Environment::new();
        env.set("%Count", Value::from("3"));
        assert_eq!(env.get("count").unwrap().as_text(), "3");
        assert_eq!(env.get("%COUNT").unwrap().as_text(), "3");
    }

    #[test]
    fn frame_shadows_global() {
        let mut env = Environment::new();
        env.set("x", Value::from("global"));

        env.push_frame();
        env.bind_local("x", Value::from("local"));
        assert_eq!(env.get("x").unwrap().as_text(), "local");
        // Plain set writes through the shadow, not past it.
        env.set("x", Value::from("local2"));
        assert_eq!(env.get("x").unwrap().as_text(), "local2");
        env.pop_frame();

        assert_eq!(env.get("x").unwrap().as_text(), "global");
    }

    #[test]
    fn unshadowed_set_in_frame_hits_globals() {
        let mut env = Environment::new();
        env.push_frame();
        env.set("y", Value::from("1"));
        env.pop_frame();
        assert_eq!(env.get("y").unwrap().as_text(), "1");
    }

    #[test]
    fn outer_frames_are_invisible() {
        let mut env = Environment::new();
        env.push_frame();
        env.bind_local("x", Value::from("outer"));
        env.push_frame();
        assert!(env.get("x").is_none());
        env.pop_frame();
        assert_eq!(env.get("x").unwrap().as_text(), "outer");
        env.pop_frame();
    }

    #[test]
    fn delete_prefers_local() {
        let mut env = Environment::new();
        env.set("x", Value::from("global"));
        env.push_frame();
        env.bind_local("x", Value::from("local"));
        env.delete("x");
        assert_eq!(env.get("x").unwrap().as_text(), "global");
        env.delete("x");
        assert!(env.get("x").is_none());
        env.delete("x"); // deleting an unset name is not an error
        env.pop_frame();
    }

    #[test]
    fn text_and_binary_share_one_namespace() {
        let mut env = Environment::new();
        env.set("buf", Value::from("text"));
        env.set("buf", Value::Binary(vec![1, 2, 3]));
        assert!(env.get("buf").unwrap().is_binary());
    }

    #[test]
    fn descriptors_are_monotonic_and_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let path = path.to_str().unwrap();

        let mut env = Environment::new();
        let fd1 = env.open_file(path, "w").unwrap();
        assert_eq!(fd1, 1);
        env.close_file(fd1).unwrap();
        let fd2 = env.open_file(path, "w").unwrap();
        assert_eq!(fd2, 2);
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let path = path.to_str().unwrap();

        let mut env = Environment::new();
        let fd = env.open_file(path, "w").unwrap();
        env.write_line(fd, "first").unwrap();
        env.write_line(fd, "second").unwrap();
        env.close_file(fd).unwrap();

        let fd = env.open_file(path, "r").unwrap();
        assert_eq!(env.read_line(fd).unwrap(), "first");
        assert_eq!(env.read_line(fd).unwrap(), "second");
        assert_eq!(env.read_line(fd).unwrap(), ""); // end of file
        env.seek(fd, 0).unwrap();
        assert_eq!(env.read_line(fd).unwrap(), "first");
        env.close_file(fd).unwrap();
    }

    #[test]
    fn binary_file_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0, 159, 146, 150])
            .unwrap();

        let mut env = Environment::new();
        let fd = env.open_file(path.to_str().unwrap(), "r").unwrap();
        assert_eq!(env.read_bytes(fd, 2).unwrap(), vec![0, 159]);
        assert_eq!(env.read_bytes(fd, 10).unwrap(), vec![146, 150]);
    }

    #[test]
    fn unknown_descriptor_is_error() {
        let mut env = Environment::new();
        assert!(env.read_line(7).is_err());
        assert!(env.close_file(7).is_err());
    }

    #[test]
    fn mode_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "x").unwrap();

        let mut env = Environment::new();
        let fd = env.open_file(path.to_str().unwrap(), "r").unwrap();
        assert!(env.write_line(fd, "nope").is_err());
    }

    #[test]
    fn duplicate_timer_rejected() {
        let mut env = Environment::new();
        let now = Instant::now();
        env.add_timer("poll", 30.0, "doPoll", false, now).unwrap();
        assert!(env.add_timer("POLL", 60.0, "other", false, now).is_err());
        assert!(env.timer_exists("Poll"));
    }

    #[test]
    fn tick_fires_and_reschedules() {
        let mut env = Environment::new();
        let now = Instant::now();
        env.add_timer("rec", 10.0, "onRec", false, now).unwrap();
        env.add_timer("once", 5.0, "onOnce", true, now).unwrap();

        assert!(env.tick(now).is_empty());

        let due = env.tick(now + Duration::from_secs(11));
        assert_eq!(
            due,
            vec![
                ("once".to_owned(), "onOnce".to_owned()),
                ("rec".to_owned(), "onRec".to_owned())
            ]
        );
        assert!(!env.timer_exists("once"));
        assert!(env.timer_exists("rec"));

        // Recurring timer comes due again.
        let due = env.tick(now + Duration::from_secs(22));
        assert_eq!(due, vec![("rec".to_owned(), "onRec".to_owned())]);
    }

    #[test]
    fn dialog_values_track_controls() {
        let mut env = Environment::new();
        env.load_dialog(DialogDef {
            name: "prefs".into(),
            title: "Prefs".into(),
            width: 100,
            height: 100,
            controls: vec![ControlDef {
                kind: ControlKind::EditBox,
                name: "nick".into(),
                text: "circa".into(),
                function: String::new(),
            }],
        });

        assert_eq!(env.dialog("PREFS").unwrap().text("nick"), Some("circa"));
        env.dialog_mut("prefs").unwrap().set_text("nick", "ferris");
        assert_eq!(env.dialog("prefs").unwrap().text("nick"), Some("ferris"));
        assert!(!env.dialog_mut("prefs").unwrap().set_text("bogus", "x"));
        assert!(env.close_dialog("prefs"));
        assert!(env.dialog("prefs").is_none());
    }
}

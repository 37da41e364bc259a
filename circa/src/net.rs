//! Socket factories behind the `sock` statement.
//!
//! Two implementations of the [`SocketFactory`] capability:
//!
//! - [`TokioSocketFactory`] — real TCP, used by the binary.  Each socket is
//!   pumped by a background tokio task into a shared receive buffer, so the
//!   engine's `sock -r` stays non-blocking: it drains whatever has arrived
//!   and returns immediately.
//! - [`LoopbackFactory`] — in-memory sockets for tests: written bytes come
//!   straight back out of the read buffer.
//!
//! Connection establishment is asynchronous from the script's point of view:
//! `sock -o` returns at once, and a connect failure simply closes the socket
//! later (scripts observe it via an empty read / `$sockbuf`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::host::{ScriptListener, ScriptSocket, SocketFactory};

// ── Tokio-backed sockets ──────────────────────────────────────────────────────

/// Shared state between a [`TokioSocket`] and its pump task.
struct Shared {
    recv: Mutex<Vec<u8>>,
    open: AtomicBool,
}

pub struct TokioSocket {
    peer: String,
    shared: Arc<Shared>,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl TokioSocket {
    /// Wrap an already-connected stream, spawning its pump task.
    fn from_stream(handle: &tokio::runtime::Handle, peer: String, stream: TcpStream) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            recv: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        });
        handle.spawn(pump(stream, Arc::clone(&shared), out_rx));
        TokioSocket {
            peer,
            shared,
            out_tx,
        }
    }

    /// Connect lazily: the pump task performs the connect itself.
    fn connecting(handle: &tokio::runtime::Handle, host: &str, port: u16) -> Self {
        let peer = format!("{host}:{port}");
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            recv: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        });
        let addr = peer.clone();
        let task_shared = Arc::clone(&shared);
        handle.spawn(async move {
            match TcpStream::connect(&addr).await {
                Ok(stream) => pump(stream, task_shared, out_rx).await,
                Err(_) => task_shared.open.store(false, Ordering::Relaxed),
            }
        });
        TokioSocket {
            peer,
            shared,
            out_tx,
        }
    }
}

/// Copy bytes both ways until either side closes.
async fn pump(
    mut stream: TcpStream,
    shared: Arc<Shared>,
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            n = stream.read(&mut buf) => match n {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut recv = shared.recv.lock().unwrap();
                    recv.extend_from_slice(&buf[..n]);
                }
            },
            chunk = out_rx.recv() => match chunk {
                None => break, // socket dropped on the engine side
                Some(data) => {
                    if stream.write_all(&data).await.is_err() {
                        break;
                    }
                }
            },
        }
    }
    shared.open.store(false, Ordering::Relaxed);
}

impl ScriptSocket for TokioSocket {
    fn write(&mut self, data: &[u8]) -> Result<(), String> {
        if !self.shared.open.load(Ordering::Relaxed) {
            return Err(format!("socket to {} is closed", self.peer));
        }
        self.out_tx
            .send(data.to_vec())
            .map_err(|_| format!("socket to {} is closed", self.peer))
    }

    fn read_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut *self.shared.recv.lock().unwrap())
    }

    fn buffered_len(&self) -> usize {
        self.shared.recv.lock().unwrap().len()
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn close(&mut self) {
        self.shared.open.store(false, Ordering::Relaxed);
    }
}

pub struct TokioListener {
    port: u16,
    handle: tokio::runtime::Handle,
    pending: Arc<Mutex<VecDeque<(String, TcpStream)>>>,
    open: Arc<AtomicBool>,
}

impl ScriptListener for TokioListener {
    fn accept_pending(&mut self) -> Option<Box<dyn ScriptSocket>> {
        let (peer, stream) = self.pending.lock().unwrap().pop_front()?;
        Some(Box::new(TokioSocket::from_stream(&self.handle, peer, stream)))
    }

    fn decline_pending(&mut self) -> bool {
        self.pending.lock().unwrap().pop_front().is_some()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        self.pending.lock().unwrap().clear();
    }
}

/// [`SocketFactory`] backed by real TCP on a tokio runtime.
pub struct TokioSocketFactory {
    handle: tokio::runtime::Handle,
}

impl TokioSocketFactory {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl SocketFactory for TokioSocketFactory {
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn ScriptSocket>, String> {
        Ok(Box::new(TokioSocket::connecting(&self.handle, host, port)))
    }

    fn listen(&mut self, port: u16) -> Result<Box<dyn ScriptListener>, String> {
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let open = Arc::new(AtomicBool::new(true));
        let task_pending = Arc::clone(&pending);
        let task_open = Arc::clone(&open);
        self.handle.spawn(async move {
            let listener = match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(l) => l,
                Err(_) => {
                    task_open.store(false, Ordering::Relaxed);
                    return;
                }
            };
            while task_open.load(Ordering::Relaxed) {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        task_pending
                            .lock()
                            .unwrap()
                            .push_back((addr.to_string(), stream));
                    }
                    Err(_) => break,
                }
            }
        });
        Ok(Box::new(TokioListener {
            port,
            handle: self.handle.clone(),
            pending,
            open,
        }))
    }
}

// ── Loopback sockets (tests) ──────────────────────────────────────────────────

/// In-memory socket: everything written is immediately readable back.
#[derive(Default)]
pub struct LoopbackSocket {
    peer: String,
    buf: Vec<u8>,
    closed: bool,
}

impl LoopbackSocket {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            ..Self::default()
        }
    }

    /// Simulate data arriving from the remote side.
    pub fn inject(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }
}

impl ScriptSocket for LoopbackSocket {
    fn write(&mut self, data: &[u8]) -> Result<(), String> {
        if self.closed {
            return Err(format!("socket to {} is closed", self.peer));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn read_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Default)]
pub struct LoopbackListener {
    port: u16,
    pending: VecDeque<Box<dyn ScriptSocket>>,
}

impl LoopbackListener {
    /// Queue a fake incoming connection for `sock -a` / `sock -d`.
    pub fn push_pending(&mut self, sock: Box<dyn ScriptSocket>) {
        self.pending.push_back(sock);
    }
}

impl ScriptListener for LoopbackListener {
    fn accept_pending(&mut self) -> Option<Box<dyn ScriptSocket>> {
        self.pending.pop_front()
    }

    fn decline_pending(&mut self) -> bool {
        self.pending.pop_front().is_some()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

/// [`SocketFactory`] producing loopback sockets and listeners.
#[derive(Default)]
pub struct LoopbackFactory;

impl SocketFactory for LoopbackFactory {
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn ScriptSocket>, String> {
        Ok(Box::new(LoopbackSocket::new(format!("{host}:{port}"))))
    }

    fn listen(&mut self, port: u16) -> Result<Box<dyn ScriptListener>, String> {
        Ok(Box::new(LoopbackListener {
            port,
            ..LoopbackListener::default()
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_echoes_writes() {
        let mut s = LoopbackSocket::new("irc.example.net:6667");
        s.write(b"PING").unwrap();
        assert_eq!(s.buffered_len(), 4);
        assert_eq!(s.read_buffered(), b"PING");
        assert_eq!(s.buffered_len(), 0);
    }

    #[test]
    fn loopback_write_after_close_fails() {
        let mut s = LoopbackSocket::new("x:1");
        s.close();
        assert!(s.write(b"hi").is_err());
    }

    #[test]
    fn loopback_listener_pending_queue() {
        let mut l = LoopbackListener::default();
        assert!(l.accept_pending().is_none());
        assert!(!l.decline_pending());

        l.push_pending(Box::new(LoopbackSocket::new("peer:1")));
        l.push_pending(Box::new(LoopbackSocket::new("peer:2")));
        assert_eq!(l.accept_pending().unwrap().peer(), "peer:1");
        assert!(l.decline_pending());
        assert!(l.accept_pending().is_none());
    }

    #[tokio::test]
    async fn tokio_roundtrip() {
        let mut factory = TokioSocketFactory::new(tokio::runtime::Handle::current());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
            buf
        });

        let mut sock = factory.connect("127.0.0.1", port).unwrap();
        sock.write(b"hello").unwrap();
        assert_eq!(server.await.unwrap(), *b"hello");

        // The pump task needs a moment to land the echo in the buffer.
        for _ in 0..50 {
            if sock.buffered_len() == 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sock.read_buffered(), b"hello");
    }
}

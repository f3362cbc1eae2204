//! UCI engine process wrapper.
//!
//! [`EngineProcess`] owns a spawned engine and a reader thread that pumps its
//! stdout into a channel, so every read can be bounded by a timeout. The
//! analysis loop talks to it through the [`EngineConnection`] trait, which lets
//! tests substitute a scripted engine.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uci::{EngineMessage, GuiCommand};

/// Grace period used when an engine process is dropped without an explicit
/// [`EngineConnection::terminate`].
pub const DEFAULT_QUIT_GRACE: Duration = Duration::from_secs(3);

/// Errors that can occur when working with chess engines.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine executable was not found at the specified path.
    #[error("Engine not found at path: {0}")]
    NotFound(String),
    /// Failed to spawn the engine process.
    #[error("Failed to spawn engine: {0}")]
    SpawnError(#[source] io::Error),
    /// The engine did not complete a handshake step in time.
    #[error("Engine did not answer with '{expected}' within {timeout:?}")]
    HandshakeTimeout {
        expected: &'static str,
        timeout: Duration,
    },
    /// The engine closed its output or has exited.
    #[error("Engine closed unexpectedly")]
    Closed,
    /// Writing to the engine failed.
    #[error("Engine I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A `setoption` sent to the engine during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOption {
    pub name: String,
    pub value: String,
}

impl EngineOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What the engine reported about itself during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineIdentity {
    pub name: Option<String>,
    pub author: Option<String>,
}

/// Kills an engine from another thread, for when its owner stops responding.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    child: Option<Arc<Mutex<Child>>>,
}

impl AbortHandle {
    /// A handle that does nothing, for connections without a process.
    pub fn none() -> Self {
        Self::default()
    }

    /// Kill the engine process and reap it.
    pub fn abort(&self) {
        if let Some(child) = &self.child {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// A line-oriented, bidirectional connection to a UCI engine.
pub trait EngineConnection: Send {
    /// Write one protocol line.
    fn send(&mut self, command: &str) -> Result<(), EngineError>;

    /// Read one line, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// [`EngineError::Closed`] once the engine's output has ended.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, EngineError>;

    /// Ask the engine to quit, waiting up to `grace` before killing it.
    /// Calling it again is a no-op.
    fn terminate(&mut self, grace: Duration);

    fn abort_handle(&self) -> AbortHandle {
        AbortHandle::none()
    }
}

/// A spawned UCI engine process.
pub struct EngineProcess {
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    terminated: bool,
}

impl EngineProcess {
    /// Spawn the engine at `path` with `args`.
    ///
    /// The engine's stderr is discarded. No protocol traffic happens here; call
    /// [`handshake`] next.
    ///
    /// # Errors
    ///
    /// - `EngineError::NotFound` if no executable exists at `path`
    /// - `EngineError::SpawnError` if the process fails to start
    pub fn spawn(path: impl AsRef<Path>, args: &[String]) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => EngineError::NotFound(path.display().to_string()),
                _ => EngineError::SpawnError(e),
            })?;

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::SpawnError(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "engine stdout is not available",
                )));
            }
        };

        let (tx, lines) = crossbeam_channel::unbounded();
        let reader = thread::Builder::new()
            .name("engine-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::SpawnError(e));
        }

        debug!(path = %path.display(), pid = child.id(), "Engine process spawned");

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin,
            lines,
            terminated: false,
        })
    }

    fn child(&self) -> std::sync::MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineConnection for EngineProcess {
    fn send(&mut self, command: &str) -> Result<(), EngineError> {
        let stdin = self.stdin.as_mut().ok_or(EngineError::Closed)?;
        debug!(command, "ENGINE <");
        writeln!(stdin, "{}", command)?;
        stdin.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, EngineError> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => {
                let line = line.trim().to_string();
                debug!(line = %line, "ENGINE >");
                Ok(Some(line))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Closed),
        }
    }

    fn terminate(&mut self, grace: Duration) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        let _ = self.send(&GuiCommand::Quit.to_uci());
        // Closing stdin lets engines that only watch for EOF exit as well.
        self.stdin = None;

        let deadline = Instant::now() + grace;
        loop {
            match self.child().try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "Engine exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {}
                Ok(None) | Err(_) => break,
            }
            thread::sleep(Duration::from_millis(20));
        }

        warn!(grace_ms = grace.as_millis() as u64, "Engine ignored quit, killing it");
        let mut child = self.child();
        let _ = child.kill();
        let _ = child.wait();
    }

    fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            child: Some(Arc::clone(&self.child)),
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.terminate(DEFAULT_QUIT_GRACE);
    }
}

/// Run the UCI handshake: `uci` until `uciok`, then the given options, then
/// `isready` until `readyok`.
///
/// Each wait is bounded by `timeout`. Lines other than the expected reply are
/// skipped, except `id` lines which are collected into the returned identity.
///
/// # Errors
///
/// - `EngineError::HandshakeTimeout` if a reply does not arrive in time
/// - `EngineError::Closed` or `EngineError::Io` if the engine goes away
pub fn handshake<C: EngineConnection + ?Sized>(
    conn: &mut C,
    timeout: Duration,
    options: &[EngineOption],
) -> Result<EngineIdentity, EngineError> {
    let mut identity = EngineIdentity::default();

    conn.send(&GuiCommand::Uci.to_uci())?;
    wait_for(conn, "uciok", timeout, |line| {
        if let Some(EngineMessage::Id { name, author }) = EngineMessage::parse(line) {
            if name.is_some() {
                identity.name = name;
            }
            if author.is_some() {
                identity.author = author;
            }
        }
    })?;

    for option in options {
        conn.send(
            &GuiCommand::SetOption {
                name: option.name.clone(),
                value: Some(option.value.clone()),
            }
            .to_uci(),
        )?;
    }

    conn.send(&GuiCommand::IsReady.to_uci())?;
    wait_for(conn, "readyok", timeout, |_| {})?;

    Ok(identity)
}

fn wait_for<C: EngineConnection + ?Sized>(
    conn: &mut C,
    expected: &'static str,
    timeout: Duration,
    mut on_other: impl FnMut(&str),
) -> Result<(), EngineError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(EngineError::HandshakeTimeout { expected, timeout });
        }
        match conn.read_line(remaining)? {
            Some(line) if line == expected => return Ok(()),
            Some(line) => on_other(&line),
            None => {}
        }
    }
}

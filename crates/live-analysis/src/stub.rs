//! A scripted in-process engine.
//!
//! [`ScriptedEngine`] speaks just enough UCI to drive the analysis loop
//! deterministically: it answers the handshake, replies to `go` with canned
//! `info` lines and a `bestmove`, and records every command it receives.

use crate::engine::{EngineConnection, EngineError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use uci::{EngineInfo, EngineMessage, GuiCommand};

/// How the engine answers a `go` for one position.
#[derive(Debug, Clone, Default)]
pub struct SearchReply {
    info: Vec<EngineInfo>,
    best_move: Option<String>,
    hold_until_stop: bool,
}

impl SearchReply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an `info` line to the reply.
    pub fn info(mut self, info: EngineInfo) -> Self {
        self.info.push(info);
        self
    }

    /// The move reported in `bestmove`. Without one the engine says `bestmove (none)`.
    pub fn best_move(mut self, mv: impl Into<String>) -> Self {
        self.best_move = Some(mv.into());
        self
    }

    /// Keep searching until `stop` arrives, like `go infinite`.
    pub fn hold_until_stop(mut self) -> Self {
        self.hold_until_stop = true;
        self
    }
}

/// Shared record of the commands an engine received, readable from the test thread.
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn commands(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Number of commands equal to `command`.
    pub fn count(&self, command: &str) -> usize {
        self.lock().iter().filter(|c| c.as_str() == command).count()
    }

    /// Number of commands starting with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn push(&self, command: &str) {
        self.lock().push(command.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An engine whose behaviour is fixed up front.
#[derive(Debug)]
pub struct ScriptedEngine {
    name: String,
    replies: HashMap<String, SearchReply>,
    default_reply: SearchReply,
    answers_handshake: bool,
    crash_on_go: bool,
    position: String,
    held: Option<SearchReply>,
    outbox: VecDeque<String>,
    closed: bool,
    log: CommandLog,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            name: "Scripted Engine".to_string(),
            replies: HashMap::new(),
            default_reply: SearchReply::new(),
            answers_handshake: true,
            crash_on_go: false,
            position: "startpos".to_string(),
            held: None,
            outbox: VecDeque::new(),
            closed: false,
            log: CommandLog::default(),
        }
    }

    /// Name reported in `id name`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Reply used when searching `fen`.
    pub fn reply(mut self, fen: impl Into<String>, reply: SearchReply) -> Self {
        self.replies.insert(fen.into(), reply);
        self
    }

    /// Reply used for positions without a specific one.
    pub fn default_reply(mut self, reply: SearchReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Never answer `uci` or `isready`.
    pub fn silent(mut self) -> Self {
        self.answers_handshake = false;
        self
    }

    /// Emit the reply's `info` lines on `go`, then exit without a `bestmove`.
    pub fn crash_on_go(mut self) -> Self {
        self.crash_on_go = true;
        self
    }

    /// Handle to the commands received so far. Stays valid after the engine
    /// has moved to another thread.
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    fn emit(&mut self, reply: SearchReply) {
        for info in reply.info {
            self.outbox.push_back(EngineMessage::Info(info).to_uci());
        }
        self.outbox.push_back(
            EngineMessage::BestMove {
                mv: reply.best_move.unwrap_or_else(|| "(none)".to_string()),
                ponder: None,
            }
            .to_uci(),
        );
    }

    fn start_search(&mut self) {
        let reply = self
            .replies
            .get(&self.position)
            .unwrap_or(&self.default_reply)
            .clone();

        if self.crash_on_go {
            for info in reply.info {
                self.outbox.push_back(EngineMessage::Info(info).to_uci());
            }
            self.closed = true;
        } else if reply.hold_until_stop {
            self.held = Some(reply);
        } else {
            self.emit(reply);
        }
    }
}

impl EngineConnection for ScriptedEngine {
    fn send(&mut self, command: &str) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.log.push(command);

        match GuiCommand::parse(command) {
            Ok(GuiCommand::Uci) if self.answers_handshake => {
                self.outbox.push_back(
                    EngineMessage::Id {
                        name: Some(self.name.clone()),
                        author: None,
                    }
                    .to_uci(),
                );
                self.outbox.push_back(EngineMessage::UciOk.to_uci());
            }
            Ok(GuiCommand::IsReady) if self.answers_handshake => {
                self.outbox.push_back(EngineMessage::ReadyOk.to_uci());
            }
            Ok(GuiCommand::Position { fen, .. }) => {
                self.position = fen.unwrap_or_else(|| "startpos".to_string());
            }
            Ok(GuiCommand::Go(_)) => self.start_search(),
            Ok(GuiCommand::Stop) => {
                if let Some(reply) = self.held.take() {
                    self.emit(reply);
                }
            }
            Ok(GuiCommand::Quit) => self.closed = true,
            _ => {}
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, EngineError> {
        if let Some(line) = self.outbox.pop_front() {
            return Ok(Some(line));
        }
        if self.closed {
            return Err(EngineError::Closed);
        }
        thread::sleep(timeout);
        Ok(None)
    }

    fn terminate(&mut self, _grace: Duration) {
        if !self.closed {
            let _ = self.send(&GuiCommand::Quit.to_uci());
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uci::InfoBuilder;

    const POLL: Duration = Duration::from_millis(1);

    #[test]
    fn test_reply_to_go() {
        let mut engine = ScriptedEngine::new().default_reply(
            SearchReply::new()
                .info(InfoBuilder::new().depth(10).score_cp(34).pv(["e2e4", "e7e5"]).build())
                .best_move("e2e4"),
        );
        engine.send("position startpos").unwrap();
        engine.send("go depth 10").unwrap();

        assert_eq!(
            engine.read_line(POLL).unwrap().as_deref(),
            Some("info depth 10 score cp 34 pv e2e4 e7e5")
        );
        assert_eq!(engine.read_line(POLL).unwrap().as_deref(), Some("bestmove e2e4"));
        assert_eq!(engine.read_line(POLL).unwrap(), None);
    }

    #[test]
    fn test_reply_per_position() {
        let mut engine = ScriptedEngine::new()
            .reply("8/8/8/8/8/8/8/K1k5 w - - 0 1", SearchReply::new().best_move("a1a2"));
        engine.send("position fen 8/8/8/8/8/8/8/K1k5 w - - 0 1").unwrap();
        engine.send("go depth 5").unwrap();
        assert_eq!(engine.read_line(POLL).unwrap().as_deref(), Some("bestmove a1a2"));

        engine.send("position startpos").unwrap();
        engine.send("go depth 5").unwrap();
        assert_eq!(engine.read_line(POLL).unwrap().as_deref(), Some("bestmove (none)"));
    }

    #[test]
    fn test_hold_until_stop() {
        let mut engine =
            ScriptedEngine::new().default_reply(SearchReply::new().best_move("d2d4").hold_until_stop());
        engine.send("go depth 20").unwrap();
        assert_eq!(engine.read_line(POLL).unwrap(), None);

        engine.send("stop").unwrap();
        assert_eq!(engine.read_line(POLL).unwrap().as_deref(), Some("bestmove d2d4"));
    }

    #[test]
    fn test_crash_on_go() {
        let mut engine = ScriptedEngine::new()
            .default_reply(SearchReply::new().info(InfoBuilder::new().depth(1).build()))
            .crash_on_go();
        engine.send("go depth 5").unwrap();

        assert_eq!(engine.read_line(POLL).unwrap().as_deref(), Some("info depth 1"));
        assert!(matches!(engine.read_line(POLL), Err(EngineError::Closed)));
        assert!(matches!(engine.send("stop"), Err(EngineError::Closed)));
    }

    #[test]
    fn test_terminate_logs_quit_once() {
        let mut engine = ScriptedEngine::new();
        let log = engine.command_log();
        engine.terminate(Duration::ZERO);
        engine.terminate(Duration::ZERO);
        assert_eq!(log.count("quit"), 1);
    }
}

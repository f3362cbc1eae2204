//! The background analysis loop.
//!
//! One worker thread owns the engine connection. The foreground hands it
//! positions through a single-slot mailbox (newer requests overwrite older ones)
//! and receives results through the result channel. The worker is either idle,
//! waiting for a request, or searching, reading one engine line at a time and
//! checking the mailbox between lines.

use crate::analysis::{AnalysisResult, SearchId};
use crate::channel::ResultSender;
use crate::engine::{AbortHandle, EngineConnection, EngineError};
use crate::parser::parse_bestmove_line;
use crate::position::{Position, Side};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uci::{EngineInfo, GoOptions, GuiCommand};

/// Timing and search parameters of the loop.
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub go: GoOptions,
    pub idle_wake: Duration,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub quit_grace: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct SearchRequest {
    pub id: SearchId,
    pub position: Position,
}

#[derive(Debug, Default)]
struct Mailbox {
    last_id: SearchId,
    request: Option<SearchRequest>,
}

/// State shared between the foreground and the worker.
#[derive(Debug)]
pub(crate) struct Shared {
    mailbox: Mutex<Mailbox>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    shutdown: AtomicBool,
    available: AtomicBool,
}

impl Shared {
    pub fn new() -> Self {
        Self::continuing_from(0)
    }

    /// Like [`new`](Self::new), with search ids following on from `last_id`.
    pub fn continuing_from(last_id: SearchId) -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            mailbox: Mutex::new(Mailbox {
                last_id,
                request: None,
            }),
            wake_tx,
            wake_rx,
            shutdown: AtomicBool::new(false),
            available: AtomicBool::new(false),
        }
    }

    /// Replace any pending request with `position` and wake the worker.
    pub fn request(&self, position: Position) -> SearchId {
        let id = {
            let mut mailbox = self.mailbox();
            mailbox.last_id += 1;
            let id = mailbox.last_id;
            mailbox.request = Some(SearchRequest { id, position });
            id
        };
        let _ = self.wake_tx.try_send(());
        id
    }

    /// Id of the most recent request, or of the one before the first.
    pub fn last_requested(&self) -> SearchId {
        self.mailbox().last_id
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn take_request(&self) -> Option<SearchRequest> {
        self.mailbox().request.take()
    }

    fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The search currently running on the engine.
#[derive(Debug)]
struct ActiveSearch {
    id: SearchId,
    side_to_move: Option<Side>,
    // Merged raw engine output, relative to the side to move.
    current: AnalysisResult,
}

struct AnalysisLoop<C> {
    conn: C,
    shared: Arc<Shared>,
    results: ResultSender,
    settings: WorkerSettings,
    // Cancelled searches whose bestmove never arrived within the stop timeout.
    stale_replies: usize,
}

impl<C: EngineConnection> AnalysisLoop<C> {
    fn run(mut self) {
        let mut active: Option<ActiveSearch> = None;

        let outcome = loop {
            if self.shared.is_shutdown() {
                break Ok(());
            }
            let step = match active.take() {
                None => match self.wait_for_request() {
                    Some(request) => self.start_search(request).map(Some),
                    None => Ok(None),
                },
                Some(mut search) => match self.shared.take_request() {
                    Some(request) => self
                        .cancel(search)
                        .and_then(|()| self.start_search(request))
                        .map(Some),
                    None => self
                        .pump(&mut search)
                        .map(move |finished| if finished { None } else { Some(search) }),
                },
            };
            match step {
                Ok(next) => active = next,
                Err(e) => break Err(e),
            }
        };

        self.shared.set_available(false);
        match outcome {
            Ok(()) => info!("Analysis worker shutting down"),
            Err(e) => error!(error = %e, "Engine connection lost, analysis disabled"),
        }
        self.conn.terminate(self.settings.quit_grace);
    }

    fn wait_for_request(&self) -> Option<SearchRequest> {
        if let Some(request) = self.shared.take_request() {
            return Some(request);
        }
        // A timeout only means the shutdown flag is re-checked.
        let _ = self.shared.wake_rx.recv_timeout(self.settings.idle_wake);
        if self.shared.is_shutdown() {
            return None;
        }
        self.shared.take_request()
    }

    fn start_search(&mut self, request: SearchRequest) -> Result<ActiveSearch, EngineError> {
        self.send(&GuiCommand::Position {
            fen: Some(request.position.as_str().to_string()),
            moves: Vec::new(),
        })?;
        self.send(&GuiCommand::Go(self.settings.go.clone()))?;
        debug!(search_id = request.id, position = %request.position, "Search started");

        Ok(ActiveSearch {
            id: request.id,
            side_to_move: request.position.side_to_move(),
            current: AnalysisResult::default(),
        })
    }

    /// Stop `search` and consume its output up to its `bestmove`, publishing
    /// that last result under the cancelled search's id.
    fn cancel(&mut self, mut search: ActiveSearch) -> Result<(), EngineError> {
        self.send(&GuiCommand::Stop)?;
        let deadline = Instant::now() + self.settings.stop_timeout;
        loop {
            if self.shared.is_shutdown() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(search_id = search.id, "Engine did not confirm stop in time");
                self.stale_replies += 1;
                return Ok(());
            }
            if let Some(line) = self.conn.read_line(remaining.min(self.settings.poll_interval))? {
                if self.handle_line(&mut search, &line) {
                    debug!(search_id = search.id, "Search cancelled");
                    return Ok(());
                }
            }
        }
    }

    /// Read at most one line. Returns `true` once the search has finished.
    fn pump(&mut self, search: &mut ActiveSearch) -> Result<bool, EngineError> {
        match self.conn.read_line(self.settings.poll_interval)? {
            Some(line) => Ok(self.handle_line(search, &line)),
            None => Ok(false),
        }
    }

    fn handle_line(&mut self, search: &mut ActiveSearch, line: &str) -> bool {
        if self.stale_replies > 0 {
            // Everything up to a cancelled search's late bestmove is its output.
            if parse_bestmove_line(line).is_some() {
                self.stale_replies -= 1;
                debug!(search_id = search.id, "Discarded late reply to a cancelled search");
            }
            return false;
        }

        if line.starts_with("info depth") {
            if let Some(info) = EngineInfo::parse(line) {
                search.current.apply_info(&info);
                self.publish(search, false);
            }
            return false;
        }

        let Some(best) = parse_bestmove_line(line) else {
            return false;
        };
        search.current.best_move = best.mv.unwrap_or_default();
        self.publish(search, true);
        debug!(
            search_id = search.id,
            best_move = %search.current.best_move,
            "Search finished"
        );
        true
    }

    fn publish(&self, search: &ActiveSearch, is_final: bool) {
        let mut result = search.current.to_white_perspective(search.side_to_move);
        result.search_id = search.id;
        result.is_final = is_final;
        self.results.push(result);
    }

    fn send(&mut self, command: &GuiCommand) -> Result<(), EngineError> {
        self.conn.send(&command.to_uci())
    }
}

/// Handle to a running worker thread.
pub(crate) struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    done: Receiver<()>,
    abort: AbortHandle,
}

impl WorkerHandle {
    /// Wait up to `timeout` for the worker to exit. If it does not, kill the
    /// engine so a blocked read returns, and leave the thread detached.
    ///
    /// Returns `true` if the worker exited in time.
    pub fn join(mut self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        error!("Analysis worker panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Analysis worker did not stop in time, killing engine"
                );
                self.abort.abort();
                false
            }
        }
    }
}

/// Start the analysis loop on its own thread.
pub(crate) fn spawn<C: EngineConnection + 'static>(
    conn: C,
    shared: Arc<Shared>,
    results: ResultSender,
    settings: WorkerSettings,
) -> std::io::Result<WorkerHandle> {
    let abort = conn.abort_handle();
    let (done_tx, done) = crossbeam_channel::bounded(1);
    let analysis = AnalysisLoop {
        conn,
        shared,
        results,
        settings,
        stale_replies: 0,
    };
    let thread = thread::Builder::new()
        .name("engine-analysis".to_string())
        .spawn(move || {
            analysis.run();
            let _ = done_tx.send(());
        })?;

    Ok(WorkerHandle {
        thread: Some(thread),
        done,
        abort,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::result_channel;
    use crate::stub::{ScriptedEngine, SearchReply};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use uci::InfoBuilder;

    const WHITE_FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 1";
    const BLACK_FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

    fn settings() -> WorkerSettings {
        WorkerSettings {
            go: GoOptions::depth(12),
            idle_wake: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            stop_timeout: Duration::from_millis(500),
            quit_grace: Duration::ZERO,
        }
    }

    /// Searches until `stop`, and answers it only after `stop_delay`. The
    /// second search's output queues up behind that late answer.
    struct SlowStopEngine {
        stop_delay: Duration,
        release_at: Option<Instant>,
        queued: VecDeque<String>,
        searches: Arc<AtomicUsize>,
    }

    impl SlowStopEngine {
        fn new(stop_delay: Duration) -> Self {
            Self {
                stop_delay,
                release_at: None,
                queued: VecDeque::new(),
                searches: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl EngineConnection for SlowStopEngine {
        fn send(&mut self, command: &str) -> Result<(), EngineError> {
            if command == "stop" {
                self.release_at = Some(Instant::now() + self.stop_delay);
                self.queued
                    .push_back("info depth 20 score cp 999 nodes 123456 pv d2d4".to_string());
                self.queued.push_back("bestmove d2d4".to_string());
            } else if command.starts_with("go") {
                let n = self.searches.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 2 {
                    self.queued
                        .push_back("info depth 8 score cp 30 pv c7c5".to_string());
                    self.queued.push_back("bestmove c7c5".to_string());
                }
            }
            Ok(())
        }

        fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, EngineError> {
            if self.release_at.is_some_and(|at| Instant::now() >= at) {
                if let Some(line) = self.queued.pop_front() {
                    return Ok(Some(line));
                }
            }
            thread::sleep(timeout);
            Ok(None)
        }

        fn terminate(&mut self, _grace: Duration) {}
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_request_overwrites_pending() {
        let shared = Shared::new();
        let first = shared.request(Position::starting());
        let second = shared.request(Position::new(BLACK_FEN).unwrap());

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        let request = shared.take_request().unwrap();
        assert_eq!(request.id, 2);
        assert_eq!(request.position.as_str(), BLACK_FEN);
        assert!(shared.take_request().is_none());
        assert_eq!(shared.last_requested(), 2);

        let restarted = Shared::continuing_from(shared.last_requested());
        assert_eq!(restarted.request(Position::starting()), 3);
    }

    #[test]
    fn test_search_publishes_white_perspective() {
        let engine = ScriptedEngine::new().reply(
            BLACK_FEN,
            SearchReply::new()
                .info(InfoBuilder::new().depth(10).score_cp(25).pv(["e7e5"]).build())
                .best_move("e7e5"),
        );
        let shared = Arc::new(Shared::new());
        let (tx, mut rx) = result_channel(16);
        let worker = spawn(engine, Arc::clone(&shared), tx, settings()).unwrap();

        let id = shared.request(Position::new(BLACK_FEN).unwrap());
        assert!(wait_until(|| rx.get_latest().is_final));

        let result = rx.get_latest();
        assert_eq!(result.search_id, id);
        assert_eq!(result.score_cp(), -25);
        assert_eq!(result.best_move, "e7e5");
        assert_eq!(result.side_to_move, Some(Side::Black));

        shared.request_shutdown();
        assert!(worker.join(Duration::from_secs(2)));
    }

    #[test]
    fn test_new_request_cancels_running_search() {
        let engine = ScriptedEngine::new()
            .reply(
                WHITE_FEN,
                SearchReply::new()
                    .info(InfoBuilder::new().depth(20).score_cp(40).pv(["d2d4"]).build())
                    .best_move("d2d4")
                    .hold_until_stop(),
            )
            .reply(BLACK_FEN, SearchReply::new().best_move("c7c5"));
        let log = engine.command_log();
        let shared = Arc::new(Shared::new());
        let (tx, mut rx) = result_channel(16);
        let worker = spawn(engine, Arc::clone(&shared), tx, settings()).unwrap();

        shared.request(Position::new(WHITE_FEN).unwrap());
        assert!(wait_until(|| log.count_prefix("go") == 1));
        let second = shared.request(Position::new(BLACK_FEN).unwrap());
        assert!(wait_until(|| {
            let latest = rx.get_latest();
            latest.search_id == second && latest.is_final
        }));

        assert_eq!(log.count("stop"), 1);
        assert_eq!(log.count_prefix("go"), 2);
        assert_eq!(rx.get_latest().best_move, "c7c5");

        shared.request_shutdown();
        assert!(worker.join(Duration::from_secs(2)));
        assert_eq!(log.count("quit"), 1);
    }

    #[test]
    fn test_late_output_of_cancelled_search_is_discarded() {
        let engine = SlowStopEngine::new(Duration::from_millis(100));
        let searches = Arc::clone(&engine.searches);
        let shared = Arc::new(Shared::new());
        let (tx, mut rx) = result_channel(16);
        let settings = WorkerSettings {
            stop_timeout: Duration::from_millis(50),
            ..settings()
        };
        let worker = spawn(engine, Arc::clone(&shared), tx, settings).unwrap();

        shared.request(Position::new(WHITE_FEN).unwrap());
        assert!(wait_until(|| searches.load(Ordering::SeqCst) == 1));
        let second = shared.request(Position::new(BLACK_FEN).unwrap());

        let mut seen = Vec::new();
        assert!(wait_until(|| {
            let latest = rx.get_latest();
            let done = latest.search_id == second && latest.is_final;
            seen.push(latest);
            done
        }));

        // Nothing the first search said may carry the second search's id.
        for result in seen.iter().filter(|r| r.search_id == second) {
            assert_ne!(result.best_move, "d2d4");
            assert_eq!(result.nodes, 0);
            assert_eq!(result.depth, 8);
        }
        let result = rx.get_latest();
        assert_eq!(result.best_move, "c7c5");
        assert_eq!(result.score_cp(), -30);

        shared.request_shutdown();
        assert!(worker.join(Duration::from_secs(2)));
    }

    #[test]
    fn test_engine_death_marks_unavailable() {
        let engine = ScriptedEngine::new().crash_on_go();
        let shared = Arc::new(Shared::new());
        shared.set_available(true);
        let (tx, _rx) = result_channel(4);
        let worker = spawn(engine, Arc::clone(&shared), tx, settings()).unwrap();

        shared.request(Position::starting());
        assert!(wait_until(|| !shared.is_available()));
        assert!(worker.join(Duration::from_secs(2)));
    }

    #[test]
    fn test_idle_worker_stops_promptly() {
        let shared = Arc::new(Shared::new());
        let (tx, _rx) = result_channel(4);
        let worker = spawn(ScriptedEngine::new(), Arc::clone(&shared), tx, settings()).unwrap();

        let started = Instant::now();
        shared.request_shutdown();
        assert!(worker.join(Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

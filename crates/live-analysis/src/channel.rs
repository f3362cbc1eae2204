//! Bounded, non-blocking delivery of analysis results to the foreground.
//!
//! The producer never blocks: when the channel is full the oldest queued result
//! is evicted to make room. The consumer only ever wants the newest result, so
//! [`LatestResult::get_latest`] drains everything queued and remembers the last
//! one for the next frame.

use crate::analysis::AnalysisResult;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::trace;

/// Create a result channel holding at most `capacity` undelivered results.
/// A capacity of zero is treated as one.
pub fn result_channel(capacity: usize) -> (ResultSender, LatestResult) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        ResultSender {
            tx,
            overflow: rx.clone(),
        },
        LatestResult {
            rx,
            latest: AnalysisResult::default(),
        },
    )
}

/// Producer side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: Sender<AnalysisResult>,
    // Receiver clone used to evict the oldest entry when full.
    overflow: Receiver<AnalysisResult>,
}

impl ResultSender {
    /// Queue a result, evicting the oldest queued result if the channel is full.
    pub fn push(&self, result: AnalysisResult) {
        let mut result = result;
        loop {
            match self.tx.try_send(result) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.overflow.try_recv().is_ok() {
                        trace!("Result channel full, dropped oldest result");
                    }
                    result = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Consumer side, owned by the foreground.
#[derive(Debug)]
pub struct LatestResult {
    rx: Receiver<AnalysisResult>,
    latest: AnalysisResult,
}

impl LatestResult {
    /// Drain every queued result and return the newest one seen so far.
    ///
    /// Never blocks. Returns the previous result when nothing new arrived, and
    /// a zero-valued result before the first one.
    pub fn get_latest(&mut self) -> AnalysisResult {
        if let Some(newest) = self.rx.try_iter().last() {
            self.latest = newest;
        }
        self.latest.clone()
    }

    /// The newest result already drained, without checking for new ones.
    pub fn peek(&self) -> &AnalysisResult {
        &self.latest
    }

    /// Number of results waiting to be drained.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

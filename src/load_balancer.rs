//! Work distribution between traversal workers.
//!
//! The frontier is a single queue of discovered but unexpanded states. A
//! worker takes a batch, expands it, and hands back the states it discovered.
//! The traversal is over once the queue is empty while no worker is busy, or
//! once any worker requests termination (violation found, error raised).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::error::Error;

/// Frontier entry: a state and the depth it was discovered at.
pub type Work = (u32, u32);

#[derive(Debug, Default)]
struct Frontier {
    queue: VecDeque<Work>,
    busy: usize,
}

#[derive(Debug, Default)]
pub struct LoadBalancer {
    frontier: Mutex<Frontier>,
    available: Condvar,
    terminated: AtomicBool,
    counterexample_claimed: AtomicBool,
    error: Mutex<Option<Error>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds states to the frontier before the workers start.
    pub fn push(&self, work: impl IntoIterator<Item = Work>) {
        let mut frontier = self.frontier.lock();
        frontier.queue.extend(work);
        self.available.notify_all();
    }

    /// Moves up to `max` states into `batch`, blocking while other workers might still produce work.
    ///
    /// Returns `false` when the traversal is over.
    pub fn take(&self, batch: &mut Vec<Work>, max: usize) -> bool {
        batch.clear();
        let mut frontier = self.frontier.lock();
        loop {
            if self.is_terminated() {
                return false;
            }
            if !frontier.queue.is_empty() {
                let count = frontier.queue.len().min(max);
                batch.extend(frontier.queue.drain(..count));
                frontier.busy += 1;
                return true;
            }
            if frontier.busy == 0 {
                return false;
            }
            self.available.wait(&mut frontier);
        }
    }

    /// Returns the states discovered while expanding the last batch.
    pub fn finish(&self, discovered: &mut Vec<Work>) {
        let mut frontier = self.frontier.lock();
        frontier.queue.extend(discovered.drain(..));
        assert!(frontier.busy > 0, "Finished a batch that was never taken");
        frontier.busy -= 1;
        if frontier.busy == 0 || !frontier.queue.is_empty() {
            self.available.notify_all();
        }
    }

    /// Stops all workers after their current state.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        let _frontier = self.frontier.lock();
        self.available.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Returns true for the first caller only.
    pub fn claim_counterexample(&self) -> bool {
        self.counterexample_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Records `error` unless an earlier one exists, and terminates the traversal.
    pub fn report_error(&self, error: Error) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                debug!("Traversal aborted: {}", error);
                *slot = Some(error);
            }
        }
        self.terminate();
    }

    pub fn take_error(&self) -> Option<Error> {
        self.error.lock().take()
    }
}

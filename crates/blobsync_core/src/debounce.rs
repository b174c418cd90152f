//! Coalescing deferred execution.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

enum Signal {
    Poke,
    Cancel,
}

/// Runs an action once after a quiet window, coalescing rapid triggers.
///
/// Each [`poke`](Debouncer::poke) arms (or re-arms) the timer; the action
/// fires on the worker thread only once no poke has arrived for the whole
/// window. [`cancel`](Debouncer::cancel) disarms a pending fire without
/// running the action - used when the caller has already done the work
/// itself (e.g. an explicit save).
///
/// Dropping the debouncer stops the worker; a pending fire is dropped with
/// it. Callers that need the final state persisted must save explicitly
/// before dropping.
pub struct Debouncer {
    tx: Sender<Signal>,
    worker: Option<JoinHandle<()>>,
}

impl Debouncer {
    /// Creates a debouncer running `action` after each `window` of quiet.
    pub fn new<F>(window: Duration, action: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Signal>();
        let worker = thread::spawn(move || {
            // Outer loop waits for the first poke of a burst; the inner
            // loop extends the deadline until the burst goes quiet.
            while let Ok(signal) = rx.recv() {
                if matches!(signal, Signal::Cancel) {
                    continue;
                }
                loop {
                    match rx.recv_timeout(window) {
                        Ok(Signal::Poke) => continue,
                        Ok(Signal::Cancel) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            action();
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
            debug!("debounce worker exiting");
        });

        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Arms or re-arms the timer.
    pub fn poke(&self) {
        // A send error means the worker is gone; nothing left to defer.
        let _ = self.tx.send(Signal::Poke);
    }

    /// Disarms a pending fire, if any.
    pub fn cancel(&self) {
        let _ = self.tx.send(Signal::Cancel);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let (tx, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.tx, tx));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

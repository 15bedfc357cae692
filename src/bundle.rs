//! # Bundle: a concurrent task/join primitive
//!
//! A [`Bundle`] runs independent units of work on a bounded worker pool and
//! lets the caller wait for all of them at once. It exists to bound the
//! wall-clock cost of operating on many independent ephemerides (e.g. a
//! statistical ensemble of perturbed initial conditions) to the slowest
//! member rather than the sum.
//!
//! Semantics
//! -----------------
//! * [`add`](Bundle::add) may be called repeatedly before
//!   [`join`](Bundle::join);
//! * every task runs to completion regardless of individual failures —
//!   there is no fail-fast cancellation;
//! * the **first** recorded failure, if any, is reported by `join` after the
//!   drain;
//! * a bundle is single-use: `join` consumes it, so adding after joining is
//!   rejected at compile time.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::orrery_errors::OrreryError;

type Task = Box<dyn FnOnce() -> Result<(), OrreryError> + Send + 'static>;

/// A single-use batch of concurrent tasks.
pub struct Bundle {
    sender: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
    first_error: Arc<Mutex<Option<OrreryError>>>,
}

impl Bundle {
    /// Creates a bundle executing on `workers` pool threads (at least one).
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let first_error = Arc::new(Mutex::new(None));
        let workers = (0..workers.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let first_error = Arc::clone(&first_error);
                thread::spawn(move || loop {
                    let task = {
                        let receiver = receiver
                            .lock()
                            .unwrap_or_else(|poison| poison.into_inner());
                        receiver.recv()
                    };
                    match task {
                        Ok(task) => {
                            if let Err(error) = task() {
                                let mut slot = first_error
                                    .lock()
                                    .unwrap_or_else(|poison| poison.into_inner());
                                // Only the first failure is reported.
                                slot.get_or_insert(error);
                            }
                        }
                        // Channel closed: the bundle is joining.
                        Err(_) => break,
                    }
                })
            })
            .collect();
        Self {
            sender,
            workers,
            first_error,
        }
    }

    /// Enqueues one unit of work.
    pub fn add<F>(&self, task: F)
    where
        F: FnOnce() -> Result<(), OrreryError> + Send + 'static,
    {
        // The receiver outlives self, so this send cannot fail.
        let _ = self.sender.send(Box::new(task));
    }

    /// Blocks until every enqueued task has completed, then reports the
    /// first recorded failure, if any.
    pub fn join(self) -> Result<(), OrreryError> {
        drop(self.sender);
        for worker in self.workers {
            // A panicking task is a programming error; surface it.
            if let Err(panic) = worker.join() {
                std::panic::resume_unwind(panic);
            }
        }
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        match slot.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Listener callback queue.
//!
//! Each player delivers its events on one worker thread, in the order they
//! were submitted. The worker is started on the first submission and exits
//! when the dispatcher is dropped and the queue has drained.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread;

use tracing::{error, warn};

/// Name of the callback worker thread
pub const WORKER_NAME: &str = "player-callback";

/// A queued callback
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-threaded FIFO callback executor
#[derive(Default)]
pub struct EventDispatcher {
    sender: Mutex<Option<Sender<Job>>>,
}

impl EventDispatcher {
    /// Create a dispatcher; no thread is started yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind every job submitted before it
    pub fn submit(&self, job: Job) {
        let Ok(mut sender) = self.sender.lock() else {
            warn!("Callback queue poisoned; dropping event");
            return;
        };

        let job = match sender.as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::SendError(job)) => job,
            },
            None => job,
        };

        // First event, or the worker has gone away
        let Some(tx) = spawn_worker() else { return };
        let _ = tx.send(job);
        *sender = Some(tx);
    }

    /// Check if the worker thread has been started
    pub fn is_running(&self) -> bool {
        self.sender.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

fn spawn_worker() -> Option<Sender<Job>> {
    let (tx, rx) = mpsc::channel::<Job>();
    let spawned = thread::Builder::new()
        .name(WORKER_NAME.to_string())
        .spawn(move || {
            while let Ok(job) = rx.recv() {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Player listener panicked: {}", message);
                }
            }
        });

    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            error!("Failed to start {} thread: {}", WORKER_NAME, e);
            None
        }
    }
}

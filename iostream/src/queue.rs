//! Serial execution context for channel callbacks.
//!
//! Every completion a backend produces is submitted to a [`Queue`] and
//! runs there, one task at a time, in submission order. Execution is
//! guarded by a lock, so even when several threads call
//! [`Queue::run_pending`] no two callbacks ever overlap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    label: String,
    tasks: Mutex<VecDeque<Task>>,
    running: Mutex<()>,
    notify: Notify,
    shutdown: AtomicBool,
}

/// Cloneable handle to a FIFO of callbacks.
#[derive(Clone)]
pub struct Queue {
    shared: Arc<Shared>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Queue {
    /// Creates an empty queue named `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                tasks: Mutex::new(VecDeque::new()),
                running: Mutex::new(()),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Name used in log lines.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Enqueues a task and wakes the driver, if any.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.shared.tasks).push_back(Box::new(task));
        self.shared.notify.notify_one();
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.shared.tasks).len()
    }

    /// Runs queued tasks until the queue is empty.
    ///
    /// Tasks submitted by running tasks are picked up in the same call.
    /// Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let _running = lock(&self.shared.running);
        let mut ran = 0;
        loop {
            // The task lock must be released before the task runs; tasks submit.
            let task = lock(&self.shared.tasks).pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            log::trace!("queue {}: ran {} task(s)", self.shared.label, ran);
        }
        ran
    }

    /// Drives the queue until [`Queue::shutdown`] is called.
    pub async fn run(self) {
        log::debug!("queue {}: driver started", self.shared.label);
        while !self.shared.shutdown.load(Ordering::Acquire) {
            self.run_pending();
            self.shared.notify.notified().await;
        }
        self.run_pending();
        log::debug!("queue {}: driver stopped", self.shared.label);
    }

    /// Stops a running driver after it drains what is already queued.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("label", &self.shared.label)
            .field("pending", &self.pending())
            .finish()
    }
}

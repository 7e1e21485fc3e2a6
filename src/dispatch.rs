//! Posting work onto the thread that owns some piece of state.
//!
//! The harness never calls into UI or presentation code from the emulation
//! thread directly; it hands closures to a [`Dispatcher`] and the owning
//! thread runs them from its [`DispatchQueue`].

use std::time::Duration;

use crossbeam_channel as cb;
use log::trace;

/// Unit of work posted to another execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// "Post to owning context" capability.
pub trait Dispatcher: Send + Sync {
    /// Queue `job` for execution on the owning context. Never runs it inline.
    fn dispatch(&self, job: Job);
}

/// Sending half of a [`dispatch_queue`].
#[derive(Clone)]
pub struct QueueDispatcher {
    tx: cb::Sender<Job>,
}

/// Receiving half of a [`dispatch_queue`], drained by the owning thread.
pub struct DispatchQueue {
    rx: cb::Receiver<Job>,
}

pub fn dispatch_queue() -> (QueueDispatcher, DispatchQueue) {
    let (tx, rx) = cb::unbounded();
    (QueueDispatcher { tx }, DispatchQueue { rx })
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            trace!("dispatch target is gone; dropping job");
        }
    }
}

impl DispatchQueue {
    /// Run every job already queued and return how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one job, run it, then drain the rest.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                1 + self.run_pending()
            }
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

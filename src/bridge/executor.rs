//! Async dispatch executor
//!
//! A small worker set drains a channel of queued calls and runs each one
//! through the dispatcher, resolving its [`PendingResult`] exactly once.
//! Submission never blocks on the embedded runtime; completion order across
//! independent targets is NOT guaranteed to follow submission order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::bridge::callback::CallbackProxy;
use crate::bridge::dispatch::{CallSpec, Dispatcher};
use crate::bridge::error::BridgeError;
use crate::bridge::pending::PendingResult;

struct Job {
    spec: CallSpec,
    pending: PendingResult,
}

/// Worker set scheduling dispatches off the calling thread
pub struct AsyncExecutor {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl AsyncExecutor {
    /// Spawn `worker_count` dispatch workers
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        proxy: Arc<CallbackProxy>,
        worker_count: usize,
    ) -> Self {
        let (tx, rx) = channel::unbounded::<Job>();
        let workers = (0..worker_count.max(1))
            .map(|i| {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                let proxy = proxy.clone();
                thread::Builder::new()
                    .name(format!("qiao-dispatch-{i}"))
                    .spawn(move || run_worker(i, rx, dispatcher, proxy))
                    .expect("failed to spawn dispatch worker")
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Queue a call; the returned handle is the caller's `pending` clone
    pub fn submit(
        &self,
        spec: CallSpec,
        pending: PendingResult,
    ) {
        let tx = self.tx.as_ref().expect("executor already shut down");
        // Send cannot fail while the workers hold the receiver
        let _ = tx.send(Job { spec, pending });
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    index: usize,
    rx: Receiver<Job>,
    dispatcher: Arc<Dispatcher>,
    proxy: Arc<CallbackProxy>,
) {
    trace!("dispatch worker {index} up");
    for job in rx.iter() {
        // Cancelled or deadline-expired while queued: never enter the
        // embedded context
        if job.pending.cancel_requested() {
            job.pending.complete(Err(BridgeError::Cancelled));
            continue;
        }
        if let Some(deadline) = job.spec.deadline {
            if Instant::now() >= deadline {
                job.pending.complete(Err(BridgeError::Cancelled));
                continue;
            }
        }
        // A cancel landing between the started store and the flag check
        // returns false on both sides; resolving here keeps the cell from
        // staying pending forever (complete is first-transition-wins, so
        // the cancelled-while-queued case stays a no-op)
        if !job.pending.mark_started() {
            job.pending.complete(Err(BridgeError::Cancelled));
            continue;
        }

        let outcome = dispatcher.dispatch(job.spec, proxy.as_ref());
        if !job.pending.complete(outcome) {
            debug!("dispatch worker {index}: result for already-terminal call dropped");
        }
    }
    trace!("dispatch worker {index} down");
}

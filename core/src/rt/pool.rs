use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use tracing::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool draining a bounded task queue.
///
/// If the queue is full at submission time the submitting thread executes
/// the task itself synchronously instead of blocking, so saturation degrades
/// throughput but never deadlocks a submitter.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    queue: Receiver<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize, queue_cap: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = bounded::<Job>(queue_cap.max(1));
        let workers = (0..threads)
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("rill-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("spawn worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            queue: receiver,
            workers,
        }
    }

    /// One worker per available core, with a queue sized well past the
    /// worker count so short bursts rarely overflow.
    pub fn with_default_size() -> Self {
        let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(threads, threads * 64)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().expect("worker pool running");
        match sender.try_send(Box::new(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                trace!(target: "rill::pool", "queue full, running task inline");
                job();
            }
            Err(TrySendError::Disconnected(job)) => job(),
        }
    }

    /// Pop one queued job and run it on the calling thread. A thread that
    /// blocks while its own submissions sit in the queue can starve the
    /// pool once every worker is parked the same way; stealing between
    /// polls keeps the queue draining.
    pub fn run_pending(&self) -> bool {
        match self.queue.try_recv() {
            Ok(job) => {
                job();
                true
            }
            Err(_) => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        let me = thread::current().id();
        for handle in self.workers.drain(..) {
            // A worker can hold the last reference to the pool through a
            // queued task; never join the current thread.
            if handle.thread().id() == me {
                continue;
            }
            let _ = handle.join();
        }
    }
}

//! Worker pool for frame-parallel processing.
//!
//! Bounded channels keep memory in check, a shared shutdown flag gives
//! graceful termination, and task distribution is pull-based: frames are
//! independent, so any worker may take any frame without affecting output
//! (seed derivation never depends on execution order).

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub struct WorkerPool<Task, Out> {
    task_tx: Option<Sender<Task>>,
    out_rx: Receiver<Out>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl<Task, Out> WorkerPool<Task, Out>
where
    Task: Send + 'static,
    Out: Send + 'static,
{
    /// Spawns `num_workers` threads running `work` over submitted tasks.
    /// Both channels are bounded to `queue_cap`.
    pub fn new(
        num_workers: usize,
        queue_cap: usize,
        work: impl Fn(Task) -> Out + Send + Sync + 'static,
    ) -> Result<Self> {
        anyhow::ensure!(num_workers > 0, "Worker pool needs at least one worker");
        let (task_tx, task_rx) = bounded::<Task>(queue_cap);
        let (out_tx, out_rx) = bounded::<Out>(queue_cap);
        let shutdown = Arc::new(AtomicBool::new(false));
        let work = Arc::new(work);

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let task_rx = task_rx.clone();
            let out_tx = out_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let work = Arc::clone(&work);
            let handle = thread::Builder::new()
                .name(format!("prep-worker-{worker_id}"))
                .spawn(move || {
                    // recv() errors once the task channel closes: drain and exit.
                    while let Ok(task) = task_rx.recv() {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        if out_tx.send(work(task)).is_err() {
                            break; // collector went away
                        }
                    }
                })
                .with_context(|| format!("Failed to spawn worker {worker_id}"))?;
            handles.push(handle);
        }

        Ok(Self {
            task_tx: Some(task_tx),
            out_rx,
            shutdown,
            handles,
        })
    }

    /// Submits one task, blocking when the queue is full.
    pub fn submit(&self, task: Task) -> Result<()> {
        self.task_tx
            .as_ref()
            .ok_or_else(|| anyhow!("Worker pool already finished"))?
            .send(task)
            .map_err(|_| anyhow!("Worker pool shut down before task was accepted"))
    }

    /// Result receiver. Take this before handing the pool to a feeder
    /// thread so submission and collection can overlap; with bounded
    /// queues, submitting everything before reading anything deadlocks.
    pub fn results(&self) -> Receiver<Out> {
        self.out_rx.clone()
    }

    /// Closes the task channel so workers exit after draining it, and
    /// returns the result receiver. Results arrive in completion order;
    /// the receiver disconnects once every worker has exited. Workers are
    /// detached here rather than joined, since joining before the caller
    /// has drained the receiver would deadlock on the bounded channel.
    pub fn finish(mut self) -> Receiver<Out> {
        self.task_tx.take();
        self.handles.clear();
        self.out_rx.clone()
    }
}

impl<Task, Out> Drop for WorkerPool<Task, Out> {
    fn drop(&mut self) {
        // finish() empties `handles`; an abandoned pool still holds them
        // and must stop workers mid-queue before joining.
        if !self.handles.is_empty() {
            self.shutdown.store(true, Ordering::Relaxed);
            self.task_tx.take();
            // Unblock workers stuck in send(), then join. recv() fails
            // once every worker has dropped its sender.
            while self.out_rx.recv().is_ok() {}
            for handle in self.handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

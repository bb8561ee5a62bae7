// Fixed-size worker pool with a bounded job queue

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type JobHandler<J> = Arc<dyn Fn(J) -> JobFuture + Send + Sync>;

/// Terminal outcome counts of a dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub submitted: usize,
    pub done: usize,
    pub failed: usize,
}

impl DispatchReport {
    /// Every submitted job reached DONE or FAILED.
    pub fn is_complete(&self) -> bool {
        self.submitted == self.done + self.failed
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicUsize,
    done: AtomicUsize,
    failed: AtomicUsize,
}

/// Worker count to use when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Runs a handler over queued jobs on a fixed pool of workers.
///
/// A failing or panicking job is logged and counted; it never stops the pool.
/// `add` waits while the queue is full.
pub struct Dispatcher<J> {
    workers: usize,
    capacity: usize,
    handler: JobHandler<J>,
    sender: Option<mpsc::Sender<J>>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl<J> Dispatcher<J>
where
    J: fmt::Display + Send + 'static,
{
    /// `workers == 0` selects the available parallelism.
    pub fn new<F, Fut>(workers: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let workers = if workers == 0 { default_workers() } else { workers };
        Self {
            workers,
            capacity: capacity.max(1),
            handler: Arc::new(move |job| Box::pin(handler(job)) as JobFuture),
            sender: None,
            handles: Vec::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Launch the workers. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.sender.is_some() {
            return;
        }

        let (sender, receiver) = mpsc::channel::<J>(self.capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..self.workers {
            let receiver = receiver.clone();
            let handler = self.handler.clone();
            let counters = self.counters.clone();

            self.handles.push(tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    run_job(worker, job, &handler, &counters).await;
                }
                debug!("Worker {} drained", worker);
            }));
        }

        debug!("Started {} workers (queue capacity {})", self.workers, self.capacity);
        self.sender = Some(sender);
    }

    /// Enqueue a job, waiting while the queue is full.
    pub async fn add(&self, job: J) -> Result<()> {
        let Some(sender) = &self.sender else {
            bail!("Dispatcher not started");
        };
        if sender.send(job).await.is_err() {
            bail!("Dispatcher workers have stopped");
        }
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Close the queue and wait until every worker has drained and exited.
    pub async fn wait(mut self) -> DispatchReport {
        drop(self.sender.take());

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }

        DispatchReport {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            done: self.counters.done.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

async fn run_job<J: fmt::Display>(worker: usize, job: J, handler: &JobHandler<J>, counters: &Counters) {
    let label = job.to_string();
    let outcome = AssertUnwindSafe(async { handler(job).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {
            counters.done.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Err(e)) => {
            error!("Worker {}: {} failed: {:#}", worker, label, e);
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
        Err(_) => {
            error!("Worker {}: {} panicked", worker, label);
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

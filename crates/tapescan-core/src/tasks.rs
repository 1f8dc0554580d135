//! Bounded-concurrency task executor.
//!
//! A [`TaskPool`] runs a fixed number of workers that pull boxed futures from
//! a bounded queue. Each finished task contributes either a result or an
//! error, in arrival order. [`fan_out`] is the typed convenience wrapper
//! that pushes a homogeneous batch through one processing function.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A unit of work: a boxed future producing one result or one error.
pub type Task<T, E> = BoxFuture<'static, Result<T, E>>;

/// Everything a pool produced, collected by [`TaskPool::wait`].
///
/// `results` and `errors` are in completion order, not submission order;
/// callers that need to correlate outputs with inputs should carry a key
/// inside `T` and `E`.
#[derive(Debug)]
pub struct Outcome<T, E> {
    pub results: Vec<T>,
    pub errors: Vec<E>,
    /// Tasks submitted but never completed: dropped after cancellation,
    /// abandoned mid-flight, or lost to a worker panic.
    pub dropped: usize,
}

// ==============================================================================
// TaskPool
// ==============================================================================

pub struct TaskPool<T, E> {
    queue: mpsc::Sender<Task<T, E>>,
    outcomes: mpsc::UnboundedReceiver<Result<T, E>>,
    workers: JoinSet<()>,
    cancel: CancellationToken,
    submitted: usize,
}

impl<T, E> TaskPool<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Start `workers` workers behind a queue of `queue_capacity` pending
    /// tasks. Both are clamped to at least one. Must be called from within a
    /// Tokio runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self::with_cancellation(workers, queue_capacity, CancellationToken::new())
    }

    /// Like [`TaskPool::new`], stopping when `cancel` fires. Pass a child
    /// token to tie the pool to a wider operation.
    pub fn with_cancellation(workers: usize, queue_capacity: usize, cancel: CancellationToken) -> Self {
        let (queue, rx) = mpsc::channel::<Task<T, E>>(queue_capacity.max(1));
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        let mut set = JoinSet::new();
        for _ in 0..workers.max(1) {
            set.spawn(worker_loop(
                Arc::clone(&rx),
                outcome_tx.clone(),
                cancel.clone(),
            ));
        }

        Self {
            queue,
            outcomes,
            workers: set,
            cancel,
            submitted: 0,
        }
    }

    /// Enqueue a task, waiting for queue space. After cancellation the task
    /// is silently dropped.
    pub async fn submit<Fut>(&mut self, task: Fut)
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.submitted += 1;
        if self.cancel.is_cancelled() {
            return;
        }
        let task: Task<T, E> = Box::pin(task);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            // Every worker exiting early also closes the queue; the task is
            // then counted as dropped.
            _ = self.queue.send(task) => {}
        }
    }

    /// Stop workers from pulling further tasks and abandon running ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Close the queue, let the workers drain it, and collect what they
    /// produced.
    pub async fn wait(self) -> Outcome<T, E> {
        let Self {
            queue,
            mut outcomes,
            mut workers,
            submitted,
            ..
        } = self;
        drop(queue);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "task pool worker terminated abnormally");
            }
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        while let Ok(outcome) = outcomes.try_recv() {
            match outcome {
                Ok(value) => results.push(value),
                Err(err) => errors.push(err),
            }
        }
        let dropped = submitted.saturating_sub(results.len() + errors.len());
        debug!(
            submitted,
            results = results.len(),
            errors = errors.len(),
            dropped,
            "task pool drained"
        );

        Outcome {
            results,
            errors,
            dropped,
        }
    }
}

async fn worker_loop<T, E>(
    queue: Arc<Mutex<mpsc::Receiver<Task<T, E>>>>,
    outcomes: mpsc::UnboundedSender<Result<T, E>>,
    cancel: CancellationToken,
) {
    loop {
        // The receiver lock is held only while waiting for the next task,
        // never while running one.
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = async { queue.lock().await.recv().await } => next,
        };
        let Some(task) = next else {
            return;
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            outcome = task => outcome,
        };
        if outcomes.send(outcome).is_err() {
            return;
        }
    }
}

// ==============================================================================
// Typed Fan-Out
// ==============================================================================

/// Run `process` over every input on one [`TaskPool`] and collect the
/// outcome. Only membership of `results` and `errors` is guaranteed, not
/// their order.
pub async fn fan_out<I, T, E, F, Fut>(
    inputs: impl IntoIterator<Item = I>,
    workers: usize,
    queue_capacity: usize,
    cancel: &CancellationToken,
    process: F,
) -> Outcome<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let mut pool = TaskPool::with_cancellation(workers, queue_capacity, cancel.child_token());
    for input in inputs {
        pool.submit(process(input)).await;
    }
    pool.wait().await
}

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use crate::{
    constants::MIN_WORKERS,
    core::{
        queue::{ClaimedJob, JobQueue},
        traits::processor::JobProcessor,
    },
};

/// One worker per spare core, but never fewer than `MIN_WORKERS`.
pub fn worker_count(available_parallelism: usize) -> usize {
    available_parallelism.saturating_sub(1).max(MIN_WORKERS)
}

/// Fixed set of workers pulling from one queue. Each worker handles a single
/// job at a time, so at most `concurrency` jobs execute at once.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn spawn(queue: JobQueue, processor: Arc<dyn JobProcessor>, concurrency: usize) -> Self {
        let workers = (0..concurrency)
            .map(|worker_id| {
                let queue = queue.clone();
                let processor = processor.clone();
                tokio::spawn(async move { work(worker_id, queue, processor).await })
            })
            .collect();

        tracing::info!("Started {} workers", concurrency);
        Self {
            workers,
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Waits for every worker to stop. Workers stop once the queue is closed
    /// and drained.
    pub async fn join(self) {
        let mut workers: FuturesUnordered<_> = self.workers.into_iter().collect();
        while let Some(joined) = workers.next().await {
            if let Err(e) = joined {
                tracing::error!("Worker terminated abnormally: {}", e);
            }
        }
    }
}

async fn work(worker_id: usize, queue: JobQueue, processor: Arc<dyn JobProcessor>) {
    tracing::debug!("Worker {} started", worker_id);
    while let Some(claimed) = queue.claim().await {
        run_attempt(worker_id, &queue, &processor, claimed).await;
    }
    tracing::debug!("Worker {} stopped", worker_id);
}

/// Runs one delivery of a job on its own task so a panic or a stuck attempt
/// is reported to the queue instead of taking the worker down.
async fn run_attempt(
    worker_id: usize,
    queue: &JobQueue,
    processor: &Arc<dyn JobProcessor>,
    claimed: ClaimedJob,
) {
    let ClaimedJob { job, attempt } = claimed;
    let id = job.id;
    let job_timeout = queue.options().job_timeout;
    tracing::debug!("Worker {} picked up job {} (attempt {})", worker_id, id, attempt);

    let processor = processor.clone();
    let mut task = tokio::spawn(async move { processor.process(&job).await });

    let finished = timeout(job_timeout, &mut task).await;
    match finished {
        Ok(Ok(Ok(result))) => queue.complete(id, result),
        Ok(Ok(Err(e))) => queue.fail(id, e.to_string()),
        Ok(Err(e)) => queue.fail(id, format!("worker crashed: {}", e)),
        Err(_) => {
            // Wait for the cancelled attempt to unwind so its processes are
            // gone before this worker picks up another job.
            task.abort();
            let _ = task.await;
            queue.fail(id, format!("job timed out after {:?}", job_timeout));
        }
    }
}

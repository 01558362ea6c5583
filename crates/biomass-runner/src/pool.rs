//! Fixed-size worker pool with a per-task time budget.
//!
//! Workers share one job queue. Each [`WorkerPool::run`] call gets its own
//! report channel; a task that overruns its budget is recorded as timed out
//! and whatever it eventually returns is dropped along with that channel.

use crate::{Result, RunnerError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult<O> {
    Completed(O),
    /// No result within the time budget.
    TimedOut,
    /// The handler panicked; holds the panic message.
    Panicked(String),
}

impl<O> TaskResult<O> {
    pub fn completed(self) -> Option<O> {
        match self {
            TaskResult::Completed(output) => Some(output),
            _ => None,
        }
    }
}

// ============================================================================
// Worker Messages
// ============================================================================

struct Job<I, O> {
    index: usize,
    input: I,
    report_tx: Sender<WorkerReport<O>>,
}

enum WorkerReport<O> {
    Started { index: usize, at: Instant },
    Finished { index: usize, result: TaskResult<O> },
}

type Handler<I, O> = Arc<dyn Fn(I) -> O + Send + Sync>;

fn worker_main<I, O>(job_rx: Receiver<Job<I, O>>, handler: Handler<I, O>) {
    while let Ok(job) = job_rx.recv() {
        let Job {
            index,
            input,
            report_tx,
        } = job;
        // The run that queued this job already gave up on it.
        if report_tx
            .send(WorkerReport::Started {
                index,
                at: Instant::now(),
            })
            .is_err()
        {
            continue;
        }
        let result = match panic::catch_unwind(AssertUnwindSafe(|| handler(input))) {
            Ok(output) => TaskResult::Completed(output),
            Err(payload) => TaskResult::Panicked(panic_message(payload.as_ref())),
        };
        let _ = report_tx.send(WorkerReport::Finished { index, result });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Pool
// ============================================================================

pub struct WorkerPool<I, O> {
    job_tx: Option<Sender<Job<I, O>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<I, O> std::fmt::Debug for WorkerPool<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl<I, O> WorkerPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Start `size` workers (at least one) named `{name}-{n}`.
    pub fn new<F>(name: &str, size: usize, handler: F) -> Result<Self>
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        let handler: Handler<I, O> = Arc::new(handler);
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let workers = (0..size.max(1))
            .map(|n| {
                let job_rx = job_rx.clone();
                let handler = handler.clone();
                thread::Builder::new()
                    .name(format!("{name}-{n}"))
                    .spawn(move || worker_main(job_rx, handler))
                    .map_err(RunnerError::Spawn)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(name, workers = workers.len(), "Worker pool started");
        Ok(Self {
            job_tx: Some(job_tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every input through the handler and return results in input
    /// order. Each task's budget starts when a worker picks it up; if no
    /// task starts or finishes within one budget, everything still pending
    /// is timed out.
    pub fn run(&self, inputs: Vec<I>, timeout: Duration) -> Vec<TaskResult<O>> {
        let total = inputs.len();
        let mut results: Vec<Option<TaskResult<O>>> = (0..total).map(|_| None).collect();
        let Some(job_tx) = &self.job_tx else {
            return (0..total)
                .map(|_| TaskResult::Panicked("worker pool shut down".into()))
                .collect();
        };

        let (report_tx, report_rx) = crossbeam_channel::unbounded();
        for (index, input) in inputs.into_iter().enumerate() {
            let job = Job {
                index,
                input,
                report_tx: report_tx.clone(),
            };
            if job_tx.send(job).is_err() {
                results[index] = Some(TaskResult::Panicked("worker pool shut down".into()));
            }
        }
        drop(report_tx);

        let mut remaining = results.iter().filter(|r| r.is_none()).count();
        let mut running: HashMap<usize, Instant> = HashMap::new();
        while remaining > 0 {
            let received = match running.values().min() {
                Some(earliest) => report_rx.recv_deadline(*earliest + timeout),
                None => report_rx.recv_timeout(timeout),
            };
            match received {
                Ok(WorkerReport::Started { index, at }) => {
                    if results[index].is_none() {
                        running.insert(index, at);
                    }
                }
                Ok(WorkerReport::Finished { index, result }) => {
                    running.remove(&index);
                    if results[index].is_none() {
                        results[index] = Some(result);
                        remaining -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if running.is_empty() {
                        warn!(remaining, "No task started within the time budget");
                        break;
                    }
                    let now = Instant::now();
                    let expired: Vec<usize> = running
                        .iter()
                        .filter(|(_, at)| now.duration_since(**at) >= timeout)
                        .map(|(index, _)| *index)
                        .collect();
                    for index in expired {
                        running.remove(&index);
                        results[index] = Some(TaskResult::TimedOut);
                        remaining -= 1;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(TaskResult::TimedOut))
            .collect()
    }

    /// Stop accepting work and wait for the workers to exit. Blocks while a
    /// worker is still inside a handler.
    pub fn shutdown(mut self) {
        self.job_tx = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Worker thread exited abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_in_input_order() {
        let pool = WorkerPool::new("square", 3, |n: u64| n * n).unwrap();
        assert_eq!(pool.size(), 3);
        let results = pool.run((0..20).collect(), Duration::from_secs(5));
        let squares: Vec<u64> = results.into_iter().filter_map(TaskResult::completed).collect();
        assert_eq!(squares, (0..20).map(|n| n * n).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn test_zero_size_starts_one_worker() {
        let pool = WorkerPool::new("one", 0, |n: u32| n + 1).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(
            pool.run(vec![1], Duration::from_secs(5)),
            vec![TaskResult::Completed(2)]
        );
    }

    #[test]
    fn test_panic_is_contained() {
        let pool = WorkerPool::new("panicky", 2, |n: u32| {
            if n == 2 {
                panic!("bad input {n}");
            }
            n
        })
        .unwrap();
        let results = pool.run(vec![1, 2, 3], Duration::from_secs(5));
        assert_eq!(results[0], TaskResult::Completed(1));
        assert_eq!(results[1], TaskResult::Panicked("bad input 2".into()));
        assert_eq!(results[2], TaskResult::Completed(3));

        // Workers survive a panic.
        assert_eq!(
            pool.run(vec![4], Duration::from_secs(5)),
            vec![TaskResult::Completed(4)]
        );
        pool.shutdown();
    }

    #[test]
    fn test_slow_task_times_out_without_blocking_others() {
        let pool = WorkerPool::new("slow", 2, |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
            ms
        })
        .unwrap();
        let results = pool.run(vec![1500, 5, 5, 5], Duration::from_millis(300));
        assert_eq!(results[0], TaskResult::TimedOut);
        assert_eq!(&results[1..], &[
            TaskResult::Completed(5),
            TaskResult::Completed(5),
            TaskResult::Completed(5)
        ]);

        // The late result from the previous run is not delivered here.
        let results = pool.run(vec![1, 2], Duration::from_secs(5));
        assert_eq!(results, vec![TaskResult::Completed(1), TaskResult::Completed(2)]);
    }

    #[test]
    fn test_abandoned_jobs_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let pool = WorkerPool::new("single", 1, move |ms: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(ms));
        })
        .unwrap();
        // The only worker is stuck on the first task, so the rest never start.
        let results = pool.run(vec![800, 1, 1], Duration::from_millis(200));
        assert!(results.iter().all(|r| *r == TaskResult::TimedOut));

        let results = pool.run(vec![1], Duration::from_secs(5));
        assert_eq!(results, vec![TaskResult::Completed(())]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

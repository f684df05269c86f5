//! Bounded worker pool executing tasks.
//!
//! The scheduler owns N named worker threads fed by two crossbeam channels:
//! a FIFO queue for normal work and a high-priority queue that workers drain
//! first (for operations a user is actively waiting on). Parallelism is
//! bounded by the worker count — processing tasks are CPU- and memory-bound,
//! and unbounded parallelism over shared arenas risks memory exhaustion.
//!
//! Submission is non-blocking and returns a shared [`Task`] handle the
//! caller can poll for status and progress. One task ending in Error never
//! affects sibling scheduling: the worker simply moves on to the next queued
//! task. Shutdown is cooperative — [`TaskScheduler::cancel_all`] broadcasts
//! cancellation to every outstanding token, and [`TaskScheduler::shutdown`]
//! drains the queues and joins the workers without ever killing a thread.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{never, unbounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};

use crate::task::Task;

/// Queue placement hint for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPriority {
    /// FIFO behind every previously submitted normal task.
    #[default]
    Normal,
    /// Bypass the normal queue; picked up by the next free worker.
    High,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running in parallel.
    pub num_workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }
}

/// Errors surfaced by the scheduler API.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// submit() after shutdown began
    #[error("scheduler is shut down")]
    ShutDown,

    /// Worker thread failed to spawn (extremely rare)
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Bounded worker pool with FIFO and high-priority queues.
pub struct TaskScheduler {
    normal_tx: Option<Sender<Arc<Task>>>,
    high_tx: Option<Sender<Arc<Task>>>,
    workers: Vec<JoinHandle<()>>,
    tasks: Mutex<Vec<Arc<Task>>>,
}

impl TaskScheduler {
    /// Spawn the worker pool. Threads are named `mzflow-worker-{i}` for
    /// debugging with `top`/`htop`.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let num_workers = config.num_workers.max(1);
        let (normal_tx, normal_rx) = unbounded::<Arc<Task>>();
        let (high_tx, high_rx) = unbounded::<Arc<Task>>();

        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let normal_rx = normal_rx.clone();
            let high_rx = high_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("mzflow-worker-{index}"))
                .spawn(move || worker_loop(high_rx, normal_rx))
                .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
            workers.push(handle);
        }
        info!("task scheduler started with {num_workers} workers");

        Ok(Self {
            normal_tx: Some(normal_tx),
            high_tx: Some(high_tx),
            workers,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue a task at normal priority. Non-blocking; returns the shared
    /// handle observers poll.
    pub fn submit(&self, task: Task) -> Result<Arc<Task>, SchedulerError> {
        self.submit_with_priority(task, TaskPriority::Normal)
    }

    /// Enqueue a task with an explicit priority hint.
    pub fn submit_with_priority(
        &self,
        task: Task,
        priority: TaskPriority,
    ) -> Result<Arc<Task>, SchedulerError> {
        let sender = match priority {
            TaskPriority::Normal => self.normal_tx.as_ref(),
            TaskPriority::High => self.high_tx.as_ref(),
        }
        .ok_or(SchedulerError::ShutDown)?;

        let task = Arc::new(task);
        lock_tasks(&self.tasks).push(Arc::clone(&task));
        debug!("submitted task ({priority:?}): {}", task.description());
        sender
            .send(Arc::clone(&task))
            .map_err(|_| SchedulerError::ShutDown)?;
        Ok(task)
    }

    /// Handles to every task ever submitted, in submission order.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        lock_tasks(&self.tasks).clone()
    }

    /// Broadcast cooperative cancellation to every outstanding task. Tasks
    /// already in a terminal state ignore it; running tasks unwind at their
    /// next poll; queued tasks transition straight to Canceled when a worker
    /// picks them up.
    pub fn cancel_all(&self) {
        let tasks = lock_tasks(&self.tasks);
        info!("broadcasting cancellation to {} tasks", tasks.len());
        for task in tasks.iter() {
            task.cancel();
        }
    }

    /// Stop accepting work, drain both queues, and join the workers. Every
    /// already-submitted task still reaches a terminal state before this
    /// returns.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        // Dropping the senders disconnects the channels; workers drain what
        // is queued and exit.
        self.normal_tx.take();
        self.high_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                // A worker only dies on a contract-violation panic (e.g. a
                // re-run task); the pool itself is already shutting down.
                warn!("worker thread panicked during shutdown");
            }
        }
        info!("task scheduler shut down");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if self.normal_tx.is_some() || self.high_tx.is_some() {
            warn!("TaskScheduler dropped without shutdown(); draining queues");
            self.shutdown_inner();
        }
    }
}

enum Polled {
    Ran,
    HighClosed,
    NormalClosed,
}

fn worker_loop(mut high_rx: Receiver<Arc<Task>>, mut normal_rx: Receiver<Arc<Task>>) {
    let mut high_open = true;
    let mut normal_open = true;

    while high_open || normal_open {
        // High-priority work always wins when it is ready.
        if high_open {
            match high_rx.try_recv() {
                Ok(task) => {
                    task.run();
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    high_open = false;
                    high_rx = never();
                    continue;
                }
                Err(TryRecvError::Empty) => {}
            }
        }

        let polled = crossbeam_channel::select! {
            recv(high_rx) -> message => match message {
                Ok(task) => {
                    task.run();
                    Polled::Ran
                }
                Err(_) => Polled::HighClosed,
            },
            recv(normal_rx) -> message => match message {
                Ok(task) => {
                    task.run();
                    Polled::Ran
                }
                Err(_) => Polled::NormalClosed,
            },
        };
        match polled {
            Polled::Ran => {}
            Polled::HighClosed => {
                high_open = false;
                high_rx = never();
            }
            Polled::NormalClosed => {
                normal_open = false;
                normal_rx = never();
            }
        }
    }
}

fn lock_tasks(tasks: &Mutex<Vec<Arc<Task>>>) -> std::sync::MutexGuard<'_, Vec<Arc<Task>>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

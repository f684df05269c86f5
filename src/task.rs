//! The schedulable unit of work and its lifecycle state machine.
//!
//! A [`Task`] wraps one module-supplied work function together with the
//! cancellation token and progress reporter it owns, a shared handle to the
//! batch's storage arena, and the project handle it publishes into. There is
//! one concrete task type; module behavior is injected as a closure rather
//! than a subclass hierarchy.
//!
//! # State machine
//!
//! ```text
//! CREATED ──▶ PROCESSING ──▶ FINISHED
//!                   │──────▶ CANCELED
//!                   └──────▶ ERROR
//! ```
//!
//! Terminal states are absorbing. The scheduler invokes [`Task::run`]
//! exactly once; re-running a task that already ran is a contract violation
//! and panics. Work functions return an explicit
//! `Result<TaskOutput, WorkError>`; panics inside them are caught at the run
//! boundary and converted to the Error state, so no failure ever unwinds
//! through a worker thread.
//!
//! On success the task derives the output collection's lineage from its
//! input and appends one provenance record stamped with the *module-call*
//! timestamp captured at construction, then publishes atomically. A
//! cancellation observed before that final commit wins over natural
//! completion: the task ends Canceled and publishes nothing.

use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use uuid::Uuid;

use crate::cancel::{Canceled, CancellationToken};
use crate::collection::{DataCollection, Row};
use crate::progress::ProgressReporter;
use crate::project::{OriginalHandling, Project};
use crate::provenance::{ModuleId, ParameterSnapshot, ProvenanceRecord};
use crate::storage::{ArenaHandle, ArenaSlice, StorageError};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Processing,
    Finished,
    Canceled,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Canceled | Self::Error)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Processing,
            2 => Self::Finished,
            3 => Self::Canceled,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "CREATED",
            Self::Processing => "PROCESSING",
            Self::Finished => "FINISHED",
            Self::Canceled => "CANCELED",
            Self::Error => "ERROR",
        };
        write!(f, "{label}")
    }
}

/// Failure returned by a work function.
///
/// Cancellation is not an error — it maps to the Canceled terminal state and
/// is never surfaced to users as a failure. `Failed` carries a descriptive
/// message plus the originating cause when one exists.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("task canceled")]
    Canceled,

    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },
}

impl WorkError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    pub fn failed_with(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<Canceled> for WorkError {
    fn from(_: Canceled) -> Self {
        Self::Canceled
    }
}

impl From<StorageError> for WorkError {
    fn from(error: StorageError) -> Self {
        Self::Failed {
            message: "storage arena failure".to_string(),
            source: Some(Box::new(error)),
        }
    }
}

/// Successful result of a work function: the rows of the derived collection
/// and the name it should be published under.
#[derive(Debug)]
pub struct TaskOutput {
    pub name: String,
    pub rows: Vec<Row>,
}

impl TaskOutput {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }
}

/// Everything a work function may touch while it runs.
pub struct TaskContext {
    pub cancel: CancellationToken,
    pub progress: Arc<ProgressReporter>,
    pub arena: Option<ArenaHandle>,
    pub input: Option<Arc<DataCollection>>,
}

impl TaskContext {
    /// Append a payload to the batch arena.
    pub fn store_doubles(&self, values: &[f64]) -> Result<ArenaSlice, WorkError> {
        match &self.arena {
            Some(arena) => arena.store_doubles(values).map_err(WorkError::from),
            None => Err(WorkError::failed(
                "no storage arena was allocated for this batch",
            )),
        }
    }

    /// The input collection, for tasks that require one.
    pub fn input(&self) -> Result<&Arc<DataCollection>, WorkError> {
        self.input
            .as_ref()
            .ok_or_else(|| WorkError::failed("task has no input collection"))
    }
}

/// Module-specific work injected into a task.
pub type WorkFn = Box<dyn FnOnce(&TaskContext) -> Result<TaskOutput, WorkError> + Send>;

struct ErrorPayload {
    message: String,
    cause: Option<Box<dyn Error + Send + Sync>>,
}

/// One schedulable, cancellable, progress-reporting unit of processing work.
pub struct Task {
    id: Uuid,
    description: String,
    module: ModuleId,
    parameters: ParameterSnapshot,
    call_date: DateTime<Utc>,
    status: AtomicU8,
    error: Mutex<Option<ErrorPayload>>,
    progress: Arc<ProgressReporter>,
    cancel: CancellationToken,
    arena: Option<ArenaHandle>,
    input: Option<Arc<DataCollection>>,
    project: Arc<Project>,
    policy: OriginalHandling,
    output: Mutex<Option<Arc<DataCollection>>>,
    work: Mutex<Option<WorkFn>>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        description: String,
        module: ModuleId,
        parameters: ParameterSnapshot,
        call_date: DateTime<Utc>,
        arena: Option<ArenaHandle>,
        input: Option<Arc<DataCollection>>,
        project: Arc<Project>,
        policy: OriginalHandling,
        work: WorkFn,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            description,
            module,
            parameters,
            call_date,
            status: AtomicU8::new(TaskStatus::Created as u8),
            error: Mutex::new(None),
            progress: Arc::new(ProgressReporter::new()),
            cancel: CancellationToken::new(),
            arena,
            input,
            project,
            policy,
            output: Mutex::new(None),
            work: Mutex::new(Some(work)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable description for observers and logs; never parsed.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    /// The module-call timestamp shared by every sibling task of one
    /// invocation.
    pub fn call_date(&self) -> DateTime<Utc> {
        self.call_date
    }

    /// Non-blocking read of the current state.
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Non-blocking read of the current progress fraction.
    pub fn progress(&self) -> f64 {
        self.progress.fraction()
    }

    /// Request cooperative cancellation. Idempotent; a no-op on tasks
    /// already in a terminal state.
    pub fn cancel(&self) {
        self.cancel.request_cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Error message, present only in the Error state.
    pub fn error_message(&self) -> Option<String> {
        lock(&self.error).as_ref().map(|e| e.message.clone())
    }

    /// Rendered originating cause, when the failure carried one.
    pub fn error_cause(&self) -> Option<String> {
        lock(&self.error)
            .as_ref()
            .and_then(|e| e.cause.as_ref())
            .map(|cause| cause.to_string())
    }

    /// The collection this task published, once Finished.
    pub fn output(&self) -> Option<Arc<DataCollection>> {
        lock(&self.output).clone()
    }

    /// Execute the task on the current thread. Invoked exactly once by the
    /// scheduler.
    ///
    /// # Panics
    ///
    /// Panics if the task already ran — terminal states are final, and
    /// re-invocation is a defect in the caller, not a recoverable condition.
    pub fn run(&self) {
        let claimed = self.status.compare_exchange(
            TaskStatus::Created as u8,
            TaskStatus::Processing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(
            claimed.is_ok(),
            "task \"{}\" re-run in state {}",
            self.description,
            self.status()
        );
        debug!("task started: {}", self.description);

        // Cancel requested before a worker picked the task up: skip the work
        // function entirely.
        if self.cancel.is_canceled() {
            self.finish_canceled();
            return;
        }

        let work = lock(&self.work).take();
        let Some(work) = work else {
            // Unreachable once the CAS above succeeded; defensive.
            self.finish_error("task work function missing".to_string(), None);
            return;
        };

        let context = TaskContext {
            cancel: self.cancel.clone(),
            progress: Arc::clone(&self.progress),
            arena: self.arena.clone(),
            input: self.input.clone(),
        };

        match catch_unwind(AssertUnwindSafe(|| work(&context))) {
            Ok(Ok(output)) => self.commit(output),
            Ok(Err(WorkError::Canceled)) => self.finish_canceled(),
            Ok(Err(WorkError::Failed { message, source })) => self.finish_error(message, source),
            Err(panic) => self.finish_error(
                format!("work function panicked: {}", panic_message(panic.as_ref())),
                None,
            ),
        }
    }

    /// Final commit: build the derived collection, stamp provenance, publish
    /// atomically. A cancellation observed here wins even though the work
    /// function completed.
    fn commit(&self, output: TaskOutput) {
        if self.cancel.is_canceled() {
            self.finish_canceled();
            return;
        }

        let record = ProvenanceRecord::new(
            self.module.clone(),
            self.parameters.clone(),
            self.call_date,
        );
        let lineage = self
            .input
            .as_ref()
            .map(|input| input.lineage().clone())
            .unwrap_or_default()
            .derive(record);

        let collection = DataCollection::new(output.name, output.rows, lineage, self.arena.clone());
        let published = self
            .project
            .publish(collection, self.input.as_ref(), self.policy);
        *lock(&self.output) = Some(published);

        self.status
            .store(TaskStatus::Finished as u8, Ordering::Release);
        debug!("task finished: {}", self.description);
    }

    fn finish_canceled(&self) {
        self.status
            .store(TaskStatus::Canceled as u8, Ordering::Release);
        debug!("task canceled: {}", self.description);
    }

    fn finish_error(&self, message: String, cause: Option<Box<dyn Error + Send + Sync>>) {
        warn!("task error: {}: {}", self.description, message);
        *lock(&self.error) = Some(ErrorPayload { message, cause });
        self.status.store(TaskStatus::Error as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("description", &self.description)
            .field("module", &self.module.name)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

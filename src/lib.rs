//! # mzFlow - Task Execution and Provenance Core for MS Processing
//!
//! `mzflow` is the concurrency and lineage backbone of a mass-spectrometry
//! processing pipeline: every processing operation is modeled as an
//! asynchronous, cancellable, progress-reporting [`Task`](task::Task) that
//! produces versioned data collections stamped with an auditable record of
//! what produced them.
//!
//! ## Key Features
//!
//! - **Cooperative cancellation**: one shared token per task, polled through
//!   a uniform loop adapter; cancellation is a first-class terminal state,
//!   never an error.
//!
//! - **Bounded worker pool**: a FIFO scheduler with a high-priority bypass
//!   lane; one task failing never disturbs its siblings.
//!
//! - **Shared storage arenas**: large immutable result arrays live in a
//!   disposable, reference-counted region (temp-file backed by default)
//!   shared by every task of one module invocation, released exactly once
//!   when the last referencing collection goes away.
//!
//! - **Deterministic provenance**: each published collection carries an
//!   append-only lineage; records are stamped with the module-call
//!   timestamp, so one user action's records sort together regardless of
//!   which task finished first.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use mzflow::collection::{DataCollection, Row};
//! use mzflow::module::ModuleCall;
//! use mzflow::project::{OriginalHandling, Project};
//! use mzflow::provenance::{Lineage, ModuleId, ParameterSnapshot};
//! use mzflow::scheduler::{SchedulerConfig, TaskScheduler};
//! use mzflow::task::{TaskOutput, TaskStatus};
//!
//! // The project registry is an explicit handle, not a global.
//! let project = Arc::new(Project::new());
//! let input = project.add(DataCollection::new(
//!     "run01",
//!     vec![Row::inline(0, vec![100.0, 200.0])],
//!     Lineage::empty(),
//!     None,
//! ));
//!
//! // One invocation = one frozen parameter snapshot + one call timestamp.
//! let call = ModuleCall::new(
//!     ModuleId::new("normalize", "Intensity normalizer"),
//!     ParameterSnapshot::new().with("factor", 2.0),
//! );
//! let task = call.create_task(
//!     "Normalizing run01",
//!     Some(Arc::clone(&input)),
//!     Arc::clone(&project),
//!     OriginalHandling::KeepOriginal,
//!     Box::new(|ctx| {
//!         let input = ctx.input()?;
//!         ctx.progress.set_total(input.len());
//!         let mut rows = Vec::new();
//!         for row in ctx.cancel.checked(input.rows(), 64) {
//!             let row = row?;
//!             let values = input.row_values(row)?;
//!             rows.push(Row::inline(row.id, values.iter().map(|v| v * 2.0).collect()));
//!             ctx.progress.advance(1);
//!         }
//!         Ok(TaskOutput::new("run01 normalized", rows))
//!     }),
//! );
//!
//! let scheduler = TaskScheduler::new(SchedulerConfig { num_workers: 2 })?;
//! let handle = scheduler.submit(task)?;
//! scheduler.shutdown();
//!
//! assert_eq!(handle.status(), TaskStatus::Finished);
//! let output = handle.output().expect("published collection");
//! assert_eq!(output.lineage().len(), 1);
//! # Ok::<(), mzflow::scheduler::SchedulerError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Module invocation ──▶ ModuleCall (timestamp + parameters + one arena)
//!        │
//!        ├─▶ Task ──▶ TaskScheduler ──▶ worker pool (bounded N)
//!        │     │
//!        │     ├── CancellationToken (cooperative)
//!        │     ├── ProgressReporter  (advisory)
//!        │     └── ArenaHandle       (shared, refcounted)
//!        │
//!        └─▶ on success: DataCollection + appended ProvenanceRecord
//!                              │
//!                              ▼
//!                     Project registry (mutex-guarded publish)
//! ```

pub mod cancel;
pub mod collection;
pub mod config;
pub mod module;
pub mod progress;
pub mod project;
pub mod provenance;
pub mod scheduler;
pub mod storage;
pub mod task;

pub use cancel::{Canceled, CancellationToken};
pub use collection::{DataCollection, Row, RowValues};
pub use config::EngineConfig;
pub use module::ModuleCall;
pub use progress::ProgressReporter;
pub use project::{OriginalHandling, Project};
pub use provenance::{Lineage, ModuleId, ParameterSnapshot, ProvenanceRecord};
pub use scheduler::{SchedulerConfig, SchedulerError, TaskPriority, TaskScheduler};
pub use storage::{ArenaBacking, ArenaHandle, ArenaSlice, StorageError};
pub use task::{Task, TaskContext, TaskOutput, TaskStatus, WorkError, WorkFn};

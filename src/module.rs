//! Module-side entry point for spawning task batches.
//!
//! A [`ModuleCall`] represents one user invocation of a processing module.
//! It captures the module identity, the validated parameter snapshot, and —
//! crucially — the single call timestamp every task of the batch stamps into
//! its provenance record. Tasks finish in arbitrary order under the worker
//! pool, but records from one invocation always carry the same timestamp and
//! sort before records from any later invocation.
//!
//! When the module expects large result payloads it allocates one storage
//! arena for the whole batch here; every task and every output collection
//! then shares that arena by reference.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::collection::DataCollection;
use crate::project::{OriginalHandling, Project};
use crate::provenance::{ModuleId, ParameterSnapshot};
use crate::storage::{ArenaBacking, ArenaHandle, StorageError};
use crate::task::{Task, WorkFn};

/// One invocation of a processing module: fixed identity, frozen parameters,
/// one shared timestamp, and optionally one shared arena.
#[derive(Debug)]
pub struct ModuleCall {
    module: ModuleId,
    parameters: ParameterSnapshot,
    call_date: DateTime<Utc>,
    arena: Option<ArenaHandle>,
}

impl ModuleCall {
    /// Invocation without off-heap storage; task results stay in ordinary
    /// managed memory.
    pub fn new(module: ModuleId, parameters: ParameterSnapshot) -> Self {
        Self {
            module,
            parameters,
            call_date: Utc::now(),
            arena: None,
        }
    }

    /// Invocation with one shared storage arena for the whole batch.
    pub fn with_arena(
        module: ModuleId,
        parameters: ParameterSnapshot,
        backing: ArenaBacking,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            module,
            parameters,
            call_date: Utc::now(),
            arena: Some(ArenaHandle::allocate_for_batch(backing)?),
        })
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn parameters(&self) -> &ParameterSnapshot {
        &self.parameters
    }

    /// The timestamp shared by every task spawned from this invocation.
    pub fn call_date(&self) -> DateTime<Utc> {
        self.call_date
    }

    pub fn arena(&self) -> Option<&ArenaHandle> {
        self.arena.as_ref()
    }

    /// Build one task wrapping one input collection.
    ///
    /// The module validates parameters before calling this; the core assumes
    /// the snapshot is well-formed. `input` is `None` for import-style tasks
    /// that produce a collection from outside the project.
    pub fn create_task(
        &self,
        description: impl Into<String>,
        input: Option<Arc<DataCollection>>,
        project: Arc<Project>,
        policy: OriginalHandling,
        work: WorkFn,
    ) -> Task {
        Task::new(
            description.into(),
            self.module.clone(),
            self.parameters.clone(),
            self.call_date,
            self.arena.clone(),
            input,
            project,
            policy,
            work,
        )
    }
}

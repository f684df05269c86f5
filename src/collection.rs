//! Versioned data collections (raw files, feature lists).
//!
//! A collection is a named bag of rows plus the lineage tracing how it was
//! produced. Rows carry their numeric payload either inline or as a slice
//! into the collection's shared storage arena — the latter is how large
//! per-scan arrays stay out of working memory.
//!
//! A collection is mutated only by its producing task before that task
//! reaches a terminal state; once published to the project it is treated as
//! an immutable artifact, and later steps derive new versions instead of
//! editing in place.

use uuid::Uuid;

use crate::provenance::Lineage;
use crate::storage::{ArenaHandle, ArenaSlice, StorageError};

/// Payload of one row: a `f64` array held inline or resident in the arena.
#[derive(Debug, Clone)]
pub enum RowValues {
    Inline(Vec<f64>),
    Stored(ArenaSlice),
}

/// One row (a scan or a feature) of a data collection.
#[derive(Debug, Clone)]
pub struct Row {
    /// Row identifier, unique within the collection (scan number or feature
    /// id).
    pub id: u64,
    pub values: RowValues,
}

impl Row {
    pub fn inline(id: u64, values: Vec<f64>) -> Self {
        Self {
            id,
            values: RowValues::Inline(values),
        }
    }

    pub fn stored(id: u64, slice: ArenaSlice) -> Self {
        Self {
            id,
            values: RowValues::Stored(slice),
        }
    }
}

/// A named, versioned bag of rows with a full processing lineage.
#[derive(Debug)]
pub struct DataCollection {
    id: Uuid,
    name: String,
    rows: Vec<Row>,
    lineage: Lineage,
    arena: Option<ArenaHandle>,
}

impl DataCollection {
    /// Build a collection. `arena` must be the arena the stored rows point
    /// into; `None` means every row is inline.
    pub fn new(
        name: impl Into<String>,
        rows: Vec<Row>,
        lineage: Lineage,
        arena: Option<ArenaHandle>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            rows,
            lineage,
            arena,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    pub fn arena(&self) -> Option<&ArenaHandle> {
        self.arena.as_ref()
    }

    /// Resolve one row's payload, reading through the arena when the row is
    /// arena-resident.
    pub fn row_values(&self, row: &Row) -> Result<Vec<f64>, StorageError> {
        match &row.values {
            RowValues::Inline(values) => Ok(values.clone()),
            RowValues::Stored(slice) => match &self.arena {
                Some(arena) => arena.read_doubles(slice),
                None => Err(StorageError::Released),
            },
        }
    }
}

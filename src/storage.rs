//! Shared storage arenas for large immutable result payloads.
//!
//! One arena is allocated per module invocation (not per task) and shared by
//! reference among every task and output collection spawned from that
//! invocation. Tasks append large numeric arrays (per-scan m/z and intensity
//! data) into the arena instead of keeping them in working memory; consumers
//! read them back through the [`ArenaSlice`] they were handed.
//!
//! # Write discipline
//!
//! Each task writes only the slices it appends itself, sequentially, before
//! anything is published — slices are disjoint by construction, so there is
//! no concurrent-write contention. Once [`ArenaHandle::seal`] marks the
//! arena read-only, any further write is a contract violation and panics.
//!
//! # Lifetime
//!
//! The arena's backing region is governed by an explicit reference count,
//! separate from `Arc` memory management: every [`ArenaHandle`] clone holds
//! one count, and when the last handle drops the backing (temp file or
//! buffer) is released exactly once. Releasing while collections still hold
//! handles is impossible by construction; a refcount underflow indicates a
//! core bug and panics.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};

/// Errors surfaced by arena allocation and access.
///
/// These are ordinary runtime failures (surfaced as task ERROR); contract
/// violations such as writing to a sealed arena panic instead.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error from the temp-file backing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The arena's backing region has already been released
    #[error("storage arena already released")]
    Released,

    /// A slice points outside the written region
    #[error("arena slice out of bounds: offset {offset} + {bytes} bytes exceeds {len} written")]
    OutOfBounds { offset: u64, bytes: u64, len: u64 },
}

/// Choice of backing region for an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaBacking {
    /// Anonymous temp file, deleted on release. The off-heap default for
    /// large batches.
    #[default]
    TempFile,
    /// In-process buffer, for small short-lived results and tests.
    Memory,
}

/// Location of one immutable payload inside an arena.
///
/// Offsets are in bytes; `doubles` is the element count of the stored `f64`
/// array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaSlice {
    pub offset: u64,
    pub doubles: usize,
}

enum Backing {
    TempFile { file: File, len: u64 },
    Memory(Vec<u8>),
}

impl Backing {
    fn len(&self) -> u64 {
        match self {
            Backing::TempFile { len, .. } => *len,
            Backing::Memory(buf) => buf.len() as u64,
        }
    }
}

struct ArenaInner {
    backing: Mutex<Option<Backing>>,
    refs: AtomicUsize,
    sealed: AtomicBool,
}

/// Reference-counted handle to one storage arena.
///
/// Cloning retains the backing region; dropping releases one count, and the
/// last drop frees the region (closing and deleting the temp file). Handles
/// are held by the module invocation, by each task while it runs, and by
/// each output collection for as long as it lives.
pub struct ArenaHandle {
    inner: Arc<ArenaInner>,
}

impl ArenaHandle {
    /// Allocate a fresh arena for one batch of sibling tasks. The returned
    /// handle carries refcount 1.
    pub fn allocate_for_batch(backing: ArenaBacking) -> Result<Self, StorageError> {
        let backing = match backing {
            ArenaBacking::TempFile => Backing::TempFile {
                file: tempfile::tempfile()?,
                len: 0,
            },
            ArenaBacking::Memory => Backing::Memory(Vec::new()),
        };
        debug!("allocated storage arena ({} bytes)", backing.len());
        Ok(Self {
            inner: Arc::new(ArenaInner {
                backing: Mutex::new(Some(backing)),
                refs: AtomicUsize::new(1),
                sealed: AtomicBool::new(false),
            }),
        })
    }

    /// Append a `f64` array and return its location.
    ///
    /// # Panics
    ///
    /// Panics if the arena has been sealed — writing to a published arena is
    /// a defect in the calling module, not a recoverable condition.
    pub fn store_doubles(&self, values: &[f64]) -> Result<ArenaSlice, StorageError> {
        assert!(
            !self.inner.sealed.load(Ordering::Acquire),
            "write to sealed storage arena"
        );
        let mut guard = lock_backing(&self.inner);
        let backing = guard.as_mut().ok_or(StorageError::Released)?;

        let mut bytes = Vec::with_capacity(values.len() * 8);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let offset = match backing {
            Backing::TempFile { file, len } => {
                let offset = *len;
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&bytes)?;
                *len += bytes.len() as u64;
                offset
            }
            Backing::Memory(buf) => {
                let offset = buf.len() as u64;
                buf.extend_from_slice(&bytes);
                offset
            }
        };

        Ok(ArenaSlice {
            offset,
            doubles: values.len(),
        })
    }

    /// Read back a previously stored `f64` array.
    pub fn read_doubles(&self, slice: &ArenaSlice) -> Result<Vec<f64>, StorageError> {
        let mut guard = lock_backing(&self.inner);
        let backing = guard.as_mut().ok_or(StorageError::Released)?;

        let bytes = slice.doubles as u64 * 8;
        if slice.offset + bytes > backing.len() {
            return Err(StorageError::OutOfBounds {
                offset: slice.offset,
                bytes,
                len: backing.len(),
            });
        }

        let mut raw = vec![0u8; bytes as usize];
        match backing {
            Backing::TempFile { file, .. } => {
                file.seek(SeekFrom::Start(slice.offset))?;
                file.read_exact(&mut raw)?;
            }
            Backing::Memory(buf) => {
                let start = slice.offset as usize;
                raw.copy_from_slice(&buf[start..start + bytes as usize]);
            }
        }

        let values = raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut le = [0u8; 8];
                le.copy_from_slice(chunk);
                f64::from_le_bytes(le)
            })
            .collect();
        Ok(values)
    }

    /// Mark the arena read-only. Called once the batch's write phase is over
    /// and consumers may hold slices into it. Idempotent.
    pub fn seal(&self) {
        self.inner.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    /// Total bytes written so far; `None` once released.
    pub fn len_bytes(&self) -> Option<u64> {
        lock_backing(&self.inner).as_ref().map(Backing::len)
    }

    /// Current logical reference count (number of live handles).
    pub fn refcount(&self) -> usize {
        self.inner.refs.load(Ordering::Acquire)
    }

    /// Whether the backing region has been released.
    pub fn is_released(&self) -> bool {
        lock_backing(&self.inner).is_none()
    }
}

fn lock_backing(inner: &ArenaInner) -> std::sync::MutexGuard<'_, Option<Backing>> {
    // A poisoned arena mutex means a panic mid-append; the arena contents
    // are still structurally sound for release and reads of prior slices.
    inner
        .backing
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Clone for ArenaHandle {
    fn clone(&self) -> Self {
        let previous = self.inner.refs.fetch_add(1, Ordering::AcqRel);
        assert!(previous > 0, "storage arena retained after release");
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for ArenaHandle {
    fn drop(&mut self) {
        let previous = self.inner.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "storage arena refcount underflow");
        if previous == 1 {
            // Last handle: release the backing exactly once.
            let released = lock_backing(&self.inner).take();
            if let Some(backing) = released {
                debug!("released storage arena ({} bytes)", backing.len());
            }
        }
    }
}

impl std::fmt::Debug for ArenaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaHandle")
            .field("refs", &self.refcount())
            .field("sealed", &self.is_sealed())
            .field("released", &self.is_released())
            .finish()
    }
}

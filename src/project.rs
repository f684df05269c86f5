//! The project registry: the single mutable store of named data collections.
//!
//! Tasks compute their results in parallel, but every publish goes through
//! one mutex-guarded registry so additions, removals and renames are atomic
//! per call. The registry is an explicit handle passed into modules and
//! tasks — there is no ambient "current project" global.

use std::sync::{Arc, Mutex, MutexGuard};

use log::info;

use crate::collection::DataCollection;

/// What happens to a task's input collection once its derived output is
/// published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginalHandling {
    /// Leave the original collection in place alongside the new one.
    #[default]
    KeepOriginal,
    /// Remove the original from the registry. Removing an original that is
    /// already gone (e.g. a sibling publish got there first) is a no-op.
    RemoveOriginal,
    /// Keep the original but rename it out of the way with an `" old"`
    /// suffix, disambiguated numerically on collision.
    RenameWithSuffix,
}

/// Mutex-guarded registry of published collections.
///
/// Reads return shared `Arc` handles; the collections themselves are
/// immutable once published, so handles stay valid after removal or
/// replacement.
#[derive(Debug, Default)]
pub struct Project {
    collections: Mutex<Vec<Arc<DataCollection>>>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an imported collection that was not derived from anything in
    /// the project.
    pub fn add(&self, collection: DataCollection) -> Arc<DataCollection> {
        let collection = Arc::new(collection);
        self.lock().push(Arc::clone(&collection));
        collection
    }

    /// Publish a derived collection, applying the original-handling policy
    /// to `original` in the same critical section.
    ///
    /// The whole remove/rename/insert sequence holds the registry lock, so
    /// concurrent publishes against the same original serialize and each
    /// observes the other's effect.
    pub fn publish(
        &self,
        mut collection: DataCollection,
        original: Option<&Arc<DataCollection>>,
        policy: OriginalHandling,
    ) -> Arc<DataCollection> {
        let mut registry = self.lock();

        if let Some(original) = original {
            match policy {
                OriginalHandling::KeepOriginal => {}
                OriginalHandling::RemoveOriginal => {
                    registry.retain(|existing| existing.id() != original.id());
                }
                OriginalHandling::RenameWithSuffix => {
                    if let Some(index) = registry
                        .iter()
                        .position(|existing| existing.id() == original.id())
                    {
                        let renamed = rename_out_of_the_way(&registry, original.name());
                        // Re-wrap so the registry copy carries the new name;
                        // the caller's handle keeps seeing the old one.
                        let mut replacement = clone_shell(original);
                        replacement.set_name(renamed);
                        registry[index] = Arc::new(replacement);
                    }
                }
            }
        }

        // A derived collection may reuse its input's name (RemoveOriginal /
        // RenameWithSuffix); under KeepOriginal a clash gets disambiguated.
        if registry
            .iter()
            .any(|existing| existing.name() == collection.name())
        {
            let unique = disambiguate(&registry, collection.name());
            collection.set_name(unique);
        }

        info!(
            "published collection \"{}\" ({} rows, {} lineage records)",
            collection.name(),
            collection.len(),
            collection.lineage().len()
        );
        let collection = Arc::new(collection);
        registry.push(Arc::clone(&collection));
        collection
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<DataCollection>> {
        self.lock()
            .iter()
            .find(|collection| collection.name() == name)
            .cloned()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|collection| collection.name().to_string())
            .collect()
    }

    pub fn collections(&self) -> Vec<Arc<DataCollection>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove a collection by id, dropping the registry's arena reference.
    pub fn remove(&self, collection: &Arc<DataCollection>) {
        self.lock()
            .retain(|existing| existing.id() != collection.id());
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<DataCollection>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pick `"{name} old"`, falling back to `"{name} old (2)"`, `(3)`, … until
/// the name is free in the registry.
fn rename_out_of_the_way(registry: &[Arc<DataCollection>], name: &str) -> String {
    let taken = |candidate: &str| registry.iter().any(|c| c.name() == candidate);
    let base = format!("{name} old");
    if !taken(&base) {
        return base;
    }
    let mut counter = 2usize;
    loop {
        let candidate = format!("{base} ({counter})");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Pick `"{name} (2)"`, `(3)`, … for a new collection whose name is taken.
fn disambiguate(registry: &[Arc<DataCollection>], name: &str) -> String {
    let taken = |candidate: &str| registry.iter().any(|c| c.name() == candidate);
    let mut counter = 2usize;
    loop {
        let candidate = format!("{name} ({counter})");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Shallow re-wrap of a published collection for the rename policy: same
/// rows, lineage and arena reference, fresh shell the registry can rename.
fn clone_shell(collection: &Arc<DataCollection>) -> DataCollection {
    DataCollection::new(
        collection.name(),
        collection.rows().to_vec(),
        collection.lineage().clone(),
        collection.arena().cloned(),
    )
}

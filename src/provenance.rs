//! Processing provenance: which module, with which parameters, produced
//! which data.
//!
//! Every published data collection carries a [`Lineage`], an ordered,
//! append-only list of [`ProvenanceRecord`]s (oldest first). A derived
//! collection copies its predecessor's lineage and appends exactly one new
//! record for the step that produced it; a predecessor's lineage is never
//! touched.
//!
//! Records carry the *module-call* timestamp — fixed when the module was
//! invoked and shared by every task spawned from that invocation — rather
//! than a commit time. Sibling tasks finish in arbitrary order under the
//! worker pool, but their records still sort together and before any record
//! from a later invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a processing module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId {
    /// Stable machine-facing name, e.g. `"scan_alignment"`.
    pub name: String,
    /// Human-readable name shown in lineage listings.
    pub display_name: String,
}

impl ModuleId {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Immutable snapshot of the parameter values a module was invoked with.
///
/// Stored as a JSON object so the core never needs to know module-specific
/// parameter types; modules validate values before task creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot(serde_json::Map<String, serde_json::Value>);

impl ParameterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one named parameter value. Values are serialized eagerly so the
    /// snapshot is frozen at capture time.
    pub fn with<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One applied processing step: module identity, frozen parameters, and the
/// module-call timestamp. Immutable once appended to a lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub module: ModuleId,
    pub parameters: ParameterSnapshot,
    pub call_date: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn new(module: ModuleId, parameters: ParameterSnapshot, call_date: DateTime<Utc>) -> Self {
        Self {
            module,
            parameters,
            call_date,
        }
    }
}

/// Ordered processing history of a data collection, oldest step first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    records: Vec<ProvenanceRecord>,
}

impl Lineage {
    /// Empty lineage for a freshly imported collection.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy this lineage and append one record for a newly derived
    /// collection. `self` is unchanged.
    pub fn derive(&self, record: ProvenanceRecord) -> Self {
        let mut records = self.records.clone();
        records.push(record);
        Self { records }
    }

    pub fn records(&self) -> &[ProvenanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&ProvenanceRecord> {
        self.records.last()
    }

    /// Serialize the lineage for an external project writer. The core only
    /// guarantees a complete, ordered list; persistence lives elsewhere.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records)
    }
}

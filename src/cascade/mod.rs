//! Cascading soft-delete.
//!
//! Archiving one record walks the relationship graph breadth-first ([CascadeBuilder]), collecting
//! every owned record to archive and every pointer to flag into an [ArchiveObject]. The
//! [ArchiveExecutor] then turns that object into statements and submits them as one atomic batch.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

mod builder;
mod classify;
mod executor;

pub use builder::CascadeBuilder;
pub use classify::{classify, classify_descriptor, Action};
pub use executor::ArchiveExecutor;

/// table -> id -> field -> ids whose pointers must be flagged archived
pub type PatchMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>;

/// Everything one cascade must write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveObject {
    pub archive: BTreeMap<String, BTreeSet<String>>,
    pub patch: PatchMap,
}

impl ArchiveObject {
    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.archive
            .get(table)
            .map(|ids| ids.contains(id))
            .unwrap_or(false)
    }

    /// Mark `(table, id)` for archival. Returns false when it was already marked.
    pub fn mark(&mut self, table: &str, id: &str) -> bool {
        self.archive
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string())
    }

    pub fn add_patch(&mut self, table: &str, id: &str, field: &str, target: &str) {
        self.patch
            .entry(table.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default()
            .insert(target.to_string());
    }

    pub fn archive_count(&self) -> usize {
        self.archive.values().map(BTreeSet::len).sum()
    }

    /// Number of `(table, id, field)` patch instructions.
    pub fn patch_count(&self) -> usize {
        self.patch
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty() && self.patch.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_object_accumulates() {
        let mut object = ArchiveObject::default();
        assert!(object.is_empty());
        assert!(object.mark("user", "1"));
        assert!(!object.mark("user", "1"));
        assert!(object.contains("user", "1"));
        assert!(!object.contains("company", "1"));

        object.add_patch("company", "1", "employees", "1");
        object.add_patch("company", "1", "employees", "1");
        object.add_patch("company", "1", "owners", "1");
        object.add_patch("user", "2", "friends", "1");

        assert_eq!(object.archive_count(), 1);
        assert_eq!(object.patch_count(), 3);
        assert_eq!(object.patch["company"]["1"]["employees"].len(), 1);
    }
}

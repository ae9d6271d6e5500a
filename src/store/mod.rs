//! The document store contract.
//!
//! The core only ever talks to a store through [DocumentStore]. Relationship edits are expressed
//! as [Statement] values and submitted together through
//! [DocumentStore::run_atomic_batch], which must apply all of them or none.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    future::Future,
};

use crate::{
    error::TetherError,
    properties::{Cardinality, Record, ResourcePointer},
};

pub mod memory;

pub use memory::MemoryStore;

/// One edit to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    /// Set `meta.archived = true`.
    Archive { table: String, id: String },
    /// Point `field` at each target with a fresh pointer.
    Link {
        table: String,
        id: String,
        field: String,
        cardinality: Cardinality,
        targets: Vec<String>,
    },
    /// Deactivate the pointers to `targets`.
    Unlink {
        table: String,
        id: String,
        field: String,
        cardinality: Cardinality,
        targets: BTreeSet<String>,
    },
    /// Flag the pointers to `targets` as archived.
    MarkArchived {
        table: String,
        id: String,
        field: String,
        cardinality: Cardinality,
        targets: BTreeSet<String>,
    },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Archive { table, .. }
            | Statement::Link { table, .. }
            | Statement::Unlink { table, .. }
            | Statement::MarkArchived { table, .. } => table,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Statement::Archive { id, .. }
            | Statement::Link { id, .. }
            | Statement::Unlink { id, .. }
            | Statement::MarkArchived { id, .. } => id,
        }
    }

    /// Apply this statement to the stored copy of its record.
    pub fn apply(&self, record: &mut Record) -> Result<(), TetherError> {
        match self {
            Statement::Archive { .. } => {
                record.meta.archived = true;
            }
            Statement::Link {
                field,
                cardinality,
                targets,
                ..
            } => {
                if *cardinality == Cardinality::One && targets.len() > 1 {
                    return Err(TetherError::Store(format!(
                        "cannot link {} targets into singular field '{field}'",
                        targets.len()
                    )));
                }
                let linkage = record.linkage_mut(field, *cardinality)?;
                for target in targets.iter() {
                    linkage.link(target);
                }
            }
            Statement::Unlink {
                field,
                cardinality,
                targets,
                ..
            } => {
                record
                    .linkage_mut(field, *cardinality)?
                    .edit(targets, ResourcePointer::deactivated);
            }
            Statement::MarkArchived {
                field,
                cardinality,
                targets,
                ..
            } => {
                record
                    .linkage_mut(field, *cardinality)?
                    .edit(targets, ResourcePointer::archived);
            }
        }
        Ok(())
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Statement::Archive { table, id } => write!(f, "Archive({table}/{id})"),
            Statement::Link {
                table,
                id,
                field,
                targets,
                ..
            } => write!(f, "Link({table}/{id}.{field} -> {})", targets.join(", ")),
            Statement::Unlink {
                table,
                id,
                field,
                targets,
                ..
            } => write!(
                f,
                "Unlink({table}/{id}.{field} -> {})",
                targets.iter().cloned().collect::<Vec<String>>().join(", ")
            ),
            Statement::MarkArchived {
                table,
                id,
                field,
                targets,
                ..
            } => write!(
                f,
                "MarkArchived({table}/{id}.{field} -> {})",
                targets.iter().cloned().collect::<Vec<String>>().join(", ")
            ),
        }
    }
}

/// Access to a schema-less document store.
///
/// Implementations own their own connection lifecycle; the caller opens the store and hands it to
/// a [crate::context::Tether].
pub trait DocumentStore: Sync {
    fn get(
        &self,
        table: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Record>, TetherError>> + Send;

    /// Fetch every record in `ids` that exists. Missing ids are omitted from the result.
    fn get_all(
        &self,
        table: &str,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<Record>, TetherError>> + Send;

    /// Insert a new record. Fails when a record with the same id already exists.
    fn insert(
        &self,
        table: &str,
        record: Record,
    ) -> impl Future<Output = Result<Record, TetherError>> + Send;

    /// Shallow-merge `patch` into the record's attributes.
    fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> impl Future<Output = Result<(), TetherError>> + Send;

    fn update_all(
        &self,
        table: &str,
        ids: &[String],
        patch: Map<String, Value>,
    ) -> impl Future<Output = Result<(), TetherError>> + Send {
        async move {
            for id in ids.iter() {
                self.update(table, id, patch.clone()).await?;
            }
            Ok(())
        }
    }

    /// Apply every statement or none of them.
    fn run_atomic_batch(
        &self,
        statements: Vec<Statement>,
    ) -> impl Future<Output = Result<(), TetherError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    error::TetherError,
    properties::Record,
    store::{DocumentStore, Statement},
};

type Tables = BTreeMap<String, BTreeMap<String, Record>>;

/// In-process [DocumentStore]. Clones share the same underlying tables.
///
/// Batches are applied to a copy of the tables and swapped in only when every statement succeeds.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<RwLock<Tables>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without going through [DocumentStore::insert]. Replaces any existing record
    /// with the same id.
    pub fn seed(&self, table: &str, record: Record) {
        let mut writer = self.0.write();
        writer
            .entry(table.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// A copy of every stored record, for inspection.
    pub fn snapshot(&self) -> Tables {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply_batch(tables: &mut Tables, statements: &[Statement]) -> Result<(), TetherError> {
    for statement in statements.iter() {
        let record = tables
            .get_mut(statement.table())
            .and_then(|records| records.get_mut(statement.id()))
            .ok_or_else(|| {
                TetherError::NotFound(format!(
                    "{}/{} (statement {statement})",
                    statement.table(),
                    statement.id()
                ))
            })?;
        statement.apply(record)?;
    }
    Ok(())
}

impl DocumentStore for MemoryStore {
    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, TetherError> {
        let reader = self.0.read();
        Ok(reader.get(table).and_then(|records| records.get(id)).cloned())
    }

    async fn get_all(&self, table: &str, ids: &[String]) -> Result<Vec<Record>, TetherError> {
        let reader = self.0.read();
        let Some(records) = reader.get(table) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| records.get(id)).cloned().collect())
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, TetherError> {
        let mut writer = self.0.write();
        let records = writer.entry(table.to_string()).or_default();
        if records.contains_key(&record.id) {
            return Err(TetherError::Store(format!(
                "record {table}/{} already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), TetherError> {
        let mut writer = self.0.write();
        let record = writer
            .get_mut(table)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| TetherError::NotFound(format!("{table}/{id}")))?;
        record.merge_attributes(&patch);
        Ok(())
    }

    async fn run_atomic_batch(&self, statements: Vec<Statement>) -> Result<(), TetherError> {
        let mut writer = self.0.write();
        let mut staged = writer.clone();
        apply_batch(&mut staged, &statements).map_err(|e| {
            tracing::error!(
                "[MemoryStore.run_atomic_batch] Batch of {} statements rejected: {}",
                statements.len(),
                e
            );
            e
        })?;
        *writer = staged;
        tracing::debug!(
            "[MemoryStore.run_atomic_batch] Committed {} statements",
            statements.len()
        );
        Ok(())
    }
}

use crate::{
    cascade::ArchiveObject,
    error::TetherError,
    schema::Registry,
    store::{DocumentStore, Statement},
};

/// Compiles an [ArchiveObject] into statements and commits them as one batch.
pub struct ArchiveExecutor<'a, S> {
    registry: &'a Registry,
    store: &'a S,
}

impl<'a, S: DocumentStore> ArchiveExecutor<'a, S> {
    pub fn new(registry: &'a Registry, store: &'a S) -> Self {
        ArchiveExecutor { registry, store }
    }

    /// One `Archive` per marked record, then one `MarkArchived` per patched `(table, id, field)`.
    pub fn compile(&self, archive_object: &ArchiveObject) -> Result<Vec<Statement>, TetherError> {
        let mut statements = Vec::with_capacity(
            archive_object.archive_count() + archive_object.patch_count(),
        );
        for (table, ids) in archive_object.archive.iter() {
            for id in ids.iter() {
                statements.push(Statement::Archive {
                    table: table.clone(),
                    id: id.clone(),
                });
            }
        }
        for (table, records) in archive_object.patch.iter() {
            for (id, fields) in records.iter() {
                for (field, targets) in fields.iter() {
                    let descriptor = self.registry.descriptor(table, field)?;
                    statements.push(Statement::MarkArchived {
                        table: table.clone(),
                        id: id.clone(),
                        field: field.clone(),
                        cardinality: descriptor.cardinality(),
                        targets: targets.clone(),
                    });
                }
            }
        }
        Ok(statements)
    }

    #[tracing::instrument(skip_all)]
    pub async fn execute(&self, archive_object: &ArchiveObject) -> Result<usize, TetherError> {
        let statements = self.compile(archive_object)?;
        let count = statements.len();
        self.store.run_atomic_batch(statements).await?;
        tracing::info!(
            "[ArchiveExecutor] Archived {} records, patched {} fields ({} statements)",
            archive_object.archive_count(),
            archive_object.patch_count(),
            count
        );
        Ok(count)
    }
}

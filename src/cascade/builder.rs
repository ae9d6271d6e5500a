use std::collections::VecDeque;

use crate::{
    cascade::{classify_descriptor, Action, ArchiveObject},
    error::TetherError,
    schema::Registry,
    store::DocumentStore,
};

/// Breadth-first walk from one record, computing everything its archival touches.
///
/// Records are fetched one queue entry at a time. A `(table, id)` is marked in the
/// [ArchiveObject] when it is enqueued, so a record reachable along several paths is fetched and
/// expanded exactly once.
pub struct CascadeBuilder<'a, S> {
    registry: &'a Registry,
    store: &'a S,
}

impl<'a, S: DocumentStore> CascadeBuilder<'a, S> {
    pub fn new(registry: &'a Registry, store: &'a S) -> Self {
        CascadeBuilder { registry, store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn build(&self, root_table: &str, root_id: &str) -> Result<ArchiveObject, TetherError> {
        let mut archive_object = ArchiveObject::default();
        let mut queue = VecDeque::new();
        archive_object.mark(root_table, root_id);
        queue.push_back((root_table.to_string(), root_id.to_string()));

        while let Some((table, id)) = queue.pop_front() {
            let record = self
                .store
                .get(&table, &id)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "[CascadeBuilder] Fetching {}/{} failed, abandoning cascade from {}/{}: {}",
                        table,
                        id,
                        root_table,
                        root_id,
                        e
                    );
                    e
                })?
                .ok_or_else(|| TetherError::NotFound(format!("{table}/{id}")))?;

            let descriptors = self.registry.describe(&table)?;
            for (field, linkage) in record.relationships.iter() {
                let Some(descriptor) = descriptors.get(field) else {
                    return Err(TetherError::Configuration(format!(
                        "record {table}/{id} stores undeclared relationship '{field}'"
                    )));
                };
                match classify_descriptor(descriptor) {
                    Action::Archive => {
                        for pointer in linkage.pointers().iter().filter(|p| p.is_live()) {
                            if archive_object.mark(&descriptor.related_table, &pointer.id) {
                                tracing::debug!(
                                    "[CascadeBuilder] {}/{}.{} owns {}/{}",
                                    table,
                                    id,
                                    field,
                                    descriptor.related_table,
                                    pointer.id
                                );
                                queue.push_back((
                                    descriptor.related_table.clone(),
                                    pointer.id.clone(),
                                ));
                            }
                        }
                    }
                    Action::Patch => {
                        for pointer in linkage.pointers().iter() {
                            archive_object.add_patch(
                                &descriptor.related_table,
                                &pointer.id,
                                &descriptor.inverse.field,
                                &id,
                            );
                        }
                    }
                }
            }
        }

        tracing::debug!(
            "[CascadeBuilder] {}/{} cascades to {} records and {} patched fields",
            root_table,
            root_id,
            archive_object.archive_count(),
            archive_object.patch_count()
        );
        Ok(archive_object)
    }
}

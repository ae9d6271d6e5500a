use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    cascade::{ArchiveExecutor, ArchiveObject, CascadeBuilder},
    error::TetherError,
    event::{emit, RelationEvent},
    mutation::MutationEngine,
    node::{Node, Target},
    properties::{Linkage, Record},
    schema::Registry,
    store::DocumentStore,
};

/// Result of [Tether::archive].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    /// False when the root was already archived and nothing was written.
    pub deleted: bool,
    pub id: String,
}

/// Entry point for every relationship operation: a resolved [Registry], the store it runs
/// against, and an optional channel receiving a [RelationEvent] per committed batch.
///
/// The caller opens the store and hands it over; [Tether::close] closes it again.
#[derive(Debug, Clone)]
pub struct Tether<S> {
    registry: Arc<Registry>,
    store: S,
    tx: Option<UnboundedSender<RelationEvent>>,
}

impl<S: DocumentStore> Tether<S> {
    pub fn new(registry: Registry, store: S) -> Tether<S> {
        Tether {
            registry: Arc::new(registry),
            store,
            tx: None,
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<RelationEvent>) -> Tether<S> {
        self.tx = Some(tx);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn close(self) {
        self.store.close().await;
    }

    fn mutations(&self) -> MutationEngine<'_, S> {
        MutationEngine::new(&self.registry, &self.store, self.tx.as_ref())
    }

    /// Insert a new record. Every declared relationship field starts out empty; a missing `id`
    /// is replaced by a fresh uuid.
    pub async fn create(
        &self,
        table: &str,
        id: Option<String>,
        attributes: Map<String, Value>,
    ) -> Result<Node, TetherError> {
        let descriptors = self.registry.describe(table)?;
        let id = match id {
            Some(id) if id.is_empty() => {
                return Err(TetherError::InvalidInput("empty id".to_string()));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let mut record = Record::new(id);
        record.attributes = attributes;
        for (field, descriptor) in descriptors.iter() {
            record
                .relationships
                .insert(field.clone(), Linkage::empty(descriptor.cardinality()));
        }
        let record = self.store.insert(table, record).await?;
        tracing::debug!("[Tether.create] Inserted {}/{}", table, record.id);
        Ok(Node::new(table, record))
    }

    pub async fn node(&self, table: &str, id: &str) -> Result<Node, TetherError> {
        self.registry.describe(table)?;
        let record = self
            .store
            .get(table, id)
            .await?
            .ok_or_else(|| TetherError::NotFound(format!("{table}/{id}")))?;
        Ok(Node::new(table, record))
    }

    /// Shallow-merge `patch` into the record's attributes. Relationship fields cannot be written
    /// this way.
    pub async fn update_attributes(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Record, TetherError> {
        let descriptors = self.registry.describe(table)?;
        if let Some(field) = patch.keys().find(|key| descriptors.contains_key(*key)) {
            return Err(TetherError::InvalidInput(format!(
                "'{table}.{field}' is a relationship, use put/push/splice/remove"
            )));
        }
        self.store.update(table, id, patch).await?;
        self.node(table, id).await.map(|node| node.record)
    }

    /// Compute what archiving `table/id` would write, without writing it.
    pub async fn plan_archive(&self, table: &str, id: &str) -> Result<ArchiveObject, TetherError> {
        CascadeBuilder::new(&self.registry, &self.store)
            .build(table, id)
            .await
    }

    /// Soft-delete `table/id` and everything it owns, flagging pointers held by shared
    /// neighbors. Nothing is written unless the whole cascade commits.
    #[tracing::instrument(skip(self))]
    pub async fn archive(&self, table: &str, id: &str) -> Result<ArchiveOutcome, TetherError> {
        let root = self.node(table, id).await?;
        if root.record.is_archived() {
            tracing::debug!("[Tether.archive] {}/{} is already archived", table, id);
            return Ok(ArchiveOutcome {
                deleted: false,
                id: id.to_string(),
            });
        }

        let archive_object = self.plan_archive(table, id).await?;
        ArchiveExecutor::new(&self.registry, &self.store)
            .execute(&archive_object)
            .await?;
        emit(
            self.tx.as_ref(),
            RelationEvent::Archived {
                table: table.to_string(),
                id: id.to_string(),
                records: archive_object.archive_count(),
                patches: archive_object.patch_count(),
            },
        );
        Ok(ArchiveOutcome {
            deleted: true,
            id: id.to_string(),
        })
    }

    pub async fn put(
        &self,
        table: &str,
        id: &str,
        field: &str,
        target: impl Into<Target>,
    ) -> Result<Record, TetherError> {
        self.mutations().put(table, id, field, target.into()).await
    }

    pub async fn remove(&self, table: &str, id: &str, field: &str) -> Result<Record, TetherError> {
        self.mutations().remove(table, id, field).await
    }

    pub async fn push(
        &self,
        table: &str,
        id: &str,
        field: &str,
        target: impl Into<Target>,
    ) -> Result<Record, TetherError> {
        self.mutations().push(table, id, field, target.into()).await
    }

    pub async fn splice(
        &self,
        table: &str,
        id: &str,
        field: &str,
        target: impl Into<Target>,
    ) -> Result<Record, TetherError> {
        self.mutations().splice(table, id, field, target.into()).await
    }
}

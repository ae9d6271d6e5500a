//! Two-sided relationship edits.
//!
//! Every operation follows the same shape: resolve the descriptor and check the relation kind,
//! normalize the target, fetch the original record, run the compliance check, then submit the
//! edit of the original field together with the matching edit of every inverse field as one
//! atomic batch. The updated original record is re-fetched and returned.

use enumset::EnumSet;
use std::collections::BTreeSet;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    compliance::{ComplianceChecker, Operation},
    error::TetherError,
    event::{emit, RelationEvent},
    node::Target,
    properties::{Cardinality, Linkage, Record, Relation},
    schema::{Registry, RelationshipDescriptor},
    store::{DocumentStore, Statement},
};

pub struct MutationEngine<'a, S> {
    registry: &'a Registry,
    store: &'a S,
    events: Option<&'a UnboundedSender<RelationEvent>>,
}

impl<'a, S: DocumentStore> MutationEngine<'a, S> {
    pub fn new(
        registry: &'a Registry,
        store: &'a S,
        events: Option<&'a UnboundedSender<RelationEvent>>,
    ) -> Self {
        MutationEngine {
            registry,
            store,
            events,
        }
    }

    fn require(
        &self,
        table: &str,
        field: &str,
        allowed: EnumSet<Relation>,
        operation: &str,
    ) -> Result<&'a RelationshipDescriptor, TetherError> {
        let descriptor = self.registry.descriptor(table, field)?;
        if !allowed.contains(descriptor.relation) {
            return Err(TetherError::invalid_relation(
                table,
                field,
                descriptor.relation,
                operation,
            ));
        }
        Ok(descriptor)
    }

    async fn fetch_live(&self, table: &str, id: &str) -> Result<Record, TetherError> {
        let record = self
            .store
            .get(table, id)
            .await?
            .ok_or_else(|| TetherError::NotFound(format!("{table}/{id}")))?;
        if record.is_archived() {
            return Err(TetherError::Compliance(format!(
                "{table}/{id} is archived"
            )));
        }
        Ok(record)
    }

    async fn commit(
        &self,
        statements: Vec<Statement>,
        event: RelationEvent,
    ) -> Result<(), TetherError> {
        tracing::debug!(
            "[MutationEngine] {} as {} statements",
            event,
            statements.len()
        );
        self.store.run_atomic_batch(statements).await?;
        emit(self.events, event);
        Ok(())
    }

    async fn refetch(&self, table: &str, id: &str) -> Result<Record, TetherError> {
        self.store
            .get(table, id)
            .await?
            .ok_or_else(|| TetherError::NotFound(format!("{table}/{id}")))
    }

    /// Unlinks for the records that lose a target's inverse `hasOne` slot to `table/id`. A slot
    /// may still hold a related pointer to an archived record, which compliance lets through.
    async fn displaced(
        &self,
        table: &str,
        id: &str,
        descriptor: &RelationshipDescriptor,
        target_ids: &[String],
    ) -> Result<Vec<Statement>, TetherError> {
        if descriptor.inverse.relation != Relation::HasOne {
            return Ok(Vec::new());
        }
        let targets = self
            .store
            .get_all(&descriptor.related_table, target_ids)
            .await?;
        let mut holders: Vec<(String, String)> = Vec::new();
        for target in targets.iter() {
            if let Some(Linkage::One(Some(pointer))) = target.linkage(&descriptor.inverse.field) {
                if pointer.related && pointer.id != id {
                    holders.push((pointer.id.clone(), target.id.clone()));
                }
            }
        }
        if holders.is_empty() {
            return Ok(Vec::new());
        }

        // A dangling holder has nothing to unlink
        let holder_ids = holders
            .iter()
            .map(|(holder_id, _)| holder_id.clone())
            .collect::<Vec<String>>();
        let present = self
            .store
            .get_all(table, &holder_ids)
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect::<BTreeSet<String>>();
        Ok(holders
            .into_iter()
            .filter(|(holder_id, _)| present.contains(holder_id))
            .map(|(holder_id, target_id)| {
                tracing::debug!(
                    "[MutationEngine] {table}/{holder_id}.{} loses {}/{target_id} to {id}",
                    descriptor.field,
                    descriptor.related_table
                );
                Statement::Unlink {
                    table: table.to_string(),
                    id: holder_id,
                    field: descriptor.field.clone(),
                    cardinality: descriptor.cardinality(),
                    targets: BTreeSet::from([target_id]),
                }
            })
            .collect())
    }

    /// Point a singular (`hasOne`/`belongsTo`) field at one record.
    #[tracing::instrument(skip(self, target))]
    pub async fn put(
        &self,
        table: &str,
        id: &str,
        field: &str,
        target: Target,
    ) -> Result<Record, TetherError> {
        let descriptor = self.require(table, field, Relation::singular(), "put")?;
        let ids = target.into_ids(&descriptor.related_table)?;
        let [target_id] = ids.as_slice() else {
            return Err(TetherError::InvalidInput(format!(
                "put takes exactly one id, got {}",
                ids.len()
            )));
        };

        let record = self.fetch_live(table, id).await?;
        ComplianceChecker::new(self.store)
            .ensure_compliant(descriptor, id, Operation::Attach, &ids)
            .await?;

        let mut statements = vec![Statement::Link {
            table: table.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            cardinality: Cardinality::One,
            targets: vec![target_id.clone()],
        }];
        // The record the slot pointed at before loses its pointer back
        if let Some(Linkage::One(Some(previous))) = record.linkage(field) {
            if previous.related && previous.id != *target_id {
                statements.push(Statement::Unlink {
                    table: descriptor.related_table.clone(),
                    id: previous.id.clone(),
                    field: descriptor.inverse.field.clone(),
                    cardinality: descriptor.inverse_cardinality(),
                    targets: BTreeSet::from([id.to_string()]),
                });
            }
        }
        statements.extend(self.displaced(table, id, descriptor, &ids).await?);
        statements.push(Statement::Link {
            table: descriptor.related_table.clone(),
            id: target_id.clone(),
            field: descriptor.inverse.field.clone(),
            cardinality: descriptor.inverse_cardinality(),
            targets: vec![id.to_string()],
        });

        self.commit(
            statements,
            RelationEvent::Linked {
                table: table.to_string(),
                id: id.to_string(),
                field: field.to_string(),
                targets: ids.clone(),
            },
        )
        .await?;
        self.refetch(table, id).await
    }

    /// Deactivate the edge held by a `hasOne` field, on both sides. An empty or already inactive
    /// slot is left alone.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, table: &str, id: &str, field: &str) -> Result<Record, TetherError> {
        let descriptor = self.require(table, field, EnumSet::only(Relation::HasOne), "remove")?;
        let record = self.fetch_live(table, id).await?;
        let pointer = match record.linkage(field) {
            Some(Linkage::One(Some(pointer))) if pointer.related => pointer.clone(),
            Some(Linkage::Many(_)) => {
                return Err(TetherError::Store(format!(
                    "{table}/{id} stores singular field '{field}' as an array"
                )));
            }
            _ => {
                tracing::debug!("[MutationEngine] {table}/{id}.{field} holds no active edge");
                return Ok(record);
            }
        };

        let ids = vec![pointer.id.clone()];
        ComplianceChecker::new(self.store)
            .ensure_compliant(descriptor, id, Operation::Detach, &ids)
            .await?;

        let statements = vec![
            Statement::Unlink {
                table: table.to_string(),
                id: id.to_string(),
                field: field.to_string(),
                cardinality: Cardinality::One,
                targets: BTreeSet::from([pointer.id.clone()]),
            },
            Statement::Unlink {
                table: descriptor.related_table.clone(),
                id: pointer.id.clone(),
                field: descriptor.inverse.field.clone(),
                cardinality: descriptor.inverse_cardinality(),
                targets: BTreeSet::from([id.to_string()]),
            },
        ];
        self.commit(
            statements,
            RelationEvent::Unlinked {
                table: table.to_string(),
                id: id.to_string(),
                field: field.to_string(),
                targets: ids,
            },
        )
        .await?;
        self.refetch(table, id).await
    }

    /// Add edges from a `hasMany` field. Ids that are already related are skipped.
    #[tracing::instrument(skip(self, target))]
    pub async fn push(
        &self,
        table: &str,
        id: &str,
        field: &str,
        target: Target,
    ) -> Result<Record, TetherError> {
        let descriptor = self.require(table, field, EnumSet::only(Relation::HasMany), "push")?;
        let ids = target.into_ids(&descriptor.related_table)?;
        let record = self.fetch_live(table, id).await?;

        let existing = related_ids(&record, field);
        let new_ids = ids
            .into_iter()
            .filter(|target_id| !existing.contains(target_id))
            .collect::<Vec<String>>();
        if new_ids.is_empty() {
            tracing::debug!("[MutationEngine] {table}/{id}.{field} already holds every id");
            return Ok(record);
        }

        ComplianceChecker::new(self.store)
            .ensure_compliant(descriptor, id, Operation::Attach, &new_ids)
            .await?;

        let mut statements = Vec::with_capacity(new_ids.len() + 1);
        statements.push(Statement::Link {
            table: table.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            cardinality: Cardinality::Many,
            targets: new_ids.clone(),
        });
        statements.extend(self.displaced(table, id, descriptor, &new_ids).await?);
        for target_id in new_ids.iter() {
            statements.push(Statement::Link {
                table: descriptor.related_table.clone(),
                id: target_id.clone(),
                field: descriptor.inverse.field.clone(),
                cardinality: descriptor.inverse_cardinality(),
                targets: vec![id.to_string()],
            });
        }

        self.commit(
            statements,
            RelationEvent::Linked {
                table: table.to_string(),
                id: id.to_string(),
                field: field.to_string(),
                targets: new_ids,
            },
        )
        .await?;
        self.refetch(table, id).await
    }

    /// Deactivate edges of a `hasMany` field. Ids that are not currently related are skipped.
    #[tracing::instrument(skip(self, target))]
    pub async fn splice(
        &self,
        table: &str,
        id: &str,
        field: &str,
        target: Target,
    ) -> Result<Record, TetherError> {
        let descriptor = self.require(table, field, EnumSet::only(Relation::HasMany), "splice")?;
        let ids = target.into_ids(&descriptor.related_table)?;
        let record = self.fetch_live(table, id).await?;

        let existing = related_ids(&record, field);
        let removed = ids
            .into_iter()
            .filter(|target_id| existing.contains(target_id))
            .collect::<Vec<String>>();
        if removed.is_empty() {
            tracing::debug!("[MutationEngine] {table}/{id}.{field} holds none of the ids");
            return Ok(record);
        }

        ComplianceChecker::new(self.store)
            .ensure_compliant(descriptor, id, Operation::Detach, &removed)
            .await?;

        let mut statements = Vec::with_capacity(removed.len() + 1);
        statements.push(Statement::Unlink {
            table: table.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            cardinality: Cardinality::Many,
            targets: removed.iter().cloned().collect(),
        });
        for target_id in removed.iter() {
            statements.push(Statement::Unlink {
                table: descriptor.related_table.clone(),
                id: target_id.clone(),
                field: descriptor.inverse.field.clone(),
                cardinality: descriptor.inverse_cardinality(),
                targets: BTreeSet::from([id.to_string()]),
            });
        }

        self.commit(
            statements,
            RelationEvent::Unlinked {
                table: table.to_string(),
                id: id.to_string(),
                field: field.to_string(),
                targets: removed,
            },
        )
        .await?;
        self.refetch(table, id).await
    }
}

fn related_ids(record: &Record, field: &str) -> BTreeSet<String> {
    record
        .linkage(field)
        .map(|linkage| linkage.related_ids().into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        properties::ResourcePointer,
        schema::TableDeclaration,
        store::MemoryStore,
    };
    use std::collections::BTreeMap;
    use test_log::test;

    fn registry() -> Registry {
        Registry::build(&BTreeMap::from([
            (
                "user".to_string(),
                TableDeclaration::default()
                    .relationship("friends", Relation::HasMany, "user", "friends")
                    .relationship("company", Relation::HasOne, "company", "employees"),
            ),
            (
                "company".to_string(),
                TableDeclaration::default().relationship(
                    "employees",
                    Relation::HasMany,
                    "user",
                    "company",
                ),
            ),
        ]))
        .unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        for id in ["1", "2", "3"] {
            store.seed(
                "user",
                Record::new(id)
                    .with_linkage("friends", Linkage::Many(vec![]))
                    .with_linkage("company", Linkage::One(None)),
            );
        }
        for id in ["c1", "c2"] {
            store.seed(
                "company",
                Record::new(id).with_linkage("employees", Linkage::Many(vec![])),
            );
        }
        store
    }

    #[test(tokio::test)]
    async fn test_put_moves_edge_and_unlinks_previous_target() {
        let (registry, store) = (registry(), store());
        let engine = MutationEngine::new(&registry, &store, None);

        engine.put("user", "1", "company", "c1".into()).await.unwrap();
        let user = engine.put("user", "1", "company", "c2".into()).await.unwrap();

        assert_eq!(
            user.linkage("company"),
            Some(&Linkage::One(Some(ResourcePointer::new("c2"))))
        );
        let c1 = store.get("company", "c1").await.unwrap().unwrap();
        assert_eq!(
            c1.linkage("employees").unwrap().pointers(),
            &[ResourcePointer::new("1").deactivated()]
        );
        let c2 = store.get("company", "c2").await.unwrap().unwrap();
        assert_eq!(
            c2.linkage("employees").unwrap().pointers(),
            &[ResourcePointer::new("1")]
        );
    }

    #[test(tokio::test)]
    async fn test_put_requires_single_target() {
        let (registry, store) = (registry(), store());
        let engine = MutationEngine::new(&registry, &store, None);
        let result = engine
            .put("user", "1", "company", Target::from(&["c1", "c2"][..]))
            .await;
        assert!(matches!(result, Err(TetherError::InvalidInput(_))));
    }

    #[test(tokio::test)]
    async fn test_relation_kind_is_enforced() {
        let (registry, store) = (registry(), store());
        let engine = MutationEngine::new(&registry, &store, None);

        assert!(matches!(
            engine.put("user", "1", "friends", "2".into()).await,
            Err(TetherError::InvalidRelation { .. })
        ));
        assert!(matches!(
            engine.push("user", "1", "company", "c1".into()).await,
            Err(TetherError::InvalidRelation { .. })
        ));
        assert!(matches!(
            engine.splice("user", "1", "company", "c1".into()).await,
            Err(TetherError::InvalidRelation { .. })
        ));
        assert!(matches!(
            engine.remove("user", "1", "friends").await,
            Err(TetherError::InvalidRelation { .. })
        ));
    }

    #[test(tokio::test)]
    async fn test_push_skips_existing_and_splice_skips_unrelated() {
        let (registry, store) = (registry(), store());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let engine = MutationEngine::new(&registry, &store, Some(&tx));

        engine
            .push("user", "1", "friends", Target::from(&["2"][..]))
            .await
            .unwrap();
        let user = engine
            .push("user", "1", "friends", Target::from(&["2", "3"][..]))
            .await
            .unwrap();
        assert_eq!(
            user.linkage("friends").unwrap().pointers(),
            &[ResourcePointer::new("2"), ResourcePointer::new("3")]
        );

        let before = store.snapshot();
        let user = engine
            .splice("user", "1", "friends", Target::from(&["9"][..]))
            .await
            .unwrap();
        assert_eq!(store.snapshot(), before);
        assert_eq!(user.linkage("friends").unwrap().related_ids(), vec!["2", "3"]);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            RelationEvent::Linked { targets, .. } if targets == &vec!["3".to_string()]
        ));
    }

    #[test(tokio::test)]
    async fn test_archived_original_is_rejected() {
        let (registry, store) = (registry(), store());
        let mut archived = Record::new("1").with_linkage("friends", Linkage::Many(vec![]));
        archived.meta.archived = true;
        store.seed("user", archived);
        let engine = MutationEngine::new(&registry, &store, None);
        assert!(matches!(
            engine.push("user", "1", "friends", "2".into()).await,
            Err(TetherError::Compliance(_))
        ));
        assert!(matches!(
            engine.push("user", "404", "friends", "2".into()).await,
            Err(TetherError::NotFound(_))
        ));
    }
}

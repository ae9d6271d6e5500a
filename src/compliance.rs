//! Pre-write validation of relationship mutations against live records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    error::TetherError,
    properties::{Linkage, Record, Relation},
    schema::RelationshipDescriptor,
    store::DocumentStore,
};

/// Direction of a relationship mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// `put` and `push`: new edges are written.
    Attach,
    /// `remove` and `splice`: existing edges are deactivated.
    Detach,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compliance {
    Compliant,
    Rejected(String),
}

pub struct ComplianceChecker<'a, S> {
    store: &'a S,
}

impl<'a, S: DocumentStore> ComplianceChecker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        ComplianceChecker { store }
    }

    pub async fn is_compliant(
        &self,
        descriptor: &RelationshipDescriptor,
        original_id: &str,
        operation: Operation,
        ids: &[String],
    ) -> Result<bool, TetherError> {
        Ok(self.check(descriptor, original_id, operation, ids).await? == Compliance::Compliant)
    }

    /// Like [ComplianceChecker::check], but a rejection becomes [TetherError::Compliance].
    pub async fn ensure_compliant(
        &self,
        descriptor: &RelationshipDescriptor,
        original_id: &str,
        operation: Operation,
        ids: &[String],
    ) -> Result<(), TetherError> {
        match self.check(descriptor, original_id, operation, ids).await? {
            Compliance::Compliant => Ok(()),
            Compliance::Rejected(reason) => {
                tracing::debug!(
                    "[ComplianceChecker] Rejected {:?} on {}: {}",
                    operation,
                    descriptor.field,
                    reason
                );
                Err(TetherError::Compliance(reason))
            }
        }
    }

    /// Validate that `ids` may be attached to, or detached from, the record `original_id` through
    /// `descriptor`. Store errors propagate; rule violations come back as
    /// [Compliance::Rejected].
    #[tracing::instrument(skip(self, descriptor), fields(field = %descriptor.field))]
    pub async fn check(
        &self,
        descriptor: &RelationshipDescriptor,
        original_id: &str,
        operation: Operation,
        ids: &[String],
    ) -> Result<Compliance, TetherError> {
        let related_table = &descriptor.related_table;
        if operation == Operation::Attach && descriptor.inverse.relation == Relation::BelongsTo {
            return Ok(Compliance::Rejected(format!(
                "'{}' must be set from the {}.{} side",
                descriptor.field, related_table, descriptor.inverse.field
            )));
        }

        let found = self
            .store
            .get_all(related_table, ids)
            .await?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect::<BTreeMap<String, Record>>();

        for id in ids.iter() {
            let Some(target) = found.get(id) else {
                return Ok(Compliance::Rejected(format!(
                    "{related_table}/{id} does not exist"
                )));
            };
            if operation == Operation::Detach {
                continue;
            }
            if target.is_archived() {
                return Ok(Compliance::Rejected(format!(
                    "{related_table}/{id} is archived"
                )));
            }
            if descriptor.inverse.relation == Relation::HasOne {
                let slot_is_free = match target.linkage(&descriptor.inverse.field) {
                    None | Some(Linkage::One(None)) => true,
                    Some(Linkage::One(Some(pointer))) => {
                        !pointer.is_live() || pointer.id == original_id
                    }
                    Some(Linkage::Many(_)) => {
                        return Ok(Compliance::Rejected(format!(
                            "{related_table}/{id} stores '{}' as an array",
                            descriptor.inverse.field
                        )));
                    }
                };
                if !slot_is_free {
                    return Ok(Compliance::Rejected(format!(
                        "{related_table}/{id}.{} is already taken",
                        descriptor.inverse.field
                    )));
                }
            }
        }
        Ok(Compliance::Compliant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        properties::ResourcePointer,
        schema::{Registry, TableDeclaration},
        store::MemoryStore,
    };
    use test_log::test;

    fn registry() -> Registry {
        Registry::build(&BTreeMap::from([
            (
                "user".to_string(),
                TableDeclaration::default()
                    .relationship("friends", Relation::HasMany, "user", "friends")
                    .relationship("profile", Relation::HasOne, "profile", "user")
                    .relationship("partner", Relation::HasOne, "user", "partner"),
            ),
            (
                "profile".to_string(),
                TableDeclaration::default().relationship("user", Relation::BelongsTo, "user", "profile"),
            ),
        ]))
        .unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed("user", Record::new("1"));
        store.seed("user", Record::new("2"));
        let mut archived = Record::new("3");
        archived.meta.archived = true;
        store.seed("user", archived);
        store.seed(
            "user",
            Record::new("4").with_linkage("partner", Linkage::One(Some(ResourcePointer::new("2")))),
        );
        store.seed(
            "user",
            Record::new("5").with_linkage(
                "partner",
                Linkage::One(Some(ResourcePointer::new("2").deactivated())),
            ),
        );
        store.seed("profile", Record::new("p1"));
        store
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test(tokio::test)]
    async fn test_has_many_inverse_requires_live_targets() {
        let (registry, store) = (registry(), store());
        let checker = ComplianceChecker::new(&store);
        let friends = registry.descriptor("user", "friends").unwrap();

        assert!(checker
            .is_compliant(friends, "1", Operation::Attach, &ids(&["2"]))
            .await
            .unwrap());
        assert!(!checker
            .is_compliant(friends, "1", Operation::Attach, &ids(&["2", "9"]))
            .await
            .unwrap());
        assert!(matches!(
            checker
                .ensure_compliant(friends, "1", Operation::Attach, &ids(&["3"]))
                .await,
            Err(TetherError::Compliance(ref reason)) if reason.contains("archived")
        ));
        // Detaching from an archived record is allowed, from a missing one is not
        assert!(checker
            .is_compliant(friends, "1", Operation::Detach, &ids(&["3"]))
            .await
            .unwrap());
        assert!(!checker
            .is_compliant(friends, "1", Operation::Detach, &ids(&["9"]))
            .await
            .unwrap());
    }

    #[test(tokio::test)]
    async fn test_has_one_inverse_requires_free_slot() {
        let (registry, store) = (registry(), store());
        let checker = ComplianceChecker::new(&store);
        let partner = registry.descriptor("user", "partner").unwrap();

        // user 4 is live-partnered with user 2
        assert_eq!(
            checker
                .check(partner, "1", Operation::Attach, &ids(&["4"]))
                .await
                .unwrap(),
            Compliance::Rejected("user/4.partner is already taken".to_string())
        );
        // the slot already points at the original record
        assert!(checker
            .is_compliant(partner, "2", Operation::Attach, &ids(&["4"]))
            .await
            .unwrap());
        // a deactivated pointer frees the slot, as does an empty one
        assert!(checker
            .is_compliant(partner, "1", Operation::Attach, &ids(&["5"]))
            .await
            .unwrap());
        assert!(checker
            .is_compliant(partner, "1", Operation::Attach, &ids(&["2"]))
            .await
            .unwrap());
    }

    #[test(tokio::test)]
    async fn test_belongs_to_inverse_is_always_rejected() {
        let (registry, store) = (registry(), store());
        let checker = ComplianceChecker::new(&store);
        let profile = registry.descriptor("user", "profile").unwrap();
        assert!(!checker
            .is_compliant(profile, "1", Operation::Attach, &ids(&["p1"]))
            .await
            .unwrap());
        assert!(checker
            .is_compliant(profile, "1", Operation::Detach, &ids(&["p1"]))
            .await
            .unwrap());
    }
}

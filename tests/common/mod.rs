//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tether_core::{
    config::TetherConfig,
    context::Tether,
    properties::{Record, ResourcePointer},
    schema::Registry,
    store::{DocumentStore, MemoryStore, Statement},
    TetherError,
};

/// Users with symmetric friends, a company they work for, a partner and an owned profile.
/// Companies own projects, projects own tasks, tasks share tags.
#[allow(dead_code)]
pub const SCHEMA: &str = r#"
[tables.user.relationships.friends]
hasMany = "user"
inverse = "friends"

[tables.user.relationships.company]
hasOne = "company"
inverse = "employees"

[tables.user.relationships.partner]
hasOne = "user"
inverse = "partner"

[tables.user.relationships.profile]
hasOne = "profile"
inverse = "user"

[tables.profile.relationships.user]
belongsTo = "user"
inverse = "profile"

[tables.company.relationships.employees]
hasMany = "user"
inverse = "company"

[tables.company.relationships.projects]
hasMany = "project"
inverse = "company"

[tables.project.relationships.company]
belongsTo = "company"
inverse = "projects"

[tables.project.relationships.tasks]
hasMany = "task"
inverse = "project"

[tables.task.relationships.project]
belongsTo = "project"
inverse = "tasks"

[tables.task.relationships.tags]
hasMany = "tag"
inverse = "tasks"

[tables.tag.relationships.tasks]
hasMany = "task"
inverse = "tags"
"#;

#[allow(dead_code)]
pub fn registry() -> Registry {
    SCHEMA
        .parse::<TetherConfig>()
        .unwrap()
        .registry()
        .unwrap()
}

#[allow(dead_code)]
pub fn tether() -> Tether<MemoryStore> {
    Tether::new(registry(), MemoryStore::new())
}

/// Create one record per id in `table`, with empty relationships.
#[allow(dead_code)]
pub async fn create_all<S: DocumentStore>(tether: &Tether<S>, table: &str, ids: &[&str]) {
    for id in ids.iter() {
        tether
            .create(table, Some(id.to_string()), Map::new())
            .await
            .unwrap();
    }
}

#[allow(dead_code)]
pub async fn record<S: DocumentStore>(tether: &Tether<S>, table: &str, id: &str) -> Record {
    tether.node(table, id).await.unwrap().record
}

#[allow(dead_code)]
pub fn pointers(record: &Record, field: &str) -> Vec<ResourcePointer> {
    record
        .linkage(field)
        .map(|linkage| linkage.pointers().to_vec())
        .unwrap_or_default()
}

/// Assert that every active edge on `table/id` is mirrored by an active edge back.
#[allow(dead_code)]
pub async fn assert_symmetric<S: DocumentStore>(tether: &Tether<S>, table: &str, id: &str) {
    let record = record(tether, table, id).await;
    for (field, linkage) in record.relationships.iter() {
        let descriptor = tether.registry().descriptor(table, field).unwrap();
        for pointer in linkage.pointers().iter().filter(|p| p.related) {
            let other = self::record(tether, &descriptor.related_table, &pointer.id).await;
            let back = other
                .linkage(&descriptor.inverse.field)
                .and_then(|linkage| linkage.get(id))
                .cloned();
            assert_eq!(
                back.map(|p| p.related),
                Some(true),
                "{table}/{id}.{field} -> {} has no active pointer back",
                pointer.id
            );
        }
    }
}

#[allow(dead_code)]
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Wraps a [MemoryStore], counting reads and failing on demand.
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub gets: Arc<AtomicUsize>,
    pub fail_get: Arc<Mutex<BTreeSet<(String, String)>>>,
    pub fail_batch: Arc<Mutex<bool>>,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: MemoryStore) -> FlakyStore {
        FlakyStore {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_get_of(&self, table: &str, id: &str) {
        self.fail_get
            .lock()
            .insert((table.to_string(), id.to_string()));
    }

    pub fn fail_batches(&self) {
        *self.fail_batch.lock() = true;
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl DocumentStore for FlakyStore {
    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, TetherError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .fail_get
            .lock()
            .contains(&(table.to_string(), id.to_string()));
        if fail {
            return Err(TetherError::Store(format!("injected failure reading {table}/{id}")));
        }
        self.inner.get(table, id).await
    }

    async fn get_all(&self, table: &str, ids: &[String]) -> Result<Vec<Record>, TetherError> {
        self.inner.get_all(table, ids).await
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, TetherError> {
        self.inner.insert(table, record).await
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), TetherError> {
        self.inner.update(table, id, patch).await
    }

    async fn run_atomic_batch(&self, statements: Vec<Statement>) -> Result<(), TetherError> {
        let fail = *self.fail_batch.lock();
        if fail {
            return Err(TetherError::Store(format!(
                "injected failure committing {} statements",
                statements.len()
            )));
        }
        self.inner.run_atomic_batch(statements).await
    }
}

use futures_core::future::BoxFuture;
use serde_json::{Map, Value};
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    pool::PoolOptions,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteRow},
    ConnectOptions, FromRow, Pool, QueryBuilder, Row, SqliteConnection,
};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    future::Future,
    path::Path,
    result::Result,
    str::FromStr,
    time::Duration,
};

use crate::{
    error::TetherError,
    properties::Record,
    store::{DocumentStore, Statement},
};

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

impl<'r> FromRow<'r, SqliteRow> for Record {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let body: String = row.try_get("body")?;
        serde_json::from_str(&body).map_err(|e| {
            sqlx::Error::Database(Box::new(TetherError::Serialization(format!(
                "stored document body is not a record: {e}"
            ))))
        })
    }
}

/// [DocumentStore] over a SQLite file. Every record is one JSON body in the `documents` table,
/// keyed by `(tbl, id)`.
#[derive(Debug, Clone)]
pub struct DbConnection {
    pub pool: Pool<Sqlite>,
    timeout: Duration,
}

impl DbConnection {
    pub async fn open<P: AsRef<Path>>(
        db_path: P,
        timeout: Duration,
    ) -> Result<DbConnection, TetherError> {
        let pool = db_init(db_path.as_ref()).await?;
        Ok(DbConnection { pool, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn timed<T, F>(&self, operation: &str, fut: F) -> Result<T, TetherError>
    where
        F: Future<Output = Result<T, TetherError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!("[DbConnection.{}] {}", operation, e);
                Err(e)
            }
            Err(_) => {
                tracing::error!(
                    "[DbConnection.{}] timed out after {:?}",
                    operation,
                    self.timeout
                );
                Err(TetherError::Store(format!(
                    "{operation} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    pub async fn count(&self, table: &str) -> Result<usize, TetherError> {
        let row = sqlx::query("SELECT COUNT(*) FROM documents WHERE tbl = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<u32, usize>(0) as usize)
    }
}

async fn fetch_one(
    conn: &mut SqliteConnection,
    table: &str,
    id: &str,
) -> Result<Option<Record>, TetherError> {
    Ok(
        sqlx::query_as::<_, Record>("SELECT body FROM documents WHERE tbl = ? AND id = ?")
            .bind(table)
            .bind(id)
            .fetch_optional(conn)
            .await?,
    )
}

async fn store_one(
    conn: &mut SqliteConnection,
    table: &str,
    record: &Record,
) -> Result<(), TetherError> {
    let body = serde_json::to_string(record)?;
    sqlx::query("UPDATE documents SET body = ? WHERE tbl = ? AND id = ?")
        .bind(body)
        .bind(table)
        .bind(&record.id)
        .execute(conn)
        .await?;
    Ok(())
}

impl DocumentStore for DbConnection {
    #[tracing::instrument(skip(self))]
    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, TetherError> {
        self.timed("get", async {
            let mut conn = self.pool.acquire().await?;
            fetch_one(&mut conn, table, id).await
        })
        .await
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn get_all(&self, table: &str, ids: &[String]) -> Result<Vec<Record>, TetherError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.timed("get_all", async {
            let mut records = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER - 1) {
                let mut qb =
                    QueryBuilder::<Sqlite>::new("SELECT body FROM documents WHERE tbl = ");
                qb.push_bind(table.to_string());
                qb.push(" AND id IN (");
                let mut separated = qb.separated(", ");
                for id in chunk.iter() {
                    separated.push_bind(id.clone());
                }
                separated.push_unseparated(")");
                records.extend(qb.build_query_as::<Record>().fetch_all(&self.pool).await?);
            }
            Ok::<_, TetherError>(records)
        })
        .await
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, TetherError> {
        self.timed("insert", async {
            let body = serde_json::to_string(&record)?;
            sqlx::query("INSERT INTO documents (tbl, id, body) VALUES (?, ?, ?)")
                .bind(table)
                .bind(&record.id)
                .bind(body)
                .execute(&self.pool)
                .await
                .map_err(|e| match e.as_database_error() {
                    Some(db_error) if db_error.is_unique_violation() => TetherError::Store(
                        format!("record {table}/{} already exists", record.id),
                    ),
                    _ => TetherError::from(e),
                })?;
            Ok::<_, TetherError>(record)
        })
        .await
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), TetherError> {
        self.timed("update", async {
            let mut tx = self.pool.begin().await?;
            let mut record = fetch_one(&mut tx, table, id)
                .await?
                .ok_or_else(|| TetherError::NotFound(format!("{table}/{id}")))?;
            record.merge_attributes(&patch);
            store_one(&mut tx, table, &record).await?;
            tx.commit().await?;
            Ok::<_, TetherError>(())
        })
        .await
    }

    /// Each touched record is read once inside one SQL transaction, edited in memory by every
    /// statement naming it, then written back. Any failure drops the transaction, which rolls it
    /// back.
    #[tracing::instrument(skip_all, fields(count = statements.len()))]
    async fn run_atomic_batch(&self, statements: Vec<Statement>) -> Result<(), TetherError> {
        self.timed("run_atomic_batch", async {
            let mut tx = self.pool.begin().await?;
            let mut staged: BTreeMap<(String, String), Record> = BTreeMap::new();
            for statement in statements.iter() {
                let key = (statement.table().to_string(), statement.id().to_string());
                let record = match staged.entry(key) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let record = fetch_one(&mut tx, statement.table(), statement.id())
                            .await?
                            .ok_or_else(|| {
                                TetherError::NotFound(format!(
                                    "{}/{} (statement {statement})",
                                    statement.table(),
                                    statement.id()
                                ))
                            })?;
                        entry.insert(record)
                    }
                };
                statement.apply(record)?;
            }
            for ((table, _), record) in staged.iter() {
                store_one(&mut tx, table, record).await?;
            }
            tx.commit().await?;
            tracing::debug!(
                "[DbConnection.run_atomic_batch] Committed {} statements over {} records",
                statements.len(),
                staged.len()
            );
            Ok::<_, TetherError>(())
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![Migration {
        version: 1,
        description: "create_documents",
        sql: "\
        CREATE TABLE documents (tbl TEXT NOT NULL, id TEXT NOT NULL, body TEXT NOT NULL, PRIMARY KEY (tbl, id));",
        kind: MigrationType::ReversibleUp,
    }])
}

pub async fn db_init(db_path: &Path) -> Result<Pool<Sqlite>, TetherError> {
    let fqdb = format!("sqlite:{}", db_path.display());
    tracing::debug!("Initializing document db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .disable_statement_logging()
        .create_if_missing(true);

    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let count_res = sqlx::query("SELECT COUNT(*) as dcount FROM documents;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tStored document count:\t{:?}",
        count_res.get::<u32, usize>(0)
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    async fn open(timeout: Duration) -> (tempfile::TempDir, DbConnection) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbConnection::open(dir.path().join("tether.db"), timeout)
            .await
            .unwrap();
        (dir, db)
    }

    #[test(tokio::test)]
    async fn test_call_past_timeout_is_store_error() {
        let (_dir, db) = open(Duration::from_millis(10)).await;
        let result: Result<(), TetherError> =
            db.timed("get", std::future::pending()).await;
        assert!(matches!(
            result,
            Err(TetherError::Store(ref reason)) if reason.contains("get timed out")
        ));
    }

    #[test(tokio::test)]
    async fn test_call_within_timeout_passes_result_through() {
        let (_dir, db) = open(Duration::from_secs(5)).await;
        assert_eq!(db.timed("get", async { Ok(3) }).await, Ok(3));
        let missing: Result<(), TetherError> = db
            .timed("get", async { Err(TetherError::NotFound("user/9".to_string())) })
            .await;
        assert!(matches!(missing, Err(TetherError::NotFound(_))));
        assert_eq!(db.get("user", "9").await, Ok(None));
    }
}

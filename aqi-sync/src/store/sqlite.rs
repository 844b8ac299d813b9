//! SQLite record store
//!
//! All entity types share the `records` table, keyed by
//! `(entity_type, natural_key)`. The unique constraint on that pair is what
//! makes `upsert` and `get_or_create` converge under concurrent writers:
//! both start with `INSERT .. ON CONFLICT DO NOTHING`, so the write lock is
//! taken before anything is read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::{
    FieldMap, LinkRejection, LinkTarget, Record, RecordId, RecordStore, StoreError, StoredRecord,
    natural_key,
};

/// Record store backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Per entity type totals, as shown by `aqi-sync status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCounts {
    pub entity_type: String,
    pub records: i64,
    pub links: i64,
}

/// A finished sync run as kept in the run history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub entity_type: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub fetched: i64,
    pub upserted: i64,
    pub created: i64,
    pub failures: i64,
}

impl SqliteStore {
    /// Open (or create) a database file and run pending migrations
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database (single connection so every query sees the same data)
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Invalid in-memory database URL")?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Record and link counts grouped by entity type
    pub async fn counts_by_type(&self) -> Result<Vec<EntityCounts>> {
        let rows = sqlx::query(
            r#"
            SELECT
                r.entity_type,
                COUNT(DISTINCT r.id) AS records,
                COUNT(l.target_id) AS links
            FROM records r
            LEFT JOIN record_links l ON l.record_id = r.id
            GROUP BY r.entity_type
            ORDER BY r.entity_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count records")?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(EntityCounts {
                entity_type: row.try_get("entity_type")?,
                records: row.try_get("records")?,
                links: row.try_get("links")?,
            });
        }

        Ok(counts)
    }

    /// Append a finished run to the history
    pub async fn record_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_runs
                (run_id, entity_type, url, started_at, elapsed_ms, fetched, upserted, created, failures)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.run_id)
        .bind(&run.entity_type)
        .bind(&run.url)
        .bind(run.started_at)
        .bind(run.elapsed_ms)
        .bind(run.fetched)
        .bind(run.upserted)
        .bind(run.created)
        .bind(run.failures)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record {} sync run", run.entity_type))?;

        Ok(())
    }

    /// Most recent run of every entity type that has been synced
    pub async fn latest_runs(&self) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, entity_type, url, started_at, elapsed_ms, fetched, upserted, created, failures
            FROM sync_runs r
            WHERE started_at = (
                SELECT MAX(started_at) FROM sync_runs WHERE entity_type = r.entity_type
            )
            ORDER BY entity_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load sync run history")?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(RunSummary {
                run_id: row.try_get("run_id")?,
                entity_type: row.try_get("entity_type")?,
                url: row.try_get("url")?,
                started_at: row.try_get("started_at")?,
                elapsed_ms: row.try_get("elapsed_ms")?,
                fetched: row.try_get("fetched")?,
                upserted: row.try_get("upserted")?,
                created: row.try_get("created")?,
                failures: row.try_get("failures")?,
            });
        }

        Ok(runs)
    }

    async fn write_record(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
        overwrite: bool,
    ) -> Result<(Record, bool), StoreError> {
        let natural_key = natural_key(&unique)?;
        let mut all_fields = unique.clone();
        all_fields.extend(defaults.clone());
        let fields_json = encode_fields(&all_fields)?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO records (entity_type, natural_key, fields_json)
             VALUES (?, ?, ?)
             ON CONFLICT(entity_type, natural_key) DO NOTHING
             RETURNING id",
        )
        .bind(entity_type)
        .bind(&natural_key)
        .bind(&fields_json)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert {} record", entity_type))?;

        let (id, created) = match inserted {
            Some((id,)) => (id, true),
            None => {
                let (id, stored_json): (i64, String) = sqlx::query_as(
                    "SELECT id, fields_json FROM records WHERE entity_type = ? AND natural_key = ?",
                )
                .bind(entity_type)
                .bind(&natural_key)
                .fetch_one(&mut *tx)
                .await
                .with_context(|| format!("Failed to load existing {} record", entity_type))?;

                if overwrite && !defaults.is_empty() {
                    let mut fields = decode_fields(&stored_json)?;
                    fields.extend(defaults);

                    sqlx::query(
                        "UPDATE records SET fields_json = ?, updated_at = CURRENT_TIMESTAMP
                         WHERE id = ?",
                    )
                    .bind(encode_fields(&fields)?)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to update {} record", entity_type))?;
                }

                (id, false)
            }
        };

        tx.commit().await.context("Failed to commit transaction")?;

        Ok((
            Record {
                id: RecordId(id),
                entity_type: entity_type.to_string(),
                key: unique,
            },
            created,
        ))
    }

    async fn record_exists(&self, record: &Record) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM records WHERE id = ? AND entity_type = ?")
                .bind(record.id.0)
                .bind(&record.entity_type)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to check record existence")?;

        Ok(row.is_some())
    }

    async fn lookup(&self, entity_type: &str, key: &FieldMap) -> Result<Option<RecordId>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM records WHERE entity_type = ? AND natural_key = ?")
                .bind(entity_type)
                .bind(natural_key(key)?)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up record by natural key")?;

        Ok(row.map(|(id,)| RecordId(id)))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
    ) -> Result<(Record, bool), StoreError> {
        self.write_record(entity_type, unique, defaults, true).await
    }

    async fn get_or_create(
        &self,
        entity_type: &str,
        unique: FieldMap,
        defaults: FieldMap,
    ) -> Result<(Record, bool), StoreError> {
        self.write_record(entity_type, unique, defaults, false).await
    }

    async fn set_attribute_and_persist(
        &self,
        record: &Record,
        attr: &str,
        target: &Record,
    ) -> Result<(), StoreError> {
        if !self.record_exists(target).await? {
            return Err(StoreError::RelationIntegrity(format!(
                "{} {} does not exist",
                target.entity_type, target.id
            )));
        }

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        // Touch first so the write lock is held before the read
        let touched = sqlx::query(
            "UPDATE records SET updated_at = CURRENT_TIMESTAMP WHERE id = ? AND entity_type = ?",
        )
        .bind(record.id.0)
        .bind(&record.entity_type)
        .execute(&mut *tx)
        .await
        .context("Failed to lock record for update")?;

        if touched.rows_affected() == 0 {
            return Err(StoreError::RelationIntegrity(format!(
                "{} {} does not exist",
                record.entity_type, record.id
            )));
        }

        let (stored_json,): (String,) =
            sqlx::query_as("SELECT fields_json FROM records WHERE id = ?")
                .bind(record.id.0)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to load record fields")?;

        let mut fields = decode_fields(&stored_json)?;
        fields.insert(attr.to_string(), target.reference());

        sqlx::query("UPDATE records SET fields_json = ? WHERE id = ?")
            .bind(encode_fields(&fields)?)
            .bind(record.id.0)
            .execute(&mut *tx)
            .await
            .context("Failed to write record reference")?;

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }

    async fn union_many_to_many(
        &self,
        record: &Record,
        field: &str,
        targets: &[LinkTarget],
    ) -> Result<Vec<LinkRejection>, StoreError> {
        let mut rejections = Vec::new();

        for target in targets {
            let target_id = match target {
                LinkTarget::Record(r) => {
                    if self.record_exists(r).await? {
                        Some(r.id)
                    } else {
                        None
                    }
                }
                LinkTarget::Key { entity_type, key } => self.lookup(entity_type, key).await?,
            };

            let Some(target_id) = target_id else {
                rejections.push(LinkRejection {
                    target: target.clone(),
                    reason: "no such record".to_string(),
                });
                continue;
            };

            let result = sqlx::query(
                "INSERT INTO record_links (record_id, field, target_id)
                 VALUES (?, ?, ?)
                 ON CONFLICT(record_id, field, target_id) DO NOTHING",
            )
            .bind(record.id.0)
            .bind(field)
            .bind(target_id.0)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                    rejections.push(LinkRejection {
                        target: target.clone(),
                        reason: db.message().to_string(),
                    });
                }
                Err(e) => {
                    return Err(StoreError::Backend(
                        anyhow::Error::new(e).context("Failed to insert record link"),
                    ));
                }
            }
        }

        Ok(rejections)
    }
}

#[cfg(test)]
impl SqliteStore {
    pub async fn find(&self, entity_type: &str, key: &FieldMap) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            "SELECT id, entity_type, natural_key, fields_json FROM records
             WHERE entity_type = ? AND natural_key = ?",
        )
        .bind(entity_type)
        .bind(natural_key(key)?)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find record")?;

        row.map(|row| stored_record_from_row(&row)).transpose()
    }

    pub async fn records_of(&self, entity_type: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, entity_type, natural_key, fields_json FROM records
             WHERE entity_type = ? ORDER BY id",
        )
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list records")?;

        rows.iter().map(stored_record_from_row).collect()
    }

    pub async fn links_of(
        &self,
        record: RecordId,
        field: &str,
    ) -> Result<std::collections::BTreeSet<RecordId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT target_id FROM record_links WHERE record_id = ? AND field = ?",
        )
        .bind(record.0)
        .bind(field)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list record links")?;

        Ok(rows.into_iter().map(|(id,)| RecordId(id)).collect())
    }
}

#[cfg(test)]
fn stored_record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredRecord> {
    let key_json: String = row.try_get("natural_key")?;
    let fields_json: String = row.try_get("fields_json")?;

    Ok(StoredRecord {
        id: RecordId(row.try_get("id")?),
        entity_type: row.try_get("entity_type")?,
        key: serde_json::from_str(&key_json).context("Failed to decode natural key")?,
        fields: serde_json::from_str(&fields_json).context("Failed to decode record fields")?,
    })
}

fn encode_fields(fields: &FieldMap) -> Result<String, StoreError> {
    serde_json::to_string(fields)
        .context("Failed to encode record fields")
        .map_err(StoreError::from)
}

fn decode_fields(json: &str) -> Result<FieldMap, StoreError> {
    let fields: BTreeMap<String, super::FieldValue> =
        serde_json::from_str(json).context("Failed to decode record fields")?;
    Ok(fields)
}

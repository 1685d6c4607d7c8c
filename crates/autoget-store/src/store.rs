//! SQLite-backed implementation of the status store.

use std::path::Path;

use autoget_organizer::PlanResponse;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{Result, StoreError};
use crate::model::{DownloadRecord, DownloadState, MoveState, OrganizeState, StateCounters};

const COLUMNS: &str = "id, created_at, updated_at, downloader, download_progress, size, \
     state, move_state, organize_state, upload_histories, res_indexer, res_title, \
     res_title2, category, file_list, metadata, organize_plans";

const INSERT_SQL: &str = "\
    INSERT INTO download_records (id, created_at, updated_at, downloader, \
        download_progress, size, state, move_state, organize_state, \
        upload_histories, res_indexer, res_title, res_title2, category, \
        file_list, metadata, organize_plans) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)";

// The UPDATE arm is predicate-guarded: Deleted rows are terminal and a save
// racing a retirement must lose, not resurrect the record.
const SAVE_SQL: &str = "\
    INSERT INTO download_records (id, created_at, updated_at, downloader, \
        download_progress, size, state, move_state, organize_state, \
        upload_histories, res_indexer, res_title, res_title2, category, \
        file_list, metadata, organize_plans) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
    ON CONFLICT(id) DO UPDATE SET \
        updated_at = excluded.updated_at, \
        downloader = excluded.downloader, \
        download_progress = excluded.download_progress, \
        size = excluded.size, \
        state = excluded.state, \
        move_state = excluded.move_state, \
        organize_state = excluded.organize_state, \
        upload_histories = excluded.upload_histories, \
        res_indexer = excluded.res_indexer, \
        res_title = excluded.res_title, \
        res_title2 = excluded.res_title2, \
        category = excluded.category, \
        file_list = excluded.file_list, \
        metadata = excluded.metadata, \
        organize_plans = excluded.organize_plans \
    WHERE download_records.state <> ?18";

const UPDATE_STATE_SQL: &str = "\
    UPDATE download_records SET state = ?1, updated_at = ?2 \
    WHERE id = ?3 AND state <> ?4";

const COUNTERS_SQL: &str = "\
    SELECT \
        COALESCE(SUM(CASE WHEN state = ?2 AND move_state <> ?3 THEN 1 ELSE 0 END), 0) \
            AS downloading, \
        COALESCE(SUM(CASE WHEN move_state = ?3 AND organize_state = ?4 THEN 1 ELSE 0 END), 0) \
            AS planned, \
        COALESCE(SUM(CASE WHEN move_state = ?3 AND organize_state IN (?5, ?6) THEN 1 ELSE 0 END), 0) \
            AS failed \
    FROM download_records WHERE downloader = ?1";

fn query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::Query { operation, source }
}

/// Database-backed repository for download records.
#[derive(Clone)]
pub struct DownloadStore {
    pool: SqlitePool,
}

impl DownloadStore {
    /// Open (or create) the database at `path` and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(query_err("connect"))?;
        Self::with_pool(pool).await
    }

    /// Open an in-memory database, used by the test suites.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(query_err("connect in-memory"))?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| StoreError::Migration { source })?;
        Ok(Self { pool })
    }

    /// Insert a brand-new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when a record with the same
    /// info-hash already exists; any other failure is a query error.
    pub async fn insert(&self, record: &DownloadRecord) -> Result<()> {
        let encoded = EncodedColumns::encode(record)?;
        let result = bind_record(sqlx::query(INSERT_SQL), record, &encoded, Utc::now())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(source) => {
                let unique = source.as_database_error().is_some_and(|db| {
                    matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
                });
                if unique {
                    Err(StoreError::Duplicate {
                        id: record.id.clone(),
                    })
                } else {
                    Err(StoreError::Query {
                        operation: "insert download record",
                        source,
                    })
                }
            }
        }
    }

    /// Upsert a record, refreshing `updated_at`.
    ///
    /// Writes against a record already in the terminal `Deleted` state are
    /// silently dropped by the guarded UPDATE arm.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn save(&self, record: &DownloadRecord) -> Result<()> {
        let encoded = EncodedColumns::encode(record)?;
        bind_record(sqlx::query(SAVE_SQL), record, &encoded, Utc::now())
            .bind(DownloadState::Deleted.as_i64())
            .execute(&self.pool)
            .await
            .map_err(query_err("save download record"))?;
        Ok(())
    }

    /// Fetch one record by info-hash.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no record exists, which callers
    /// must distinguish from I/O failures.
    pub async fn get(&self, id: &str) -> Result<DownloadRecord> {
        let sql = format!("SELECT {COLUMNS} FROM download_records WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err("get download record"))?;
        match row {
            Some(row) => decode_row(&row),
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    /// Records still downloading (`state = Started`) for one downloader.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_unfinished(&self, downloader: &str) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM download_records \
             WHERE downloader = ?1 AND state = ?2 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(downloader)
            .bind(DownloadState::Started.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("get unfinished records"))?;
        rows.iter().map(decode_row).collect()
    }

    /// Records in exactly the given state for one downloader.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_by_state(
        &self,
        downloader: &str,
        state: DownloadState,
    ) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM download_records \
             WHERE downloader = ?1 AND state = ?2 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(downloader)
            .bind(state.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("get records by state"))?;
        rows.iter().map(decode_row).collect()
    }

    /// Finished records whose payload has not been copied yet
    /// (`state >= Seeding AND move_state = UnMoved`).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_finished_unmoved(&self, downloader: &str) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM download_records \
             WHERE downloader = ?1 AND state >= ?2 AND move_state = ?3 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(downloader)
            .bind(DownloadState::Seeding.as_i64())
            .bind(MoveState::UnMoved.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("get finished unmoved records"))?;
        rows.iter().map(decode_row).collect()
    }

    /// Stopped records whose payload has been copied; candidates for hard
    /// removal from the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_stopped_and_moved(&self, downloader: &str) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM download_records \
             WHERE downloader = ?1 AND state = ?2 AND move_state = ?3 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(downloader)
            .bind(DownloadState::Stopped.as_i64())
            .bind(MoveState::Moved.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("get stopped and moved records"))?;
        rows.iter().map(decode_row).collect()
    }

    /// Moved, non-deleted records in a specific organize state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_moved_in_organize_state(
        &self,
        downloader: &str,
        organize_state: OrganizeState,
    ) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM download_records \
             WHERE downloader = ?1 AND state <> ?2 AND move_state = ?3 \
               AND organize_state = ?4 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(downloader)
            .bind(DownloadState::Deleted.as_i64())
            .bind(MoveState::Moved.as_i64())
            .bind(organize_state.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("get moved records by organize state"))?;
        rows.iter().map(decode_row).collect()
    }

    /// Transition a batch of records to `state` in a single transaction.
    ///
    /// Records already in the terminal `Deleted` state are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement in the transaction fails.
    pub async fn bulk_update_state(&self, ids: &[String], state: DownloadState) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_err("begin state update"))?;
        for id in ids {
            sqlx::query(UPDATE_STATE_SQL)
                .bind(state.as_i64())
                .bind(now)
                .bind(id)
                .bind(DownloadState::Deleted.as_i64())
                .execute(&mut *tx)
                .await
                .map_err(query_err("update download state"))?;
        }
        tx.commit().await.map_err(query_err("commit state update"))?;
        Ok(())
    }

    /// Aggregate state counters for one downloader in a single query.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn counters(&self, downloader: &str) -> Result<StateCounters> {
        let row = sqlx::query(COUNTERS_SQL)
            .bind(downloader)
            .bind(DownloadState::Started.as_i64())
            .bind(MoveState::Moved.as_i64())
            .bind(OrganizeState::Planned.as_i64())
            .bind(OrganizeState::CreatePlanFailed.as_i64())
            .bind(OrganizeState::ExecutePlanFailed.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(query_err("count download states"))?;

        Ok(StateCounters {
            count_of_downloading: row.try_get("downloading")?,
            count_of_planned: row.try_get("planned")?,
            count_of_failed: row.try_get("failed")?,
        })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(source: sqlx::Error) -> Self {
        Self::Query {
            operation: "sqlx operation",
            source,
        }
    }
}

struct EncodedColumns {
    upload_histories: String,
    file_list: String,
    metadata: String,
    organize_plans: Option<String>,
}

impl EncodedColumns {
    fn encode(record: &DownloadRecord) -> Result<Self> {
        Ok(Self {
            upload_histories: serde_json::to_string(&record.upload_histories).map_err(
                |source| StoreError::Json {
                    column: "upload_histories",
                    source,
                },
            )?,
            file_list: serde_json::to_string(&record.file_list).map_err(|source| {
                StoreError::Json {
                    column: "file_list",
                    source,
                }
            })?,
            metadata: serde_json::to_string(&record.metadata).map_err(|source| {
                StoreError::Json {
                    column: "metadata",
                    source,
                }
            })?,
            organize_plans: record
                .organize_plans
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|source| StoreError::Json {
                    column: "organize_plans",
                    source,
                })?,
        })
    }
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    record: &'q DownloadRecord,
    encoded: &'q EncodedColumns,
    updated_at: DateTime<Utc>,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&record.id)
        .bind(record.created_at)
        .bind(updated_at)
        .bind(&record.downloader)
        .bind(i64::from(record.download_progress))
        .bind(clamp_i64(record.size))
        .bind(record.state.as_i64())
        .bind(record.move_state.as_i64())
        .bind(record.organize_state.as_i64())
        .bind(&encoded.upload_histories)
        .bind(&record.res_indexer)
        .bind(&record.res_title)
        .bind(&record.res_title2)
        .bind(&record.category)
        .bind(&encoded.file_list)
        .bind(&encoded.metadata)
        .bind(encoded.organize_plans.as_deref())
}

fn decode_row(row: &SqliteRow) -> Result<DownloadRecord> {
    let state_code: i64 = row.try_get("state")?;
    let move_code: i64 = row.try_get("move_state")?;
    let organize_code: i64 = row.try_get("organize_state")?;

    let state = DownloadState::from_i64(state_code).ok_or(StoreError::InvalidState {
        column: "state",
        value: state_code,
    })?;
    let move_state = MoveState::from_i64(move_code).ok_or(StoreError::InvalidState {
        column: "move_state",
        value: move_code,
    })?;
    let organize_state = OrganizeState::from_i64(organize_code).ok_or(StoreError::InvalidState {
        column: "organize_state",
        value: organize_code,
    })?;

    let upload_histories: String = row.try_get("upload_histories")?;
    let file_list: String = row.try_get("file_list")?;
    let metadata: String = row.try_get("metadata")?;
    let organize_plans: Option<String> = row.try_get("organize_plans")?;

    let progress: i64 = row.try_get("download_progress")?;
    let size: i64 = row.try_get("size")?;

    Ok(DownloadRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        downloader: row.try_get("downloader")?,
        download_progress: u16::try_from(progress).unwrap_or_default(),
        size: u64::try_from(size).unwrap_or_default(),
        state,
        move_state,
        organize_state,
        upload_histories: serde_json::from_str(&upload_histories).map_err(|source| {
            StoreError::Json {
                column: "upload_histories",
                source,
            }
        })?,
        res_indexer: row.try_get("res_indexer")?,
        res_title: row.try_get("res_title")?,
        res_title2: row.try_get("res_title2")?,
        category: row.try_get("category")?,
        file_list: serde_json::from_str(&file_list).map_err(|source| StoreError::Json {
            column: "file_list",
            source,
        })?,
        metadata: serde_json::from_str::<Value>(&metadata).map_err(|source| StoreError::Json {
            column: "metadata",
            source,
        })?,
        organize_plans: organize_plans
            .as_deref()
            .map(serde_json::from_str::<PlanResponse>)
            .transpose()
            .map_err(|source| StoreError::Json {
                column: "organize_plans",
                source,
            })?,
    })
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

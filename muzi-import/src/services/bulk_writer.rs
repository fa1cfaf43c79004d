//! Bulk load of resolved listens into `history`
//!
//! One transaction per batch, multi-row INSERTs with conflict skip. A row
//! that collides with the uniqueness constraint counts as already present.

use muzi_common::Result;
use sqlx::SqlitePool;

use crate::db;
use crate::models::ListenEvent;
use crate::utils::retry_on_lock;

#[derive(Clone)]
pub struct BulkWriter {
    db: SqlitePool,
    max_lock_wait_ms: u64,
}

impl BulkWriter {
    pub fn new(db: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self { db, max_lock_wait_ms }
    }

    /// Persist `rows` for `user_id`, returning the number actually inserted
    ///
    /// Any error other than a constraint conflict rolls back the whole batch.
    pub async fn write<I>(&self, user_id: i64, rows: I) -> Result<u64>
    where
        I: IntoIterator<Item = ListenEvent>,
    {
        let rows: Vec<ListenEvent> = rows.into_iter().collect();
        if rows.is_empty() {
            return Ok(0);
        }

        let result = retry_on_lock("history bulk insert", self.max_lock_wait_ms, || {
            let rows = &rows;
            async move {
                let mut tx = self.db.begin().await?;
                let inserted = db::insert_listens(&mut tx, user_id, rows).await?;
                tx.commit().await?;
                Ok(inserted)
            }
        })
        .await;

        match result {
            Ok(inserted) => {
                tracing::debug!(user_id, rows = rows.len(), inserted, "Bulk insert committed");
                Ok(inserted)
            }
            Err(e) if e.is_unique_violation() => {
                tracing::debug!(user_id, rows = rows.len(), "Batch already present");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

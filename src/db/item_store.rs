use std::collections::BTreeSet;
use std::future::Future;

use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use super::pool::{create_memory_pool, create_pool};
use crate::error::{AppError, AppResult};
use crate::models::Item;

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const OBSERVER_BUFFER: usize = 16;

/// Live query results. The first element is the current state, later elements follow
/// committed writes to the observed owner's partition. Dropping the stream stops the query task.
pub type ItemStream<T> = ReceiverStream<AppResult<T>>;

/// Durable per-owner item cache.
///
/// Every read is scoped by `owner_id`. Each committed write publishes the owner ids it touched
/// so that live queries of that partition re-run; other partitions never see the write.
#[derive(Clone)]
pub struct ItemStore {
    pool: SqlitePool,
    changes: broadcast::Sender<String>,
}

impl ItemStore {
    pub async fn open(database_url: &str) -> AppResult<Self> {
        let pool = create_pool(database_url).await?;
        tracing::info!("Item store opened: {}", database_url);
        Ok(Self::from_pool(pool))
    }

    pub async fn open_in_memory() -> AppResult<Self> {
        let pool = create_memory_pool().await?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps a pool whose schema has already been applied.
    pub fn from_pool(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn notify(&self, owner_id: &str) {
        // Fails only when nobody is observing.
        let _ = self.changes.send(owner_id.to_string());
    }

    /// Inserts or replaces by `(owner_id, id)`. An item with `id == 0` gets a provisional
    /// negative id. Returns the effective id.
    pub async fn upsert(&self, item: &Item) -> AppResult<i64> {
        item.validate()?;

        let mut tx = self.pool.begin().await?;
        let id = Self::upsert_in(&mut tx, item).await?;
        tx.commit().await?;

        self.notify(&item.owner_id);
        Ok(id)
    }

    /// Bulk upsert in one transaction: either every row is written or none is.
    pub async fn upsert_many(&self, items: &[Item]) -> AppResult<Vec<i64>> {
        for item in items {
            item.validate()?;
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(Self::upsert_in(&mut tx, item).await?);
        }
        tx.commit().await?;

        let owners: BTreeSet<&str> = items.iter().map(|i| i.owner_id.as_str()).collect();
        for owner in owners {
            self.notify(owner);
        }
        Ok(ids)
    }

    /// Replaces the editable fields and `updated_at` of an existing row; `created_at` is kept.
    /// Returns the number of rows changed (0 if the row does not exist).
    pub async fn update(&self, item: &Item) -> AppResult<u64> {
        item.validate()?;

        let affected = sqlx::query(
            "UPDATE items SET name = ?, description = ?, quantity = ?, updated_at = ? \
             WHERE owner_id = ? AND id = ?",
        )
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.updated_at)
        .bind(&item.owner_id)
        .bind(item.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected > 0 {
            self.notify(&item.owner_id);
        }
        Ok(affected)
    }

    /// Deletes the row only when it belongs to `owner_id`.
    pub async fn delete_by_id(&self, id: i64, owner_id: &str) -> AppResult<u64> {
        let affected = sqlx::query("DELETE FROM items WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected > 0 {
            self.notify(owner_id);
        }
        Ok(affected)
    }

    pub async fn delete_all_for_owner(&self, owner_id: &str) -> AppResult<u64> {
        let affected = sqlx::query("DELETE FROM items WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected > 0 {
            self.notify(owner_id);
        }
        Ok(affected)
    }

    /// Deletes the owner's partition and inserts `items` in a single transaction, then
    /// notifies once, so observers go straight from the old set to the new one.
    pub async fn replace_all_for_owner(&self, owner_id: &str, items: &[Item]) -> AppResult<usize> {
        for item in items {
            item.validate()?;
            if item.owner_id != owner_id {
                return Err(AppError::InvalidInput(format!(
                    "item {} belongs to {}, not {}",
                    item.id, item.owner_id, owner_id
                )));
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM items WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        for item in items {
            Self::upsert_in(&mut tx, item).await?;
        }
        tx.commit().await?;

        self.notify(owner_id);
        Ok(items.len())
    }

    pub async fn get(&self, owner_id: &str, id: i64) -> AppResult<Option<Item>> {
        Self::fetch_by_id(&self.pool, owner_id, id).await
    }

    pub async fn list(&self, owner_id: &str) -> AppResult<Vec<Item>> {
        Self::fetch_all(&self.pool, owner_id).await
    }

    /// Live list of the owner's items, newest first.
    pub fn observe_all(&self, owner_id: &str) -> ItemStream<Vec<Item>> {
        self.observe(owner_id, |pool, owner| async move {
            Self::fetch_all(&pool, &owner).await
        })
    }

    /// Live single item; `None` when absent or owned by someone else.
    pub fn observe_by_id(&self, owner_id: &str, id: i64) -> ItemStream<Option<Item>> {
        self.observe(owner_id, move |pool, owner| async move {
            Self::fetch_by_id(&pool, &owner, id).await
        })
    }

    /// Live case-insensitive substring search on `name`, ordered by name.
    pub fn search(&self, owner_id: &str, query: &str) -> ItemStream<Vec<Item>> {
        let pattern = like_pattern(query);
        self.observe(owner_id, move |pool, owner| {
            let pattern = pattern.clone();
            async move { Self::fetch_search(&pool, &owner, &pattern).await }
        })
    }

    fn observe<T, F, Fut>(&self, owner_id: &str, query: F) -> ItemStream<T>
    where
        T: PartialEq + Clone + Send + 'static,
        F: Fn(SqlitePool, String) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        // Subscribe before the first query so no write can slip between the two.
        let mut changes = self.changes.subscribe();
        let pool = self.pool.clone();
        let owner_id = owner_id.to_string();

        tokio::spawn(async move {
            let mut last: Option<T> = None;
            loop {
                match query(pool.clone(), owner_id.clone()).await {
                    Ok(value) => {
                        if last.as_ref() != Some(&value) {
                            last = Some(value.clone());
                            if tx.send(Ok(value)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Item query failed for owner {}: {}", owner_id, e);
                        last = None;
                        if tx.send(Err(e)).await.is_err() {
                            return;
                        }
                    }
                }

                if !wait_for_change(&mut changes, &tx, &owner_id).await {
                    return;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    async fn upsert_in(conn: &mut SqliteConnection, item: &Item) -> AppResult<i64> {
        let id = if item.id == 0 {
            Self::next_provisional_id(conn, &item.owner_id).await?
        } else {
            item.id
        };

        sqlx::query(
            "INSERT OR REPLACE INTO items \
             (id, owner_id, name, description, quantity, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&item.owner_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Provisional ids count down from -1 so they never meet server-assigned ids.
    async fn next_provisional_id(conn: &mut SqliteConnection, owner_id: &str) -> AppResult<i64> {
        let lowest: i64 =
            sqlx::query_scalar("SELECT COALESCE(MIN(id), 0) FROM items WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(lowest.min(0) - 1)
    }

    async fn fetch_all(pool: &SqlitePool, owner_id: &str) -> AppResult<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            "SELECT id, owner_id, name, description, quantity, created_at, updated_at \
             FROM items WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await?;
        Ok(items)
    }

    async fn fetch_by_id(pool: &SqlitePool, owner_id: &str, id: i64) -> AppResult<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(
            "SELECT id, owner_id, name, description, quantity, created_at, updated_at \
             FROM items WHERE owner_id = ? AND id = ?",
        )
        .bind(owner_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(item)
    }

    async fn fetch_search(pool: &SqlitePool, owner_id: &str, pattern: &str) -> AppResult<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            "SELECT id, owner_id, name, description, quantity, created_at, updated_at \
             FROM items WHERE owner_id = ? AND name LIKE ? ESCAPE '\\' \
             ORDER BY name COLLATE NOCASE ASC, id ASC",
        )
        .bind(owner_id)
        .bind(pattern)
        .fetch_all(pool)
        .await?;
        Ok(items)
    }
}

/// Waits for a write to `owner_id`'s partition. Returns false once the observer is gone
/// or the store has been dropped.
async fn wait_for_change<T>(
    changes: &mut broadcast::Receiver<String>,
    tx: &mpsc::Sender<T>,
    owner_id: &str,
) -> bool {
    loop {
        tokio::select! {
            _ = tx.closed() => return false,
            msg = changes.recv() => match msg {
                Ok(changed) if changed == owner_id => return true,
                Ok(_) => continue,
                // Missed notifications: re-query.
                Err(RecvError::Lagged(_)) => return true,
                Err(RecvError::Closed) => return false,
            },
        }
    }
}

fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

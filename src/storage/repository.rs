//! SQLite-backed metadata stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use super::node::{BlobLocator, NewNode, StorageNode};
use super::profile::Quota;
use super::temp::{NewTempItem, TempContent, TempStorageItem};
use super::traits::{NodeStore, ProfileStore, TempStore};
use super::{from_millis, to_db_size, to_millis};
use crate::{Result, StowError};

/// Upper bound on IDs bound into a single `IN (...)` list.
const MAX_BIND_IDS: usize = 500;

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StowError::Database(format!("invalid id '{raw}': {e}")))
}

fn from_db_size(size: i64) -> u64 {
    u64::try_from(size).unwrap_or(0)
}

fn locator(bucket: Option<String>, key: Option<String>) -> Option<BlobLocator> {
    match (bucket, key) {
        (Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => {
            Some(BlobLocator::new(bucket, key))
        }
        _ => None,
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    owner_id: String,
    kind: String,
    parent_id: Option<String>,
    name: String,
    description: Option<String>,
    bucket: Option<String>,
    bucket_path: Option<String>,
    mime_type: Option<String>,
    byte_size: i64,
    created_at: i64,
}

impl TryFrom<NodeRow> for StorageNode {
    type Error = StowError;

    fn try_from(row: NodeRow) -> Result<Self> {
        Ok(StorageNode {
            id: parse_id(&row.id)?,
            owner: parse_id(&row.owner_id)?,
            kind: row.kind.parse().map_err(StowError::Database)?,
            parent_id: row.parent_id.as_deref().map(parse_id).transpose()?,
            name: row.name,
            description: row.description,
            blob: locator(row.bucket, row.bucket_path),
            mime_type: row.mime_type,
            byte_size: from_db_size(row.byte_size),
            created_at: from_millis(row.created_at),
        })
    }
}

fn into_nodes(rows: Vec<NodeRow>) -> Result<Vec<StorageNode>> {
    rows.into_iter().map(StorageNode::try_from).collect()
}

/// Node store over the `storage_nodes` table.
#[derive(Debug, Clone)]
pub struct SqliteNodeStore {
    pool: SqlitePool,
}

impl SqliteNodeStore {
    /// Create a new store on the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeStore for SqliteNodeStore {
    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<StorageNode>> {
        let row = sqlx::query_as::<_, NodeRow>(
            "SELECT id, owner_id, kind, parent_id, name, description, bucket, bucket_path,
                    mime_type, byte_size, created_at
             FROM storage_nodes WHERE id = ? AND owner_id = ?",
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        row.map(StorageNode::try_from).transpose()
    }

    async fn list_children(
        &self,
        parent: Uuid,
        owner: Uuid,
        limit: usize,
    ) -> Result<Vec<StorageNode>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT id, owner_id, kind, parent_id, name, description, bucket, bucket_path,
                    mime_type, byte_size, created_at
             FROM storage_nodes WHERE parent_id = ? AND owner_id = ?
             ORDER BY created_at, id LIMIT ?",
        )
        .bind(parent.to_string())
        .bind(owner.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        into_nodes(rows)
    }

    async fn list_files(&self, owner: Uuid, limit: usize) -> Result<Vec<StorageNode>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT id, owner_id, kind, parent_id, name, description, bucket, bucket_path,
                    mime_type, byte_size, created_at
             FROM storage_nodes WHERE owner_id = ? AND kind = 'file'
             ORDER BY created_at, id LIMIT ?",
        )
        .bind(owner.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        into_nodes(rows)
    }

    async fn delete_by_id(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM storage_nodes WHERE id = ? AND owner_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StowError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_ids(&self, ids: &[Uuid], owner: Uuid) -> Result<u64> {
        let mut deleted = 0;
        for chunk in ids.chunks(MAX_BIND_IDS) {
            let mut query: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM storage_nodes WHERE owner_id = ");
            query.push_bind(owner.to_string());
            query.push(" AND id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");

            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| StowError::Database(e.to_string()))?;
            deleted += result.rows_affected();
        }

        Ok(deleted)
    }

    async fn delete_all_for_owner(&self, owner: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM storage_nodes WHERE owner_id = ?")
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StowError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn insert(&self, node: &NewNode) -> Result<StorageNode> {
        let created_at = Utc::now();
        let (bucket, bucket_path) = match &node.blob {
            Some(blob) => (Some(blob.bucket.as_str()), Some(blob.key.as_str())),
            None => (None, None),
        };

        sqlx::query(
            "INSERT INTO storage_nodes (id, owner_id, kind, parent_id, name, description,
                                        bucket, bucket_path, mime_type, byte_size, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(node.id.to_string())
        .bind(node.owner.to_string())
        .bind(node.kind.as_str())
        .bind(node.parent_id.map(|id| id.to_string()))
        .bind(&node.name)
        .bind(&node.description)
        .bind(bucket)
        .bind(bucket_path)
        .bind(&node.mime_type)
        .bind(to_db_size(node.byte_size))
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        // Round-trip through milliseconds so the returned value matches a later read.
        Ok(node.clone().into_node(from_millis(to_millis(created_at))))
    }
}

#[derive(sqlx::FromRow)]
struct TempRow {
    id: String,
    owner_id: String,
    file_name: String,
    mime_type: String,
    byte_size: i64,
    bucket: Option<String>,
    bucket_path: Option<String>,
    text_content: Option<String>,
    expires_at: i64,
    created_at: i64,
}

impl TryFrom<TempRow> for TempStorageItem {
    type Error = StowError;

    fn try_from(row: TempRow) -> Result<Self> {
        let content = match locator(row.bucket, row.bucket_path) {
            Some(blob) => TempContent::Blob(blob),
            None => TempContent::Text(row.text_content.unwrap_or_default()),
        };

        Ok(TempStorageItem {
            id: parse_id(&row.id)?,
            owner: parse_id(&row.owner_id)?,
            file_name: row.file_name,
            mime_type: row.mime_type,
            byte_size: from_db_size(row.byte_size),
            expires_at: from_millis(row.expires_at),
            content,
            created_at: from_millis(row.created_at),
        })
    }
}

fn into_items(rows: Vec<TempRow>) -> Result<Vec<TempStorageItem>> {
    rows.into_iter().map(TempStorageItem::try_from).collect()
}

/// Temp store over the `temp_storage` table.
#[derive(Debug, Clone)]
pub struct SqliteTempStore {
    pool: SqlitePool,
}

impl SqliteTempStore {
    /// Create a new store on the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TempStore for SqliteTempStore {
    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<TempStorageItem>> {
        let row = sqlx::query_as::<_, TempRow>(
            "SELECT id, owner_id, file_name, mime_type, byte_size, bucket, bucket_path,
                    text_content, expires_at, created_at
             FROM temp_storage WHERE id = ? AND owner_id = ?",
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        row.map(TempStorageItem::try_from).transpose()
    }

    async fn list_expired(
        &self,
        owner: Uuid,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TempStorageItem>> {
        let rows = sqlx::query_as::<_, TempRow>(
            "SELECT id, owner_id, file_name, mime_type, byte_size, bucket, bucket_path,
                    text_content, expires_at, created_at
             FROM temp_storage WHERE owner_id = ? AND expires_at <= ?
             ORDER BY expires_at, id LIMIT ?",
        )
        .bind(owner.to_string())
        .bind(to_millis(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        into_items(rows)
    }

    async fn list_in_blob_store(&self, owner: Uuid, limit: usize) -> Result<Vec<TempStorageItem>> {
        let rows = sqlx::query_as::<_, TempRow>(
            "SELECT id, owner_id, file_name, mime_type, byte_size, bucket, bucket_path,
                    text_content, expires_at, created_at
             FROM temp_storage
             WHERE owner_id = ? AND bucket IS NOT NULL AND bucket_path IS NOT NULL
             ORDER BY created_at, id LIMIT ?",
        )
        .bind(owner.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        into_items(rows)
    }

    async fn delete_by_id(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM temp_storage WHERE id = ? AND owner_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StowError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_ids(&self, ids: &[Uuid], owner: Uuid) -> Result<u64> {
        let mut deleted = 0;
        for chunk in ids.chunks(MAX_BIND_IDS) {
            let mut query: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM temp_storage WHERE owner_id = ");
            query.push_bind(owner.to_string());
            query.push(" AND id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");

            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| StowError::Database(e.to_string()))?;
            deleted += result.rows_affected();
        }

        Ok(deleted)
    }

    async fn delete_all_for_owner(&self, owner: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM temp_storage WHERE owner_id = ?")
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StowError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn insert(&self, item: &NewTempItem) -> Result<TempStorageItem> {
        let created_at = from_millis(to_millis(Utc::now()));
        let (bucket, bucket_path, text) = match &item.content {
            TempContent::Blob(blob) => (Some(blob.bucket.as_str()), Some(blob.key.as_str()), None),
            TempContent::Text(text) => (None, None, Some(text.as_str())),
        };

        sqlx::query(
            "INSERT INTO temp_storage (id, owner_id, file_name, mime_type, byte_size, bucket,
                                       bucket_path, text_content, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id.to_string())
        .bind(item.owner.to_string())
        .bind(&item.file_name)
        .bind(&item.mime_type)
        .bind(to_db_size(item.byte_size))
        .bind(bucket)
        .bind(bucket_path)
        .bind(text)
        .bind(to_millis(item.expires_at))
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        let mut stored = item.clone().into_item(created_at);
        stored.expires_at = from_millis(to_millis(item.expires_at));
        Ok(stored)
    }
}

/// Profile store over the `profiles` table.
#[derive(Debug, Clone)]
pub struct SqliteProfileStore {
    pool: SqlitePool,
}

impl SqliteProfileStore {
    /// Create a new store on the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn get_quota(&self, owner: Uuid) -> Result<Option<Quota>> {
        let row: Option<(i64, Option<i64>)> =
            sqlx::query_as("SELECT storage_used, storage_limit FROM profiles WHERE id = ?")
                .bind(owner.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StowError::Database(e.to_string()))?;

        Ok(row.map(|(used, limit)| Quota::new(from_db_size(used), limit.map(from_db_size))))
    }

    async fn set_used(&self, owner: Uuid, used: u64) -> Result<()> {
        let result = sqlx::query("UPDATE profiles SET storage_used = ? WHERE id = ?")
            .bind(to_db_size(used))
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StowError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StowError::NotFound("profile".to_string()));
        }
        Ok(())
    }

    async fn create_profile(&self, owner: Uuid, limit: Option<u64>) -> Result<Quota> {
        sqlx::query(
            "INSERT INTO profiles (id, storage_used, storage_limit, created_at)
             VALUES (?, 0, ?, ?)",
        )
        .bind(owner.to_string())
        .bind(limit.map(to_db_size))
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StowError::Database(e.to_string()))?;

        Ok(Quota::new(0, limit))
    }

    async fn delete_profile(&self, owner: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = ?")
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StowError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

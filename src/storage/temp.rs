//! Temporary share types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::node::BlobLocator;

/// Where a temporary share keeps its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TempContent {
    /// Content lives in the blob store.
    Blob(BlobLocator),
    /// Content is inlined in the metadata row.
    Text(String),
}

/// An ephemeral shared file or text snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempStorageItem {
    /// Unique item ID.
    pub id: Uuid,
    /// Owning principal.
    pub owner: Uuid,
    /// Sanitized file name (or a generated name for text).
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes, counted against the owner's quota.
    pub byte_size: u64,
    /// When the share stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Stored content.
    pub content: TempContent,
    /// When the share was created.
    pub created_at: DateTime<Utc>,
}

impl TempStorageItem {
    /// Check if the content lives in the blob store.
    pub fn in_blob_store(&self) -> bool {
        matches!(self.content, TempContent::Blob(_))
    }

    /// Get the blob locator, if any.
    pub fn blob(&self) -> Option<&BlobLocator> {
        match &self.content {
            TempContent::Blob(locator) => Some(locator),
            TempContent::Text(_) => None,
        }
    }

    /// Check if the share has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Data for creating a new temporary share.
#[derive(Debug, Clone)]
pub struct NewTempItem {
    /// Item ID.
    pub id: Uuid,
    /// Owning principal.
    pub owner: Uuid,
    /// File name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub byte_size: u64,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Stored content.
    pub content: TempContent,
}

impl NewTempItem {
    /// A blob-backed share.
    pub fn blob(
        owner: Uuid,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        byte_size: u64,
        expires_at: DateTime<Utc>,
        locator: BlobLocator,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            byte_size,
            expires_at,
            content: TempContent::Blob(locator),
        }
    }

    /// An inline text share. The size is the UTF-8 length of the text.
    pub fn text(owner: Uuid, text: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        let text = text.into();
        Self {
            id: Uuid::new_v4(),
            owner,
            file_name: "text.txt".to_string(),
            mime_type: "text/plain".to_string(),
            byte_size: text.len() as u64,
            expires_at,
            content: TempContent::Text(text),
        }
    }

    /// Use a specific ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Materialize the item as it will be stored.
    pub fn into_item(self, created_at: DateTime<Utc>) -> TempStorageItem {
        TempStorageItem {
            id: self.id,
            owner: self.owner,
            file_name: self.file_name,
            mime_type: self.mime_type,
            byte_size: self.byte_size,
            expires_at: self.expires_at,
            content: self.content,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_text_item_size_is_utf8_length() {
        let item = NewTempItem::text(Uuid::new_v4(), "héllo", Utc::now());
        assert_eq!(item.byte_size, 6);
        assert_eq!(item.mime_type, "text/plain");
    }

    #[test]
    fn test_in_blob_store() {
        let now = Utc::now();
        let blob = NewTempItem::blob(
            Uuid::new_v4(),
            "a.png",
            "image/png",
            10,
            now,
            BlobLocator::new("temporary_storage", "o/a.png"),
        )
        .into_item(now);
        let text = NewTempItem::text(Uuid::new_v4(), "hi", now).into_item(now);

        assert!(blob.in_blob_store());
        assert_eq!(blob.blob().unwrap().key, "o/a.png");
        assert!(!text.in_blob_store());
        assert!(text.blob().is_none());
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let item = NewTempItem::text(Uuid::new_v4(), "x", now - Duration::minutes(1)).into_item(now);
        assert!(item.is_expired(now));

        let item = NewTempItem::text(Uuid::new_v4(), "x", now + Duration::minutes(1)).into_item(now);
        assert!(!item.is_expired(now));
    }
}

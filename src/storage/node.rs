//! Storage node types for the long-term folder tree.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a node is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A file, optionally backed by a blob.
    File,
    /// A folder that may contain other nodes.
    Folder,
}

impl NodeKind {
    /// Convert kind to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Folder => "folder",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(NodeKind::File),
            "folder" => Ok(NodeKind::Folder),
            _ => Err(format!("unknown node kind: {s}")),
        }
    }
}

/// Bucket and object key of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocator {
    /// Bucket name.
    pub bucket: String,
    /// Object key inside the bucket.
    pub key: String,
}

impl BlobLocator {
    /// Create a new locator.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// A file or folder in an owner's storage tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageNode {
    /// Unique node ID.
    pub id: Uuid,
    /// Owning principal.
    pub owner: Uuid,
    /// File or folder.
    pub kind: NodeKind,
    /// Parent folder (None for the root of the owner's tree).
    pub parent_id: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Backing object, for files with stored content.
    pub blob: Option<BlobLocator>,
    /// MIME type of the stored content.
    pub mime_type: Option<String>,
    /// Size in bytes (0 for folders).
    pub byte_size: u64,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
}

impl StorageNode {
    /// Check if this node is a file.
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Check if this node is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// Data for creating a new node.
#[derive(Debug, Clone)]
pub struct NewNode {
    /// Node ID, generated up front so blobs can be named before insert.
    pub id: Uuid,
    /// Owning principal.
    pub owner: Uuid,
    /// File or folder.
    pub kind: NodeKind,
    /// Parent folder.
    pub parent_id: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Backing object.
    pub blob: Option<BlobLocator>,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Size in bytes.
    pub byte_size: u64,
}

impl NewNode {
    /// Create a new folder at the root of the owner's tree.
    pub fn folder(owner: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            kind: NodeKind::Folder,
            parent_id: None,
            name: name.into(),
            description: None,
            blob: None,
            mime_type: None,
            byte_size: 0,
        }
    }

    /// Create a new file at the root of the owner's tree.
    ///
    /// Without [`NewNode::with_blob`] this is a link-only file.
    pub fn file(owner: Uuid, name: impl Into<String>, byte_size: u64) -> Self {
        Self {
            kind: NodeKind::File,
            byte_size,
            ..Self::folder(owner, name)
        }
    }

    /// Use a specific ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Set the parent folder.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the backing object.
    pub fn with_blob(mut self, blob: BlobLocator) -> Self {
        self.blob = Some(blob);
        self
    }

    /// Set the MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Materialize the node as it will be stored.
    pub fn into_node(self, created_at: DateTime<Utc>) -> StorageNode {
        StorageNode {
            id: self.id,
            owner: self.owner,
            kind: self.kind,
            parent_id: self.parent_id,
            name: self.name,
            description: self.description,
            blob: self.blob,
            mime_type: self.mime_type,
            byte_size: self.byte_size,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        assert_eq!("file".parse::<NodeKind>().unwrap(), NodeKind::File);
        assert_eq!("FOLDER".parse::<NodeKind>().unwrap(), NodeKind::Folder);
        assert!("symlink".parse::<NodeKind>().is_err());
        assert_eq!(NodeKind::Folder.to_string(), "folder");
    }

    #[test]
    fn test_new_file_builder() {
        let owner = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let node = NewNode::file(owner, "report.pdf", 2048)
            .with_parent(parent)
            .with_description("Q3")
            .with_mime_type("application/pdf")
            .with_blob(BlobLocator::new("user_files", format!("{owner}/report.pdf")));

        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.byte_size, 2048);
        assert_eq!(node.parent_id, Some(parent));
        assert_eq!(node.description.as_deref(), Some("Q3"));
        assert_eq!(node.blob.as_ref().unwrap().bucket, "user_files");
    }

    #[test]
    fn test_new_folder_has_no_size_or_blob() {
        let node = NewNode::folder(Uuid::new_v4(), "Photos");
        assert_eq!(node.kind, NodeKind::Folder);
        assert_eq!(node.byte_size, 0);
        assert!(node.blob.is_none());
    }

    #[test]
    fn test_into_node_keeps_id() {
        let id = Uuid::new_v4();
        let node = NewNode::folder(Uuid::new_v4(), "Docs")
            .with_id(id)
            .into_node(Utc::now());
        assert_eq!(node.id, id);
        assert!(node.is_folder());
        assert!(!node.is_file());
    }

    #[test]
    fn test_locator_display() {
        let locator = BlobLocator::new("bucket", "key1");
        assert_eq!(locator.to_string(), "bucket/key1");
    }

    #[test]
    fn test_node_serializes_camel_case() {
        let node = NewNode::file(Uuid::nil(), "a.txt", 3).into_node(Utc::now());
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["byteSize"], 3);
        assert!(json["parentId"].is_null());
    }
}

//! End-to-end tests on SQLite metadata and a filesystem blob store.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use common::LogCapture;
use stowbox::{
    Backends, Config, Database, DeletionErrorKind, FsBlobStore, StorageNode, StorageService,
    StowError, TempFileRequest, UploadRequest,
};

struct SqliteFixture {
    _dir: TempDir,
    db: Database,
    blobs: Arc<FsBlobStore>,
    service: StorageService,
}

impl SqliteFixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path().join("blobs")).unwrap());
        let service = StorageService::new(Backends::sqlite(&db, blobs.clone()), &Config::default());
        Self {
            _dir: dir,
            db,
            blobs,
            service,
        }
    }

    async fn owner(&self, limit: Option<u64>) -> Uuid {
        let owner = Uuid::new_v4();
        self.service
            .backends()
            .profiles
            .create_profile(owner, limit)
            .await
            .unwrap();
        owner
    }

    async fn upload(&self, owner: Uuid, parent: Uuid, name: &str, size: usize) -> StorageNode {
        let content = vec![b'a'; size];
        let request =
            UploadRequest::new(name, format!("{name}.txt"), "text/plain", content).with_parent(parent);
        self.service.upload_file(owner, &request).await.unwrap().data
    }
}

#[tokio::test]
async fn test_upload_and_delete_tree_on_disk() {
    let fx = SqliteFixture::new().await;
    let owner = fx.owner(None).await;

    let root = fx.service.create_folder(owner, None, "Projects").await.unwrap();
    let sub = fx.service.create_folder(owner, Some(root.id), "2024").await.unwrap();
    let a = fx.upload(owner, root.id, "plan", 512).await;
    let b = fx.upload(owner, sub.id, "budget", 1024).await;
    assert_eq!(fx.service.storage_used(owner).await.unwrap().used, 1536);

    let a_blob = a.blob.clone().unwrap();
    let b_blob = b.blob.clone().unwrap();
    assert!(fx.blobs.exists(&a_blob.bucket, &a_blob.key).await);
    assert_eq!(fx.blobs.load(&b_blob.bucket, &b_blob.key).await.unwrap().len(), 1024);

    let response = fx.service.delete_node(root.id, owner).await.unwrap();

    assert!(response.success);
    assert_eq!(response.files_deleted, 2);
    assert_eq!(response.folders_deleted, 2);
    assert_eq!(response.total_bytes_deleted, 1536);
    assert!(!fx.blobs.exists(&a_blob.bucket, &a_blob.key).await);
    assert!(!fx.blobs.exists(&b_blob.bucket, &b_blob.key).await);
    assert_eq!(fx.service.storage_used(owner).await.unwrap().used, 0);

    let again = fx.service.delete_node(root.id, owner).await;
    assert!(matches!(again, Err(StowError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_file_keeps_siblings() {
    let fx = SqliteFixture::new().await;
    let owner = fx.owner(None).await;
    let root = fx.service.create_folder(owner, None, "Inbox").await.unwrap();
    let keep = fx.upload(owner, root.id, "keep", 10).await;
    let drop = fx.upload(owner, root.id, "drop", 20).await;

    let response = fx.service.delete_node(drop.id, owner).await.unwrap();

    assert!(response.success);
    assert_eq!(response.files_deleted, 1);
    assert_eq!(response.total_bytes_deleted, 20);
    let nodes = &fx.service.backends().nodes;
    assert!(nodes.get_by_id(keep.id, owner).await.unwrap().is_some());
    assert!(nodes.get_by_id(root.id, owner).await.unwrap().is_some());
    assert_eq!(fx.service.storage_used(owner).await.unwrap().used, 10);
}

#[tokio::test]
async fn test_missing_object_on_disk_is_not_an_error() {
    let fx = SqliteFixture::new().await;
    let owner = fx.owner(None).await;
    let root = fx.service.create_folder(owner, None, "Gone").await.unwrap();
    let file = fx.upload(owner, root.id, "vanished", 30).await;
    let locator = file.blob.clone().unwrap();
    std::fs::remove_file(fx.blobs.object_path(&locator.bucket, &locator.key).unwrap()).unwrap();

    let response = fx.service.delete_node(root.id, owner).await.unwrap();

    assert!(response.success);
    assert!(response.warnings.is_empty());
    assert_eq!(response.total_bytes_deleted, 30);
}

#[tokio::test]
async fn test_path_escaping_locator_is_an_orphan_warning() {
    let fx = SqliteFixture::new().await;
    let owner = fx.owner(None).await;
    let root = fx.service.create_folder(owner, None, "Odd").await.unwrap();

    // Row written by some other tool with a key the store refuses
    sqlx::query(
        "INSERT INTO storage_nodes (id, owner_id, kind, parent_id, name, bucket, bucket_path, byte_size, created_at)
         VALUES (?, ?, 'file', ?, 'odd', 'user_files', '../escape', 5, 0)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(owner.to_string())
    .bind(root.id.to_string())
    .execute(fx.db.pool())
    .await
    .unwrap();

    let capture = LogCapture::default();
    let _guard = capture.install();
    let response = fx.service.delete_node(root.id, owner).await.unwrap();

    assert!(response.success);
    assert_eq!(response.files_deleted, 1);
    assert_eq!(response.warnings.len(), 1);
    assert_eq!(response.warnings[0].kind, DeletionErrorKind::BlobDeletionFailed);
    assert_eq!(response.orphaned_objects, 1);
    assert!(capture.contents().contains("../escape"));
}

#[tokio::test]
async fn test_purge_account_on_disk() {
    let fx = SqliteFixture::new().await;
    let owner = fx.owner(Some(1_000_000)).await;
    let other = fx.owner(None).await;

    let root = fx.service.create_folder(owner, None, "All").await.unwrap();
    let sub = fx.service.create_folder(owner, Some(root.id), "Sub").await.unwrap();
    let f1 = fx.upload(owner, root.id, "one", 100).await;
    let f2 = fx.upload(owner, sub.id, "two", 200).await;
    let share = fx
        .service
        .create_temp_file(
            owner,
            &TempFileRequest {
                file_name: "share.zip".to_string(),
                mime_type: "application/zip".to_string(),
                content: vec![7; 50],
                duration_minutes: 60,
            },
        )
        .await
        .unwrap()
        .data;
    fx.service.create_temp_text(owner, "note", 60).await.unwrap();

    let other_root = fx.service.create_folder(other, None, "Mine").await.unwrap();
    let other_file = fx.upload(other, other_root.id, "theirs", 40).await;

    let result = fx.service.delete_account(owner).await;

    assert!(result.success(), "errors: {:?}", result.errors);
    assert_eq!(result.files_deleted, 2);
    assert_eq!(result.temp_items_deleted, 2);
    assert_eq!(result.bytes_freed, 350);
    assert_eq!(result.nodes_removed_in_cleanup, 2);
    assert!(result.profile_deleted);

    for locator in [f1.blob.unwrap(), f2.blob.unwrap(), share.blob().cloned().unwrap()] {
        assert!(!fx.blobs.exists(&locator.bucket, &locator.key).await);
    }
    assert!(matches!(
        fx.service.storage_used(owner).await,
        Err(StowError::NotFound(_))
    ));

    let other_blob = other_file.blob.unwrap();
    assert!(fx.blobs.exists(&other_blob.bucket, &other_blob.key).await);
    assert_eq!(fx.service.storage_used(other).await.unwrap().used, 40);
}

#[tokio::test]
async fn test_sweep_expired_on_disk() {
    let fx = SqliteFixture::new().await;
    let owner = fx.owner(None).await;
    let share = fx
        .service
        .create_temp_file(
            owner,
            &TempFileRequest {
                file_name: "clip.mp4".to_string(),
                mime_type: "video/mp4".to_string(),
                content: vec![0; 80],
                duration_minutes: 5,
            },
        )
        .await
        .unwrap()
        .data;
    let locator = share.blob().cloned().unwrap();
    assert!(fx.blobs.exists(&locator.bucket, &locator.key).await);

    let response = fx
        .service
        .sweep_expired(owner, Utc::now() + Duration::minutes(10))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.items_deleted, 1);
    assert_eq!(response.bytes_freed, 80);
    assert!(!fx.blobs.exists(&locator.bucket, &locator.key).await);
    assert_eq!(fx.service.storage_used(owner).await.unwrap().used, 0);
}

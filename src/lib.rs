//! Stowbox - file storage and sharing backend
//!
//! Hierarchical storage deletion and quota reconciliation over pluggable
//! metadata and blob stores.

pub mod config;
pub mod db;
pub mod deletion;
pub mod error;
pub mod logging;
pub mod quota;
pub mod service;
pub mod storage;
pub mod validation;

pub use config::Config;
pub use db::Database;
pub use deletion::{
    AccountDeletionResult, AccountSweeper, DeletionError, DeletionErrorKind, DeletionResult,
    ErrorLog, TreeDeleter, Warning,
};
pub use error::{Result, StowError};
pub use quota::{DriftRecord, QuotaOutcome, QuotaReconciler};
pub use service::{
    Backends, DeleteNodeResponse, DeleteTempResponse, StorageService, TempFileRequest,
    UploadRequest, UploadResponse,
};
pub use storage::{
    BlobLocator, BlobStore, FsBlobStore, NewNode, NewTempItem, NodeKind, NodeStore, ProfileStore,
    Quota, StorageNode, TempContent, TempStorageItem, TempStore,
};

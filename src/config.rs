//! Configuration module for Stowbox.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, StowError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/stowbox.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the filesystem blob store (one subdirectory per bucket).
    #[serde(default = "default_blob_root")]
    pub blob_root: String,
    /// Bucket for long-term files.
    #[serde(default = "default_long_term_bucket")]
    pub long_term_bucket: String,
    /// Bucket for temporary shares.
    #[serde(default = "default_temp_bucket")]
    pub temp_bucket: String,
    /// Bucket for profile pictures.
    #[serde(default = "default_profile_image_bucket")]
    pub profile_image_bucket: String,
    /// Buckets the account sweep is allowed to remove objects from.
    #[serde(default = "default_allowed_buckets")]
    pub allowed_buckets: Vec<String>,
    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_mb: u64,
}

fn default_blob_root() -> String {
    "data/blobs".to_string()
}

fn default_long_term_bucket() -> String {
    "user_files".to_string()
}

fn default_temp_bucket() -> String {
    "temporary_storage".to_string()
}

fn default_profile_image_bucket() -> String {
    "profile_images".to_string()
}

fn default_allowed_buckets() -> Vec<String> {
    vec![
        default_long_term_bucket(),
        default_temp_bucket(),
        default_profile_image_bucket(),
    ]
}

fn default_max_file_size() -> u64 {
    100
}

impl StorageConfig {
    /// Maximum upload size in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Check whether a bucket is on the allow-list.
    pub fn is_allowed_bucket(&self, bucket: &str) -> bool {
        self.allowed_buckets.iter().any(|b| b == bucket)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: default_blob_root(),
            long_term_bucket: default_long_term_bucket(),
            temp_bucket: default_temp_bucket(),
            profile_image_bucket: default_profile_image_bucket(),
            allowed_buckets: default_allowed_buckets(),
            max_file_size_mb: default_max_file_size(),
        }
    }
}

/// Limits applied while deleting trees and sweeping accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletionConfig {
    /// Rows fetched per page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Deepest folder level the tree walk descends into (root is 0).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum pages fetched per folder or per account sweep step.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_max_depth() -> usize {
    50
}

fn default_max_iterations() -> usize {
    100
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_depth: default_max_depth(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Temporary share configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TempConfig {
    /// Shortest allowed share lifetime in minutes.
    #[serde(default = "default_min_duration")]
    pub min_duration_minutes: i64,
    /// Longest allowed share lifetime in minutes.
    #[serde(default = "default_max_duration")]
    pub max_duration_minutes: i64,
}

fn default_min_duration() -> i64 {
    1
}

fn default_max_duration() -> i64 {
    10080 // 7 days
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            min_duration_minutes: default_min_duration(),
            max_duration_minutes: default_max_duration(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/stowbox.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Deletion limits.
    #[serde(default)]
    pub deletion: DeletionConfig,
    /// Temporary share configuration.
    #[serde(default)]
    pub temp: TempConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StowError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StowError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `STOWBOX_DATABASE_PATH`: Override the database path
    /// - `STOWBOX_BLOB_ROOT`: Override the blob store root directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOWBOX_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(root) = std::env::var("STOWBOX_BLOB_ROOT") {
            if !root.is_empty() {
                self.storage.blob_root = root;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - any deletion limit is zero
    /// - the temp duration range is empty or starts below one minute
    /// - a configured bucket is missing from `allowed_buckets`
    pub fn validate(&self) -> Result<()> {
        let deletion = &self.deletion;
        if deletion.batch_size == 0 || deletion.max_depth == 0 || deletion.max_iterations == 0 {
            return Err(StowError::Config(
                "deletion.batch_size, max_depth and max_iterations must be greater than zero"
                    .to_string(),
            ));
        }

        if self.temp.min_duration_minutes < 1
            || self.temp.min_duration_minutes > self.temp.max_duration_minutes
        {
            return Err(StowError::Config(format!(
                "invalid temp duration range {}..={}",
                self.temp.min_duration_minutes, self.temp.max_duration_minutes
            )));
        }

        for bucket in [
            &self.storage.long_term_bucket,
            &self.storage.temp_bucket,
            &self.storage.profile_image_bucket,
        ] {
            if !self.storage.is_allowed_bucket(bucket) {
                return Err(StowError::Config(format!(
                    "bucket '{bucket}' is not listed in storage.allowed_buckets"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.database.path, "data/stowbox.db");
        assert_eq!(config.storage.blob_root, "data/blobs");
        assert_eq!(config.storage.long_term_bucket, "user_files");
        assert_eq!(config.storage.temp_bucket, "temporary_storage");
        assert_eq!(config.storage.profile_image_bucket, "profile_images");
        assert_eq!(config.storage.allowed_buckets.len(), 3);
        assert_eq!(config.storage.max_file_size_mb, 100);
        assert_eq!(config.storage.max_file_size_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.deletion.batch_size, 100);
        assert_eq!(config.deletion.max_depth, 50);
        assert_eq!(config.deletion.max_iterations, 100);
        assert_eq!(config.temp.min_duration_minutes, 1);
        assert_eq!(config.temp.max_duration_minutes, 10080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/stowbox.log");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[database]
path = "custom/db.sqlite"

[storage]
blob_root = "custom/blobs"
long_term_bucket = "files"
temp_bucket = "shares"
profile_image_bucket = "avatars"
allowed_buckets = ["files", "shares", "avatars"]
max_file_size_mb = 20

[deletion]
batch_size = 25
max_depth = 10
max_iterations = 7

[temp]
min_duration_minutes = 5
max_duration_minutes = 60

[logging]
level = "debug"
file = "custom/logs/app.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.database.path, "custom/db.sqlite");
        assert_eq!(config.storage.blob_root, "custom/blobs");
        assert_eq!(config.storage.long_term_bucket, "files");
        assert_eq!(config.storage.temp_bucket, "shares");
        assert_eq!(config.storage.profile_image_bucket, "avatars");
        assert_eq!(config.storage.max_file_size_mb, 20);
        assert_eq!(config.deletion.batch_size, 25);
        assert_eq!(config.deletion.max_depth, 10);
        assert_eq!(config.deletion.max_iterations, 7);
        assert_eq!(config.temp.min_duration_minutes, 5);
        assert_eq!(config.temp.max_duration_minutes, 60);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "custom/logs/app.log");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[deletion]
batch_size = 10
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.deletion.batch_size, 10);
        assert_eq!(config.deletion.max_depth, 50);
        assert_eq!(config.database.path, "data/stowbox.db");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.deletion.batch_size, 100);
        assert_eq!(config.storage.temp_bucket, "temporary_storage");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");
        if let Err(StowError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(StowError::Io(_))));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = Config::default();
        config.deletion.batch_size = 0;
        assert!(matches!(config.validate(), Err(StowError::Config(_))));
    }

    #[test]
    fn test_validate_inverted_duration_range() {
        let mut config = Config::default();
        config.temp.min_duration_minutes = 100;
        config.temp.max_duration_minutes = 10;
        assert!(matches!(config.validate(), Err(StowError::Config(_))));
    }

    #[test]
    fn test_validate_bucket_not_allowed() {
        let mut config = Config::default();
        config.storage.temp_bucket = "elsewhere".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("elsewhere"));
    }

    #[test]
    fn test_is_allowed_bucket() {
        let config = StorageConfig::default();
        assert!(config.is_allowed_bucket("user_files"));
        assert!(!config.is_allowed_bucket("someone_elses_bucket"));
    }

    #[test]
    fn test_apply_env_overrides() {
        let original = std::env::var("STOWBOX_BLOB_ROOT").ok();

        std::env::set_var("STOWBOX_BLOB_ROOT", "/srv/blobs");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.storage.blob_root, "/srv/blobs");

        if let Some(val) = original {
            std::env::set_var("STOWBOX_BLOB_ROOT", val);
        } else {
            std::env::remove_var("STOWBOX_BLOB_ROOT");
        }
    }
}

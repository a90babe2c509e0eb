//! Input validation for Stowbox.
//!
//! Checks applied before anything is written: IDs, names, sizes, MIME
//! types, share durations, and blob locators read back from the database.

use chrono::Duration;
use uuid::Uuid;

use crate::config::{StorageConfig, TempConfig};
use crate::storage::BlobLocator;
use crate::{Result, StowError};

/// Maximum length of node names and stored file names.
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum length of node descriptions.
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;

/// MIME types accepted for uploads.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/csv",
    "application/json",
    "application/zip",
    "video/mp4",
    "audio/mpeg",
];

/// Parse a hyphenated UUID.
///
/// Simple, braced and URN forms are rejected.
pub fn parse_id(raw: &str) -> Result<Uuid> {
    let trimmed = raw.trim();
    if trimmed.len() != 36 {
        return Err(StowError::Validation("invalid ID format".to_string()));
    }
    Uuid::parse_str(trimmed).map_err(|_| StowError::Validation("invalid ID format".to_string()))
}

/// Validate a node name. Returns the trimmed name.
pub fn validate_node_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StowError::Validation("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(StowError::Validation(format!(
            "name is too long (max {MAX_NAME_LENGTH} characters)"
        )));
    }
    Ok(name.to_string())
}

/// Normalize an optional description. Blank descriptions become `None`.
pub fn normalize_description(description: Option<&str>) -> Result<Option<String>> {
    let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(StowError::Validation(format!(
            "description is too long (max {MAX_DESCRIPTION_LENGTH} characters)"
        )));
    }
    Ok(Some(description.to_string()))
}

/// Make a client-supplied file name safe to use in an object key.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, runs of dots collapse to
/// one, and the result is cut to [`MAX_NAME_LENGTH`].
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let mut sanitized = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '.' && sanitized.ends_with('.') {
            continue;
        }
        sanitized.push(c);
    }
    sanitized.truncate(MAX_NAME_LENGTH);

    if sanitized.is_empty() || sanitized == "." {
        return Err(StowError::Validation("invalid file name".to_string()));
    }
    Ok(sanitized)
}

/// Check a content size against the configured maximum.
pub fn validate_content_size(size: u64, max_bytes: u64) -> Result<()> {
    if size == 0 {
        return Err(StowError::Validation("file is empty".to_string()));
    }
    if size > max_bytes {
        return Err(StowError::Validation(format!(
            "file size must be less than {}MB",
            max_bytes / 1024 / 1024
        )));
    }
    Ok(())
}

/// Check a MIME type against [`ALLOWED_MIME_TYPES`].
pub fn validate_mime_type(mime_type: &str) -> Result<()> {
    if ALLOWED_MIME_TYPES.contains(&mime_type) {
        Ok(())
    } else {
        Err(StowError::Validation(format!(
            "file type not allowed: {mime_type}"
        )))
    }
}

/// Check a share duration and convert it.
pub fn validate_duration(minutes: i64, config: &TempConfig) -> Result<Duration> {
    if minutes < config.min_duration_minutes || minutes > config.max_duration_minutes {
        return Err(StowError::Validation(format!(
            "duration must be between {} and {} minutes",
            config.min_duration_minutes, config.max_duration_minutes
        )));
    }
    Ok(Duration::minutes(minutes))
}

/// Object key for new content of `owner`: `{owner}/{uuid}-{file_name}`.
pub fn blob_key(owner: Uuid, file_name: &str) -> String {
    format!("{owner}/{}-{file_name}", Uuid::new_v4())
}

/// Object key of an owner's profile image.
pub fn profile_image_key(owner: Uuid) -> String {
    format!("{owner}/profile")
}

/// Check that a stored locator may be removed on behalf of `owner`.
///
/// The bucket must be allowed and the key must live under `{owner}/`.
/// Returns the reason on failure.
pub fn check_blob_locator(
    locator: &BlobLocator,
    owner: Uuid,
    storage: &StorageConfig,
) -> std::result::Result<(), String> {
    if !storage.is_allowed_bucket(&locator.bucket) {
        return Err(format!("bucket '{}' is not allowed", locator.bucket));
    }

    let prefix = format!("{owner}/");
    let Some(rest) = locator.key.strip_prefix(&prefix) else {
        return Err(format!("key '{}' is outside the owner's prefix", locator.key));
    };
    if rest.is_empty() || rest.split('/').any(|segment| segment == "..") {
        return Err(format!("key '{}' is not a valid object path", locator.key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert_eq!(parse_id(&format!("  {id} ")).unwrap(), id);
        assert!(parse_id(&id.simple().to_string()).is_err());
        assert!(parse_id("not-a-uuid").is_err());
        assert!(parse_id("").is_err());
    }

    #[test]
    fn test_validate_node_name() {
        assert_eq!(validate_node_name("  Photos ").unwrap(), "Photos");
        assert!(validate_node_name("   ").is_err());
        assert!(validate_node_name(&"a".repeat(255)).is_ok());
        assert!(validate_node_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_normalize_description() {
        assert_eq!(normalize_description(None).unwrap(), None);
        assert_eq!(normalize_description(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_description(Some(" notes ")).unwrap(),
            Some("notes".to_string())
        );
        assert!(normalize_description(Some(&"x".repeat(1001))).is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("my file (1).txt").unwrap(), "my_file__1_.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "._._etc_passwd");
        assert_eq!(sanitize_file_name("a...b").unwrap(), "a.b");
        assert_eq!(sanitize_file_name("日本.txt").unwrap(), "__.txt");
        assert_eq!(sanitize_file_name(&"x".repeat(300)).unwrap().len(), 255);
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("...").is_err());
    }

    #[test]
    fn test_validate_content_size() {
        assert!(validate_content_size(0, 100).is_err());
        assert!(validate_content_size(100, 100).is_ok());
        assert!(validate_content_size(101, 100).is_err());
    }

    #[test]
    fn test_validate_mime_type() {
        assert!(validate_mime_type("image/png").is_ok());
        assert!(validate_mime_type("application/x-msdownload").is_err());
    }

    #[test]
    fn test_validate_duration() {
        let config = TempConfig::default();
        assert_eq!(validate_duration(60, &config).unwrap(), Duration::minutes(60));
        assert!(validate_duration(0, &config).is_err());
        assert!(validate_duration(10080, &config).is_ok());
        assert!(validate_duration(10081, &config).is_err());
    }

    #[test]
    fn test_blob_key_has_owner_prefix() {
        let owner = Uuid::new_v4();
        let key = blob_key(owner, "a.txt");
        assert!(key.starts_with(&format!("{owner}/")));
        assert!(key.ends_with("-a.txt"));
    }

    #[test]
    fn test_check_blob_locator() {
        let storage = StorageConfig::default();
        let owner = Uuid::new_v4();

        let ok = BlobLocator::new("user_files", format!("{owner}/x-a.txt"));
        assert!(check_blob_locator(&ok, owner, &storage).is_ok());

        let bad_bucket = BlobLocator::new("other", format!("{owner}/a"));
        assert!(check_blob_locator(&bad_bucket, owner, &storage).is_err());

        let foreign = BlobLocator::new("user_files", format!("{}/a", Uuid::new_v4()));
        assert!(check_blob_locator(&foreign, owner, &storage).is_err());

        let traversal = BlobLocator::new("user_files", format!("{owner}/../victim/a"));
        assert!(check_blob_locator(&traversal, owner, &storage).is_err());

        let bare = BlobLocator::new("user_files", format!("{owner}/"));
        assert!(check_blob_locator(&bare, owner, &storage).is_err());
    }
}

//! Database schema and migrations for Stowbox.
//!
//! Migrations are applied sequentially when the database is first opened or
//! upgraded. IDs are stored as hyphenated UUID text and timestamps as Unix
//! milliseconds so that range comparisons stay numeric.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Profiles with the denormalized quota counter
    r#"
CREATE TABLE profiles (
    id              TEXT PRIMARY KEY,            -- owner UUID
    storage_used    INTEGER NOT NULL DEFAULT 0,  -- bytes
    storage_limit   INTEGER,                     -- NULL = unlimited
    created_at      INTEGER NOT NULL
);
"#,
    // v2: Long-term storage tree (self-referencing, parent not enforced)
    r#"
CREATE TABLE storage_nodes (
    id           TEXT PRIMARY KEY,
    owner_id     TEXT NOT NULL,
    kind         TEXT NOT NULL CHECK (kind IN ('file', 'folder')),
    parent_id    TEXT,                      -- NULL = root of owner's tree
    name         TEXT NOT NULL,
    description  TEXT,
    bucket       TEXT,
    bucket_path  TEXT,
    mime_type    TEXT,
    byte_size    INTEGER NOT NULL DEFAULT 0,
    created_at   INTEGER NOT NULL
);

CREATE INDEX idx_storage_nodes_owner_parent ON storage_nodes(owner_id, parent_id);
CREATE INDEX idx_storage_nodes_owner_kind ON storage_nodes(owner_id, kind);
"#,
    // v3: Temporary shares (blob-backed files or inline text)
    r#"
CREATE TABLE temp_storage (
    id            TEXT PRIMARY KEY,
    owner_id      TEXT NOT NULL,
    file_name     TEXT NOT NULL,
    mime_type     TEXT NOT NULL,
    byte_size     INTEGER NOT NULL DEFAULT 0,
    bucket        TEXT,                     -- set when stored in the blob store
    bucket_path   TEXT,
    text_content  TEXT,                     -- set for inline text shares
    expires_at    INTEGER NOT NULL,
    created_at    INTEGER NOT NULL
);

CREATE INDEX idx_temp_storage_owner_expires ON temp_storage(owner_id, expires_at);
"#,
];

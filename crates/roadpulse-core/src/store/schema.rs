//! Document store schema.
//!
//! - `documents` holds one JSON body per `(collection, id)`
//! - `store_meta` records the schema version and creation time

/// Migration v1: documents table plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL CHECK (length(trim(collection)) > 0),
    id TEXT NOT NULL CHECK (length(trim(id)) > 0),
    body TEXT NOT NULL CHECK (json_valid(body) AND json_type(body) = 'object'),
    updated_at_us INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, created_at_us) VALUES (1, 1, 0);
";

/// Migration v2: expression indexes for the time-window and ranking queries.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_documents_timestamp
    ON documents(collection, json_extract(body, '$.timestamp'));

CREATE INDEX IF NOT EXISTS idx_documents_karma
    ON documents(collection, json_extract(body, '$.karmaPoints') DESC);

CREATE INDEX IF NOT EXISTS idx_documents_updated
    ON documents(collection, updated_at_us DESC);
";

/// Indexes expected after all migrations.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_documents_timestamp",
    "idx_documents_karma",
    "idx_documents_updated",
];

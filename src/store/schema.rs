//! SQL DDL for the vector store.
//!
//! `collections` names each namespace and pins its embedding dimension, `records`
//! holds documents and metadata, and every collection gets its own `vec0` table
//! once its first embedding fixes the dimension. All DDL is idempotent.

use rusqlite::Connection;

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    dimension INTEGER CHECK(dimension IS NULL OR dimension > 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    document TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    PRIMARY KEY (collection_id, id)
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Name of the `vec0` table backing a collection.
pub fn vec_table_name(collection_id: i64) -> String {
    format!("vec_collection_{collection_id}")
}

/// DDL for a collection's `vec0` table.
pub fn vec_table_sql(collection_id: i64, dimension: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(\n    id TEXT PRIMARY KEY,\n    embedding FLOAT[{dimension}]\n);",
        vec_table_name(collection_id)
    )
}

//! Database schema creation and evolution.
//!
//! All migrations are structural: "does this table/column/index already
//! exist?" rather than a linear version counter, so running them on every
//! startup is idempotent and independent structural changes can accumulate
//! over the lifetime of a store. Two styles are used:
//!
//! - additive `ensure_column` for simple widenings;
//! - rename-old/create-new/copy-rows/drop-old inside a single transaction
//!   for structural changes (e.g. moving a unique constraint from `url` to
//!   `(collection_id, url)` on the sources registry), so a crash leaves
//!   either the old or the fully-new shape, never a hybrid.

use rusqlite::Connection;
use tracing::info;

use lore_core::error::LoreError;

/// Run all schema migrations. Safe to call on every startup.
pub fn run_migrations(conn: &Connection) -> Result<(), LoreError> {
    ensure_schema(conn)?;
    ensure_columns(conn)?;
    migrate_sources_unique_key(conn)?;
    Ok(())
}

/// Create every required table and index if missing. Never touches
/// existing rows.
fn ensure_schema(conn: &Connection) -> Result<(), LoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS store_meta (
            key     TEXT PRIMARY KEY NOT NULL,
            value   TEXT
        );

        CREATE TABLE IF NOT EXISTS documents (
            id            TEXT PRIMARY KEY NOT NULL,
            title         TEXT NOT NULL DEFAULT '',
            occurred_at   TEXT NOT NULL DEFAULT '',
            source_group  TEXT NOT NULL DEFAULT '',
            source_url    TEXT NOT NULL DEFAULT '',
            raw_text      TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id     TEXT PRIMARY KEY NOT NULL,
            document_id  TEXT NOT NULL,
            chunk_index  INTEGER NOT NULL DEFAULT 0,
            speaker      TEXT NOT NULL DEFAULT '',
            start_time   REAL,
            end_time     REAL,
            text         TEXT NOT NULL DEFAULT '',
            token_count  INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (document_id) REFERENCES documents(id)
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_document
            ON chunks (document_id);

        CREATE INDEX IF NOT EXISTS idx_documents_occurred
            ON documents (occurred_at);

        -- Fallback-backend embedding side table; the rebuild source of truth.
        CREATE TABLE IF NOT EXISTS chunk_embeddings (
            chunk_id   TEXT PRIMARY KEY NOT NULL,
            embedding  BLOB
        );

        CREATE TABLE IF NOT EXISTS collections (
            id           TEXT PRIMARY KEY NOT NULL,
            title        TEXT NOT NULL DEFAULT '',
            description  TEXT NOT NULL DEFAULT '',
            kind         TEXT NOT NULL DEFAULT 'custom',
            created_at   TEXT NOT NULL DEFAULT '',
            updated_at   TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS knowledge_docs (
            doc_id             TEXT PRIMARY KEY NOT NULL,
            collection_id      TEXT NOT NULL DEFAULT '',
            source_type        TEXT NOT NULL DEFAULT '',
            source_url         TEXT NOT NULL DEFAULT '',
            source_group       TEXT NOT NULL DEFAULT '',
            title              TEXT NOT NULL DEFAULT '',
            content_hash       TEXT NOT NULL DEFAULT '',
            simhash            TEXT NOT NULL DEFAULT '',
            published_at       TEXT NOT NULL DEFAULT '',
            retrieved_at       TEXT NOT NULL DEFAULT '',
            freshness_score    REAL NOT NULL DEFAULT 0.0,
            reliability_score  REAL NOT NULL DEFAULT 0.0,
            stale              INTEGER NOT NULL DEFAULT 0,
            expired            INTEGER NOT NULL DEFAULT 0,
            stale_reason       TEXT NOT NULL DEFAULT '',
            reviewed_at        TEXT NOT NULL DEFAULT '',
            tags_json          TEXT NOT NULL DEFAULT '[]',
            metadata_json      TEXT NOT NULL DEFAULT '{}',
            created_at         TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_knowledge_collection
            ON knowledge_docs (collection_id);

        CREATE INDEX IF NOT EXISTS idx_knowledge_hash
            ON knowledge_docs (content_hash);

        CREATE TABLE IF NOT EXISTS sources (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id    TEXT,
            url              TEXT,
            tags_json        TEXT,
            enabled          INTEGER,
            created_at       TEXT,
            updated_at       TEXT,
            last_crawled_at  TEXT,
            last_status      TEXT,
            last_error       TEXT,
            UNIQUE(collection_id, url)
        );

        CREATE INDEX IF NOT EXISTS idx_sources_enabled
            ON sources (enabled);
        ",
    )
    .map_err(|e| LoreError::Storage(format!("Failed to create schema: {}", e)))?;

    Ok(())
}

/// Additive column migrations for long-lived stores.
fn ensure_columns(conn: &Connection) -> Result<(), LoreError> {
    ensure_column(conn, "documents", "source_group", "TEXT NOT NULL DEFAULT ''")?;
    ensure_column(conn, "knowledge_docs", "stale_reason", "TEXT NOT NULL DEFAULT ''")?;
    ensure_column(conn, "knowledge_docs", "reviewed_at", "TEXT NOT NULL DEFAULT ''")?;
    ensure_column(conn, "sources", "last_crawled_at", "TEXT")?;
    ensure_column(conn, "sources", "last_status", "TEXT")?;
    ensure_column(conn, "sources", "last_error", "TEXT")?;
    Ok(())
}

/// Add a column if the table does not already have it.
pub fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), LoreError> {
    if has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table, column, definition
    ))
    .map_err(|e| {
        LoreError::Storage(format!("Failed to add column {}.{}: {}", table, column, e))
    })?;
    info!("Added column {}.{}", table, column);
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, LoreError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| LoreError::Storage(format!("table_info({}): {}", table, e)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    for name in names {
        let name = name.map_err(|e| LoreError::Storage(e.to_string()))?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Check whether `table` carries a unique index over exactly `columns`,
/// in order.
pub fn has_unique_index(
    conn: &Connection,
    table: &str,
    columns: &[&str],
) -> Result<bool, LoreError> {
    let mut list = conn
        .prepare(&format!("PRAGMA index_list({})", table))
        .map_err(|e| LoreError::Storage(format!("index_list({}): {}", table, e)))?;
    // (seq, name, unique, origin, partial)
    let indexes = list
        .query_map([], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })
        .map_err(|e| LoreError::Storage(e.to_string()))?;

    for index in indexes {
        let (name, unique) = index.map_err(|e| LoreError::Storage(e.to_string()))?;
        if unique == 0 {
            continue;
        }
        let mut info = conn
            .prepare(&format!("PRAGMA index_info({})", name))
            .map_err(|e| LoreError::Storage(format!("index_info({}): {}", name, e)))?;
        let cols: Vec<String> = info
            .query_map([], |row| row.get::<_, String>(2))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        if cols.len() == columns.len() && cols.iter().zip(columns).all(|(a, b)| a == b) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Rebuild the sources registry when it still carries the legacy
/// single-column `UNIQUE(url)` constraint.
///
/// Runs rename/create/copy/drop inside one transaction; rows with a NULL
/// collection are assigned to 'default' during the copy.
fn migrate_sources_unique_key(conn: &Connection) -> Result<(), LoreError> {
    let has_composite = has_unique_index(conn, "sources", &["collection_id", "url"])?;
    let has_legacy = has_unique_index(conn, "sources", &["url"])?;
    if has_composite || !has_legacy {
        return Ok(());
    }

    conn.execute_batch(
        "
        BEGIN;
        ALTER TABLE sources RENAME TO sources_old;
        CREATE TABLE sources (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id    TEXT,
            url              TEXT,
            tags_json        TEXT,
            enabled          INTEGER,
            created_at       TEXT,
            updated_at       TEXT,
            last_crawled_at  TEXT,
            last_status      TEXT,
            last_error       TEXT,
            UNIQUE(collection_id, url)
        );
        INSERT INTO sources (id, collection_id, url, tags_json, enabled, created_at,
                             updated_at, last_crawled_at, last_status, last_error)
            SELECT id, COALESCE(collection_id, 'default'), url, tags_json, enabled,
                   created_at, updated_at, last_crawled_at, last_status, last_error
            FROM sources_old;
        DROP TABLE sources_old;
        CREATE INDEX IF NOT EXISTS idx_sources_enabled ON sources (enabled);
        COMMIT;
        ",
    )
    .map_err(|e| {
        // execute_batch rolls back the open transaction on error.
        LoreError::Storage(format!("Failed to migrate sources unique key: {}", e))
    })?;

    info!("Migrated sources registry to UNIQUE(collection_id, url)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO documents (id, title, created_at) VALUES ('doc:1', 'Kickoff', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        // Running again must not destroy rows.
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        for table in [
            "store_meta",
            "documents",
            "chunks",
            "chunk_embeddings",
            "collections",
            "knowledge_docs",
            "sources",
        ] {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", table),
                    [],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 0, "table {} should exist and be empty", table);
        }
    }

    #[test]
    fn test_ensure_column_adds_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        ensure_column(&conn, "documents", "extra", "TEXT").unwrap();
        // Second call is a no-op rather than an error.
        ensure_column(&conn, "documents", "extra", "TEXT").unwrap();

        conn.execute("INSERT INTO documents (id, extra) VALUES ('d', 'x')", [])
            .unwrap();
    }

    #[test]
    fn test_sources_unique_key_migration() {
        let conn = open_test_conn();
        // Simulate a legacy store with UNIQUE(url).
        conn.execute_batch(
            "CREATE TABLE sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id TEXT,
                url TEXT UNIQUE,
                tags_json TEXT,
                enabled INTEGER,
                created_at TEXT,
                updated_at TEXT
            );
            INSERT INTO sources (url, enabled, created_at) VALUES ('https://a.example', 1, '2024-01-01');
            INSERT INTO sources (collection_id, url, enabled, created_at) VALUES ('finance', 'https://b.example', 1, '2024-01-02');",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        assert!(has_unique_index(&conn, "sources", &["collection_id", "url"]).unwrap());
        assert!(!has_unique_index(&conn, "sources", &["url"]).unwrap());

        // Rows survive; NULL collection backfills to 'default'.
        let coll: String = conn
            .query_row(
                "SELECT collection_id FROM sources WHERE url = 'https://a.example'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(coll, "default");

        // Same url may now appear under two collections.
        conn.execute(
            "INSERT INTO sources (collection_id, url) VALUES ('macro', 'https://a.example')",
            [],
        )
        .unwrap();

        // And the migration does not run twice.
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_has_unique_index_on_fresh_schema() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        assert!(has_unique_index(&conn, "sources", &["collection_id", "url"]).unwrap());
        assert!(!has_unique_index(&conn, "chunks", &["document_id"]).unwrap());
    }
}

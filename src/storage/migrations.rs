//! Versioned schema migrations.
//!
//! Each pending migration runs in its own transaction and is recorded in
//! `schema_migrations`.

use rusqlite::{params, Connection};

use super::{StorageError, StorageResult};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

const INIT_SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "initial schema",
            sql: INIT_SCHEMA,
        },
        Migration {
            version: 2,
            name: "due date index",
            sql: "CREATE INDEX IF NOT EXISTS idx_items_user_due ON items(user_id, due_date);",
        },
    ]
}

fn ensure_migrations_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    Ok(())
}

pub fn get_current_version(conn: &Connection) -> StorageResult<i32> {
    ensure_migrations_table(conn)?;
    let version: Option<i32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded version.
pub fn run_migrations(conn: &mut Connection) -> StorageResult<i32> {
    let current = get_current_version(conn)?;

    for migration in get_migrations()
        .into_iter()
        .filter(|m| m.version > current)
    {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            StorageError::Migration(format!(
                "v{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
    }

    get_current_version(conn)
}

//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one transforms the schema from version N to
//! N+1 and is recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }
        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: tree geometry, nodes and membership.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Geometry the tree was built with; a single row
        CREATE TABLE tree_config (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            thresh_mult INTEGER NOT NULL,
            bit_quantum INTEGER NOT NULL,
            mbar INTEGER NOT NULL
        );

        -- Prefix-tree nodes keyed by bit path
        CREATE TABLE ptree_nodes (
            key_bits INTEGER NOT NULL,        -- path length in bits
            key_bytes BLOB NOT NULL,          -- packed path, MSB first
            svalues BLOB NOT NULL,            -- CBOR array of 17-byte LE elements
            size INTEGER NOT NULL,            -- elements at or below this node
            leaf INTEGER NOT NULL,            -- 1 = leaf, 0 = interior
            elements BLOB NOT NULL,           -- CBOR array, empty unless leaf
            PRIMARY KEY (key_bits, key_bytes)
        );

        -- Every element currently in the tree
        CREATE TABLE ptree_elements (
            element BLOB PRIMARY KEY          -- 17-byte LE element
        );
        "#,
    )?;
    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

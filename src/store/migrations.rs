use rusqlite::{Connection, Transaction};

use super::{StoreError, StoreResult};

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Bring the database schema up to [`CURRENT_SCHEMA_VERSION`]
pub fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| StoreError::from_sqlite("failed to read user_version pragma", e))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Fatal(format!(
            "database version ({}) is newer than supported schema ({})",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| StoreError::from_sqlite("failed to open migration transaction", e))?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .map_err(|e| StoreError::from_sqlite("failed to update user_version pragma", e))?;
    tx.commit()
        .map_err(|e| StoreError::from_sqlite("failed to commit migrations", e))?;

    log::info!("Database schema migrated to version {}", CURRENT_SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> StoreResult<()> {
    match version {
        1 => tx
            .execute_batch(include_str!("schemas/schema_v1.sql"))
            .map_err(|e| StoreError::from_sqlite("failed to execute schema_v1.sql", e)),
        _ => Err(StoreError::Fatal(format!(
            "unknown migration target version: {}",
            version
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('ProjectDB', 'IngestDB')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_newer_database_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(run_migrations(&mut conn), Err(StoreError::Fatal(_))));
    }
}

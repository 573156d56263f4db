use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use tracing::info;

use crate::error::DeskError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Create the database directory and pool, then make sure the schema exists.
pub fn open(db_path: &Path) -> Result<DbPool, DeskError> {
    if let Some(dir) = db_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .map_err(|e| DeskError::Database(format!("Failed to create db dir: {e}")))?;
        }
    }

    let pool = create_pool(db_path)?;
    let conn = pool.get()?;
    super::schema::initialize_schema(&conn)?;

    info!("Database ready at {:?}", db_path);
    Ok(pool)
}

fn create_pool(db_path: &Path) -> Result<DbPool, DeskError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

    let pool = Pool::builder().max_size(4).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;",
    )?;

    Ok(pool)
}

/// Single-connection in-memory database (for testing)
#[cfg(test)]
pub fn in_memory() -> DbPool {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create in-memory pool");

    let conn = pool.get().expect("Failed to get connection");
    super::schema::initialize_schema(&conn).expect("Failed to initialize schema");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_with_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("desk.db");

        let pool = open(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("desk.db");

        {
            let pool = open(&db_path).unwrap();
            let conn = pool.get().unwrap();
            conn.execute(
                "INSERT INTO conversations (subject, subject_key, participant, created_at, updated_at)
                 VALUES ('Trip', 'trip', 'mary@parents.example', 0, 0)",
                [],
            )
            .unwrap();
        }

        let pool = open(&db_path).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use crate::errors::ScanlineError;

pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ScanlineError> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| ScanlineError::Database(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| ScanlineError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.initialize()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, ScanlineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScanlineError::Database(format!("Failed to open in-memory db: {}", e)))?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<(), ScanlineError> {
        let conn = self.lock()?;
        conn.execute_batch(super::schema::CREATE_TABLES)
            .map_err(|e| ScanlineError::Database(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, ScanlineError> {
        self.conn.lock()
            .map_err(|_| ScanlineError::Database("Connection lock poisoned".into()))
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self { conn: self.conn.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/scanline.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
        assert_eq!(db.current_sequence().unwrap(), 0);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanline.db");
        let path = path.to_str().unwrap();
        {
            let db = Database::new(path).unwrap();
            let conn = db.lock().unwrap();
            super::super::sequence::next_sequence(&conn).unwrap();
        }
        let db = Database::new(path).unwrap();
        assert_eq!(db.current_sequence().unwrap(), 1);
    }
}

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use crate::errors::ScanlineError;
use super::records;
use super::schema::keys;
use super::Database;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SequenceDoc {
    value: i64,
}

/// Increment the status sequence and return the new value. Call inside the
/// transaction that stamps the finding set.
pub(crate) fn next_sequence(conn: &Connection) -> Result<i64, ScanlineError> {
    let mut doc: SequenceDoc = records::get(conn, keys::SEQUENCE_PK, keys::SEQUENCE_SK)?
        .unwrap_or_default();
    doc.value += 1;
    records::put(conn, keys::SEQUENCE_PK, keys::SEQUENCE_SK, None, &doc, None)?;
    Ok(doc.value)
}

impl Database {
    pub fn current_sequence(&self) -> Result<i64, ScanlineError> {
        let conn = self.lock()?;
        let doc: Option<SequenceDoc> = records::get(&conn, keys::SEQUENCE_PK, keys::SEQUENCE_SK)?;
        Ok(doc.map(|d| d.value).unwrap_or(0))
    }
}

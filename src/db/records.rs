use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::errors::ScanlineError;

pub(crate) struct SecondaryKey {
    pub pk2: String,
    pub sk2: String,
}

/// Upsert keyed by `(pk, sk)`. Helpers here take a plain `&Connection` so
/// they compose inside a transaction.
pub(crate) fn put<T: Serialize>(
    conn: &Connection,
    pk: &str,
    sk: &str,
    secondary: Option<SecondaryKey>,
    doc: &T,
    expires_at: Option<DateTime<Utc>>,
) -> Result<(), ScanlineError> {
    let doc = serde_json::to_string(doc)?;
    let (pk2, sk2) = match secondary {
        Some(key) => (Some(key.pk2), Some(key.sk2)),
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO records (pk, sk, pk2, sk2, doc, expires_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(pk, sk) DO UPDATE SET pk2 = excluded.pk2, sk2 = excluded.sk2, doc = excluded.doc, expires_at = excluded.expires_at",
        rusqlite::params![pk, sk, pk2, sk2, doc, expires_at.map(|t| t.timestamp())],
    ).map_err(|e| ScanlineError::Database(format!("Failed to write {}/{}: {}", pk, sk, e)))?;
    Ok(())
}

pub(crate) fn get<T: DeserializeOwned>(conn: &Connection, pk: &str, sk: &str) -> Result<Option<T>, ScanlineError> {
    let doc: Option<String> = conn
        .query_row(
            "SELECT doc FROM records WHERE pk = ?1 AND sk = ?2",
            rusqlite::params![pk, sk],
            |row: &rusqlite::Row| row.get(0),
        )
        .optional()
        .map_err(|e| ScanlineError::Database(format!("Query error: {}", e)))?;

    match doc {
        Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
        None => Ok(None),
    }
}

/// All records in one partition, ordered by sort key.
pub(crate) fn query_partition<T: DeserializeOwned>(conn: &Connection, pk: &str) -> Result<Vec<T>, ScanlineError> {
    collect(
        conn,
        "SELECT doc FROM records WHERE pk = ?1 ORDER BY sk",
        rusqlite::params![pk],
    )
}

/// All records in one secondary-index partition, ordered by secondary sort key.
pub(crate) fn query_index<T: DeserializeOwned>(conn: &Connection, pk2: &str) -> Result<Vec<T>, ScanlineError> {
    collect(
        conn,
        "SELECT doc FROM records WHERE pk2 = ?1 ORDER BY sk2",
        rusqlite::params![pk2],
    )
}

/// Records whose partition key starts with `prefix`.
pub(crate) fn query_prefix<T: DeserializeOwned>(conn: &Connection, prefix: &str) -> Result<Vec<T>, ScanlineError> {
    // half-open range over the primary key
    let upper = format!("{}\u{10FFFF}", prefix);
    collect(
        conn,
        "SELECT doc FROM records WHERE pk >= ?1 AND pk < ?2 ORDER BY pk, sk",
        rusqlite::params![prefix, upper],
    )
}

/// Count records per secondary partition for every pk2 starting with `prefix`.
pub(crate) fn count_index_prefix(conn: &Connection, prefix: &str) -> Result<Vec<(String, usize)>, ScanlineError> {
    let upper = format!("{}\u{10FFFF}", prefix);
    let mut stmt = conn.prepare(
        "SELECT pk2, COUNT(*) FROM records WHERE pk2 >= ?1 AND pk2 < ?2 GROUP BY pk2 ORDER BY pk2"
    ).map_err(|e| ScanlineError::Database(format!("Query failed: {}", e)))?;

    let rows = stmt.query_map(rusqlite::params![prefix, upper], |row: &rusqlite::Row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    }).map_err(|e| ScanlineError::Database(format!("Query error: {}", e)))?;

    let mut counts = Vec::new();
    for row in rows {
        let (pk2, count) = row.map_err(|e| ScanlineError::Database(format!("Row error: {}", e)))?;
        counts.push((pk2[prefix.len()..].to_string(), count as usize));
    }
    Ok(counts)
}

pub(crate) fn delete(conn: &Connection, pk: &str, sk: &str) -> Result<bool, ScanlineError> {
    let affected = conn.execute(
        "DELETE FROM records WHERE pk = ?1 AND sk = ?2",
        rusqlite::params![pk, sk],
    ).map_err(|e| ScanlineError::Database(format!("Delete failed: {}", e)))?;
    Ok(affected > 0)
}

pub(crate) fn delete_partition(conn: &Connection, pk: &str) -> Result<usize, ScanlineError> {
    conn.execute("DELETE FROM records WHERE pk = ?1", rusqlite::params![pk])
        .map_err(|e| ScanlineError::Database(format!("Delete failed: {}", e)))
}

fn collect<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<T>, ScanlineError> {
    let mut stmt = conn.prepare(sql)
        .map_err(|e| ScanlineError::Database(format!("Query failed: {}", e)))?;

    let rows = stmt.query_map(params, |row: &rusqlite::Row| row.get::<_, String>(0))
        .map_err(|e| ScanlineError::Database(format!("Query error: {}", e)))?;

    let mut results = Vec::new();
    for row in rows {
        let doc = row.map_err(|e| ScanlineError::Database(format!("Row error: {}", e)))?;
        results.push(serde_json::from_str(&doc)?);
    }
    Ok(results)
}

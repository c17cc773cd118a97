//! Declares the versioned table and its sync-metadata companion, and guards
//! against re-opening a table under a conflicting column declaration.

use duckdb::Connection;

use crate::error::{Result, ScdError};
use crate::sql::qi;

/// Create the versioned table and its `_sync_metadata` companion if they do
/// not already exist; if the versioned table already exists, verify its
/// column set agrees with `key_cols`/`value_cols` (order included).
pub fn ensure_schema(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
) -> Result<()> {
    if let Some(existing) = existing_columns(conn, table_name)? {
        let declared: Vec<String> = key_cols
            .iter()
            .chain(value_cols.iter())
            .cloned()
            .chain(["valid_from".to_string(), "valid_to".to_string()])
            .collect();
        if existing != declared {
            return Err(ScdError::SchemaConflict(format!(
                "table {table_name} exists with columns {existing:?}, declared columns are {declared:?}"
            )));
        }
        return Ok(());
    }

    let key_defs = key_cols
        .iter()
        .map(|k| format!("{} VARCHAR NOT NULL", qi(k)))
        .collect::<Vec<_>>()
        .join(", ");
    let value_defs = value_cols
        .iter()
        .map(|v| format!("{} VARCHAR", qi(v)))
        .collect::<Vec<_>>()
        .join(", ");
    let pk_cols = key_cols
        .iter()
        .map(|k| qi(k))
        .chain(std::iter::once("valid_from".to_string()))
        .collect::<Vec<_>>()
        .join(", ");

    let value_defs_sql = if value_defs.is_empty() {
        String::new()
    } else {
        format!("{value_defs}, ")
    };

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
            {key_defs}, \
            {value_defs_sql}\
            valid_from DATE NOT NULL, \
            valid_to DATE, \
            PRIMARY KEY ({pk_cols}));\
         CREATE TABLE IF NOT EXISTS {meta} (\
            as_of_date DATE PRIMARY KEY, \
            synced_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
            row_count INTEGER);",
        table = qi(table_name),
        meta = qi(&metadata_table_name(table_name)),
    ))?;

    Ok(())
}

pub fn metadata_table_name(table_name: &str) -> String {
    format!("{table_name}_sync_metadata")
}

/// Returns the existing column names (in declared order), or `None` if the
/// table does not yet exist.
fn existing_columns(conn: &Connection, table_name: &str) -> Result<Option<Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = ? ORDER BY ordinal_position",
    )?;
    let mut rows = stmt.query([table_name])?;
    let mut cols = Vec::new();
    while let Some(row) = rows.next()? {
        cols.push(row.get::<_, String>(0)?);
    }
    if cols.is_empty() {
        Ok(None)
    } else {
        Ok(Some(cols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn creates_both_tables() {
        let conn = conn();
        ensure_schema(
            &conn,
            "items",
            &["id".to_string()],
            &["name".to_string(), "price".to_string()],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name IN ('items', 'items_sync_metadata')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn is_idempotent() {
        let conn = conn();
        let keys = vec!["id".to_string()];
        let values = vec!["name".to_string()];
        ensure_schema(&conn, "items", &keys, &values).unwrap();
        ensure_schema(&conn, "items", &keys, &values).unwrap();
    }

    #[test]
    fn detects_schema_conflict() {
        let conn = conn();
        ensure_schema(&conn, "items", &["id".to_string()], &["name".to_string()]).unwrap();
        let err = ensure_schema(
            &conn,
            "items",
            &["id".to_string()],
            &["name".to_string(), "price".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, ScdError::SchemaConflict(_)));
    }
}

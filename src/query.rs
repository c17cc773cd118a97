//! Point-in-time snapshot reconstruction and small observability queries.

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use duckdb::Connection;

use crate::error::Result;
use crate::schema::metadata_table_name;
use crate::sql::qi;

/// Reconstruct the snapshot as of `date`: every row whose interval covers
/// it, projected to the declared key/value columns in declared order.
pub fn snapshot(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<RecordBatch> {
    let cols = key_cols
        .iter()
        .chain(value_cols.iter())
        .map(|c| qi(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut stmt = conn.prepare(&format!(
        "SELECT {cols} FROM {table} \
         WHERE valid_from <= DATE '{date}' AND (valid_to > DATE '{date}' OR valid_to IS NULL)",
        table = qi(table_name),
    ))?;

    let arrow_result = stmt.query_arrow([])?;
    let schema = arrow_result.get_schema();
    let batches: Vec<RecordBatch> = arrow_result.collect();
    Ok(concat_batches(&schema, &batches)?)
}

/// All `as_of_date`s this table has successfully synced, ascending.
pub fn synced_dates(conn: &Connection, table_name: &str) -> Result<Vec<NaiveDate>> {
    let meta = metadata_table_name(table_name);
    let mut stmt = conn.prepare(&format!(
        "SELECT as_of_date FROM {meta} ORDER BY as_of_date",
        meta = qi(&meta),
    ))?;
    let mut rows = stmt.query([])?;
    let mut dates = Vec::new();
    while let Some(row) = rows.next()? {
        dates.push(row.get::<_, NaiveDate>(0)?);
    }
    Ok(dates)
}

/// Total row count of the versioned table (every historical version, not
/// just the latest).
pub fn record_count(conn: &Connection, table_name: &str) -> Result<i64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {table}", table = qi(table_name)),
        [],
        |r| r.get(0),
    )
    .map_err(Into::into)
}

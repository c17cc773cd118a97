//! Class 6: a key with a covering row is absent from the incoming
//! snapshot. Closes the covering row at `date`, then re-opens a new
//! interval if the key was already confirmed present at a later
//! already-synced date within the original row's span — out-of-order sync
//! must not falsify a historical snapshot that already attested presence.

use chrono::NaiveDate;
use duckdb::Connection;

use crate::error::Result;
use crate::schema::metadata_table_name;
use crate::sql::qi;

/// Close covering rows whose key is absent from `_incoming`, capturing the
/// deletion set first, then re-open where a later synced date demands it.
/// Returns the number of rows closed (the deletion count).
pub fn reconcile(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<i64> {
    let covering_predicate = format!(
        "sm.valid_from <= DATE '{date}' AND (sm.valid_to > DATE '{date}' OR sm.valid_to IS NULL)"
    );
    let not_in_incoming = format!(
        "NOT EXISTS (SELECT 1 FROM _incoming i WHERE {})",
        stored_incoming_key_eq(key_cols)
    );

    let select_cols = key_cols
        .iter()
        .chain(value_cols.iter())
        .map(|c| format!("sm.{col} AS {col}", col = qi(c)))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute_batch(&format!(
        "CREATE TEMP TABLE _deletions AS \
         SELECT {select_cols}, sm.valid_from AS valid_from, sm.valid_to AS valid_to \
         FROM {table} sm WHERE {covering_predicate} AND {not_in_incoming}",
        table = qi(table_name),
    ))?;

    let n: i64 = conn.query_row("SELECT COUNT(*) FROM _deletions", [], |r| r.get(0))?;
    if n == 0 {
        return Ok(0);
    }

    conn.execute_batch(&format!(
        "UPDATE {table} sm SET valid_to = DATE '{date}' WHERE {covering_predicate} AND {not_in_incoming}",
        table = qi(table_name),
    ))?;

    reopen_where_later_presence_confirmed(conn, table_name, key_cols, value_cols, date)?;

    Ok(n)
}

fn reopen_where_later_presence_confirmed(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<()> {
    let meta = metadata_table_name(table_name);
    let insert_cols = key_cols
        .iter()
        .chain(value_cols.iter())
        .map(|c| qi(c))
        .chain([qi("valid_from"), qi("valid_to")])
        .collect::<Vec<_>>()
        .join(", ");
    let select_cols = key_cols
        .iter()
        .chain(value_cols.iter())
        .map(|c| format!("d.{col}", col = qi(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let span_predicate = "(d.valid_to IS NULL OR sm.as_of_date < d.valid_to)";
    let span_predicate2 = "(d.valid_to IS NULL OR sm2.as_of_date < d.valid_to)";
    let key_eq_stored_deletions = stored_alias_key_eq("s", "d", key_cols);

    conn.execute_batch(&format!(
        "INSERT INTO {table} ({insert_cols}) \
         SELECT {select_cols}, sm.as_of_date, d.valid_to \
         FROM _deletions d \
         JOIN {meta} sm ON sm.as_of_date > DATE '{date}' AND {span_predicate} \
         WHERE NOT EXISTS (\
             SELECT 1 FROM {table} s WHERE {key_eq_stored_deletions} AND s.valid_from = sm.as_of_date) \
           AND sm.as_of_date = (\
             SELECT MIN(sm2.as_of_date) FROM {meta} sm2 \
             WHERE sm2.as_of_date > DATE '{date}' AND {span_predicate2})",
        table = qi(table_name),
        meta = qi(&meta),
    ))?;

    Ok(())
}

fn stored_incoming_key_eq(key_cols: &[String]) -> String {
    key_cols
        .iter()
        .map(|k| format!("sm.{sk} = i.{ik}", sk = qi(k), ik = qi(&format!("i_{k}"))))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn stored_alias_key_eq(left: &str, right: &str, key_cols: &[String]) -> String {
    key_cols
        .iter()
        .map(|k| format!("{left}.{col} = {right}.{col}", col = qi(k)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

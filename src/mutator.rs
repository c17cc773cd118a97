//! Applies the INSERT/UPDATE operations that realize the classifier's
//! disposition classes. Each block is skipped entirely (not just a
//! `WHERE false` no-op) when its classification set is empty.

use chrono::NaiveDate;
use duckdb::Connection;

use crate::classifier::incoming_vs_stored_same;
use crate::error::Result;
use crate::schema::metadata_table_name;
use crate::sql::qi;

/// Class 1: rows that exactly match their covering stored row. No writes;
/// counted only.
pub fn count_unchanged(conn: &Connection, value_cols: &[String]) -> Result<i64> {
    let same = incoming_vs_stored_same(value_cols);
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM _covering WHERE sm_valid_from IS NOT NULL AND {same}"),
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Class 2: close the covering row at `date` and insert a new version with
/// the incoming values, `[date, old_valid_to)`.
pub fn apply_changed_in_place(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<i64> {
    let same = incoming_vs_stored_same(value_cols);
    let changed_predicate = format!("c.sm_valid_from IS NOT NULL AND NOT ({same})");

    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM _covering c WHERE {changed_predicate}"),
        [],
        |r| r.get(0),
    )?;
    if n == 0 {
        return Ok(0);
    }

    let join = key_cols
        .iter()
        .map(|k| format!("sm.{k} = c.{ik}", k = qi(k), ik = qi(&format!("i_{k}"))))
        .collect::<Vec<_>>()
        .join(" AND ");

    conn.execute_batch(&format!(
        "UPDATE {table} sm SET valid_to = DATE '{date}' \
         FROM _covering c \
         WHERE {join} AND sm.valid_from = c.sm_valid_from AND {changed_predicate}",
        table = qi(table_name),
    ))?;

    let insert_cols = insert_column_list(key_cols, value_cols);
    let select_list = incoming_select_list(key_cols, value_cols);

    conn.execute_batch(&format!(
        "INSERT INTO {table} ({insert_cols}) \
         SELECT {select_list}, DATE '{date}', c.sm_valid_to \
         FROM _covering c WHERE {changed_predicate}",
        table = qi(table_name),
    ))?;

    Ok(n)
}

/// Class 3a: the key has no covering row but does have a `_next` row with
/// identical values; pull that row's `valid_from` back to `date`.
pub fn apply_extend_back(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<i64> {
    let same = incoming_vs_stored_same(value_cols);

    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM _next n WHERE {same}"),
        [],
        |r| r.get(0),
    )?;
    if n == 0 {
        return Ok(0);
    }

    let join = key_cols
        .iter()
        .map(|k| format!("sm.{k} = n.{ik}", k = qi(k), ik = qi(&format!("i_{k}"))))
        .collect::<Vec<_>>()
        .join(" AND ");

    conn.execute_batch(&format!(
        "UPDATE {table} sm SET valid_from = DATE '{date}' \
         FROM _next n WHERE {join} AND sm.valid_from = n.sm_valid_from AND {same}",
        table = qi(table_name),
    ))?;

    Ok(n)
}

/// Class 3b: the key has a `_next` row with different values; insert a new
/// version closing exactly where that next row begins.
pub fn apply_split_before_next(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<i64> {
    let same = incoming_vs_stored_same(value_cols);
    let predicate = format!("NOT ({same})");

    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM _next WHERE {predicate}"),
        [],
        |r| r.get(0),
    )?;
    if n == 0 {
        return Ok(0);
    }

    let insert_cols = insert_column_list(key_cols, value_cols);
    let select_list = incoming_select_list(key_cols, value_cols);

    conn.execute_batch(&format!(
        "INSERT INTO {table} ({insert_cols}) \
         SELECT {select_list}, DATE '{date}', sm_valid_from \
         FROM _next WHERE {predicate}",
        table = qi(table_name),
    ))?;

    Ok(n)
}

/// Classes 4 and 5 share the same tentative-`valid_to` computation: the
/// earliest later already-synced date at which the key has no covering row.
fn tentative_valid_to_subquery(
    table_name: &str,
    key_cols: &[String],
    date: NaiveDate,
    rel_alias: &str,
) -> String {
    let meta = metadata_table_name(table_name);
    let key_match = key_cols
        .iter()
        .map(|k| format!("s.{k} = {rel_alias}.{ik}", k = qi(k), ik = qi(&format!("i_{k}"))))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "(SELECT MIN(sm2.as_of_date) FROM {meta} sm2 \
          WHERE sm2.as_of_date > DATE '{date}' \
            AND NOT EXISTS (\
                SELECT 1 FROM {table} s \
                WHERE {key_match} AND s.valid_from <= sm2.as_of_date \
                  AND (s.valid_to > sm2.as_of_date OR s.valid_to IS NULL)))",
        meta = qi(&meta),
        table = qi(table_name),
    )
}

/// Class 4: reappearance. The key was present before a gap (`_prev`); the
/// gap being over means it reappears at `date` and runs until the next
/// already-confirmed absence.
pub fn apply_reappearance(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM _prev", [], |r| r.get(0))?;
    if n == 0 {
        return Ok(0);
    }

    let insert_cols = insert_column_list(key_cols, value_cols);
    let select_list = incoming_select_list(key_cols, value_cols);
    let r = tentative_valid_to_subquery(table_name, key_cols, date, "p");

    conn.execute_batch(&format!(
        "INSERT INTO {table} ({insert_cols}) \
         SELECT {select_list}, DATE '{date}', {r} \
         FROM _prev p",
        table = qi(table_name),
    ))?;

    Ok(n)
}

/// Class 5: brand-new key, absent from `_covering`, `_next`, and `_prev`.
pub fn apply_brand_new(
    conn: &Connection,
    table_name: &str,
    key_cols: &[String],
    value_cols: &[String],
    date: NaiveDate,
) -> Result<i64> {
    let key_eq_covering = incoming_key_eq("c", key_cols);
    let key_eq_next = incoming_key_eq("n", key_cols);
    let key_eq_prev = incoming_key_eq("p", key_cols);

    let not_classified = format!(
        "NOT EXISTS (SELECT 1 FROM _covering c WHERE {key_eq_covering} AND c.sm_valid_from IS NOT NULL) \
         AND NOT EXISTS (SELECT 1 FROM _next n WHERE {key_eq_next}) \
         AND NOT EXISTS (SELECT 1 FROM _prev p WHERE {key_eq_prev})"
    );

    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM _incoming i WHERE {not_classified}"),
        [],
        |r| r.get(0),
    )?;
    if n == 0 {
        return Ok(0);
    }

    let insert_cols = insert_column_list(key_cols, value_cols);
    let select_list = incoming_select_list(key_cols, value_cols);
    let r = tentative_valid_to_subquery(table_name, key_cols, date, "i");

    conn.execute_batch(&format!(
        "INSERT INTO {table} ({insert_cols}) \
         SELECT {select_list}, DATE '{date}', {r} \
         FROM _incoming i WHERE {not_classified}",
        table = qi(table_name),
    ))?;

    Ok(n)
}

fn incoming_key_eq(alias: &str, key_cols: &[String]) -> String {
    key_cols
        .iter()
        .map(|k| {
            let col = qi(&format!("i_{k}"));
            format!("{alias}.{col} = i.{col}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn insert_column_list(key_cols: &[String], value_cols: &[String]) -> String {
    key_cols
        .iter()
        .chain(value_cols.iter())
        .map(|c| qi(c))
        .chain([qi("valid_from"), qi("valid_to")])
        .collect::<Vec<_>>()
        .join(", ")
}

fn incoming_select_list(key_cols: &[String], value_cols: &[String]) -> String {
    key_cols
        .iter()
        .chain(value_cols.iter())
        .map(|c| qi(&format!("i_{c}")))
        .collect::<Vec<_>>()
        .join(", ")
}

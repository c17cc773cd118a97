//! Accepts any recognized tabular input and reduces it to exactly the
//! declared key/value columns, in declared order, with case- and
//! separator-insensitive column matching.
//!
//! Recognized inputs: an Arrow `RecordBatch` (the crate's analogue of a
//! DataFrame) and CSV/Parquet file paths. Anything else — in particular a
//! bare collection of untyped records with no declared schema — is rejected
//! with [`ScdError::UnsupportedInputKind`], mirroring the reference
//! implementation's refusal of raw `dict`/`list` input.

use std::path::{Path, PathBuf};

use arrow::array::Array;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use duckdb::Connection;

use crate::error::{Result, ScdError};

/// A single normalized row: one string per key column (keys are always
/// non-null) and one optional string per value column.
pub struct NormalizedRow {
    pub keys: Vec<String>,
    pub values: Vec<Option<String>>,
}

/// The result of normalizing an [`InputFrame`] against a declared
/// key/value column set.
pub struct NormalizedFrame {
    pub rows: Vec<NormalizedRow>,
}

/// A recognized tabular input to [`normalize`].
pub enum InputFrame {
    /// An in-memory columnar batch, the crate's DataFrame analogue.
    Arrow(RecordBatch),
    /// A path to a CSV file, read via the engine's own CSV reader.
    Csv(PathBuf),
    /// A path to a Parquet file, read via the engine's own Parquet reader.
    Parquet(PathBuf),
}

impl InputFrame {
    pub fn csv(path: impl AsRef<Path>) -> Self {
        InputFrame::Csv(path.as_ref().to_path_buf())
    }

    pub fn parquet(path: impl AsRef<Path>) -> Self {
        InputFrame::Parquet(path.as_ref().to_path_buf())
    }
}

/// Fold a column name the same way the reference implementation does:
/// lowercase, then strip `-` and `_`.
fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['-', '_'], "")
}

/// Normalize `frame` into exactly `key_cols` + `value_cols`, in that order.
/// Missing declared columns are NULL-filled; extra input columns are
/// dropped; a declared column that matches more than one input column keeps
/// the first match (logged at debug, arbitrary-but-deterministic tie-break).
pub fn normalize(
    conn: &Connection,
    frame: InputFrame,
    key_cols: &[String],
    value_cols: &[String],
) -> Result<NormalizedFrame> {
    if key_cols.is_empty() {
        return Err(ScdError::UnsupportedInputKind(
            "no key columns declared".to_string(),
        ));
    }

    match frame {
        InputFrame::Arrow(batch) => normalize_arrow(&batch, key_cols, value_cols),
        InputFrame::Csv(path) => normalize_via_engine(conn, &path, "read_csv_auto", key_cols, value_cols),
        InputFrame::Parquet(path) => {
            normalize_via_engine(conn, &path, "read_parquet", key_cols, value_cols)
        }
    }
}

/// Build an index mapping each declared column (key + value, in order) to
/// the index of the first input column whose folded name matches, if any.
fn build_column_map(input_names: &[String], declared: &[String]) -> Vec<Option<usize>> {
    let folded_inputs: Vec<String> = input_names.iter().map(|n| normalize_name(n)).collect();
    declared
        .iter()
        .map(|d| {
            let folded = normalize_name(d);
            folded_inputs.iter().position(|n| *n == folded)
        })
        .collect()
}

fn normalize_arrow(
    batch: &RecordBatch,
    key_cols: &[String],
    value_cols: &[String],
) -> Result<NormalizedFrame> {
    let input_names: Vec<String> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    let declared: Vec<String> = key_cols.iter().chain(value_cols.iter()).cloned().collect();
    let map = build_column_map(&input_names, &declared);

    let num_rows = batch.num_rows();
    let mut rows = Vec::with_capacity(num_rows);

    for r in 0..num_rows {
        let mut keys = Vec::with_capacity(key_cols.len());
        for (i, _) in key_cols.iter().enumerate() {
            let v = map[i].and_then(|col| array_value_to_string(batch.column(col), r));
            keys.push(v.unwrap_or_default());
        }
        let mut values = Vec::with_capacity(value_cols.len());
        for (i, _) in value_cols.iter().enumerate() {
            let idx = key_cols.len() + i;
            let v = map[idx].and_then(|col| array_value_to_string(batch.column(col), r));
            values.push(v);
        }
        rows.push(NormalizedRow { keys, values });
    }

    Ok(NormalizedFrame { rows })
}

/// Render a single array cell as a string, or `None` if the cell is null or
/// the column's type has no string rendering the crate supports.
fn array_value_to_string(array: &dyn Array, row: usize) -> Option<String> {
    if array.is_null(row) {
        return None;
    }
    use arrow::array::*;
    match array.data_type() {
        DataType::Utf8 => Some(
            array
                .as_any()
                .downcast_ref::<StringArray>()?
                .value(row)
                .to_string(),
        ),
        DataType::LargeUtf8 => Some(
            array
                .as_any()
                .downcast_ref::<LargeStringArray>()?
                .value(row)
                .to_string(),
        ),
        DataType::Int64 => Some(
            array
                .as_any()
                .downcast_ref::<Int64Array>()?
                .value(row)
                .to_string(),
        ),
        DataType::Int32 => Some(
            array
                .as_any()
                .downcast_ref::<Int32Array>()?
                .value(row)
                .to_string(),
        ),
        DataType::Float64 => Some(
            array
                .as_any()
                .downcast_ref::<Float64Array>()?
                .value(row)
                .to_string(),
        ),
        DataType::Boolean => Some(
            array
                .as_any()
                .downcast_ref::<BooleanArray>()?
                .value(row)
                .to_string(),
        ),
        _ => None,
    }
}

/// Read a CSV/Parquet file via the engine's own reader, fold its columns,
/// and project into declared order with the engine doing the casting.
fn normalize_via_engine(
    conn: &Connection,
    path: &Path,
    reader_fn: &str,
    key_cols: &[String],
    value_cols: &[String],
) -> Result<NormalizedFrame> {
    let path_str = path
        .to_str()
        .ok_or_else(|| ScdError::UnsupportedInputKind(format!("non-UTF8 path: {path:?}")))?;
    let escaped_path = crate::sql::escape_literal(path_str);

    let mut describe = conn.prepare(&format!(
        "SELECT * FROM {reader_fn}('{escaped_path}') LIMIT 0"
    ))?;
    let input_names: Vec<String> = describe
        .column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    drop(describe);

    let declared: Vec<String> = key_cols.iter().chain(value_cols.iter()).cloned().collect();
    let map = build_column_map(&input_names, &declared);

    let select_list = declared
        .iter()
        .enumerate()
        .map(|(i, _)| match map[i] {
            Some(idx) => format!("CAST({} AS VARCHAR)", crate::sql::qi(&input_names[idx])),
            None => "NULL".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let query = format!("SELECT {select_list} FROM {reader_fn}('{escaped_path}')");
    let mut stmt = conn.prepare(&query)?;
    let mut result_rows = stmt.query([])?;

    let mut rows = Vec::new();
    while let Some(row) = result_rows.next()? {
        let mut keys = Vec::with_capacity(key_cols.len());
        for i in 0..key_cols.len() {
            keys.push(row.get::<_, Option<String>>(i)?.unwrap_or_default());
        }
        let mut values = Vec::with_capacity(value_cols.len());
        for i in 0..value_cols.len() {
            values.push(row.get::<_, Option<String>>(key_cols.len() + i)?);
        }
        rows.push(NormalizedRow { keys, values });
    }

    Ok(NormalizedFrame { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::StringArray;
    use arrow::datatypes::{Field, Schema};

    fn make_batch(cols: &[(&str, Vec<Option<&str>>)]) -> RecordBatch {
        let fields: Vec<Field> = cols
            .iter()
            .map(|(name, _)| Field::new(*name, DataType::Utf8, true))
            .collect();
        let arrays: Vec<Arc<dyn Array>> = cols
            .iter()
            .map(|(_, values)| Arc::new(StringArray::from(values.clone())) as Arc<dyn Array>)
            .collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
    }

    #[test]
    fn drops_extra_and_nulls_missing() {
        let conn = Connection::open_in_memory().unwrap();
        let batch = make_batch(&[
            ("Product-ID", vec![Some("A"), Some("B")]),
            ("Extra", vec![Some("x"), Some("y")]),
        ]);
        let normalized = normalize(
            &conn,
            InputFrame::Arrow(batch),
            &["product_id".to_string()],
            &["name".to_string()],
        )
        .unwrap();
        assert_eq!(normalized.rows.len(), 2);
        assert_eq!(normalized.rows[0].keys, vec!["A".to_string()]);
        assert_eq!(normalized.rows[0].values, vec![None]);
    }

    #[test]
    fn case_and_separator_insensitive() {
        let conn = Connection::open_in_memory().unwrap();
        let batch = make_batch(&[("ID", vec![Some("1")]), ("unit_price", vec![Some("9.99")])]);
        let normalized = normalize(
            &conn,
            InputFrame::Arrow(batch),
            &["id".to_string()],
            &["unitprice".to_string()],
        )
        .unwrap();
        assert_eq!(normalized.rows[0].values, vec![Some("9.99".to_string())]);
    }

    #[test]
    fn rejects_empty_key_cols() {
        let conn = Connection::open_in_memory().unwrap();
        let batch = make_batch(&[("id", vec![Some("1")])]);
        let err = normalize(&conn, InputFrame::Arrow(batch), &[], &[]).unwrap_err();
        assert!(matches!(err, ScdError::UnsupportedInputKind(_)));
    }

    #[test]
    fn reads_csv_input_via_engine() {
        let conn = Connection::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "id,name,price\nA,Widget,9.99\nB,Gadget,4.99\n").unwrap();

        let normalized = normalize(
            &conn,
            InputFrame::csv(&path),
            &["id".to_string()],
            &["name".to_string(), "price".to_string()],
        )
        .unwrap();

        assert_eq!(normalized.rows.len(), 2);
        assert_eq!(normalized.rows[0].keys, vec!["A".to_string()]);
        assert_eq!(normalized.rows[0].values, vec![Some("Widget".to_string()), Some("9.99".to_string())]);
    }

    #[test]
    fn csv_column_names_are_folded_like_arrow() {
        let conn = Connection::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "Product-ID,Unit_Price\nA,9.99\n").unwrap();

        let normalized = normalize(
            &conn,
            InputFrame::csv(&path),
            &["product_id".to_string()],
            &["unitprice".to_string()],
        )
        .unwrap();

        assert_eq!(normalized.rows[0].keys, vec!["A".to_string()]);
        assert_eq!(normalized.rows[0].values, vec![Some("9.99".to_string())]);
    }
}

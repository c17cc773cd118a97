//! A bitemporal, SCD Type 2 table over an embedded DuckDB store.
//!
//! [`ScdTable`] accepts full periodic snapshots of an entity population,
//! each tagged with a logical as-of date, and compresses them into a
//! minimal set of versioned rows from which any previously synced snapshot
//! can be exactly reconstructed. Snapshots may arrive out of order; the
//! resulting table is canonical regardless of sync order.

mod classifier;
mod error;
mod frame;
mod mutator;
mod query;
mod reconciler;
mod schema;
mod sql;
mod txn;

use std::path::Path;
use std::sync::Mutex;

use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use duckdb::Connection;

pub use error::{Result, ScdError};
pub use frame::InputFrame;

/// Per-sync outcome, one counter per disposition class (see [`sync`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub date: NaiveDate,
    pub rows_total: i64,
    pub rows_new: i64,
    pub rows_changed: i64,
    pub rows_deleted: i64,
    pub rows_unchanged: i64,
    pub rows_extended_back: i64,
    pub rows_reappeared: i64,
}

/// A handle to one versioned table. Construction ensures the schema exists;
/// every [`sync`](ScdTable::sync) call is wrapped in its own transaction.
pub struct ScdTable {
    conn: Mutex<Connection>,
    table_name: String,
    key_cols: Vec<String>,
    value_cols: Vec<String>,
}

impl ScdTable {
    /// Open (or create) a versioned table at `storage_path` (use
    /// `":memory:"` for an ephemeral in-process database).
    pub fn open(
        storage_path: impl AsRef<Path>,
        table_name: impl Into<String>,
        key_cols: Vec<String>,
        value_cols: Vec<String>,
    ) -> Result<Self> {
        let conn = Connection::open(storage_path)?;
        let table_name = table_name.into();
        schema::ensure_schema(&conn, &table_name, &key_cols, &value_cols)?;
        Ok(ScdTable {
            conn: Mutex::new(conn),
            table_name,
            key_cols,
            value_cols,
        })
    }

    /// Open an ephemeral in-memory table, used extensively in tests.
    pub fn open_in_memory(
        table_name: impl Into<String>,
        key_cols: Vec<String>,
        value_cols: Vec<String>,
    ) -> Result<Self> {
        Self::open(":memory:", table_name, key_cols, value_cols)
    }

    /// Apply one snapshot as of `date`. Reconciles the incoming snapshot
    /// against stored history in a single transaction; on any error the
    /// transaction rolls back and the table is left exactly as it was.
    pub fn sync(&self, date: &str, frame: InputFrame) -> Result<SyncStats> {
        let date = sql::parse_date(date)?;
        let mut conn = self.conn.lock().expect("scd table connection poisoned");

        tracing::debug!(table = %self.table_name, %date, "sync starting");

        let result = self.sync_inner(&mut conn, date, frame);

        match &result {
            Ok(stats) => tracing::debug!(table = %self.table_name, %date, ?stats, "sync committed"),
            Err(e) => tracing::error!(table = %self.table_name, %date, error = %e, "sync rolled back"),
        }

        result
    }

    fn sync_inner(&self, conn: &mut Connection, date: NaiveDate, frame: InputFrame) -> Result<SyncStats> {
        let normalized = frame::normalize(conn, frame, &self.key_cols, &self.value_cols)?;
        let rows_total = normalized.rows.len() as i64;

        let txn = conn.transaction()?;
        let scratch = txn::ScratchGuard::new(&txn, txn::SCRATCH_TABLES.to_vec());

        classifier::load_incoming(&txn, &self.key_cols, &self.value_cols, normalized)?;
        classifier::build_covering(&txn, &self.table_name, &self.key_cols, &self.value_cols, date)?;
        classifier::build_next(&txn, &self.table_name, &self.key_cols, &self.value_cols, date)?;
        classifier::build_prev(&txn, &self.table_name, &self.key_cols, &self.value_cols, date)?;
        classifier::assert_classes_disjoint(&txn, &self.key_cols)?;

        let rows_unchanged = mutator::count_unchanged(&txn, &self.value_cols)?;
        let rows_changed_covered = mutator::apply_changed_in_place(
            &txn,
            &self.table_name,
            &self.key_cols,
            &self.value_cols,
            date,
        )?;
        let rows_extended_back = mutator::apply_extend_back(
            &txn,
            &self.table_name,
            &self.key_cols,
            &self.value_cols,
            date,
        )?;
        let rows_changed_split = mutator::apply_split_before_next(
            &txn,
            &self.table_name,
            &self.key_cols,
            &self.value_cols,
            date,
        )?;
        let rows_reappeared = mutator::apply_reappearance(
            &txn,
            &self.table_name,
            &self.key_cols,
            &self.value_cols,
            date,
        )?;
        let rows_new = mutator::apply_brand_new(
            &txn,
            &self.table_name,
            &self.key_cols,
            &self.value_cols,
            date,
        )?;
        let rows_deleted =
            reconciler::reconcile(&txn, &self.table_name, &self.key_cols, &self.value_cols, date)?;

        let meta = schema::metadata_table_name(&self.table_name);
        txn.execute(
            &format!(
                "INSERT OR REPLACE INTO {meta} (as_of_date, synced_at, row_count) \
                 VALUES (?, CURRENT_TIMESTAMP, ?)",
                meta = sql::qi(&meta),
            ),
            duckdb::params![date, rows_total],
        )?;

        scratch.drop_now()?;
        txn.commit()?;

        Ok(SyncStats {
            date,
            rows_total,
            rows_new,
            rows_changed: rows_changed_covered + rows_changed_split,
            rows_deleted,
            rows_unchanged,
            rows_extended_back,
            rows_reappeared,
        })
    }

    /// Reconstruct the snapshot as of `date`.
    pub fn get_data(&self, date: &str) -> Result<RecordBatch> {
        let date = sql::parse_date(date)?;
        let conn = self.conn.lock().expect("scd table connection poisoned");
        query::snapshot(&conn, &self.table_name, &self.key_cols, &self.value_cols, date)
    }

    /// All as-of dates ever successfully synced, ascending.
    pub fn get_synced_dates(&self) -> Result<Vec<NaiveDate>> {
        let conn = self.conn.lock().expect("scd table connection poisoned");
        query::synced_dates(&conn, &self.table_name)
    }

    /// Total number of historical row versions stored (not just current).
    pub fn get_record_count(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("scd table connection poisoned");
        query::record_count(&conn, &self.table_name)
    }
}

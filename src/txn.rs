//! Brackets one sync in a transaction and guarantees scratch-relation
//! cleanup on every exit path, success or failure.

use duckdb::Connection;

use crate::error::Result;
use crate::sql::qi;

/// Drops a fixed list of scratch tables on `Drop`, so an early `?` return
/// from anywhere in a sync still unwinds through cleanup. Call
/// [`ScratchGuard::drop_now`] on the success path to clean up and release the
/// guard's borrow of the connection before committing it.
pub struct ScratchGuard<'a> {
    conn: &'a Connection,
    names: Vec<&'static str>,
    done: bool,
}

impl<'a> ScratchGuard<'a> {
    pub fn new(conn: &'a Connection, names: Vec<&'static str>) -> Self {
        ScratchGuard {
            conn,
            names,
            done: false,
        }
    }

    /// Explicitly drop every scratch table now and consume the guard, so the
    /// borrow it holds on the connection ends here rather than at the end of
    /// the enclosing scope -- needed before a caller moves the connection
    /// (e.g. `Transaction::commit`, which takes `self` by value).
    pub fn drop_now(mut self) -> Result<()> {
        self.drop_tables()
    }

    fn drop_tables(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        for name in &self.names {
            self.conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", qi(name)))?;
        }
        self.done = true;
        Ok(())
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        for name in &self.names {
            if let Err(e) = self
                .conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", qi(name)))
            {
                tracing::warn!(table = %name, error = %e, "failed to drop scratch table during unwind");
            }
        }
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_now_releases_the_borrow_before_the_guard_is_gone() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TEMP TABLE _scratch_a (x INT)").unwrap();
        let guard = ScratchGuard::new(&conn, vec!["_scratch_a"]);
        guard.drop_now().unwrap();
        // the guard is consumed here, so `conn` is free to be moved/used again.
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '_scratch_a'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 0);
    }
}

pub const SCRATCH_TABLES: [&str; 5] = ["_incoming", "_covering", "_next", "_prev", "_deletions"];

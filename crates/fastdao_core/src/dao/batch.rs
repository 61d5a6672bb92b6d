//! Chunked execution of multi-record writes.
//!
//! # Invariants
//! - A chunk is flushed exactly when it holds `limit` rows, plus once for a
//!   non-empty remainder.
//! - On an auto-commit connection each chunk is its own transaction; inside
//!   an open transaction chunks join it.
//! - The first failing chunk aborts the run. Chunks flushed before it stay
//!   applied unless an enclosing transaction rolls back.

use crate::db::DbResult;
use crate::mapping::Mapping;
use crate::model::value::FieldValue;
use crate::query;
use log::debug;
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};

/// Outcome of a batched write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records written.
    pub records: usize,
    /// Chunks executed.
    pub flushes: usize,
    /// Size of the last executed chunk.
    pub last_flush: usize,
}

pub(crate) struct Batch<'c> {
    conn: &'c Connection,
    sql: &'c str,
    limit: usize,
    pending: Vec<Vec<FieldValue>>,
    summary: BatchSummary,
}

impl<'c> Batch<'c> {
    pub(crate) fn new(conn: &'c Connection, sql: &'c str, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            conn,
            sql,
            limit,
            pending: Vec::with_capacity(limit),
            summary: BatchSummary::default(),
        }
    }

    pub(crate) fn add(&mut self, params: Vec<FieldValue>) -> DbResult<()> {
        self.pending.push(params);
        if self.pending.len() == self.limit {
            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn finish(mut self) -> DbResult<BatchSummary> {
        self.flush()?;
        Ok(self.summary)
    }

    fn flush(&mut self) -> DbResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.pending);
        let count = rows.len();
        in_chunk_transaction(self.conn, |conn| {
            let mut stmt = conn.prepare_cached(self.sql)?;
            for params in &rows {
                stmt.execute(params_from_iter(params.iter()))?;
            }
            Ok(())
        })?;
        self.record_flush(count);
        Ok(())
    }

    fn record_flush(&mut self, count: usize) {
        self.summary.records += count;
        self.summary.flushes += 1;
        self.summary.last_flush = count;
        debug!(
            "event=batch_flush module=dao status=ok rows={} flushes={}",
            count, self.summary.flushes
        );
    }
}

/// Deletes `keys` with one `IN (...)` statement per chunk of `limit`.
pub(crate) fn delete_keys(
    conn: &Connection,
    mapping: &Mapping,
    keys: &[FieldValue],
    limit: usize,
) -> DbResult<BatchSummary> {
    let mut summary = BatchSummary::default();
    for chunk in keys.chunks(limit.max(1)) {
        let sql = query::delete_in_sql(mapping, chunk.len());
        in_chunk_transaction(conn, |conn| {
            conn.prepare_cached(&sql)?
                .execute(params_from_iter(chunk.iter()))?;
            Ok(())
        })?;
        summary.records += chunk.len();
        summary.flushes += 1;
        summary.last_flush = chunk.len();
        debug!(
            "event=batch_flush module=dao status=ok table={} rows={} flushes={}",
            mapping.table_name(),
            chunk.len(),
            summary.flushes
        );
    }
    Ok(summary)
}

fn in_chunk_transaction<F>(conn: &Connection, work: F) -> DbResult<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    if !conn.is_autocommit() {
        work(conn)?;
        return Ok(());
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    work(&*tx)?;
    tx.commit()?;
    Ok(())
}

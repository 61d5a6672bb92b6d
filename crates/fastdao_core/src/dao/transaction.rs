//! Transaction scope: one connection across several DAO calls.
//!
//! # Responsibility
//! - Hold a single connection from open until close.
//! - Decide commit or rollback exactly once on exit.
//!
//! # Invariants
//! - Every scoped call runs on the held connection, reads included.
//! - A failed scoped call flags the scope for rollback.
//! - After `commit` or `rollback` the next scoped write begins a new
//!   transaction.
//! - Exit never leaves the connection inside a transaction.

use super::batch::BatchSummary;
use super::ops::Ops;
use super::{Dao, DaoError, DaoResult, Operation, Tagged};
use crate::db::{ConnectionGuard, DbError, DbResult};
use crate::model::entity::Entity;
use crate::model::value::FieldValue;
use crate::query::{self, QueryArg};
use log::{error, info, warn};
use std::time::Instant;

/// Lifecycle of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// A transaction is open on the held connection.
    Open,
    /// The last transaction was committed; none is open.
    Committed,
    /// The last transaction was rolled back; none is open.
    RolledBack,
    /// The connection was released.
    Closed,
}

/// Scoped unit of work over one connection.
///
/// Dropping the scope closes it: a flagged scope (or one dropped during a
/// panic) rolls back, otherwise an open transaction commits. Use
/// [`TransactionScope::close`] to observe exit failures.
pub struct TransactionScope<'d, E: Entity> {
    dao: &'d Dao<E>,
    conn: Option<ConnectionGuard<'d>>,
    state: ScopeState,
    rollback_only: bool,
    opened_at: Instant,
}

impl<'d, E: Entity> TransactionScope<'d, E> {
    pub(crate) fn open(dao: &'d Dao<E>) -> DaoResult<Self> {
        let conn = ConnectionGuard::acquire(dao.source()).during(Operation::TransactionBegin)?;
        conn.execute_batch("BEGIN")
            .during(Operation::TransactionBegin)?;
        info!(
            "event=tx_open module=dao status=ok table={}",
            dao.mapping().table_name()
        );
        Ok(Self {
            dao,
            conn: Some(conn),
            state: ScopeState::Open,
            rollback_only: false,
            opened_at: Instant::now(),
        })
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Flags the scope so that exit rolls back.
    pub fn mark_rollback(&mut self) {
        self.rollback_only = true;
    }

    /// Commits the open transaction.
    ///
    /// A failed commit flags the scope for rollback.
    pub fn commit(&mut self) -> DaoResult<()> {
        self.finish_transaction("COMMIT", Operation::TransactionCommit)?;
        self.state = ScopeState::Committed;
        Ok(())
    }

    /// Rolls back the open transaction and clears the rollback flag.
    pub fn rollback(&mut self) -> DaoResult<()> {
        self.finish_transaction("ROLLBACK", Operation::TransactionRollback)?;
        self.state = ScopeState::RolledBack;
        self.rollback_only = false;
        Ok(())
    }

    /// Closes the scope, returning any commit or rollback failure.
    pub fn close(mut self) -> DaoResult<()> {
        self.exit().map_err(DaoError::TransactionClose)
    }

    pub fn select(&mut self, template: &str, args: &[QueryArg]) -> DaoResult<Vec<E>> {
        let expanded = query::expand_placeholders(template, args)?;
        self.scoped(false, |ops| ops.query(&expanded))
    }

    pub fn get_all(&mut self) -> DaoResult<Vec<E>> {
        self.scoped(false, |ops| ops.get_all())
    }

    pub fn get_by_pk(&mut self, key: impl Into<FieldValue>) -> DaoResult<Option<E>> {
        let key = key.into();
        if key.is_null() {
            return Ok(None);
        }
        self.scoped(false, |ops| ops.get_by_pk(key))
    }

    pub fn insert(&mut self, record: &mut E) -> DaoResult<FieldValue> {
        self.scoped(true, |ops| ops.insert(record))
    }

    pub fn insert_many(&mut self, records: &[E]) -> DaoResult<BatchSummary> {
        self.scoped(true, |ops| ops.insert_many(records))
    }

    pub fn update(&mut self, record: &E) -> DaoResult<usize> {
        self.scoped(true, |ops| ops.update(record))
    }

    pub fn update_many(&mut self, records: &[E]) -> DaoResult<BatchSummary> {
        self.scoped(true, |ops| ops.update_many(records))
    }

    pub fn delete(&mut self, record: &E) -> DaoResult<usize> {
        self.scoped(true, |ops| ops.delete(record))
    }

    pub fn delete_many(&mut self, records: &[E]) -> DaoResult<BatchSummary> {
        self.scoped(true, |ops| ops.delete_many(records))
    }

    pub fn delete_by_pk(&mut self, key: impl Into<FieldValue>) -> DaoResult<usize> {
        let key = key.into();
        self.scoped(true, |ops| ops.delete_by_pk(&key))
    }

    fn scoped<T>(
        &mut self,
        write: bool,
        work: impl FnOnce(&Ops<'_>) -> DaoResult<T>,
    ) -> DaoResult<T> {
        let conn = self.conn.as_deref().ok_or(DaoError::ScopeClosed)?;
        if write && conn.is_autocommit() {
            if let Err(err) = conn
                .execute_batch("BEGIN")
                .during(Operation::TransactionBegin)
            {
                self.rollback_only = true;
                return Err(err);
            }
            self.state = ScopeState::Open;
        }

        let result = work(&self.dao.ops(conn));
        if let Err(err) = &result {
            self.rollback_only = true;
            warn!(
                "event=tx_op module=dao status=error table={} rollback_only=true error={}",
                self.dao.mapping().table_name(),
                err
            );
        }
        result
    }

    fn finish_transaction(&mut self, statement: &str, operation: Operation) -> DaoResult<()> {
        let conn = self.conn.as_deref().ok_or(DaoError::ScopeClosed)?;
        if conn.is_autocommit() {
            return Ok(());
        }
        if let Err(err) = conn.execute_batch(statement).during(operation) {
            self.rollback_only = true;
            return Err(err);
        }
        Ok(())
    }

    fn exit(&mut self) -> DbResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let rollback = self.rollback_only || std::thread::panicking();

        let mut outcome: DbResult<()> = Ok(());
        if !conn.is_autocommit() {
            let statement = if rollback { "ROLLBACK" } else { "COMMIT" };
            outcome = conn.execute_batch(statement).map_err(DbError::from);
        }
        if !conn.is_autocommit() {
            // A failed COMMIT leaves the transaction open.
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                outcome = outcome.and(Err(DbError::from(err)));
            }
        }

        self.state = ScopeState::Closed;
        let table = self.dao.mapping().table_name();
        let elapsed = self.opened_at.elapsed().as_millis();
        match &outcome {
            Ok(()) => info!(
                "event=tx_close module=dao status=ok table={} rollback={} duration_ms={}",
                table, rollback, elapsed
            ),
            Err(err) => error!(
                "event=tx_close module=dao status=error table={} rollback={} duration_ms={} error={}",
                table, rollback, elapsed, err
            ),
        }
        outcome
    }
}

impl<E: Entity> Drop for TransactionScope<'_, E> {
    fn drop(&mut self) {
        // Failures are already logged by `exit`.
        let _ = self.exit();
    }
}

//! Entity DAO: CRUD, batched writes and transaction scopes.
//!
//! # Responsibility
//! - Expose the CRUD surface of one entity type over a connection source.
//! - Tag every storage failure with the operation that raised it.
//!
//! # Invariants
//! - Each call outside a scope acquires exactly one connection and releases
//!   it on every exit path.
//! - Nothing is retried; the first failure ends the operation.
//! - Argument and key-type errors are raised before any statement runs.

use crate::config::{self, ConfigError};
use crate::convert::ConvertError;
use crate::db::{ConnectionGuard, ConnectionSource, DbError};
use crate::mapping::{mapping_for, Mapping, MappingError};
use crate::model::entity::Entity;
use crate::model::value::{FieldError, FieldKind, FieldValue};
use crate::query::{self, QueryArg};
use log::{debug, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

mod batch;
mod ops;
mod transaction;

pub use batch::BatchSummary;
pub use transaction::{ScopeState, TransactionScope};

use ops::Ops;

pub type DaoResult<T> = Result<T, DaoError>;

/// Operation tag attached to storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    InsertBatch,
    InsertSingle,
    UpdateBatch,
    UpdateSingle,
    DeleteList,
    DeleteSingle,
    TransactionBegin,
    TransactionCommit,
    TransactionRollback,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::InsertBatch => "insert - batch",
            Self::InsertSingle => "insert - single",
            Self::UpdateBatch => "update - batch",
            Self::UpdateSingle => "update - single",
            Self::DeleteList => "delete - list",
            Self::DeleteSingle => "delete - single",
            Self::TransactionBegin => "transaction - begin",
            Self::TransactionCommit => "transaction - commit",
            Self::TransactionRollback => "transaction - rollback",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying reason of a failed storage operation.
#[derive(Debug)]
pub enum StorageCause {
    Db(DbError),
    Convert(ConvertError),
    Field(FieldError),
}

impl Display for StorageCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Convert(err) => write!(f, "{err}"),
            Self::Field(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StorageCause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Convert(err) => Some(err),
            Self::Field(err) => Some(err),
        }
    }
}

impl From<DbError> for StorageCause {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageCause {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ConvertError> for StorageCause {
    fn from(value: ConvertError) -> Self {
        Self::Convert(value)
    }
}

impl From<FieldError> for StorageCause {
    fn from(value: FieldError) -> Self {
        Self::Field(value)
    }
}

/// Error surface of every DAO and scope call.
#[derive(Debug)]
pub enum DaoError {
    /// The entity mapping could not be derived.
    Mapping(MappingError),
    /// Placeholder markers and supplied values disagree.
    ArgumentMismatch {
        placeholders: usize,
        arguments: usize,
    },
    /// A key value does not match the declared key field kind.
    KeyTypeMismatch {
        expected: FieldKind,
        actual: &'static str,
    },
    /// The operation needs a key the mapping or value does not provide.
    MissingKey { operation: Operation },
    /// No connection source was configured.
    MissingConnectionSource,
    Config(ConfigError),
    /// The transaction scope was already closed.
    ScopeClosed,
    Storage {
        operation: Operation,
        cause: StorageCause,
    },
    /// Commit, rollback or auto-commit restoration failed on scope exit.
    TransactionClose(DbError),
}

impl DaoError {
    /// Operation tag of a storage failure.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Storage { operation, .. } | Self::MissingKey { operation } => Some(*operation),
            _ => None,
        }
    }
}

impl Display for DaoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mapping(err) => write!(f, "mapping derivation failed: {err}"),
            Self::ArgumentMismatch {
                placeholders,
                arguments,
            } => write!(
                f,
                "supplied query and replaceable arguments don't match: {placeholders} placeholders, {arguments} values"
            ),
            Self::KeyTypeMismatch { expected, actual } => write!(
                f,
                "unexpected primary key type: expected {expected} but passed {actual}"
            ),
            Self::MissingKey { operation } => {
                write!(f, "{operation}: operation requires a primary key value")
            }
            Self::MissingConnectionSource => write!(f, "no connection source configured"),
            Self::Config(err) => write!(f, "{err}"),
            Self::ScopeClosed => write!(f, "transaction scope is already closed"),
            Self::Storage { operation, cause } => write!(f, "{operation}: {cause}"),
            Self::TransactionClose(err) => write!(f, "transaction - close: {err}"),
        }
    }
}

impl Error for DaoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Mapping(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Storage { cause, .. } => Some(cause),
            Self::TransactionClose(err) => Some(err),
            Self::ArgumentMismatch { .. }
            | Self::KeyTypeMismatch { .. }
            | Self::MissingKey { .. }
            | Self::MissingConnectionSource
            | Self::ScopeClosed => None,
        }
    }
}

impl From<MappingError> for DaoError {
    fn from(value: MappingError) -> Self {
        Self::Mapping(value)
    }
}

impl From<ConfigError> for DaoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Attaches an operation tag to storage-level results.
pub(crate) trait Tagged<T> {
    fn during(self, operation: Operation) -> DaoResult<T>;
}

impl<T, E: Into<StorageCause>> Tagged<T> for Result<T, E> {
    fn during(self, operation: Operation) -> DaoResult<T> {
        self.map_err(|err| DaoError::Storage {
            operation,
            cause: err.into(),
        })
    }
}

/// Data access object for entity type `E`.
pub struct Dao<E: Entity> {
    mapping: Arc<Mapping>,
    source: Arc<dyn ConnectionSource>,
    batch_size: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Dao<E> {
    /// Creates a DAO over the process-wide connection source.
    pub fn new() -> DaoResult<Self> {
        let source = config::connection_source().ok_or(DaoError::MissingConnectionSource)?;
        Self::with_source(source)
    }

    /// Creates a DAO over an explicit connection source.
    ///
    /// Derives (or reuses) the mapping of `E` and snapshots the process-wide
    /// batch size.
    pub fn with_source(source: Arc<dyn ConnectionSource>) -> DaoResult<Self> {
        let mapping = mapping_for::<E>()?;
        Ok(Self {
            mapping,
            source,
            batch_size: config::batch_size(),
            _entity: PhantomData,
        })
    }

    /// Overrides the batch size of this DAO.
    pub fn with_batch_size(mut self, batch_size: usize) -> DaoResult<Self> {
        self.batch_size = config::validate_batch_size(batch_size)?;
        Ok(self)
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// UPDATE text of this entity, built once.
    pub fn update_query(&self) -> &str {
        query::update_sql(&self.mapping)
    }

    /// Runs a `?` template and hydrates one record per row.
    pub fn select(&self, template: &str, args: &[QueryArg]) -> DaoResult<Vec<E>> {
        let expanded = query::expand_placeholders(template, args)?;
        self.run(Operation::Select, |ops| ops.query(&expanded))
    }

    pub fn get_all(&self) -> DaoResult<Vec<E>> {
        self.run(Operation::Select, |ops| ops.get_all())
    }

    /// Loads the record with this key; `None` unless exactly one row matches.
    pub fn get_by_pk(&self, key: impl Into<FieldValue>) -> DaoResult<Option<E>> {
        let key = key.into();
        if key.is_null() {
            return Ok(None);
        }
        self.run(Operation::Select, |ops| ops.get_by_pk(key))
    }

    /// Inserts one record and returns its key.
    ///
    /// A pre-populated key is inserted as is; otherwise the generated key is
    /// written back into the record.
    pub fn insert(&self, record: &mut E) -> DaoResult<FieldValue> {
        self.run(Operation::InsertSingle, |ops| ops.insert(record))
    }

    pub fn insert_many(&self, records: &[E]) -> DaoResult<BatchSummary> {
        if records.is_empty() {
            return Ok(BatchSummary::default());
        }
        self.run(Operation::InsertBatch, |ops| ops.insert_many(records))
    }

    /// Updates one record by key; returns the number of changed rows.
    pub fn update(&self, record: &E) -> DaoResult<usize> {
        self.ensure_keyed(Operation::UpdateSingle)?;
        self.run(Operation::UpdateSingle, |ops| ops.update(record))
    }

    pub fn update_many(&self, records: &[E]) -> DaoResult<BatchSummary> {
        if records.is_empty() {
            return Ok(BatchSummary::default());
        }
        self.ensure_keyed(Operation::UpdateBatch)?;
        self.run(Operation::UpdateBatch, |ops| ops.update_many(records))
    }

    pub fn delete(&self, record: &E) -> DaoResult<usize> {
        self.ensure_keyed(Operation::DeleteSingle)?;
        self.run(Operation::DeleteSingle, |ops| ops.delete(record))
    }

    pub fn delete_many(&self, records: &[E]) -> DaoResult<BatchSummary> {
        if records.is_empty() {
            return Ok(BatchSummary::default());
        }
        self.ensure_keyed(Operation::DeleteList)?;
        self.run(Operation::DeleteList, |ops| ops.delete_many(records))
    }

    /// Deletes by key value; the key must match the declared key kind.
    pub fn delete_by_pk(&self, key: impl Into<FieldValue>) -> DaoResult<usize> {
        let key = key.into();
        ops::check_key(&self.mapping, &key, Operation::DeleteSingle)?;
        self.run(Operation::DeleteSingle, |ops| ops.delete_by_pk(&key))
    }

    /// Opens a transaction scope holding one connection until it closes.
    pub fn transaction(&self) -> DaoResult<TransactionScope<'_, E>> {
        TransactionScope::open(self)
    }

    /// Runs `work` inside a scope: commits on `Ok`, rolls back on `Err`.
    pub fn in_transaction<T, F>(&self, work: F) -> DaoResult<T>
    where
        F: FnOnce(&mut TransactionScope<'_, E>) -> DaoResult<T>,
    {
        let mut scope = self.transaction()?;
        match work(&mut scope) {
            Ok(value) => {
                scope.close()?;
                Ok(value)
            }
            Err(err) => {
                scope.mark_rollback();
                if let Err(close_err) = scope.close() {
                    warn!(
                        "event=tx_close module=dao status=error table={} error={}",
                        self.mapping.table_name(),
                        close_err
                    );
                }
                Err(err)
            }
        }
    }

    pub(crate) fn source(&self) -> &dyn ConnectionSource {
        self.source.as_ref()
    }

    pub(crate) fn ops<'a>(&'a self, conn: &'a rusqlite::Connection) -> Ops<'a> {
        Ops::new(conn, &self.mapping, self.batch_size)
    }

    fn ensure_keyed(&self, operation: Operation) -> DaoResult<()> {
        match self.mapping.key_field() {
            Some(_) => Ok(()),
            None => Err(DaoError::MissingKey { operation }),
        }
    }

    fn run<T>(
        &self,
        operation: Operation,
        work: impl FnOnce(&Ops<'_>) -> DaoResult<T>,
    ) -> DaoResult<T> {
        let started_at = Instant::now();
        let conn = ConnectionGuard::acquire(self.source()).during(operation)?;
        let result = work(&self.ops(&conn));

        match &result {
            Ok(_) => debug!(
                "event=dao_op module=dao status=ok op=\"{}\" table={} duration_ms={}",
                operation,
                self.mapping.table_name(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=dao_op module=dao status=error op=\"{}\" table={} duration_ms={} error={}",
                operation,
                self.mapping.table_name(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}

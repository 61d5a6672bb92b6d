//! Statement execution shared by the DAO and transaction scopes.
//!
//! Every operation runs on a borrowed connection; whoever owns the
//! connection owns its transaction state.

use super::batch::{self, Batch, BatchSummary};
use super::{DaoError, DaoResult, Operation, StorageCause, Tagged};
use crate::mapping::{FieldMapping, Mapping};
use crate::marshal::{from_storage, hydrate_row, row_params, to_storage, RowLayout};
use crate::model::entity::Entity;
use crate::model::value::{FieldKind, FieldValue};
use crate::query::{self, ExpandedQuery};
use log::debug;
use rusqlite::{params_from_iter, Connection};

pub(crate) struct Ops<'a> {
    conn: &'a Connection,
    mapping: &'a Mapping,
    batch_size: usize,
}

impl<'a> Ops<'a> {
    pub(crate) fn new(conn: &'a Connection, mapping: &'a Mapping, batch_size: usize) -> Self {
        Self {
            conn,
            mapping,
            batch_size,
        }
    }

    pub(crate) fn query<E: Entity>(&self, expanded: &ExpandedQuery) -> DaoResult<Vec<E>> {
        self.fetch(&expanded.sql, &expanded.params)
            .during(Operation::Select)
    }

    pub(crate) fn get_all<E: Entity>(&self) -> DaoResult<Vec<E>> {
        self.fetch(&query::select_all_sql(self.mapping), &[])
            .during(Operation::Select)
    }

    pub(crate) fn get_by_pk<E: Entity>(&self, key: FieldValue) -> DaoResult<Option<E>> {
        let mut rows: Vec<E> = self
            .fetch(&query::select_by_key_sql(self.mapping), &[key])
            .during(Operation::Select)?;
        if rows.len() != 1 {
            return Ok(None);
        }
        Ok(rows.pop())
    }

    pub(crate) fn insert<E: Entity>(&self, record: &mut E) -> DaoResult<FieldValue> {
        self.insert_one(record).during(Operation::InsertSingle)
    }

    pub(crate) fn insert_many<E: Entity>(&self, records: &[E]) -> DaoResult<BatchSummary> {
        let sql = query::insert_sql(self.mapping, false);
        self.run_batch(&sql, records, RowLayout::NonKey)
            .during(Operation::InsertBatch)
    }

    pub(crate) fn update<E: Entity>(&self, record: &E) -> DaoResult<usize> {
        if self.mapping.key_field().is_none() {
            return Err(DaoError::MissingKey {
                operation: Operation::UpdateSingle,
            });
        }
        if self.mapping.non_key_fields().next().is_none() {
            return Ok(0);
        }
        let run = || -> Result<usize, StorageCause> {
            let params = row_params(self.conn, self.mapping, record, RowLayout::NonKeyThenKey)?;
            let mut stmt = self.conn.prepare_cached(query::update_sql(self.mapping))?;
            Ok(stmt.execute(params_from_iter(params.iter()))?)
        };
        run().during(Operation::UpdateSingle)
    }

    pub(crate) fn update_many<E: Entity>(&self, records: &[E]) -> DaoResult<BatchSummary> {
        if self.mapping.key_field().is_none() {
            return Err(DaoError::MissingKey {
                operation: Operation::UpdateBatch,
            });
        }
        if self.mapping.non_key_fields().next().is_none() {
            return Ok(BatchSummary::default());
        }
        self.run_batch(
            query::update_sql(self.mapping),
            records,
            RowLayout::NonKeyThenKey,
        )
        .during(Operation::UpdateBatch)
    }

    pub(crate) fn delete<E: Entity>(&self, record: &E) -> DaoResult<usize> {
        let operation = Operation::DeleteSingle;
        let key_field = self.key_field(operation)?;
        let key = to_storage(self.conn, key_field, record).during(operation)?;
        if key.is_null() {
            return Err(DaoError::MissingKey { operation });
        }
        self.execute(&query::delete_by_key_sql(self.mapping), &[key])
            .during(operation)
    }

    pub(crate) fn delete_many<E: Entity>(&self, records: &[E]) -> DaoResult<BatchSummary> {
        let operation = Operation::DeleteList;
        let key_field = self.key_field(operation)?;
        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            let key = to_storage(self.conn, key_field, record).during(operation)?;
            if key.is_null() {
                return Err(DaoError::MissingKey { operation });
            }
            keys.push(key);
        }
        batch::delete_keys(self.conn, self.mapping, &keys, self.batch_size).during(operation)
    }

    pub(crate) fn delete_by_pk(&self, key: &FieldValue) -> DaoResult<usize> {
        check_key(self.mapping, key, Operation::DeleteSingle)?;
        self.execute(
            &query::delete_by_key_sql(self.mapping),
            std::slice::from_ref(key),
        )
        .during(Operation::DeleteSingle)
    }

    fn key_field(&self, operation: Operation) -> DaoResult<&'a FieldMapping> {
        self.mapping
            .key_field()
            .ok_or(DaoError::MissingKey { operation })
    }

    fn insert_one<E: Entity>(&self, record: &mut E) -> Result<FieldValue, StorageCause> {
        let key_field = self.mapping.key_field();
        let supplied = match key_field {
            Some(field) => !record.get_field(field.name())?.is_null(),
            None => false,
        };
        let layout = if supplied {
            RowLayout::All
        } else {
            RowLayout::NonKey
        };

        let params = row_params(self.conn, self.mapping, record, layout)?;
        let sql = query::insert_sql(self.mapping, supplied);
        self.conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(params.iter()))?;

        let Some(field) = key_field else {
            return Ok(FieldValue::Integer(self.conn.last_insert_rowid()));
        };
        if supplied {
            let stored = to_storage(self.conn, field, record)?;
            return from_storage(field, record, stored);
        }

        let generated = FieldValue::Integer(self.conn.last_insert_rowid());
        if field.kind() == FieldKind::Integer || field.converters().is_some() {
            return from_storage(field, record, generated);
        }
        debug!(
            "event=key_writeback module=dao status=skipped table={} kind={}",
            self.mapping.table_name(),
            field.kind()
        );
        Ok(generated)
    }

    fn fetch<E: Entity>(
        &self,
        sql: &str,
        params: &[FieldValue],
    ) -> Result<Vec<E>, StorageCause> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<Option<&FieldMapping>> = stmt
            .column_names()
            .into_iter()
            .map(|name| self.mapping.field_for_column(name))
            .collect();
        let unmapped = columns.iter().filter(|field| field.is_none()).count();
        if unmapped > 0 {
            debug!(
                "event=select_columns module=dao status=partial table={} unmapped={}",
                self.mapping.table_name(),
                unmapped
            );
        }

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(hydrate_row::<E>(&columns, row)?);
        }
        Ok(records)
    }

    fn execute(&self, sql: &str, params: &[FieldValue]) -> Result<usize, StorageCause> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn run_batch<E: Entity>(
        &self,
        sql: &str,
        records: &[E],
        layout: RowLayout,
    ) -> Result<BatchSummary, StorageCause> {
        let mut batch = Batch::new(self.conn, sql, self.batch_size);
        for record in records {
            batch.add(row_params(self.conn, self.mapping, record, layout)?)?;
        }
        Ok(batch.finish()?)
    }
}

/// Rejects keys that cannot address a row of this mapping.
///
/// Keyless mappings accept any non-null value for the synthesized key
/// column.
pub(crate) fn check_key(
    mapping: &Mapping,
    key: &FieldValue,
    operation: Operation,
) -> DaoResult<()> {
    if key.is_null() {
        return Err(DaoError::MissingKey { operation });
    }
    match mapping.key_field() {
        Some(field) if !field.kind().matches(key) => Err(DaoError::KeyTypeMismatch {
            expected: field.kind(),
            actual: key.type_name(),
        }),
        _ => Ok(()),
    }
}

//! Value marshalling between records, converters and SQLite.
//!
//! # Responsibility
//! - Read record fields into storage-bound values (`to_storage`).
//! - Assign raw column values back into records (`from_storage`).
//! - Bind `FieldValue`s as statement parameters.
//!
//! # Invariants
//! - Bound converters always run; without one, values pass through and are
//!   only coerced to the field's declared kind.
//! - Binding rules are ordered checks; the first matching rule applies.

use crate::dao::StorageCause;
use crate::mapping::{FieldMapping, Mapping};
use crate::model::entity::{Entity, LobKind};
use crate::model::value::{FieldError, FieldKind, FieldValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::trace;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, Row};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_T_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIME_SHORT_FORMAT: &str = "%H:%M";

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Self::Reference(key) => return key.to_sql(),
            Self::Date(date) => {
                ToSqlOutput::Owned(Value::Text(date.format(DATE_FORMAT).to_string()))
            }
            Self::DateTime(at) => {
                ToSqlOutput::Owned(Value::Text(at.format(DATETIME_FORMAT).to_string()))
            }
            Self::Time(time) => {
                ToSqlOutput::Owned(Value::Text(time.format(TIME_FORMAT).to_string()))
            }
            Self::Enum(name) => ToSqlOutput::Borrowed(ValueRef::Text(name.as_bytes())),
            // Large payloads are bound in place, never copied into the statement.
            Self::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Self::Bytes(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            Self::Uuid(id) => ToSqlOutput::Owned(Value::Text(id.hyphenated().to_string())),
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(flag) => ToSqlOutput::Owned(Value::Integer(i64::from(*flag))),
            Self::Integer(number) => ToSqlOutput::Owned(Value::Integer(*number)),
            Self::Real(number) => ToSqlOutput::Owned(Value::Real(*number)),
        };
        Ok(output)
    }
}

/// Reads one field of `record` and prepares it for binding.
///
/// The store converter, if any, receives the connection of the running
/// operation.
pub fn to_storage<E: Entity>(
    conn: &Connection,
    field: &FieldMapping,
    record: &E,
) -> Result<FieldValue, StorageCause> {
    let value = record.get_field(field.name())?;
    let value = match field.converters() {
        Some(binding) => binding.store.store(conn, value)?,
        None => value,
    };
    Ok(apply_lob(field, value)?)
}

/// Converts a raw column value for `field`, assigns it into `record` and
/// returns the assigned value.
pub fn from_storage<E: Entity>(
    field: &FieldMapping,
    record: &mut E,
    raw: FieldValue,
) -> Result<FieldValue, StorageCause> {
    let value = match field.converters() {
        Some(binding) => binding.retrieve.retrieve(raw)?,
        None => coerce(field, raw)?,
    };
    record.set_field(field.name(), value.clone())?;
    Ok(value)
}

/// Which fields a row binds, and where the key goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// Non-key fields only (generated keys).
    NonKey,
    /// Every field in declaration order (caller-supplied key).
    All,
    /// Non-key fields, then the key for a trailing `WHERE key=?`.
    NonKeyThenKey,
}

/// Binds one record's fields in declaration order.
///
/// Shared by single-record and batched statements.
pub fn row_params<E: Entity>(
    conn: &Connection,
    mapping: &Mapping,
    record: &E,
    layout: RowLayout,
) -> Result<Vec<FieldValue>, StorageCause> {
    let mut params = Vec::with_capacity(mapping.fields().len());
    for field in mapping.fields() {
        if field.is_key() && layout != RowLayout::All {
            continue;
        }
        params.push(to_storage(conn, field, record)?);
    }
    if layout == RowLayout::NonKeyThenKey {
        if let Some(key) = mapping.key_field() {
            params.push(to_storage(conn, key, record)?);
        }
    }
    Ok(params)
}

/// Builds one record from a result row.
///
/// `columns` holds the resolved field of each result column; unmapped
/// columns are skipped. Enum fields hydrate straight from their symbolic
/// name.
pub fn hydrate_row<E: Entity>(
    columns: &[Option<&FieldMapping>],
    row: &Row<'_>,
) -> Result<E, StorageCause> {
    let mut record = E::default();
    for (index, field) in columns.iter().enumerate() {
        let Some(field) = field else {
            continue;
        };
        let raw = raw_value(row.get_ref(index)?);
        if field.kind() == FieldKind::Enum {
            let value = coerce(field, raw)?;
            record.set_field(field.name(), value)?;
        } else {
            from_storage(field, &mut record, raw)?;
        }
    }
    Ok(record)
}

/// Copies a borrowed column value into a `FieldValue`.
pub fn raw_value(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(number) => FieldValue::Integer(number),
        ValueRef::Real(number) => FieldValue::Real(number),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => FieldValue::Text(text.to_string()),
            Err(_) => FieldValue::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => FieldValue::Bytes(bytes.to_vec()),
    }
}

fn apply_lob(field: &FieldMapping, value: FieldValue) -> Result<FieldValue, FieldError> {
    match (field.lob(), value) {
        (Some(LobKind::Clob), FieldValue::Bytes(bytes)) => String::from_utf8(bytes)
            .map(FieldValue::Text)
            .map_err(|_| FieldError::invalid(field.name(), "character large object is not UTF-8")),
        (Some(LobKind::Blob), FieldValue::Text(text)) => Ok(FieldValue::Bytes(text.into_bytes())),
        (_, value) => Ok(value),
    }
}

/// Interprets a raw column value as the field's declared kind.
pub fn coerce(field: &FieldMapping, raw: FieldValue) -> Result<FieldValue, FieldError> {
    if raw.is_null() || field.kind().matches(&raw) {
        return Ok(raw);
    }

    let name = field.name();
    let coerced = match (field.kind(), raw) {
        (FieldKind::Real, FieldValue::Integer(number)) => FieldValue::Real(number as f64),
        (FieldKind::Bool, FieldValue::Integer(number)) => FieldValue::Bool(number != 0),
        (FieldKind::Text, FieldValue::Bytes(bytes)) => String::from_utf8(bytes)
            .map(FieldValue::Text)
            .map_err(|_| FieldError::invalid(name, "stored text is not UTF-8"))?,
        (FieldKind::Bytes, FieldValue::Text(text)) => FieldValue::Bytes(text.into_bytes()),
        (FieldKind::Date, FieldValue::Text(text)) => NaiveDate::parse_from_str(&text, DATE_FORMAT)
            .map(FieldValue::Date)
            .map_err(|err| FieldError::invalid(name, format!("`{text}`: {err}")))?,
        (FieldKind::DateTime, FieldValue::Text(text)) => parse_datetime(&text)
            .map(FieldValue::DateTime)
            .map_err(|err| FieldError::invalid(name, format!("`{text}`: {err}")))?,
        (FieldKind::DateTime, FieldValue::Integer(seconds)) => {
            chrono::DateTime::from_timestamp(seconds, 0)
                .map(|at| FieldValue::DateTime(at.naive_utc()))
                .ok_or_else(|| FieldError::invalid(name, format!("timestamp {seconds} out of range")))?
        }
        (FieldKind::Time, FieldValue::Text(text)) => parse_time(&text)
            .map(FieldValue::Time)
            .map_err(|err| FieldError::invalid(name, format!("`{text}`: {err}")))?,
        (FieldKind::Uuid, FieldValue::Text(text)) => Uuid::parse_str(&text)
            .map(FieldValue::Uuid)
            .map_err(|err| FieldError::invalid(name, format!("`{text}`: {err}")))?,
        (FieldKind::Uuid, FieldValue::Bytes(bytes)) => Uuid::from_slice(&bytes)
            .map(FieldValue::Uuid)
            .map_err(|err| FieldError::invalid(name, err.to_string()))?,
        (FieldKind::Enum, FieldValue::Text(text)) => FieldValue::Enum(text),
        (FieldKind::Reference, key) => FieldValue::Reference(Box::new(key)),
        (kind, other) => {
            return Err(FieldError::TypeMismatch {
                field: name.to_string(),
                expected: kind.as_str(),
                found: other.type_name(),
            })
        }
    };

    trace!(
        "event=value_coerce module=marshal field={} kind={}",
        name,
        field.kind()
    );
    Ok(coerced)
}

fn parse_datetime(text: &str) -> chrono::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, DATETIME_T_FORMAT))
}

fn parse_time(text: &str) -> chrono::ParseResult<NaiveTime> {
    NaiveTime::parse_from_str(text, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(text, TIME_SHORT_FORMAT))
}

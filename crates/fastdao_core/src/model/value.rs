//! Dynamic field values exchanged between records and storage.
//!
//! # Responsibility
//! - Represent every value a mapped field can hold, independent of SQLite.
//! - Provide typed conversions for entity implementations.
//!
//! # Invariants
//! - `FieldValue::Null` is the only representation of an absent value.
//! - `Enum` carries the symbolic variant name, never an ordinal.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Declared storage type of one mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Real,
    Bool,
    Text,
    Bytes,
    /// Calendar date without time of day.
    Date,
    /// Date and time of day without zone.
    DateTime,
    /// Time of day without date.
    Time,
    Uuid,
    /// Enumerated value stored by symbolic name.
    Enum,
    /// Reference to another entity, stored as that entity's key value.
    Reference,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Bool => "bool",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Uuid => "uuid",
            Self::Enum => "enum",
            Self::Reference => "reference",
        }
    }

    /// Returns whether a non-null runtime value has this declared kind.
    pub fn matches(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Integer, FieldValue::Integer(_))
                | (Self::Real, FieldValue::Real(_))
                | (Self::Bool, FieldValue::Bool(_))
                | (Self::Text, FieldValue::Text(_))
                | (Self::Bytes, FieldValue::Bytes(_))
                | (Self::Date, FieldValue::Date(_))
                | (Self::DateTime, FieldValue::DateTime(_))
                | (Self::Time, FieldValue::Time(_))
                | (Self::Uuid, FieldValue::Uuid(_))
                | (Self::Enum, FieldValue::Enum(_))
                | (Self::Reference, FieldValue::Reference(_))
        )
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Uuid(Uuid),
    /// Symbolic variant name of an enumerated value.
    Enum(String),
    /// Key value of a referenced entity.
    Reference(Box<FieldValue>),
}

impl FieldValue {
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::Enum(name.into())
    }

    /// Wraps the key value of a referenced entity.
    pub fn reference(key: impl Into<FieldValue>) -> Self {
        match key.into() {
            Self::Null => Self::Null,
            key => Self::Reference(Box::new(key)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short runtime type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::Time(_) => "time",
            Self::Uuid(_) => "uuid",
            Self::Enum(_) => "enum",
            Self::Reference(_) => "reference",
        }
    }

    /// Converts into a typed Rust value for assignment into a record.
    pub fn into_typed<T: FromField>(self, field: &str) -> Result<T, FieldError> {
        T::from_field(self).map_err(|err| err.for_field(field))
    }
}

/// Errors raised while reading or assigning record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    /// The record type has no field with this name.
    UnknownField(String),
    /// A value of the wrong runtime type was offered to a field.
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A stored value could not be interpreted for the field.
    InvalidValue { field: String, message: String },
}

impl FieldError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    fn for_field(self, name: &str) -> Self {
        match self {
            Self::TypeMismatch {
                expected, found, ..
            } => Self::TypeMismatch {
                field: name.to_string(),
                expected,
                found,
            },
            Self::InvalidValue { message, .. } => Self::InvalidValue {
                field: name.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField(name) => write!(f, "unknown field `{name}`"),
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` expects {expected}, got {found}"),
            Self::InvalidValue { field, message } => {
                write!(f, "invalid value for field `{field}`: {message}")
            }
        }
    }
}

impl Error for FieldError {}

/// Typed extraction from a `FieldValue`.
pub trait FromField: Sized {
    fn from_field(value: FieldValue) -> Result<Self, FieldError>;
}

fn mismatch(expected: &'static str, value: &FieldValue) -> FieldError {
    FieldError::TypeMismatch {
        field: String::new(),
        expected,
        found: value.type_name(),
    }
}

impl<T: FromField> FromField for Option<T> {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Null => Ok(None),
            value => T::from_field(value).map(Some),
        }
    }
}

impl FromField for FieldValue {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        Ok(value)
    }
}

impl FromField for i64 {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Integer(v) => Ok(v),
            FieldValue::Reference(key) => i64::from_field(*key),
            other => Err(mismatch("integer", &other)),
        }
    }
}

impl FromField for i32 {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        let wide = i64::from_field(value)?;
        i32::try_from(wide)
            .map_err(|_| FieldError::invalid("", format!("{wide} does not fit in i32")))
    }
}

impl FromField for f64 {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Real(v) => Ok(v),
            FieldValue::Integer(v) => Ok(v as f64),
            other => Err(mismatch("real", &other)),
        }
    }
}

impl FromField for bool {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Bool(v) => Ok(v),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl FromField for String {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Text(v) | FieldValue::Enum(v) => Ok(v),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl FromField for Vec<u8> {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Bytes(v) => Ok(v),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl FromField for NaiveDate {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Date(v) => Ok(v),
            other => Err(mismatch("date", &other)),
        }
    }
}

impl FromField for NaiveDateTime {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::DateTime(v) => Ok(v),
            other => Err(mismatch("datetime", &other)),
        }
    }
}

impl FromField for NaiveTime {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Time(v) => Ok(v),
            other => Err(mismatch("time", &other)),
        }
    }
}

impl FromField for Uuid {
    fn from_field(value: FieldValue) -> Result<Self, FieldError> {
        match value {
            FieldValue::Uuid(v) => Ok(v),
            FieldValue::Reference(key) => Uuid::from_field(*key),
            other => Err(mismatch("uuid", &other)),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Real,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    NaiveTime => Time,
    Uuid => Uuid,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

//! Placeholder expansion and statement text for mapped entities.
//!
//! # Responsibility
//! - Expand `?` templates with scalar and collection arguments into
//!   fully positional SQL.
//! - Build the fixed-shape INSERT/UPDATE/DELETE/SELECT text of a mapping.
//!
//! # Invariants
//! - Column lists follow mapping declaration order.
//! - The key column never appears in a non-key column list.
//! - Expansion never yields SQL whose marker count differs from its bound
//!   value count.

use crate::dao::{DaoError, DaoResult};
use crate::mapping::Mapping;
use crate::model::value::FieldValue;

/// One positional argument of a query template.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg {
    Value(FieldValue),
    /// Expands into a parenthesized group, one marker per element.
    List(Vec<QueryArg>),
}

impl QueryArg {
    /// Builds a list argument from any sequence of scalar values.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<FieldValue>,
    {
        Self::List(items.into_iter().map(|item| Self::Value(item.into())).collect())
    }

    /// Binds a byte buffer as one scalar value.
    ///
    /// `Vec<u8>` converts into a list of elements, so byte payloads go
    /// through this constructor instead.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Value(FieldValue::Bytes(bytes.into()))
    }

    /// Builds a list argument whose elements may themselves be lists.
    pub fn nested(items: Vec<QueryArg>) -> Self {
        Self::List(items)
    }
}

macro_rules! impl_scalar_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for QueryArg {
                fn from(value: $ty) -> Self {
                    Self::Value(value.into())
                }
            }
        )*
    };
}

impl_scalar_arg!(
    FieldValue,
    bool,
    i64,
    i32,
    u32,
    f64,
    String,
    &str,
    uuid::Uuid,
    chrono::NaiveDate,
    chrono::NaiveDateTime,
    chrono::NaiveTime,
);

impl<T: Into<FieldValue>> From<Vec<T>> for QueryArg {
    fn from(items: Vec<T>) -> Self {
        Self::list(items)
    }
}

/// Positional SQL plus its bound values in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQuery {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

enum Slot<'a> {
    Real(&'a QueryArg),
    Escaped,
}

/// A marker already written as `(?)` in the template; list arguments then
/// reuse the template's parentheses instead of adding their own.
type Wrapped = bool;

/// Expands a `?` template against positional arguments.
///
/// A `?` preceded by a backslash emits a literal `?` and is skipped while
/// real markers consume arguments. Arguments left over after every real
/// marker was served bind, in order, to the escaped markers.
///
/// List arguments expand to `(?,?,...)`; when the marker is already
/// parenthesized in the template (`IN (?)`) only the inner markers are
/// emitted.
pub fn expand_placeholders(template: &str, args: &[QueryArg]) -> DaoResult<ExpandedQuery> {
    let mut pieces: Vec<(String, Slot<'_>, Wrapped)> = Vec::new();
    let mut text = String::with_capacity(template.len());
    let mut remaining = args.iter();
    let mut missing = 0usize;

    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'?') => {
                chars.next();
                let wrapped = text.ends_with('(') && chars.peek() == Some(&')');
                pieces.push((std::mem::take(&mut text), Slot::Escaped, wrapped));
            }
            '?' => match remaining.next() {
                Some(arg) => {
                    let wrapped = text.ends_with('(') && chars.peek() == Some(&')');
                    pieces.push((std::mem::take(&mut text), Slot::Real(arg), wrapped));
                }
                None => missing += 1,
            },
            other => text.push(other),
        }
    }

    let mut sql = String::with_capacity(template.len() + args.len() * 2);
    let mut params = Vec::with_capacity(args.len());
    let mut markers = 0usize;

    for (before, slot, wrapped) in &pieces {
        sql.push_str(before);
        match slot {
            Slot::Real(arg) => markers += render_slot(arg, *wrapped, &mut sql, &mut params),
            Slot::Escaped => match remaining.next() {
                Some(arg) => markers += render_slot(arg, *wrapped, &mut sql, &mut params),
                None => {
                    sql.push('?');
                    markers += 1;
                }
            },
        }
    }
    sql.push_str(&text);

    let extra: usize = remaining.map(count_values).sum();
    let placeholders = markers + missing;
    let arguments = params.len() + extra;
    if placeholders != arguments {
        return Err(DaoError::ArgumentMismatch {
            placeholders,
            arguments,
        });
    }

    Ok(ExpandedQuery { sql, params })
}

fn render_slot(
    arg: &QueryArg,
    wrapped: Wrapped,
    sql: &mut String,
    params: &mut Vec<FieldValue>,
) -> usize {
    match arg {
        QueryArg::List(items) if wrapped => render_items(items, sql, params),
        _ => render_arg(arg, sql, params),
    }
}

fn render_arg(arg: &QueryArg, sql: &mut String, params: &mut Vec<FieldValue>) -> usize {
    match arg {
        QueryArg::Value(value) => {
            sql.push('?');
            params.push(value.clone());
            1
        }
        QueryArg::List(items) => {
            sql.push('(');
            let markers = render_items(items, sql, params);
            sql.push(')');
            markers
        }
    }
}

fn render_items(items: &[QueryArg], sql: &mut String, params: &mut Vec<FieldValue>) -> usize {
    let mut markers = 0;
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            sql.push(',');
        }
        markers += render_arg(item, sql, params);
    }
    markers
}

fn count_values(arg: &QueryArg) -> usize {
    match arg {
        QueryArg::Value(_) => 1,
        QueryArg::List(items) => items.iter().map(count_values).sum(),
    }
}

fn markers(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for index in 0..count {
        if index > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// INSERT text. Without `include_key` the key column is left to the
/// database; that shape is built once per mapping.
pub fn insert_sql(mapping: &Mapping, include_key: bool) -> String {
    if !include_key {
        return mapping
            .insert_sql
            .get_or_init(|| build_insert(mapping, false))
            .clone();
    }
    build_insert(mapping, true)
}

fn build_insert(mapping: &Mapping, include_key: bool) -> String {
    let columns: Vec<&str> = mapping
        .fields()
        .iter()
        .filter(|field| include_key || !field.is_key())
        .map(|field| field.column())
        .collect();

    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", mapping.table_name());
    }

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        mapping.table_name(),
        columns.join(","),
        markers(columns.len())
    )
}

/// UPDATE text: every non-key column in SET, key bound last.
///
/// Computed once per mapping; repeated calls return the same text.
pub fn update_sql(mapping: &Mapping) -> &str {
    mapping.update_sql.get_or_init(|| {
        let assignments: Vec<String> = mapping
            .non_key_fields()
            .map(|field| format!("{}=?", field.column()))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {}=?",
            mapping.table_name(),
            assignments.join(","),
            mapping.pk_column()
        )
    })
}

/// DELETE text matching `count` keys.
pub fn delete_in_sql(mapping: &Mapping, count: usize) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        mapping.table_name(),
        mapping.pk_column(),
        markers(count)
    )
}

pub fn delete_by_key_sql(mapping: &Mapping) -> String {
    format!(
        "DELETE FROM {} WHERE {}=?",
        mapping.table_name(),
        mapping.pk_column()
    )
}

pub fn select_all_sql(mapping: &Mapping) -> String {
    format!("SELECT * FROM {}", mapping.table_name())
}

pub fn select_by_key_sql(mapping: &Mapping) -> String {
    format!(
        "SELECT * FROM {} WHERE {}=?",
        mapping.table_name(),
        mapping.pk_column()
    )
}

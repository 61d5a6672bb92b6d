//! Entity contract and declarative mapping descriptor.
//!
//! # Responsibility
//! - Define what a record type must provide to be persisted.
//! - Carry table/column overrides, key designation, large-object
//!   classification and converter bindings as plain data.
//!
//! # Invariants
//! - Field declaration order in the descriptor is the column order used by
//!   every generated statement.
//! - A descriptor is pure input; validation happens in mapping derivation.

use crate::convert::{ConverterBinding, RetrieveConverter, StoreConverter};
use crate::model::value::{FieldError, FieldKind, FieldValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A record type persisted as table rows.
///
/// Hydration creates a fresh `Default` value per row and assigns each mapped
/// column through `set_field`.
pub trait Entity: Default + 'static {
    /// Declares table, fields and per-field metadata.
    ///
    /// Called once per type; the derived mapping is memoized.
    fn descriptor() -> EntityDescriptor;

    /// Reads the current value of a declared field.
    fn get_field(&self, field: &str) -> Result<FieldValue, FieldError>;

    /// Assigns a value into a declared field.
    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), FieldError>;
}

/// Large-object classification of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobKind {
    /// Character large object.
    Clob,
    /// Binary large object.
    Blob,
}

/// Declaration of one persisted field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
    pub(crate) column: Option<String>,
    pub(crate) primary_key: bool,
    pub(crate) lob: Option<LobKind>,
    pub(crate) converters: Option<ConverterBinding>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            column: None,
            primary_key: false,
            lob: None,
            converters: None,
        }
    }

    /// Shorthand for a primary-key field.
    pub fn key(name: impl Into<String>, kind: FieldKind) -> Self {
        Self::new(name, kind).primary_key()
    }

    /// Overrides the column name, which otherwise equals the field name.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn lob(mut self, kind: LobKind) -> Self {
        self.lob = Some(kind);
        self
    }

    pub fn converters(mut self, binding: ConverterBinding) -> Self {
        self.converters = Some(binding);
        self
    }

    /// Binds a store converter, keeping any retrieve converter already set.
    pub fn store_with(mut self, store: Arc<dyn StoreConverter>) -> Self {
        let binding = self.converters.take().unwrap_or_default();
        self.converters = Some(ConverterBinding::new(store, binding.retrieve));
        self
    }

    /// Binds a retrieve converter, keeping any store converter already set.
    pub fn retrieve_with(mut self, retrieve: Arc<dyn RetrieveConverter>) -> Self {
        let binding = self.converters.take().unwrap_or_default();
        self.converters = Some(ConverterBinding::new(binding.store, retrieve));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Explicit mapping metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub(crate) type_name: String,
    pub(crate) table: Option<String>,
    pub(crate) fields: Vec<FieldDef>,
}

impl EntityDescriptor {
    /// Starts a descriptor named after `E`; the short type name is the
    /// default table name.
    pub fn of<E: ?Sized>() -> Self {
        Self::named(short_type_name(std::any::type_name::<E>()))
    }

    pub fn named(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: None,
            fields: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::{short_type_name, EntityDescriptor, FieldDef};
    use crate::convert::{retrieve_fn, store_fn};
    use crate::model::value::FieldKind;

    struct Invoice;

    #[test]
    fn default_name_is_the_last_path_segment() {
        assert_eq!(EntityDescriptor::of::<Invoice>().type_name(), "Invoice");
        assert_eq!(short_type_name("a::b::Wrapper<c::D>"), "Wrapper");
    }

    #[test]
    fn store_and_retrieve_builders_compose() {
        let field = FieldDef::new("body", FieldKind::Text)
            .store_with(store_fn(|_, value| Ok(value)))
            .retrieve_with(retrieve_fn(|value| Ok(value)));
        assert!(field.converters.is_some());
        assert_eq!(field.name(), "body");
    }
}

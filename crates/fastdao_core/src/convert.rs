//! Converter contract for custom-typed and large-object fields.
//!
//! # Responsibility
//! - Define the store/retrieve pair applied to one mapped field.
//! - Provide the identity default and closure adapters.
//!
//! # Invariants
//! - Store converters run with the connection of the operation being
//!   executed, never a separately acquired one.
//! - Converters are stateless from the engine's point of view; one instance
//!   is shared by every call for the field.

use crate::model::value::FieldValue;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

pub type ConvertResult<T> = Result<T, ConvertError>;

/// Failure raised by a converter.
#[derive(Debug)]
pub struct ConvertError {
    message: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ConvertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl Display for ConvertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conversion failed: {}", self.message)
    }
}

impl Error for ConvertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

/// Transforms an in-memory value into its storage representation.
pub trait StoreConverter: Send + Sync {
    fn store(&self, conn: &Connection, value: FieldValue) -> ConvertResult<FieldValue>;
}

/// Transforms a raw column value into the in-memory representation.
pub trait RetrieveConverter: Send + Sync {
    fn retrieve(&self, value: FieldValue) -> ConvertResult<FieldValue>;
}

/// Pass-through converter used when a field declares none.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConverter;

impl StoreConverter for IdentityConverter {
    fn store(&self, _conn: &Connection, value: FieldValue) -> ConvertResult<FieldValue> {
        Ok(value)
    }
}

impl RetrieveConverter for IdentityConverter {
    fn retrieve(&self, value: FieldValue) -> ConvertResult<FieldValue> {
        Ok(value)
    }
}

struct StoreFn<F>(F);

impl<F> StoreConverter for StoreFn<F>
where
    F: Fn(&Connection, FieldValue) -> ConvertResult<FieldValue> + Send + Sync,
{
    fn store(&self, conn: &Connection, value: FieldValue) -> ConvertResult<FieldValue> {
        (self.0)(conn, value)
    }
}

struct RetrieveFn<F>(F);

impl<F> RetrieveConverter for RetrieveFn<F>
where
    F: Fn(FieldValue) -> ConvertResult<FieldValue> + Send + Sync,
{
    fn retrieve(&self, value: FieldValue) -> ConvertResult<FieldValue> {
        (self.0)(value)
    }
}

/// Wraps a closure as a store converter.
pub fn store_fn<F>(f: F) -> Arc<dyn StoreConverter>
where
    F: Fn(&Connection, FieldValue) -> ConvertResult<FieldValue> + Send + Sync + 'static,
{
    Arc::new(StoreFn(f))
}

/// Wraps a closure as a retrieve converter.
pub fn retrieve_fn<F>(f: F) -> Arc<dyn RetrieveConverter>
where
    F: Fn(FieldValue) -> ConvertResult<FieldValue> + Send + Sync + 'static,
{
    Arc::new(RetrieveFn(f))
}

/// Store/retrieve pair bound to one field.
#[derive(Clone)]
pub struct ConverterBinding {
    pub store: Arc<dyn StoreConverter>,
    pub retrieve: Arc<dyn RetrieveConverter>,
}

impl ConverterBinding {
    pub fn new(store: Arc<dyn StoreConverter>, retrieve: Arc<dyn RetrieveConverter>) -> Self {
        Self { store, retrieve }
    }

    pub fn store_only(store: Arc<dyn StoreConverter>) -> Self {
        Self::new(store, Arc::new(IdentityConverter))
    }

    pub fn retrieve_only(retrieve: Arc<dyn RetrieveConverter>) -> Self {
        Self::new(Arc::new(IdentityConverter), retrieve)
    }
}

impl Default for ConverterBinding {
    fn default() -> Self {
        Self::new(Arc::new(IdentityConverter), Arc::new(IdentityConverter))
    }
}

impl Debug for ConverterBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterBinding").finish_non_exhaustive()
    }
}

//! Mapping derivation and the per-type mapping registry.
//!
//! # Responsibility
//! - Turn an `EntityDescriptor` into an immutable table mapping.
//! - Memoize one mapping per entity type for the process lifetime.
//!
//! # Invariants
//! - `fields()` preserves declaration order; generated SQL relies on it.
//! - Field and column names are unique within one mapping.
//! - At most one field bears the primary key. Without one, the key column
//!   is `<table>_id` and every field is an ordinary column.
//! - A mapping is never mutated after derivation apart from its
//!   write-once statement caches.

use crate::convert::ConverterBinding;
use crate::model::entity::{Entity, EntityDescriptor, LobKind};
use crate::model::value::{FieldError, FieldKind, FieldValue};
use log::info;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::any::TypeId;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

static REGISTRY: Lazy<RwLock<HashMap<TypeId, Arc<Mapping>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Reasons a descriptor cannot be turned into a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    NoFields {
        entity: String,
    },
    DuplicateField {
        entity: String,
        field: String,
    },
    DuplicateColumn {
        entity: String,
        column: String,
    },
    MultipleKeys {
        entity: String,
        first: String,
        second: String,
    },
    InvalidIdentifier {
        entity: String,
        identifier: String,
    },
    /// Entity references cannot themselves be keys.
    ReferenceKey {
        entity: String,
        field: String,
    },
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFields { entity } => write!(f, "entity `{entity}` declares no fields"),
            Self::DuplicateField { entity, field } => {
                write!(f, "entity `{entity}` declares field `{field}` twice")
            }
            Self::DuplicateColumn { entity, column } => {
                write!(f, "entity `{entity}` maps column `{column}` twice")
            }
            Self::MultipleKeys {
                entity,
                first,
                second,
            } => write!(
                f,
                "entity `{entity}` marks both `{first}` and `{second}` as primary key"
            ),
            Self::InvalidIdentifier { entity, identifier } => write!(
                f,
                "entity `{entity}` uses `{identifier}`, which is not a plain SQL identifier"
            ),
            Self::ReferenceKey { entity, field } => write!(
                f,
                "entity `{entity}` cannot use reference field `{field}` as primary key"
            ),
        }
    }
}

impl Error for MappingError {}

/// Resolved mapping of one field.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    name: String,
    column: String,
    kind: FieldKind,
    lob: Option<LobKind>,
    converters: Option<ConverterBinding>,
    is_key: bool,
}

impl FieldMapping {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn lob(&self) -> Option<LobKind> {
        self.lob
    }

    pub fn converters(&self) -> Option<&ConverterBinding> {
        self.converters.as_ref()
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }
}

/// Immutable table mapping of one entity type.
#[derive(Debug)]
pub struct Mapping {
    entity: String,
    table_name: String,
    pk_column: String,
    key_index: Option<usize>,
    fields: Vec<FieldMapping>,
    by_field: HashMap<String, usize>,
    by_column: HashMap<String, usize>,
    pub(crate) update_sql: OnceCell<String>,
    pub(crate) insert_sql: OnceCell<String>,
}

impl Mapping {
    /// Validates a descriptor and resolves table, key and column names.
    pub fn derive(descriptor: EntityDescriptor) -> Result<Self, MappingError> {
        let EntityDescriptor {
            type_name: entity,
            table,
            fields: declared,
        } = descriptor;

        if declared.is_empty() {
            return Err(MappingError::NoFields { entity });
        }

        let table_name = table.unwrap_or_else(|| entity.clone());
        ensure_identifier(&entity, &table_name)?;

        let mut fields = Vec::with_capacity(declared.len());
        let mut by_field = HashMap::with_capacity(declared.len());
        let mut by_column = HashMap::with_capacity(declared.len());
        let mut key_index: Option<usize> = None;

        for (index, def) in declared.into_iter().enumerate() {
            ensure_identifier(&entity, &def.name)?;
            let column = def.column.unwrap_or_else(|| def.name.clone());
            ensure_identifier(&entity, &column)?;

            if by_field.insert(def.name.clone(), index).is_some() {
                return Err(MappingError::DuplicateField {
                    entity,
                    field: def.name,
                });
            }
            if by_column.insert(column.clone(), index).is_some() {
                return Err(MappingError::DuplicateColumn { entity, column });
            }

            if def.primary_key {
                if let Some(first) = key_index {
                    let first: &FieldMapping = &fields[first];
                    return Err(MappingError::MultipleKeys {
                        first: first.name.clone(),
                        entity,
                        second: def.name,
                    });
                }
                if def.kind == FieldKind::Reference {
                    return Err(MappingError::ReferenceKey {
                        entity,
                        field: def.name,
                    });
                }
                key_index = Some(index);
            }

            fields.push(FieldMapping {
                name: def.name,
                column,
                kind: def.kind,
                lob: def.lob,
                converters: def.converters,
                is_key: def.primary_key,
            });
        }

        let pk_column = match key_index {
            Some(index) => fields[index].column.clone(),
            None => format!("{table_name}_id"),
        };

        info!(
            "event=mapping_derive module=mapping status=ok entity={} table={} pk={} fields={} keyed={}",
            entity,
            table_name,
            pk_column,
            fields.len(),
            key_index.is_some()
        );

        Ok(Self {
            entity,
            table_name,
            pk_column,
            key_index,
            fields,
            by_field,
            by_column,
            update_sql: OnceCell::new(),
            insert_sql: OnceCell::new(),
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn pk_column(&self) -> &str {
        &self.pk_column
    }

    /// Field bearing the primary key, if one was designated.
    pub fn key_field(&self) -> Option<&FieldMapping> {
        self.key_index.map(|index| &self.fields[index])
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    /// Fields that are not the primary key, in declaration order.
    pub fn non_key_fields(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().filter(|field| !field.is_key)
    }

    /// `(field, column)` pairs in declaration order.
    pub fn field_to_column(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|field| (field.name.as_str(), field.column.as_str()))
    }

    pub fn column_to_field(&self, column: &str) -> Option<&str> {
        self.by_column
            .get(column)
            .map(|&index| self.fields[index].name.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.by_field.get(name).map(|&index| &self.fields[index])
    }

    /// Resolves a result column to its field.
    ///
    /// Columns are matched by mapped column name first, then by field name.
    pub fn field_for_column(&self, column: &str) -> Option<&FieldMapping> {
        self.by_column
            .get(column)
            .or_else(|| self.by_field.get(column))
            .map(|&index| &self.fields[index])
    }

    /// Reads the key value of a record, `None` for keyless mappings.
    pub fn key_of<E: Entity>(&self, record: &E) -> Result<Option<FieldValue>, FieldError> {
        match self.key_field() {
            Some(field) => record.get_field(field.name()).map(Some),
            None => Ok(None),
        }
    }
}

fn ensure_identifier(entity: &str, identifier: &str) -> Result<(), MappingError> {
    if IDENTIFIER_RE.is_match(identifier) {
        return Ok(());
    }
    Err(MappingError::InvalidIdentifier {
        entity: entity.to_string(),
        identifier: identifier.to_string(),
    })
}

/// Returns the mapping of `E`, deriving it on first use.
///
/// Failed derivations are not cached; every call reports the same error.
pub fn mapping_for<E: Entity>() -> Result<Arc<Mapping>, MappingError> {
    let type_id = TypeId::of::<E>();
    if let Some(mapping) = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
    {
        return Ok(Arc::clone(mapping));
    }

    let derived = Arc::new(Mapping::derive(E::descriptor())?);
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(registry.entry(type_id).or_insert(derived)))
}

//! Lightweight object-relational mapping over SQLite.
//! Record types declare a descriptor once; DAOs build and run the SQL.

pub mod config;
pub mod convert;
pub mod dao;
pub mod db;
pub mod logging;
pub mod mapping;
pub mod marshal;
pub mod model;
pub mod query;

pub use config::{ConfigError, Settings};
pub use convert::{
    retrieve_fn, store_fn, ConvertError, ConvertResult, ConverterBinding, IdentityConverter,
    RetrieveConverter, StoreConverter,
};
pub use dao::{
    BatchSummary, Dao, DaoError, DaoResult, Operation, ScopeState, StorageCause,
    TransactionScope,
};
pub use db::{ConnectionGuard, ConnectionSource, DbError, DbResult, SqliteSource};
pub use logging::{default_log_level, init_logging, logging_status};
pub use mapping::{mapping_for, FieldMapping, Mapping, MappingError};
pub use model::entity::{Entity, EntityDescriptor, FieldDef, LobKind};
pub use model::value::{FieldError, FieldKind, FieldValue, FromField};
pub use query::{expand_placeholders, ExpandedQuery, QueryArg};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

//! Record model shared by mapping, marshalling and the DAO surface.
//!
//! # Responsibility
//! - Define the entity contract and its declarative descriptor.
//! - Define the dynamic value type exchanged with storage.
//!
//! # Invariants
//! - Entities expose fields by declared name only.
//! - Values crossing the storage boundary are `FieldValue`s.

pub mod entity;
pub mod value;

//! Declarative relationships
//!
//! Four kinds (belongs_to, has_one, has_many, has_and_belongs_to_many) held
//! in a single [`RelationRegistry`] per model, with optional `through`
//! chaining and polymorphic type/id pairs.

pub mod metadata;
pub mod registry;

pub use metadata::{Dependent, RelationDescriptor, RelationKind, ResolvedRelation};
pub use registry::RelationRegistry;

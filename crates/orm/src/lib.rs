//! # strata-orm: Active record data layer
//!
//! Models are declared at runtime with [`ModelDef`] and registered on an
//! [`Orm`], which owns the connection registry. A [`Model`] handle finds,
//! counts and bulk-updates rows; a [`Record`] is one row with its loaded
//! associations, validation errors and savepoint stack.
//!
//! SQLite and MySQL are supported through the [`backends::Adapter`] trait.

pub mod backends;
pub mod config;
pub mod connection;
pub mod error;
pub mod inflector;
pub mod logging;
pub mod migrations;
pub mod model;
pub mod orm;
pub mod query;
pub mod relationships;
pub mod transactions;
pub mod validation;
pub mod value;

pub(crate) mod loading;

// Re-export core types
pub use backends::{AdapterKind, ColumnType, FieldOptions, IndexOptions, TableOptions};
pub use config::{DatabaseConfig, DatabaseConfigs, Environment};
pub use connection::{Connection, ConnectionRegistry};
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use migrations::{Migration, MigrationRunner, MigrationStatus};
pub use model::{
    Arg, CallbackKind, Dispatched, Found, Loaded, Model, ModelDef, ModelMeta, ModelObserver, ObservedEvent, Record,
};
pub use orm::Orm;
pub use query::{Calculation, Conditions, FindArg, FindMode, FindOptions, IncludeTree};
pub use relationships::{Dependent, RelationDescriptor, RelationKind};
pub use transactions::SavepointStack;
pub use validation::{Rule, Validation, ValidationErrors};
pub use value::Value;

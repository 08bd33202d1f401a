//! Models and records
//!
//! - `definition`: the [`ModelDef`] declaration builder
//! - `meta`: schema-backed metadata built once per model
//! - `dispatch`: dynamic finder and association method names
//! - `finders`, `calculations`, `persistence`: model-level operations
//! - `record`: attribute handling, save/destroy and transactions
//! - `associations`: loading and mutating related records

pub mod associations;
pub mod calculations;
pub mod definition;
pub mod dispatch;
pub mod finders;
pub mod meta;
pub mod persistence;
pub mod record;

pub use associations::Loaded;
pub use definition::{AssociationCallback, Callback, CallbackKind, FindHook, ModelDef, ModelObserver, ObservedEvent};
pub use dispatch::{AssociationOp, DispatchTable, FinderKind, Operation};
pub use meta::ModelMeta;
pub use record::Record;

use std::sync::Arc;

use crate::backends::ColumnInfo;
use crate::connection::Connection;
use crate::orm::Orm;
use crate::query::{FindArg, FindOptions};
use crate::value::Value;

/// Handle to one entity type, bound to its connection
#[derive(Debug, Clone)]
pub struct Model {
    orm: Orm,
    meta: Arc<ModelMeta>,
    conn: Arc<Connection>,
}

impl Model {
    pub(crate) fn new(orm: Orm, meta: Arc<ModelMeta>, conn: Arc<Connection>) -> Self {
        Self { orm, meta, conn }
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    pub fn def(&self) -> &ModelDef {
        &self.meta.def
    }

    pub fn class_name(&self) -> &str {
        self.meta.class_name()
    }

    pub fn table_name(&self) -> &str {
        self.meta.table_name()
    }

    pub fn primary_key(&self) -> &str {
        self.meta.primary_key()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.meta.columns
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.meta.dispatch
    }

    /// Whether `name` is a published dynamic method
    pub fn responds_to(&self, name: &str) -> bool {
        self.meta.dispatch.contains(name)
    }

    /// `<table>.<primary key>`
    pub(crate) fn qualified_key(&self) -> String {
        format!("{}.{}", self.table_name(), self.primary_key())
    }
}

/// Result of a `find` whose shape depends on its first argument
#[derive(Debug, Clone)]
pub enum Found {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl Found {
    pub fn one(self) -> Option<Record> {
        match self {
            Found::One(record) => record,
            Found::Many(records) => records.into_iter().next(),
        }
    }

    pub fn many(self) -> Vec<Record> {
        match self {
            Found::One(record) => record.into_iter().collect(),
            Found::Many(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Found::One(record) => usize::from(record.is_some()),
            Found::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Answer of a dispatched dynamic method
#[derive(Debug, Clone)]
pub enum Dispatched {
    Record(Option<Record>),
    Records(Vec<Record>),
    Value(Value),
    Values(Vec<Value>),
    Done,
}

impl Dispatched {
    pub fn into_record(self) -> Option<Record> {
        match self {
            Dispatched::Record(record) => record,
            Dispatched::Records(records) => records.into_iter().next(),
            _ => None,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Dispatched::Record(record) => record.into_iter().collect(),
            Dispatched::Records(records) => records,
            _ => Vec::new(),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Dispatched::Value(value) => value,
            _ => Value::Null,
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Dispatched::Values(values) => values,
            Dispatched::Value(value) => vec![value],
            _ => Vec::new(),
        }
    }
}

/// Argument of a dispatched record-level method
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Record(Record),
    Records(Vec<Record>),
    Attrs(Vec<(String, Value)>),
    Options(FindOptions),
    Find(FindArg),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Value(Value::Integer(value))
    }
}

impl From<Record> for Arg {
    fn from(record: Record) -> Self {
        Arg::Record(record)
    }
}

impl From<Vec<Record>> for Arg {
    fn from(records: Vec<Record>) -> Self {
        Arg::Records(records)
    }
}

impl From<Vec<(String, Value)>> for Arg {
    fn from(attrs: Vec<(String, Value)>) -> Self {
        Arg::Attrs(attrs)
    }
}

impl From<FindOptions> for Arg {
    fn from(options: FindOptions) -> Self {
        Arg::Options(options)
    }
}

impl From<FindArg> for Arg {
    fn from(arg: FindArg) -> Self {
        Arg::Find(arg)
    }
}

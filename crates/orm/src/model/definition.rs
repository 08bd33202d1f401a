//! Model declarations
//!
//! A [`ModelDef`] describes one entity type: its table, key, relations,
//! validations and callbacks. It is registered once on the
//! [`crate::Orm`] and never changes afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ModelResult;
use crate::inflector;
use crate::model::{Model, Record};
use crate::relationships::RelationDescriptor;
use crate::validation::{CustomValidator, Moment, RecordPredicate, Validation};

/// Lifecycle hook; an error aborts the surrounding operation
pub type Callback = Arc<dyn Fn(&mut Record) -> ModelResult<()> + Send + Sync>;

/// Hook run before a model-level read, when no record exists yet
pub type FindHook = Arc<dyn Fn(&Model) -> ModelResult<()> + Send + Sync>;

/// Hook on an association change: the owner, then the added or removed target
pub type AssociationCallback = Arc<dyn Fn(&mut Record, &Record) -> ModelResult<()> + Send + Sync>;

/// Points in the find/save/delete and association flows where callbacks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    BeforeFind,
    AfterFind,
    BeforeValidation,
    BeforeSave,
    BeforeCreate,
    BeforeUpdate,
    AfterCreate,
    AfterUpdate,
    AfterSave,
    BeforeDelete,
    AfterDelete,
    BeforeAdd,
    AfterAdd,
    BeforeRemove,
    AfterRemove,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::BeforeFind => "before_find",
            CallbackKind::AfterFind => "after_find",
            CallbackKind::BeforeValidation => "before_validation",
            CallbackKind::BeforeSave => "before_save",
            CallbackKind::BeforeCreate => "before_create",
            CallbackKind::BeforeUpdate => "before_update",
            CallbackKind::AfterCreate => "after_create",
            CallbackKind::AfterUpdate => "after_update",
            CallbackKind::AfterSave => "after_save",
            CallbackKind::BeforeDelete => "before_delete",
            CallbackKind::AfterDelete => "after_delete",
            CallbackKind::BeforeAdd => "before_add",
            CallbackKind::AfterAdd => "after_add",
            CallbackKind::BeforeRemove => "before_remove",
            CallbackKind::AfterRemove => "after_remove",
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event as seen by an observer
#[derive(Debug, Clone, Copy)]
pub struct ObservedEvent<'a> {
    pub kind: CallbackKind,
    pub model: &'a str,
    /// Set for association events
    pub relation: Option<&'a str>,
    /// The record the event is about; `None` for `BeforeFind`
    pub record: Option<&'a Record>,
}

/// Receives every lifecycle event of the models it is added to. Observers
/// run after the model's own callbacks; an error aborts the operation.
pub trait ModelObserver: Send + Sync {
    fn on_event(&self, event: &ObservedEvent<'_>) -> ModelResult<()>;
}

/// Declaration of one entity type
#[derive(Clone)]
pub struct ModelDef {
    pub class_name: String,
    pub table_name: String,
    pub primary_key: String,
    /// Named configuration; `None` uses the environment default
    pub connection: Option<String>,
    /// Columns stored as JSON text
    pub serialize: Vec<String>,
    pub record_timestamps: bool,
    pub protected: Vec<String>,
    /// When set, only these attributes may be mass-assigned
    pub accessible: Option<Vec<String>>,
    pub relations: Vec<RelationDescriptor>,
    pub validations: Vec<Validation>,
    pub custom_validators: Vec<CustomValidator>,
    pub predicates: HashMap<String, RecordPredicate>,
    pub callbacks: Vec<(CallbackKind, Callback)>,
    pub find_hooks: Vec<FindHook>,
    /// Per relation: `(kind, relation, callback)`
    pub association_callbacks: Vec<(CallbackKind, String, AssociationCallback)>,
    pub observers: Vec<Arc<dyn ModelObserver>>,
    /// Multi-column finders published in the dispatch table
    pub compound_finders: Vec<Vec<String>>,
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("class_name", &self.class_name)
            .field("table_name", &self.table_name)
            .field("primary_key", &self.primary_key)
            .field("connection", &self.connection)
            .field("relations", &self.relations.len())
            .field("validations", &self.validations.len())
            .field("callbacks", &self.callbacks.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ModelDef {
    /// Declare a model; the table defaults to the tableized class name
    pub fn new(class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        Self {
            table_name: inflector::tableize(&class_name),
            class_name,
            primary_key: "id".to_string(),
            connection: None,
            serialize: Vec::new(),
            record_timestamps: true,
            protected: Vec::new(),
            accessible: None,
            relations: Vec::new(),
            validations: Vec::new(),
            custom_validators: Vec::new(),
            predicates: HashMap::new(),
            callbacks: Vec::new(),
            find_hooks: Vec::new(),
            association_callbacks: Vec::new(),
            observers: Vec::new(),
            compound_finders: Vec::new(),
        }
    }

    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn serialize(mut self, column: impl Into<String>) -> Self {
        self.serialize.push(column.into());
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.record_timestamps = false;
        self
    }

    pub fn attr_protected(mut self, attribute: impl Into<String>) -> Self {
        self.protected.push(attribute.into());
        self
    }

    pub fn attr_accessible(mut self, attribute: impl Into<String>) -> Self {
        self.accessible.get_or_insert_with(Vec::new).push(attribute.into());
        self
    }

    pub fn relation(mut self, descriptor: RelationDescriptor) -> Self {
        self.relations.push(descriptor);
        self
    }

    pub fn belongs_to(self, name: impl Into<String>) -> Self {
        self.relation(RelationDescriptor::belongs_to(name))
    }

    pub fn has_one(self, name: impl Into<String>) -> Self {
        self.relation(RelationDescriptor::has_one(name))
    }

    pub fn has_many(self, name: impl Into<String>) -> Self {
        self.relation(RelationDescriptor::has_many(name))
    }

    pub fn has_and_belongs_to_many(self, name: impl Into<String>) -> Self {
        self.relation(RelationDescriptor::has_and_belongs_to_many(name))
    }

    pub fn validates(mut self, validation: Validation) -> Self {
        self.validations.push(validation);
        self
    }

    pub fn validates_presence_of(self, field: impl Into<String>) -> Self {
        self.validates(Validation::presence_of(field))
    }

    pub fn validates_uniqueness_of(self, field: impl Into<String>) -> Self {
        self.validates(Validation::uniqueness_of(field))
    }

    pub fn validates_confirmation_of(self, field: impl Into<String>) -> Self {
        self.validates(Validation::confirmation_of(field))
    }

    pub fn validates_acceptance_of(self, field: impl Into<String>) -> Self {
        self.validates(Validation::acceptance_of(field))
    }

    /// Custom record-level validator; `Err(message)` is recorded under `name`
    pub fn validate_on<F>(mut self, on: Moment, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Record) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom_validators.push(CustomValidator {
            name: name.into(),
            on,
            check: Arc::new(check),
        });
        self
    }

    /// Named predicate usable as a validation `if` condition
    pub fn predicate<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn callback<F>(mut self, kind: CallbackKind, callback: F) -> Self
    where
        F: Fn(&mut Record) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.callbacks.push((kind, Arc::new(callback)));
        self
    }

    /// Runs before every finder and `find_by_sql`. `after_find` is an
    /// ordinary record callback, run on each record found.
    pub fn before_find<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Model) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.find_hooks.push(Arc::new(hook));
        self
    }

    /// `before_add`/`after_add`/`before_remove`/`after_remove` on one relation
    pub fn association_callback<F>(mut self, kind: CallbackKind, relation: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Record, &Record) -> ModelResult<()> + Send + Sync + 'static,
    {
        self.association_callbacks
            .push((kind, relation.into(), Arc::new(callback)));
        self
    }

    pub fn add_observer(mut self, observer: impl ModelObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn compound_finder<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.compound_finders
            .push(fields.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    pub(crate) fn callbacks_for(&self, kind: CallbackKind) -> Vec<Callback> {
        self.callbacks
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, cb)| cb.clone())
            .collect()
    }

    pub(crate) fn association_callbacks_for(&self, kind: CallbackKind, relation: &str) -> Vec<AssociationCallback> {
        self.association_callbacks
            .iter()
            .filter(|(k, r, _)| *k == kind && r == relation)
            .map(|(_, _, cb)| cb.clone())
            .collect()
    }

    pub(crate) fn notify(&self, event: ObservedEvent<'_>) -> ModelResult<()> {
        for observer in &self.observers {
            observer.on_event(&event)?;
        }
        Ok(())
    }

    pub fn is_serialized(&self, column: &str) -> bool {
        self.serialize.iter().any(|c| c == column)
    }

    /// Whether mass assignment may touch `attribute`
    pub fn is_assignable(&self, attribute: &str) -> bool {
        if self.protected.iter().any(|p| p == attribute) {
            return false;
        }
        match &self.accessible {
            Some(accessible) => accessible.iter().any(|a| a == attribute),
            None => true,
        }
    }

    /// Fields written through non-column pseudo attributes
    pub(crate) fn virtual_attributes(&self) -> Vec<String> {
        let mut names = Vec::new();
        for validation in &self.validations {
            match validation.kind() {
                crate::validation::ValidationKind::Confirmation => {
                    names.push(format!("{}_confirmation", validation.field))
                }
                crate::validation::ValidationKind::Acceptance => names.push(validation.field.clone()),
                _ => {}
            }
        }
        names
    }
}

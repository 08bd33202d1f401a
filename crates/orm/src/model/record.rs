//! Records: one row of a model's table
//!
//! A [`Record`] keeps two maps per attribute, the typed value and the raw
//! input it was cast from. New records have no primary key; `save` inserts
//! them and stores the key the adapter reports.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::backends::Row;
use crate::error::{ModelError, ModelResult};
use crate::query::{dml, Conditions};
use crate::transactions::SavepointStack;
use crate::validation::{self, ValidationErrors};
use crate::value::Value;

use super::associations::AssociationState;
use super::definition::{CallbackKind, ObservedEvent};
use super::Model;

#[derive(Clone)]
pub struct Record {
    model: Model,
    attributes: HashMap<String, Value>,
    before_type_cast: HashMap<String, Value>,
    /// Pseudo attributes such as `password_confirmation`
    virtuals: HashMap<String, Value>,
    pub(crate) associations: HashMap<String, AssociationState>,
    new_record: bool,
    readonly: bool,
    errors: ValidationErrors,
    savepoints: SavepointStack,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model.class_name())
            .field("attributes", &self.attributes)
            .field("associations", &self.associations.keys().collect::<Vec<_>>())
            .field("new_record", &self.new_record)
            .field("readonly", &self.readonly)
            .finish()
    }
}

impl Record {
    /// A new, unsaved record with column defaults applied
    pub fn new(model: Model) -> Self {
        let mut record = Self::empty(model, true, false);
        let primary_key = record.model.primary_key().to_string();
        let defaults: Vec<(String, Value)> = record
            .model
            .columns()
            .iter()
            .map(|column| {
                let value = if column.primary || column.name == primary_key {
                    Value::Null
                } else {
                    column.cast(column.default.clone())
                };
                (column.name.clone(), value)
            })
            .collect();
        record.attributes.extend(defaults);
        record
    }

    fn empty(model: Model, new_record: bool, readonly: bool) -> Self {
        Self {
            model,
            attributes: HashMap::new(),
            before_type_cast: HashMap::new(),
            virtuals: HashMap::new(),
            associations: HashMap::new(),
            new_record,
            readonly,
            errors: ValidationErrors::new(),
            savepoints: SavepointStack::new(),
        }
    }

    /// A persisted record from a result row
    pub fn from_row(model: Model, row: Row, readonly: bool) -> Self {
        Self::from_pairs(model, row.into_pairs(), readonly)
    }

    /// A persisted record from column/value pairs. Serialized columns are
    /// decoded from JSON text; unknown columns (computed selects) are kept
    /// as they come.
    pub fn from_pairs<I>(model: Model, pairs: I, readonly: bool) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut record = Self::empty(model, false, readonly);
        for (name, raw) in pairs {
            let value = record.decode(&name, raw.clone());
            record.before_type_cast.insert(name.clone(), raw);
            record.attributes.insert(name, value);
        }
        record
    }

    fn decode(&self, name: &str, raw: Value) -> Value {
        if self.model.def().is_serialized(name) {
            return match raw {
                Value::Text(text) => serde_json::from_str::<JsonValue>(&text)
                    .map(Value::from_json)
                    .unwrap_or(Value::Text(text)),
                other => other,
            };
        }
        match self.model.meta().column(name) {
            Some(column) => column.cast(raw),
            None => raw,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn class_name(&self) -> &str {
        self.model.class_name()
    }

    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Primary key value, `Null` for new records
    pub fn id(&self) -> Value {
        self.read(self.model.primary_key())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).or_else(|| self.virtuals.get(name))
    }

    /// Typed value of `name`, `Null` when unset
    pub fn read(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Raw input of `name` before casting
    pub fn raw(&self, name: &str) -> Value {
        self.before_type_cast
            .get(name)
            .or_else(|| self.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn attribute_before_type_cast(&self, name: &str) -> Option<&Value> {
        self.before_type_cast.get(name)
    }

    /// Like [`Record::read`] but rejects names the record does not know
    pub fn attribute(&self, name: &str) -> ModelResult<Value> {
        if self.has_attribute(name) || self.model.meta().is_virtual(name) {
            Ok(self.read(name))
        } else {
            Err(ModelError::undefined_attribute(self.class_name(), name))
        }
    }

    /// Assign one attribute, casting by column type
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        self.ensure_writable()?;
        let raw = value.into();
        let meta = self.model.meta();
        if let Some(column) = meta.column(name) {
            let value = if meta.def.is_serialized(name) {
                raw.clone()
            } else {
                column.cast(raw.clone())
            };
            self.before_type_cast.insert(name.to_string(), raw);
            self.attributes.insert(name.to_string(), value);
            Ok(())
        } else if meta.is_virtual(name) {
            self.virtuals.insert(name.to_string(), raw);
            Ok(())
        } else if self.attributes.contains_key(name) {
            self.before_type_cast.insert(name.to_string(), raw.clone());
            self.attributes.insert(name.to_string(), raw);
            Ok(())
        } else {
            Err(ModelError::undefined_attribute(self.class_name(), name))
        }
    }

    /// Mass assignment. With `guard`, every key is checked against the
    /// protected/accessible lists before anything is written.
    pub fn set_attributes<K, V>(&mut self, attrs: Vec<(K, V)>, guard: bool) -> ModelResult<()>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let attrs: Vec<(String, Value)> = attrs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if guard {
            let def = self.model.def();
            if let Some((name, _)) = attrs.iter().find(|(name, _)| !def.is_assignable(name)) {
                return Err(ModelError::ProtectedAttribute {
                    model: def.class_name.clone(),
                    attribute: name.clone(),
                });
            }
        }
        for (name, value) in attrs {
            self.set(&name, value)?;
        }
        Ok(())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name) || self.model.meta().has_column(name)
    }

    pub fn attribute_present(&self, name: &str) -> bool {
        !self.read(name).is_blank()
    }

    /// Column names in table order, then any extra selected names
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.model.meta().column_names().map(str::to_string).collect();
        let mut extra: Vec<String> = self
            .attributes
            .keys()
            .filter(|name| !self.model.meta().has_column(name))
            .cloned()
            .collect();
        extra.sort();
        names.extend(extra);
        names
    }

    pub fn attributes(&self) -> Vec<(String, Value)> {
        self.attribute_names()
            .into_iter()
            .map(|name| {
                let value = self.read(&name);
                (name, value)
            })
            .collect()
    }

    /// Attributes plus every loaded association
    pub fn to_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        for (name, value) in self.attributes() {
            object.insert(name, value.to_json());
        }
        let mut loaded: Vec<(&String, &AssociationState)> = self.associations.iter().collect();
        loaded.sort_by(|a, b| a.0.cmp(b.0));
        for (name, state) in loaded {
            object.insert(name.clone(), state.loaded.to_json());
        }
        JsonValue::Object(object)
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub(crate) fn errors_mut(&mut self) -> &mut ValidationErrors {
        &mut self.errors
    }

    pub fn get_validation_errors_on(&self, field: &str) -> &[String] {
        self.errors.get_on(field)
    }

    /// Run the validation engine, replacing the error map
    pub async fn validate(&mut self) -> ModelResult<bool> {
        self.errors = validation::run(self).await?;
        Ok(self.errors.is_empty())
    }

    pub(crate) fn ensure_writable(&self) -> ModelResult<()> {
        if self.readonly {
            return Err(ModelError::ReadOnlyRecord {
                model: self.class_name().to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn require_id(&self) -> ModelResult<Value> {
        let id = self.id();
        if id.is_null() {
            return Err(ModelError::MissingPrimaryKey {
                model: self.class_name().to_string(),
            });
        }
        Ok(id)
    }

    /// Model callbacks of `kind`, then observers
    pub(crate) fn run_callbacks(&mut self, kind: CallbackKind) -> ModelResult<()> {
        for callback in self.model.def().callbacks_for(kind) {
            callback(self)?;
        }
        self.model.def().notify(ObservedEvent {
            kind,
            model: self.class_name(),
            relation: None,
            record: Some(&*self),
        })
    }

    /// Association hooks around adding or removing `target`: the owner's
    /// plain callbacks of `kind`, the relation's own, then observers
    pub(crate) fn run_association_callbacks(
        &mut self,
        kind: CallbackKind,
        relation: &str,
        target: &Record,
    ) -> ModelResult<()> {
        for callback in self.model.def().callbacks_for(kind) {
            callback(self)?;
        }
        for callback in self.model.def().association_callbacks_for(kind, relation) {
            callback(self, target)?;
        }
        self.model.def().notify(ObservedEvent {
            kind,
            model: self.class_name(),
            relation: Some(relation),
            record: Some(target),
        })
    }

    /// Value written to the database: serialized columns become JSON text
    fn persistable(&self, name: &str, value: &Value) -> Value {
        if value.is_null() || !self.model.def().is_serialized(name) {
            return value.clone();
        }
        Value::Text(value.to_json().to_string())
    }

    fn column_values(&self, include_primary_key: bool) -> Vec<(String, Value)> {
        let primary_key = self.model.primary_key();
        self.model
            .columns()
            .iter()
            .filter(|column| include_primary_key || column.name != primary_key)
            .filter_map(|column| {
                self.attributes
                    .get(&column.name)
                    .map(|value| (column.name.clone(), self.persistable(&column.name, value)))
            })
            .collect()
    }

    fn touch_timestamps(&mut self, creating: bool) {
        if !self.model.def().record_timestamps {
            return;
        }
        let now = Utc::now().naive_utc();
        let (created, updated) = self.model.meta().timestamp_columns();
        let mut stamps = Vec::new();
        if creating {
            stamps.extend(created.map(|c| c.name.clone()));
        }
        stamps.extend(updated.map(|c| c.name.clone()));
        for name in stamps {
            let value = if name.ends_with("_on") {
                Value::Date(now.date())
            } else {
                Value::DateTime(now)
            };
            self.attributes.insert(name, value);
        }
    }

    /// Validate (unless told not to) and write the record. Returns false,
    /// leaving the error map populated, when validation fails.
    pub async fn save(&mut self) -> ModelResult<bool> {
        self.save_with(true).await
    }

    pub fn save_with(&mut self, validate: bool) -> BoxFuture<'_, ModelResult<bool>> {
        async move {
            self.ensure_writable()?;
            self.run_callbacks(CallbackKind::BeforeValidation)?;
            if validate && !self.validate().await? {
                return Ok(false);
            }
            let was_new = self.new_record;

            if !self.save_pending_parents().await? {
                return Ok(false);
            }
            self.run_callbacks(CallbackKind::BeforeSave)?;
            if was_new {
                self.run_callbacks(CallbackKind::BeforeCreate)?;
                self.insert_row().await?;
                self.run_callbacks(CallbackKind::AfterCreate)?;
            } else {
                self.run_callbacks(CallbackKind::BeforeUpdate)?;
                self.update_row().await?;
                self.run_callbacks(CallbackKind::AfterUpdate)?;
            }
            self.run_callbacks(CallbackKind::AfterSave)?;
            self.save_pending_children(was_new).await
        }
        .boxed()
    }

    async fn insert_row(&mut self) -> ModelResult<()> {
        let primary_key = self.model.primary_key().to_string();
        self.touch_timestamps(true);
        let explicit_key = !self.read(&primary_key).is_null();
        let values = self.column_values(explicit_key);
        let statement = dml::insert(self.model.table_name(), &primary_key, &values);
        let outcome = self.model.connection().run(&statement).await?;

        if !explicit_key {
            if let Some(id) = outcome.inserted_id() {
                self.before_type_cast.insert(primary_key.clone(), Value::Integer(id));
                self.attributes.insert(primary_key, Value::Integer(id));
            }
        }
        self.new_record = false;
        tracing::debug!(model = %self.class_name(), id = %self.id(), "Record created");
        Ok(())
    }

    async fn update_row(&mut self) -> ModelResult<()> {
        let id = self.require_id()?;
        self.touch_timestamps(false);
        let sets = self.column_values(false);
        if sets.is_empty() {
            return Ok(());
        }
        let key = Conditions::equals(vec![(self.model.primary_key().to_string(), id)]);
        let statement = dml::update(self.model.table_name(), &sets, Some(&key));
        self.model.connection().run(&statement).await?;
        tracing::debug!(model = %self.class_name(), id = %self.id(), "Record updated");
        Ok(())
    }

    /// Mass-assign (guarded) and save
    pub async fn update_attributes<K, V>(&mut self, attrs: Vec<(K, V)>, validate: bool) -> ModelResult<bool>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.set_attributes(attrs, true)?;
        self.save_with(validate).await
    }

    /// Assign one attribute and save without validation
    pub async fn update_attribute(&mut self, name: &str, value: impl Into<Value>) -> ModelResult<bool> {
        self.set(name, value)?;
        self.save_with(false).await
    }

    /// Flip a boolean attribute in memory; `Null` becomes true
    pub fn toggle(&mut self, name: &str) -> ModelResult<&mut Self> {
        let current = self.attribute(name)?.as_bool().unwrap_or(false);
        self.set(name, !current)?;
        Ok(self)
    }

    pub async fn toggle_and_save(&mut self, name: &str) -> ModelResult<bool> {
        self.toggle(name)?;
        self.save_with(false).await
    }

    /// Add `by` and save without validation; integer overflow is a
    /// `Query` error and leaves the record untouched
    pub async fn increment(&mut self, name: &str, by: i64) -> ModelResult<bool> {
        let next = match self.attribute(name)? {
            Value::Null => Value::Integer(by),
            Value::Integer(n) => Value::Integer(n.checked_add(by).ok_or_else(|| {
                ModelError::Query(format!("{}.{} overflows adding {}", self.class_name(), name, by))
            })?),
            Value::Float(n) => Value::Float(n + by as f64),
            other => Value::Float(other.as_f64().unwrap_or(0.0) + by as f64),
        };
        self.update_attribute(name, next).await
    }

    pub async fn decrement(&mut self, name: &str, by: i64) -> ModelResult<bool> {
        let by = by
            .checked_neg()
            .ok_or_else(|| ModelError::Query(format!("{}.{} overflows subtracting {}", self.class_name(), name, by)))?;
        self.increment(name, by).await
    }

    /// Re-read the row, dropping cached associations and pseudo attributes
    pub async fn reload(&mut self) -> ModelResult<()> {
        let id = self.require_id()?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            self.model.table_name(),
            self.model.primary_key()
        );
        let row = self
            .model
            .connection()
            .select(&sql, std::slice::from_ref(&id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::NotFound {
                model: self.class_name().to_string(),
                ids: id.to_string(),
            })?;
        let fresh = Record::from_row(self.model.clone(), row, self.readonly);
        self.attributes = fresh.attributes;
        self.before_type_cast = fresh.before_type_cast;
        self.virtuals.clear();
        self.associations.clear();
        self.errors.clear();
        Ok(())
    }

    /// Delete the row without callbacks or dependents
    pub async fn delete(&mut self) -> ModelResult<u64> {
        self.ensure_writable()?;
        let id = self.require_id()?;
        let key = Conditions::equals(vec![(self.model.primary_key().to_string(), id)]);
        let statement = dml::delete(self.model.table_name(), Some(&key));
        Ok(self.model.connection().run(&statement).await?.affected())
    }

    /// Delete the row, then apply each relation's dependent strategy
    pub fn destroy(&mut self) -> BoxFuture<'_, ModelResult<bool>> {
        async move {
            self.ensure_writable()?;
            self.run_callbacks(CallbackKind::BeforeDelete)?;
            if self.delete().await? == 0 {
                return Ok(false);
            }
            self.destroy_dependents().await?;
            self.run_callbacks(CallbackKind::AfterDelete)?;
            tracing::debug!(model = %self.class_name(), id = %self.id(), "Record destroyed");
            Ok(true)
        }
        .boxed()
    }

    /// Copy this record as a new one, then apply `overrides`.
    ///
    /// The copy has no primary key, no errors and no savepoints, and is
    /// writable. Loaded has-one/has-many children are duplicated as new
    /// records and saved with the copy; has-and-belongs-to-many targets
    /// are shared and linked on save; belongs-to targets are shared.
    pub fn duplicate<K, V>(&self, overrides: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let primary_key = self.model.primary_key().to_string();
        let mut copy = Record {
            model: self.model.clone(),
            attributes: self.attributes.clone(),
            before_type_cast: self.before_type_cast.clone(),
            virtuals: self.virtuals.clone(),
            associations: self.duplicate_associations()?,
            new_record: true,
            readonly: false,
            errors: ValidationErrors::new(),
            savepoints: SavepointStack::new(),
        };
        copy.attributes.insert(primary_key.clone(), Value::Null);
        copy.before_type_cast.remove(&primary_key);
        for (name, value) in overrides {
            let name: String = name.into();
            copy.set(&name, value)?;
        }
        Ok(copy)
    }

    /// Begin or continue a transaction on the record's connection,
    /// optionally pushing a savepoint
    pub async fn start_transaction(&mut self, create_savepoint: bool) -> ModelResult<bool> {
        let conn = self.model.connection().clone();
        self.savepoints.start(&conn, create_savepoint).await
    }

    /// Roll back to the most recent savepoint, else the whole transaction
    pub async fn rollback_transaction(&mut self) -> ModelResult<()> {
        let conn = self.model.connection().clone();
        self.savepoints.rollback(&conn).await
    }

    pub async fn execute_transaction(&mut self) -> ModelResult<()> {
        let conn = self.model.connection().clone();
        self.savepoints.commit(&conn).await
    }

    pub fn savepoints(&self) -> &[String] {
        self.savepoints.names()
    }

    #[cfg(test)]
    pub(crate) fn mark_persisted(&mut self) {
        self.new_record = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DatabaseConfigs, Environment};
    use crate::model::ModelDef;
    use crate::orm::Orm;

    async fn orm() -> Orm {
        let configs = DatabaseConfigs::new().with(Environment::Testing, None, DatabaseConfig::sqlite(":memory:"));
        let orm = Orm::from_configs(Environment::Testing, configs);
        let conn = orm.connection(None).await.unwrap();
        conn.query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(255), \
             age INTEGER, admin BOOLEAN, prefs TEXT, created_at DATETIME, updated_on DATE)",
            &[],
        )
        .await
        .unwrap();
        orm.define(ModelDef::new("User").serialize("prefs").attr_protected("admin"))
            .unwrap();
        orm
    }

    #[tokio::test]
    async fn test_assignment_casts_and_keeps_raw() {
        let orm = orm().await;
        let mut user = Record::new(orm.model("User").await.unwrap());
        user.set("age", "42").unwrap();
        assert_eq!(user.read("age"), Value::Integer(42));
        assert_eq!(user.raw("age"), Value::from("42"));
        user.set("age", "").unwrap();
        assert!(user.read("age").is_null());
        assert!(matches!(
            user.set("nickname", "x"),
            Err(ModelError::UndefinedAttribute { .. })
        ));
    }

    #[tokio::test]
    async fn test_mass_assignment_is_checked_first() {
        let orm = orm().await;
        let mut user = Record::new(orm.model("User").await.unwrap());
        let err = user
            .set_attributes(vec![("name", Value::from("ann")), ("admin", Value::Bool(true))], true)
            .unwrap_err();
        assert!(matches!(err, ModelError::ProtectedAttribute { .. }));
        assert!(user.read("name").is_null());

        user.set_attributes(vec![("admin", true)], false).unwrap();
        assert_eq!(user.read("admin"), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_save_sets_key_timestamps_and_serializes() {
        let orm = orm().await;
        let model = orm.model("User").await.unwrap();
        let mut user = Record::new(model.clone());
        user.set("name", "ann").unwrap();
        user.set("prefs", Value::Json(serde_json::json!({"theme": "dark"}))).unwrap();
        assert!(user.save().await.unwrap());
        assert!(!user.is_new_record());
        assert_eq!(user.id(), Value::Integer(1));
        assert!(matches!(user.read("created_at"), Value::DateTime(_)));
        assert!(matches!(user.read("updated_on"), Value::Date(_)));

        let stored = model
            .connection()
            .select_value("SELECT prefs FROM users WHERE id = 1", &[])
            .await
            .unwrap();
        assert_eq!(stored, Value::from(r#"{"theme":"dark"}"#));

        let mut loaded = Record::new(model);
        loaded.set("id", 1).unwrap();
        loaded.mark_persisted();
        loaded.reload().await.unwrap();
        assert_eq!(loaded.read("prefs"), Value::Json(serde_json::json!({"theme": "dark"})));
    }

    #[tokio::test]
    async fn test_readonly_and_missing_key() {
        let orm = orm().await;
        let model = orm.model("User").await.unwrap();
        let mut user = Record::from_pairs(model.clone(), vec![("id".to_string(), Value::Integer(9))], true);
        assert!(matches!(user.save().await, Err(ModelError::ReadOnlyRecord { .. })));
        assert!(matches!(user.delete().await, Err(ModelError::ReadOnlyRecord { .. })));

        assert!(matches!(user.set("name", "x"), Err(ModelError::ReadOnlyRecord { .. })));
        assert!(user.read("name").is_null());

        let mut fresh = Record::new(model);
        assert!(matches!(fresh.delete().await, Err(ModelError::MissingPrimaryKey { .. })));
    }

    #[tokio::test]
    async fn test_increment_overflow_is_rejected() {
        let orm = orm().await;
        let mut user = Record::new(orm.model("User").await.unwrap());
        user.set("age", i64::MAX - 1).unwrap();
        user.save().await.unwrap();

        assert!(user.increment("age", 1).await.unwrap());
        assert!(matches!(user.increment("age", 1).await, Err(ModelError::Query(_))));
        assert_eq!(user.read("age"), Value::Integer(i64::MAX));
        assert!(matches!(user.decrement("age", i64::MIN).await, Err(ModelError::Query(_))));

        user.reload().await.unwrap();
        assert_eq!(user.read("age"), Value::Integer(i64::MAX));
    }

    #[tokio::test]
    async fn test_toggle_increment_and_duplicate() {
        let orm = orm().await;
        let mut user = Record::new(orm.model("User").await.unwrap());
        user.set("name", "ann").unwrap();
        user.save().await.unwrap();

        user.toggle("admin").unwrap();
        assert_eq!(user.read("admin"), Value::Bool(true));
        user.increment("age", 2).await.unwrap();
        user.decrement("age", 1).await.unwrap();
        user.reload().await.unwrap();
        assert_eq!(user.read("age"), Value::Integer(1));

        let mut copy = user.duplicate(vec![("name", "bob")]).unwrap();
        assert!(copy.is_new_record());
        assert!(copy.id().is_null());
        assert_eq!(copy.read("age"), Value::Integer(1));
        copy.save().await.unwrap();
        assert_eq!(copy.id(), Value::Integer(2));
        assert_eq!(user.read("name"), Value::from("ann"));
    }
}

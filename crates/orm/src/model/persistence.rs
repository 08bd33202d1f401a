//! Model-level writes: create, bulk update and the delete/destroy family

use crate::error::ModelResult;
use crate::query::{builder, dml, Conditions, FindOptions};
use crate::value::Value;

use super::{Model, Record};

impl Model {
    /// Unsaved record with guarded mass assignment applied
    pub fn new_record<K, V>(&self, attrs: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Record::new(self.clone());
        record.set_attributes(attrs, true)?;
        Ok(record)
    }

    /// Build and save a record. A record failing validation is returned
    /// unsaved with its errors populated.
    pub async fn create<K, V>(&self, attrs: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = self.new_record(attrs)?;
        record.save().await?;
        Ok(record)
    }

    /// Load, assign and save one record
    pub async fn update<K, V>(&self, id: impl Into<Value>, attrs: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = self.find(id).await?;
        record.update_attributes(attrs, true).await?;
        Ok(record)
    }

    /// `UPDATE ... SET updates [WHERE conditions]`, returning affected rows
    pub async fn update_all(&self, updates: Conditions, conditions: Option<Conditions>) -> ModelResult<u64> {
        let statement = dml::update_raw(self.table_name(), &updates, conditions.as_ref());
        Ok(self.connection().run(&statement).await?.affected())
    }

    /// Delete rows by primary key without loading them
    pub async fn delete<V: Into<Value>>(&self, ids: Vec<V>) -> ModelResult<u64> {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let Some((sql, values)) = builder::ids_condition(self.primary_key(), &ids) else {
            return Ok(0);
        };
        let statement = dml::delete(self.table_name(), Some(&Conditions::Fragment(sql, values)));
        Ok(self.connection().run(&statement).await?.affected())
    }

    pub async fn delete_all(&self, conditions: Option<Conditions>) -> ModelResult<u64> {
        let statement = dml::delete(self.table_name(), conditions.as_ref());
        Ok(self.connection().run(&statement).await?.affected())
    }

    /// Load each record and destroy it, running callbacks and dependents
    pub async fn destroy<V: Into<Value>>(&self, ids: Vec<V>) -> ModelResult<u64> {
        let records = self.find_many(ids, FindOptions::default()).await?;
        self.destroy_records(records).await
    }

    pub async fn destroy_all(&self, conditions: Option<Conditions>) -> ModelResult<u64> {
        let options = match conditions {
            Some(conditions) => FindOptions::new().conditions(conditions),
            None => FindOptions::new(),
        };
        let records = self.all(options).await?;
        self.destroy_records(records).await
    }

    async fn destroy_records(&self, records: Vec<Record>) -> ModelResult<u64> {
        let mut destroyed = 0;
        for mut record in records {
            if record.destroy().await? {
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Enable the engine's session query cache
    pub async fn cache_on(&self) -> ModelResult<()> {
        self.connection().cache_on().await
    }

    pub async fn cache_off(&self) -> ModelResult<()> {
        self.connection().cache_off().await
    }
}

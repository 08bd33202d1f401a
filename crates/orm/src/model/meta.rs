//! Per-model metadata, loaded once per [`crate::Orm`]

use std::collections::HashMap;

use crate::backends::ColumnInfo;
use crate::error::{ModelError, ModelResult};
use crate::relationships::{RelationRegistry, ResolvedRelation};

use super::definition::ModelDef;
use super::dispatch::DispatchTable;

/// Declaration plus everything derived from the live schema
#[derive(Debug)]
pub struct ModelMeta {
    pub def: ModelDef,
    pub relations: RelationRegistry,
    pub columns: Vec<ColumnInfo>,
    /// Resolved relations keyed by relation name (aliases go through `relations`)
    resolved: HashMap<String, ResolvedRelation>,
    pub dispatch: DispatchTable,
    virtuals: Vec<String>,
}

impl ModelMeta {
    /// `table_of` maps a class name to its table name
    pub fn build(
        def: ModelDef,
        relations: RelationRegistry,
        columns: Vec<ColumnInfo>,
        table_of: &dyn Fn(&str) -> String,
    ) -> Self {
        let resolved = relations
            .iter()
            .map(|descriptor| {
                (
                    descriptor.name.clone(),
                    descriptor.resolve(&def.class_name, &def.table_name, table_of),
                )
            })
            .collect();
        let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let dispatch = DispatchTable::build(&column_names, &def.compound_finders, &relations);
        let virtuals = def
            .virtual_attributes()
            .into_iter()
            .filter(|name| !column_names.contains(name))
            .collect();

        Self {
            def,
            relations,
            columns,
            resolved,
            dispatch,
            virtuals,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.def.class_name
    }

    pub fn table_name(&self) -> &str {
        &self.def.table_name
    }

    pub fn primary_key(&self) -> &str {
        &self.def.primary_key
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_virtual(&self, name: &str) -> bool {
        self.virtuals.iter().any(|v| v == name)
    }

    /// Resolved relation by name or alias
    pub fn relation(&self, name: &str) -> ModelResult<&ResolvedRelation> {
        let descriptor = self.relations.require(self.class_name(), name)?;
        self.resolved.get(&descriptor.name).ok_or_else(|| {
            ModelError::Relationship(format!(
                "Relation '{}' of {} was never resolved",
                name,
                self.class_name()
            ))
        })
    }

    pub fn relations(&self) -> impl Iterator<Item = &ResolvedRelation> {
        self.relations
            .iter()
            .filter_map(|descriptor| self.resolved.get(&descriptor.name))
    }

    /// Timestamp columns present on the table: (`created_*`, `updated_*`)
    pub fn timestamp_columns(&self) -> (Option<&ColumnInfo>, Option<&ColumnInfo>) {
        let created = self.column("created_at").or_else(|| self.column("created_on"));
        let updated = self.column("updated_at").or_else(|| self.column("updated_on"));
        (created, updated)
    }
}

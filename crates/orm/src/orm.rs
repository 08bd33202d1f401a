//! The ORM context
//!
//! An [`Orm`] owns the connection registry and every model declaration.
//! Cloning it is cheap; all clones share the same connections and the
//! same schema cache.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::config::{DatabaseConfigs, Environment};
use crate::connection::{Connection, ConnectionRegistry};
use crate::error::{ModelError, ModelResult};
use crate::inflector;
use crate::model::{Model, ModelDef, ModelMeta};
use crate::relationships::RelationRegistry;

struct Declaration {
    def: ModelDef,
    relations: RelationRegistry,
}

struct OrmInner {
    registry: ConnectionRegistry,
    declarations: DashMap<String, Arc<Declaration>>,
    schema: DashMap<String, Arc<OnceCell<Arc<ModelMeta>>>>,
}

#[derive(Clone)]
pub struct Orm {
    inner: Arc<OrmInner>,
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut models: Vec<String> = self
            .inner
            .declarations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        models.sort();
        f.debug_struct("Orm")
            .field("registry", &self.inner.registry)
            .field("models", &models)
            .finish()
    }
}

impl Orm {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            inner: Arc::new(OrmInner {
                registry,
                declarations: DashMap::new(),
                schema: DashMap::new(),
            }),
        }
    }

    pub fn from_configs(environment: Environment, configs: DatabaseConfigs) -> Self {
        Self::new(ConnectionRegistry::new(environment, configs))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Connection for a named configuration, or the environment default
    pub async fn connection(&self, name: Option<&str>) -> ModelResult<Arc<Connection>> {
        self.inner.registry.get(name).await
    }

    /// Register a model. Relation names and aliases are checked here, so a
    /// duplicate fails at declaration rather than at first use.
    pub fn define(&self, def: ModelDef) -> ModelResult<()> {
        if self.inner.declarations.contains_key(&def.class_name) {
            return Err(ModelError::Configuration(format!(
                "Model {} is already defined",
                def.class_name
            )));
        }
        let mut relations = RelationRegistry::new();
        for descriptor in def.relations.iter().cloned() {
            relations.register(&def.class_name, descriptor)?;
        }
        tracing::debug!(
            model = %def.class_name,
            table = %def.table_name,
            relations = relations.len(),
            "Model defined"
        );
        self.inner
            .declarations
            .insert(def.class_name.clone(), Arc::new(Declaration { def, relations }));
        Ok(())
    }

    pub fn is_defined(&self, class_name: &str) -> bool {
        self.inner.declarations.contains_key(class_name)
    }

    /// Table of a class: its declared table, else the tableized name
    pub fn table_name_of(&self, class_name: &str) -> String {
        self.inner
            .declarations
            .get(class_name)
            .map(|d| d.def.table_name.clone())
            .unwrap_or_else(|| inflector::tableize(class_name))
    }

    /// Handle for a defined model. The table schema is read on first use
    /// and cached until [`Orm::reset_schema`].
    pub async fn model(&self, class_name: &str) -> ModelResult<Model> {
        let declaration = self
            .inner
            .declarations
            .get(class_name)
            .map(|d| d.value().clone())
            .ok_or_else(|| ModelError::Configuration(format!("Model {} is not defined", class_name)))?;

        let conn = self.connection(declaration.def.connection.as_deref()).await?;

        let slot = self
            .inner
            .schema
            .entry(class_name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let meta = slot
            .get_or_try_init(|| async {
                let columns = conn.columns(&declaration.def.table_name).await?;
                if columns.is_empty() {
                    return Err(ModelError::Schema(format!(
                        "Table {} has no columns or does not exist",
                        declaration.def.table_name
                    )));
                }
                tracing::debug!(
                    model = %class_name,
                    columns = columns.len(),
                    "Loaded model schema"
                );
                let table_of = |class: &str| self.table_name_of(class);
                Ok(Arc::new(ModelMeta::build(
                    declaration.def.clone(),
                    declaration.relations.clone(),
                    columns,
                    &table_of,
                )))
            })
            .await?
            .clone();

        Ok(Model::new(self.clone(), meta, conn))
    }

    /// Drop cached schemas so the next [`Orm::model`] re-reads the columns
    pub fn reset_schema(&self) {
        self.inner.schema.clear();
    }

    /// Close every open connection
    pub async fn close(&self) -> ModelResult<()> {
        self.inner.registry.close_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn orm() -> Orm {
        let configs = DatabaseConfigs::new().with(Environment::Testing, None, DatabaseConfig::sqlite(":memory:"));
        Orm::from_configs(Environment::Testing, configs)
    }

    #[test]
    fn test_define_rejects_duplicates() {
        let orm = orm();
        orm.define(ModelDef::new("Tag")).unwrap();
        assert!(matches!(
            orm.define(ModelDef::new("Tag")),
            Err(ModelError::Configuration(_))
        ));

        let err = orm
            .define(ModelDef::new("User").has_many("posts").has_one("posts"))
            .unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
        assert!(!orm.is_defined("User"));
    }

    #[test]
    fn test_table_names() {
        let orm = orm();
        orm.define(ModelDef::new("Person").table("members")).unwrap();
        assert_eq!(orm.table_name_of("Person"), "members");
        assert_eq!(orm.table_name_of("Category"), "categories");
    }

    #[tokio::test]
    async fn test_model_requires_table() {
        let orm = orm();
        orm.define(ModelDef::new("Ghost")).unwrap();
        assert!(matches!(orm.model("Ghost").await, Err(ModelError::Schema(_))));
        assert!(matches!(orm.model("Missing").await, Err(ModelError::Configuration(_))));
    }
}

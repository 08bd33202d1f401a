//! Relation registry - one map from association name (or alias) to its
//! descriptor, built once per model

use std::collections::HashMap;

use super::metadata::{RelationDescriptor, RelationKind};
use crate::error::{ModelError, ModelResult};

/// Association descriptors of one model, in declaration order
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    relations: Vec<RelationDescriptor>,
    /// name or alias -> position in `relations`
    index: HashMap<String, usize>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relation; names and aliases must be unique per model
    pub fn register(&mut self, model: &str, descriptor: RelationDescriptor) -> ModelResult<()> {
        let position = self.relations.len();
        let mut keys = vec![descriptor.name.clone()];
        keys.extend(descriptor.aliases.iter().cloned());

        for key in &keys {
            if self.index.contains_key(key) {
                return Err(ModelError::Configuration(format!(
                    "Relation '{}' is declared twice for {}",
                    key, model
                )));
            }
        }
        for key in keys {
            self.index.insert(key, position);
        }
        self.relations.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RelationDescriptor> {
        self.index.get(name).map(|&i| &self.relations[i])
    }

    /// Look a relation up by name or alias, failing with `UndefinedRelation`
    pub fn require(&self, model: &str, name: &str) -> ModelResult<&RelationDescriptor> {
        self.get(name)
            .ok_or_else(|| ModelError::undefined_relation(model, name))
    }

    /// Kind of the relation called `name`; `Ok(None)` when undefined and
    /// `ignore_missing` is set
    pub fn type_relation_for(&self, model: &str, name: &str, ignore_missing: bool) -> ModelResult<Option<RelationKind>> {
        match self.get(name) {
            Some(descriptor) => Ok(Some(descriptor.kind)),
            None if ignore_missing => Ok(None),
            None => Err(ModelError::undefined_relation(model, name)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationDescriptor> {
        self.relations.iter()
    }

    pub fn of_kind(&self, kind: RelationKind) -> impl Iterator<Item = &RelationDescriptor> {
        self.relations.iter().filter(move |r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RelationRegistry {
        let mut registry = RelationRegistry::new();
        registry
            .register("User", RelationDescriptor::has_many("posts").with_alias("articles"))
            .unwrap();
        registry.register("User", RelationDescriptor::has_one("profile")).unwrap();
        registry
            .register("User", RelationDescriptor::has_and_belongs_to_many("tags"))
            .unwrap();
        registry
    }

    #[test]
    fn test_lookup_by_name_and_alias() {
        let registry = registry();
        assert_eq!(registry.type_relation_for("User", "posts", false).unwrap(), Some(RelationKind::HasMany));
        assert_eq!(registry.get("articles").unwrap().name, "posts");
        assert_eq!(registry.of_kind(RelationKind::HasOne).count(), 1);
    }

    #[test]
    fn test_undefined_relation() {
        let registry = registry();
        assert!(matches!(
            registry.type_relation_for("User", "friends", false),
            Err(ModelError::UndefinedRelation { .. })
        ));
        assert_eq!(registry.type_relation_for("User", "friends", true).unwrap(), None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = registry();
        let err = registry
            .register("User", RelationDescriptor::belongs_to("articles"))
            .unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
        assert_eq!(registry.len(), 3);
    }
}

//! Relationship metadata: declared descriptors and their resolved form

use std::fmt;

use crate::inflector;
use crate::query::FindOptions;

/// Defines the type of relationship between models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Many-to-one; the foreign key lives on the owner
    BelongsTo,
    /// One-to-one; the foreign key lives on the target
    HasOne,
    /// One-to-many; the foreign key lives on the target
    HasMany,
    /// Many-to-many through a join table
    HasAndBelongsToMany,
}

impl RelationKind {
    /// Returns true if this relationship returns a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::HasAndBelongsToMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::HasAndBelongsToMany => "has_and_belongs_to_many",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to associated rows when the owner is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dependent {
    #[default]
    Nullify,
    Delete,
    Destroy,
}

/// Declarative description of one association
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    pub name: String,
    pub class_name: Option<String>,
    pub foreign_key: Option<String>,
    pub association_foreign_key: Option<String>,
    pub join_table: Option<String>,
    pub through: Option<String>,
    pub source: Option<String>,
    /// Polymorphic prefix on the target (`<as>_id`, `<as>_type`)
    pub as_name: Option<String>,
    /// belongs_to whose target class is read from `<name>_type`
    pub polymorphic: bool,
    pub source_type: Option<String>,
    pub dependent: Dependent,
    pub aliases: Vec<String>,
    /// Default find options applied when loading the association
    pub options: FindOptions,
    /// Custom loading SQL; `{id}` is replaced by the owner's primary key
    pub finder_sql: Option<String>,
}

impl RelationDescriptor {
    pub fn new(kind: RelationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            class_name: None,
            foreign_key: None,
            association_foreign_key: None,
            join_table: None,
            through: None,
            source: None,
            as_name: None,
            polymorphic: false,
            source_type: None,
            dependent: Dependent::default(),
            aliases: Vec::new(),
            options: FindOptions::default(),
            finder_sql: None,
        }
    }

    pub fn belongs_to(name: impl Into<String>) -> Self {
        Self::new(RelationKind::BelongsTo, name)
    }

    pub fn has_one(name: impl Into<String>) -> Self {
        Self::new(RelationKind::HasOne, name)
    }

    pub fn has_many(name: impl Into<String>) -> Self {
        Self::new(RelationKind::HasMany, name)
    }

    pub fn has_and_belongs_to_many(name: impl Into<String>) -> Self {
        Self::new(RelationKind::HasAndBelongsToMany, name)
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = Some(foreign_key.into());
        self
    }

    pub fn with_association_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.association_foreign_key = Some(key.into());
        self
    }

    pub fn with_join_table(mut self, join_table: impl Into<String>) -> Self {
        self.join_table = Some(join_table.into());
        self
    }

    pub fn with_through(mut self, through: impl Into<String>) -> Self {
        self.through = Some(through.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_as(mut self, prefix: impl Into<String>) -> Self {
        self.as_name = Some(prefix.into());
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn with_dependent(mut self, dependent: Dependent) -> Self {
        self.dependent = dependent;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_options(mut self, options: FindOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_finder_sql(mut self, sql: impl Into<String>) -> Self {
        self.finder_sql = Some(sql.into());
        self
    }

    /// Whether `name` is this relation's name or one of its aliases
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// Fill computed defaults for an owner. `table_of` maps a class name to
    /// its table name.
    pub fn resolve(&self, owner_class: &str, owner_table: &str, table_of: &dyn Fn(&str) -> String) -> ResolvedRelation {
        let owner_lower = owner_class.to_lowercase();
        let class_name = self.class_name.clone().unwrap_or_else(|| match self.kind {
            RelationKind::BelongsTo | RelationKind::HasOne => inflector::camelize(&self.name),
            _ => inflector::classify(&self.name),
        });

        let (foreign_key, source_type) = match self.kind {
            RelationKind::BelongsTo => (format!("{}_id", self.name), self.name.clone()),
            _ => (format!("{}_id", owner_lower), owner_class.to_string()),
        };

        let (association_foreign_key, join_table) = if self.kind == RelationKind::HasAndBelongsToMany {
            let target_table = table_of(&class_name);
            let join_table = if target_table.as_str() > owner_table {
                format!("{}_{}", owner_table, target_table)
            } else {
                format!("{}_{}", target_table, owner_table)
            };
            (
                Some(
                    self.association_foreign_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", class_name.to_lowercase())),
                ),
                Some(self.join_table.clone().unwrap_or(join_table)),
            )
        } else {
            (None, None)
        };

        ResolvedRelation {
            kind: self.kind,
            name: self.name.clone(),
            // polymorphic belongs_to picks its class per record
            class_name: if self.polymorphic && self.class_name.is_none() {
                None
            } else {
                Some(class_name)
            },
            foreign_key: self.foreign_key.clone().unwrap_or(foreign_key),
            association_foreign_key,
            join_table,
            through: self.through.clone(),
            source: self.source.clone().unwrap_or_else(|| self.name.clone()),
            as_name: self.as_name.clone(),
            polymorphic: self.polymorphic,
            source_type: self.source_type.clone().unwrap_or(source_type),
            dependent: self.dependent,
            options: self.options.clone(),
            finder_sql: self.finder_sql.clone(),
        }
    }
}

/// A descriptor with every default computed
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelation {
    pub kind: RelationKind,
    pub name: String,
    /// `None` only for a polymorphic belongs_to without a fixed class
    pub class_name: Option<String>,
    pub foreign_key: String,
    pub association_foreign_key: Option<String>,
    pub join_table: Option<String>,
    pub through: Option<String>,
    pub source: String,
    pub as_name: Option<String>,
    pub polymorphic: bool,
    /// Discriminator value for `as` relations
    pub source_type: String,
    pub dependent: Dependent,
    pub options: FindOptions,
    pub finder_sql: Option<String>,
}

impl ResolvedRelation {
    /// `<name>_type` for a polymorphic belongs_to
    pub fn type_column(&self) -> Option<String> {
        if self.polymorphic {
            Some(format!("{}_type", self.name))
        } else {
            None
        }
    }

    /// Polymorphic id/type columns on the target of an `as` relation
    pub fn as_columns(&self) -> Option<(String, String)> {
        self.as_name
            .as_ref()
            .map(|prefix| (format!("{}_id", prefix), format!("{}_type", prefix)))
    }

    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// Either side of a polymorphic pair
    pub fn is_polymorphic(&self) -> bool {
        self.polymorphic || self.as_name.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_of(class: &str) -> String {
        inflector::tableize(class)
    }

    #[test]
    fn test_belongs_to_defaults() {
        let resolved = RelationDescriptor::belongs_to("user").resolve("Post", "posts", &table_of);
        assert_eq!(resolved.class_name.as_deref(), Some("User"));
        assert_eq!(resolved.foreign_key, "user_id");
        assert_eq!(resolved.dependent, Dependent::Nullify);
    }

    #[test]
    fn test_has_many_defaults() {
        let resolved = RelationDescriptor::has_many("posts").resolve("User", "users", &table_of);
        assert_eq!(resolved.class_name.as_deref(), Some("Post"));
        assert_eq!(resolved.foreign_key, "user_id");
        assert!(resolved.is_collection());

        let resolved = RelationDescriptor::has_many("entries")
            .with_class_name("BlogPost")
            .with_foreign_key("author_id")
            .resolve("User", "users", &table_of);
        assert_eq!(resolved.class_name.as_deref(), Some("BlogPost"));
        assert_eq!(resolved.foreign_key, "author_id");
    }

    #[test]
    fn test_join_table_is_lexical() {
        let resolved = RelationDescriptor::has_and_belongs_to_many("tags").resolve("User", "users", &table_of);
        assert_eq!(resolved.join_table.as_deref(), Some("tags_users"));
        assert_eq!(resolved.foreign_key, "user_id");
        assert_eq!(resolved.association_foreign_key.as_deref(), Some("tag_id"));

        let resolved = RelationDescriptor::has_and_belongs_to_many("users").resolve("Tag", "tags", &table_of);
        assert_eq!(resolved.join_table.as_deref(), Some("tags_users"));
        assert_eq!(resolved.foreign_key, "tag_id");
    }

    #[test]
    fn test_polymorphic_belongs_to() {
        let resolved = RelationDescriptor::belongs_to("commentable")
            .polymorphic()
            .resolve("Comment", "comments", &table_of);
        assert!(resolved.class_name.is_none());
        assert_eq!(resolved.foreign_key, "commentable_id");
        assert_eq!(resolved.type_column().as_deref(), Some("commentable_type"));
    }

    #[test]
    fn test_as_relation() {
        let resolved = RelationDescriptor::has_many("comments")
            .with_as("commentable")
            .resolve("Post", "posts", &table_of);
        assert_eq!(resolved.source_type, "Post");
        assert_eq!(
            resolved.as_columns(),
            Some(("commentable_id".to_string(), "commentable_type".to_string()))
        );
    }
}

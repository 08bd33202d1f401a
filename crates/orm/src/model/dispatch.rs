//! Dispatch table for dynamic finder and association method names
//!
//! Built once per model from its columns, compound finders and relations.
//! `find_by_name`, `count_by_user_id`, `push_tags` and friends are looked
//! up here instead of being parsed from the call site.

use std::collections::HashMap;

use crate::relationships::RelationRegistry;

/// Column-driven model-level finders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinderKind {
    FindBy,
    FindAllBy,
    CountBy,
    FindOrCreateBy,
    FindOrInitializeBy,
}

impl FinderKind {
    const ALL: [(FinderKind, &'static str); 5] = [
        (FinderKind::FindBy, "find_by_"),
        (FinderKind::FindAllBy, "find_all_by_"),
        (FinderKind::CountBy, "count_by_"),
        (FinderKind::FindOrCreateBy, "find_or_create_by_"),
        (FinderKind::FindOrInitializeBy, "find_or_initialize_by_"),
    ];
}

/// Record-level association operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationOp {
    Find,
    FindFirst,
    FindLast,
    Reset,
    Build,
    Create,
    Replace,
    Push,
    Clear,
    Delete,
    Destroy,
    Count,
    Sum,
    Size,
    Length,
    IsEmpty,
    Ids,
    SetIds,
    Uniq,
}

impl AssociationOp {
    /// Method name for relation `name`
    fn method_name(self, name: &str) -> String {
        match self {
            AssociationOp::Find => format!("find_{}", name),
            AssociationOp::FindFirst => format!("find_first_{}", name),
            AssociationOp::FindLast => format!("find_last_{}", name),
            AssociationOp::Reset => format!("reset_{}", name),
            AssociationOp::Build => format!("build_{}", name),
            AssociationOp::Create => format!("create_{}", name),
            AssociationOp::Replace => format!("replace_{}", name),
            AssociationOp::Push => format!("push_{}", name),
            AssociationOp::Clear => format!("clear_{}", name),
            AssociationOp::Delete => format!("delete_{}", name),
            AssociationOp::Destroy => format!("destroy_{}", name),
            AssociationOp::Count => format!("count_{}", name),
            AssociationOp::Sum => format!("sum_{}", name),
            AssociationOp::Size => format!("{}_size", name),
            AssociationOp::Length => format!("{}_length", name),
            AssociationOp::IsEmpty => format!("{}_is_empty", name),
            AssociationOp::Ids => format!("{}_ids", name),
            AssociationOp::SetIds => format!("set_{}_ids", name),
            AssociationOp::Uniq => format!("uniq_{}", name),
        }
    }

    const SINGULAR: [AssociationOp; 5] = [
        AssociationOp::Find,
        AssociationOp::Reset,
        AssociationOp::Build,
        AssociationOp::Create,
        AssociationOp::Replace,
    ];

    const COLLECTION: [AssociationOp; 18] = [
        AssociationOp::Find,
        AssociationOp::FindFirst,
        AssociationOp::FindLast,
        AssociationOp::Reset,
        AssociationOp::Replace,
        AssociationOp::Push,
        AssociationOp::Clear,
        AssociationOp::Delete,
        AssociationOp::Destroy,
        AssociationOp::Count,
        AssociationOp::Sum,
        AssociationOp::Size,
        AssociationOp::Length,
        AssociationOp::IsEmpty,
        AssociationOp::Ids,
        AssociationOp::SetIds,
        AssociationOp::Uniq,
        AssociationOp::Build,
    ];
}

/// What a dispatched name resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Finder { kind: FinderKind, fields: Vec<String> },
    Association { relation: String, op: AssociationOp },
}

#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<String, Operation>,
}

impl DispatchTable {
    pub fn build(columns: &[String], compound_finders: &[Vec<String>], relations: &RelationRegistry) -> Self {
        let mut table = DispatchTable::default();

        let field_sets = columns
            .iter()
            .map(|c| vec![c.clone()])
            .chain(compound_finders.iter().cloned());
        for fields in field_sets {
            let suffix = fields.join("_and_");
            for (kind, prefix) in FinderKind::ALL {
                table.insert(
                    format!("{}{}", prefix, suffix),
                    Operation::Finder {
                        kind,
                        fields: fields.clone(),
                    },
                );
            }
        }

        for relation in relations.iter() {
            let ops: &[AssociationOp] = if relation.kind.is_collection() {
                &AssociationOp::COLLECTION
            } else {
                &AssociationOp::SINGULAR
            };
            let names = std::iter::once(&relation.name).chain(relation.aliases.iter());
            for name in names {
                for &op in ops {
                    table.insert(
                        op.method_name(name),
                        Operation::Association {
                            relation: relation.name.clone(),
                            op,
                        },
                    );
                }
            }
        }

        table
    }

    fn insert(&mut self, name: String, operation: Operation) {
        if self.entries.contains_key(&name) {
            tracing::debug!(method = %name, "Dispatch name already taken, keeping first entry");
            return;
        }
        self.entries.insert(name, operation);
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Every published name, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::RelationDescriptor;

    fn table() -> DispatchTable {
        let mut relations = RelationRegistry::new();
        relations
            .register("User", RelationDescriptor::has_many("posts").with_alias("articles"))
            .unwrap();
        relations.register("User", RelationDescriptor::has_one("profile")).unwrap();
        DispatchTable::build(
            &["id".to_string(), "name".to_string(), "email".to_string()],
            &[vec!["name".to_string(), "email".to_string()]],
            &relations,
        )
    }

    #[test]
    fn test_finders() {
        let table = table();
        assert_eq!(
            table.get("find_by_name"),
            Some(&Operation::Finder {
                kind: FinderKind::FindBy,
                fields: vec!["name".into()]
            })
        );
        assert_eq!(
            table.get("find_or_create_by_name_and_email"),
            Some(&Operation::Finder {
                kind: FinderKind::FindOrCreateBy,
                fields: vec!["name".into(), "email".into()]
            })
        );
        assert!(table.contains("count_by_email"));
        assert!(!table.contains("find_by_colour"));
    }

    #[test]
    fn test_association_methods() {
        let table = table();
        assert_eq!(
            table.get("push_articles"),
            Some(&Operation::Association {
                relation: "posts".into(),
                op: AssociationOp::Push
            })
        );
        assert!(table.contains("posts_ids"));
        assert!(table.contains("set_posts_ids"));
        assert!(table.contains("build_profile"));
        // collection-only operations are not published for singular relations
        assert!(!table.contains("push_profile"));
        assert!(!table.contains("profile_size"));
    }
}

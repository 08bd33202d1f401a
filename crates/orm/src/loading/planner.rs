//! Eager-load planner
//!
//! Expands an include tree into one SELECT: every included table gets a
//! unique alias (its table name, or the name plus a counter when already
//! taken), every column is selected as `alias.column AS alias_column`, and
//! each relation adds LEFT OUTER JOINs from its parent alias. Result columns
//! are mapped back by position, since `alias_column` names can collide.

use std::collections::HashSet;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{ModelError, ModelResult};
use crate::model::associations::{through_path, ThroughPath};
use crate::model::Model;
use crate::query::IncludeTree;
use crate::relationships::{RelationKind, ResolvedRelation};
use crate::value::Value;

/// One include with its target resolved
#[derive(Debug, Clone)]
pub(crate) struct IncludeNode {
    pub(crate) relation: ResolvedRelation,
    pub(crate) target: Model,
    pub(crate) through: Option<ThroughPath>,
    pub(crate) children: Vec<IncludeNode>,
}

/// Resolve every relation of `tree` against `model`, recursively
pub(crate) fn collect<'a>(model: &'a Model, tree: &'a IncludeTree) -> BoxFuture<'a, ModelResult<Vec<IncludeNode>>> {
    async move {
        let mut nodes = Vec::with_capacity(tree.len());
        for (name, nested) in tree.iter() {
            let relation = model.meta().relation(name)?.clone();
            let (target, through) = if relation.through.is_some() {
                let path = through_path(model, &relation).await?;
                (path.target.clone(), Some(path))
            } else {
                let class = relation.class_name.clone().ok_or_else(|| {
                    ModelError::Relationship(format!(
                        "Cannot eager load polymorphic {} of {} without a class name",
                        relation.name,
                        model.class_name()
                    ))
                })?;
                (model.orm().model(&class).await?, None)
            };
            let children = collect(&target, nested).await?;
            nodes.push(IncludeNode {
                relation,
                target,
                through,
                children,
            });
        }
        Ok(nodes)
    }
    .boxed()
}

/// Entry of the include information map. Index 0 is the root.
#[derive(Debug, Clone)]
pub(crate) struct IncludeInfo {
    pub(crate) alias: String,
    pub(crate) model: Model,
    /// Index of the parent entry; `None` for the root
    pub(crate) parent: Option<usize>,
    /// Relation name on the parent
    pub(crate) relation: String,
    pub(crate) plural: bool,
}

/// Head of an eager-load SELECT plus its include information map
#[derive(Debug, Clone)]
pub(crate) struct EagerPlan {
    pub(crate) select: String,
    /// Root table followed by every LEFT OUTER JOIN
    pub(crate) from: String,
    /// Values bound by join predicates, in join order
    pub(crate) values: Vec<Value>,
    pub(crate) includes: Vec<IncludeInfo>,
    /// Include index and column name of each selected field, in order
    pub(crate) columns: Vec<(usize, String)>,
}

impl EagerPlan {
    /// Include index and column of the result column at `position`
    pub(crate) fn column_at(&self, position: usize) -> Option<(usize, &str)> {
        self.columns
            .get(position)
            .map(|(index, column)| (*index, column.as_str()))
    }

    /// Indexes of the entries directly below `parent`
    pub(crate) fn children_of(&self, parent: usize) -> impl Iterator<Item = (usize, &IncludeInfo)> {
        self.includes
            .iter()
            .enumerate()
            .filter(move |(_, info)| info.parent == Some(parent))
    }
}

struct Planner {
    taken: HashSet<String>,
    fields: Vec<String>,
    columns: Vec<(usize, String)>,
    joins: Vec<String>,
    values: Vec<Value>,
    includes: Vec<IncludeInfo>,
}

/// Build the plan for `root` (selected from `from`) and its resolved includes
pub(crate) fn build(root: &Model, from: &str, nodes: &[IncludeNode]) -> EagerPlan {
    let mut planner = Planner {
        taken: HashSet::new(),
        fields: Vec::new(),
        columns: Vec::new(),
        joins: Vec::new(),
        values: Vec::new(),
        includes: Vec::new(),
    };
    let alias = planner.alias_for(root.table_name());
    planner.select_columns(root, &alias, 0);
    planner.includes.push(IncludeInfo {
        alias,
        model: root.clone(),
        parent: None,
        relation: String::new(),
        plural: false,
    });
    for node in nodes {
        planner.add(node, 0);
    }

    let mut from = from.to_string();
    for join in &planner.joins {
        from.push(' ');
        from.push_str(join);
    }
    EagerPlan {
        select: planner.fields.join(", "),
        from,
        values: planner.values,
        includes: planner.includes,
        columns: planner.columns,
    }
}

impl Planner {
    fn alias_for(&mut self, table: &str) -> String {
        let mut alias = table.to_string();
        let mut suffix = 1;
        while self.taken.contains(&alias) {
            suffix += 1;
            alias = format!("{}{}", table, suffix);
        }
        self.taken.insert(alias.clone());
        alias
    }

    fn select_columns(&mut self, model: &Model, alias: &str, include: usize) {
        for column in model.meta().column_names() {
            self.fields.push(format!("{alias}.{column} AS {alias}_{column}"));
            self.columns.push((include, column.to_string()));
        }
    }

    fn add(&mut self, node: &IncludeNode, parent: usize) {
        let parent_alias = self.includes[parent].alias.clone();
        let parent_model = self.includes[parent].model.clone();

        let alias = match &node.through {
            Some(path) => {
                let through_alias = self.alias_for(path.through_model.table_name());
                self.join(&path.through_model, &through_alias, &parent_model, &parent_alias, &path.through);
                let alias = self.alias_for(path.target.table_name());
                self.join(&path.target, &alias, &path.through_model, &through_alias, &path.source);
                alias
            }
            None => {
                let alias = self.alias_for(node.target.table_name());
                self.join(&node.target, &alias, &parent_model, &parent_alias, &node.relation);
                alias
            }
        };

        let index = self.includes.len();
        self.select_columns(&node.target, &alias, index);
        self.includes.push(IncludeInfo {
            alias,
            model: node.target.clone(),
            parent: Some(parent),
            relation: node.relation.name.clone(),
            plural: node.relation.is_collection(),
        });
        for child in &node.children {
            self.add(child, index);
        }
    }

    /// LEFT OUTER JOIN(s) from `parent` (aliased `p`) to `target` (aliased `x`)
    fn join(&mut self, target: &Model, x: &str, parent: &Model, p: &str, rel: &ResolvedRelation) {
        let table = aliased(target.table_name(), x);
        match rel.kind {
            RelationKind::BelongsTo => {
                let mut on = format!("{p}.{} = {x}.{}", rel.foreign_key, target.primary_key());
                if let Some(type_column) = rel.type_column() {
                    on.push_str(&format!(" AND {p}.{type_column} = ?"));
                    self.values.push(Value::from(target.class_name()));
                }
                self.joins.push(format!("LEFT OUTER JOIN {table} ON {on}"));
            }
            RelationKind::HasOne | RelationKind::HasMany => match rel.as_columns() {
                Some((id_column, type_column)) => {
                    self.joins.push(format!(
                        "LEFT OUTER JOIN {table} ON {x}.{id_column} = {p}.{} AND {x}.{type_column} = ?",
                        parent.primary_key()
                    ));
                    self.values.push(Value::from(rel.source_type.clone()));
                }
                None => {
                    self.joins.push(format!(
                        "LEFT OUTER JOIN {table} ON {x}.{} = {p}.{}",
                        rel.foreign_key,
                        parent.primary_key()
                    ));
                }
            },
            RelationKind::HasAndBelongsToMany => {
                let join_table = rel.join_table.as_deref().unwrap_or_default();
                let j = self.alias_for(join_table);
                self.joins.push(format!(
                    "LEFT OUTER JOIN {} ON {j}.{} = {p}.{}",
                    aliased(join_table, &j),
                    rel.foreign_key,
                    parent.primary_key()
                ));
                self.joins.push(format!(
                    "LEFT OUTER JOIN {table} ON {x}.{} = {j}.{}",
                    target.primary_key(),
                    rel.association_foreign_key.as_deref().unwrap_or_default()
                ));
            }
        }
    }
}

fn aliased(table: &str, alias: &str) -> String {
    if table == alias {
        table.to_string()
    } else {
        format!("{} {}", table, alias)
    }
}

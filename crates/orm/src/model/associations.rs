//! Associations of one record
//!
//! Loading runs the target model's finders with the relation's predicate
//! ANDed in (plus an INNER JOIN for join tables and through relations).
//! Results are cached per relation until `reset_association`. Changes made
//! while the owner is unsaved stay pending and are flushed by `save`:
//! belongs-to targets before the owner row, has-* targets after it.

use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;

use crate::error::{ModelError, ModelResult};
use crate::inflector;
use crate::query::{builder, dml, Conditions, FindArg, FindMode, FindOptions};
use crate::relationships::{Dependent, RelationKind, ResolvedRelation};
use crate::value::Value;

use super::definition::CallbackKind;
use super::dispatch::{AssociationOp, Operation};
use super::{Arg, Dispatched, Found, Model, Record};

/// Cached association value
#[derive(Debug, Clone)]
pub enum Loaded {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Loaded {
    pub fn one(&self) -> Option<&Record> {
        self.records().first()
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Loaded::One(Some(record)) => std::slice::from_ref(&**record),
            Loaded::One(None) => &[],
            Loaded::Many(records) => records,
        }
    }

    pub(crate) fn records_mut(&mut self) -> &mut [Record] {
        match self {
            Loaded::One(Some(record)) => std::slice::from_mut(&mut **record),
            Loaded::One(None) => &mut [],
            Loaded::Many(records) => records,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Loaded::One(record) => record.map(|r| *r).into_iter().collect(),
            Loaded::Many(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub(crate) fn to_json(&self) -> JsonValue {
        match self {
            Loaded::One(Some(record)) => record.to_json(),
            Loaded::One(None) => JsonValue::Null,
            Loaded::Many(records) => JsonValue::Array(records.iter().map(Record::to_json).collect()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AssociationState {
    pub(crate) loaded: Loaded,
    /// Saved along with the owner on its next `save`
    pub(crate) pending: bool,
}

impl AssociationState {
    fn loaded(loaded: Loaded) -> Self {
        Self { loaded, pending: false }
    }
}

/// Resolved hops of a through relation
#[derive(Debug, Clone)]
pub(crate) struct ThroughPath {
    pub(crate) through: ResolvedRelation,
    pub(crate) through_model: Model,
    pub(crate) source: ResolvedRelation,
    pub(crate) target: Model,
}

/// Resolve `rel.through` on `owner`, then the source relation on the
/// through model (by name, then by singular name)
pub(crate) async fn through_path(owner: &Model, rel: &ResolvedRelation) -> ModelResult<ThroughPath> {
    let unsupported = |capability: &str| ModelError::unsupported(owner.connection().kind().as_str(), capability);
    let through_name = rel.through.as_deref().ok_or_else(|| {
        ModelError::Relationship(format!("Relation {} of {} has no through", rel.name, owner.class_name()))
    })?;
    let through = owner.meta().relation(through_name)?.clone();
    if rel.is_polymorphic() || through.is_polymorphic() {
        return Err(unsupported("polymorphic through association"));
    }
    if through.kind == RelationKind::HasAndBelongsToMany || through.through.is_some() {
        return Err(unsupported("nested through association"));
    }
    let through_model = owner.orm().model(&class_of(owner, &through)?).await?;

    let source = match through_model.meta().relation(&rel.source) {
        Ok(source) => source.clone(),
        Err(_) => through_model
            .meta()
            .relation(&inflector::singularize(&rel.source))?
            .clone(),
    };
    if source.is_polymorphic() {
        return Err(unsupported("polymorphic through association"));
    }
    if source.through.is_some() {
        return Err(unsupported("nested through association"));
    }
    let target = owner.orm().model(&class_of(&through_model, &source)?).await?;

    Ok(ThroughPath {
        through,
        through_model,
        source,
        target,
    })
}

fn class_of(owner: &Model, rel: &ResolvedRelation) -> ModelResult<String> {
    rel.class_name.clone().ok_or_else(|| {
        ModelError::Relationship(format!(
            "Polymorphic relation {} of {} has no fixed class",
            rel.name,
            owner.class_name()
        ))
    })
}

impl ThroughPath {
    /// INNER JOIN from the target table to the through table
    fn join(&self) -> String {
        let t = self.through_model.table_name();
        let x = self.target.table_name();
        let source = &self.source;
        match source.kind {
            RelationKind::BelongsTo => format!(
                "INNER JOIN {t} ON {x}.{} = {t}.{}",
                self.target.primary_key(),
                source.foreign_key
            ),
            RelationKind::HasOne | RelationKind::HasMany => format!(
                "INNER JOIN {t} ON {x}.{} = {t}.{}",
                source.foreign_key,
                self.through_model.primary_key()
            ),
            RelationKind::HasAndBelongsToMany => {
                let jt = source.join_table.as_deref().unwrap_or_default();
                format!(
                    "INNER JOIN {jt} ON {x}.{} = {jt}.{} INNER JOIN {t} ON {t}.{} = {jt}.{}",
                    self.target.primary_key(),
                    source.association_foreign_key.as_deref().unwrap_or_default(),
                    self.through_model.primary_key(),
                    source.foreign_key
                )
            }
        }
    }
}

/// How the target rows of a relation are found for one owner
struct Link {
    target: Model,
    joins: Option<String>,
    conditions: Conditions,
}

impl Record {
    fn relation(&self, name: &str) -> ModelResult<ResolvedRelation> {
        Ok(self.model().meta().relation(name)?.clone())
    }

    /// Model of the relation's target; a polymorphic belongs-to reads its
    /// class from `<name>_type`
    pub(crate) async fn target_model(&self, rel: &ResolvedRelation) -> ModelResult<Model> {
        if rel.through.is_some() {
            return Ok(through_path(self.model(), rel).await?.target);
        }
        let class = match &rel.class_name {
            Some(class) => class.clone(),
            None => {
                let column = rel.type_column().unwrap_or_default();
                self.read(&column).to_text().filter(|c| !c.is_empty()).ok_or_else(|| {
                    ModelError::Relationship(format!(
                        "{} of {} has no {} value",
                        rel.name,
                        self.class_name(),
                        column
                    ))
                })?
            }
        };
        self.model().orm().model(&class).await
    }

    /// Unqualified columns the owner stamps on has-one/has-many targets
    fn owner_pairs(&self, rel: &ResolvedRelation) -> Vec<(String, Value)> {
        match rel.as_columns() {
            Some((id_column, type_column)) => vec![
                (id_column, self.id()),
                (type_column, Value::from(rel.source_type.clone())),
            ],
            None => vec![(rel.foreign_key.clone(), self.id())],
        }
    }

    async fn link(&self, rel: &ResolvedRelation) -> ModelResult<Option<Link>> {
        if rel.through.is_some() {
            let path = through_path(self.model(), rel).await?;
            let t = path.through_model.table_name();
            let (column, value) = match path.through.kind {
                RelationKind::BelongsTo => (
                    format!("{}.{}", t, path.through_model.primary_key()),
                    self.read(&path.through.foreign_key),
                ),
                _ => (format!("{}.{}", t, path.through.foreign_key), self.id()),
            };
            if value.is_null() {
                return Ok(None);
            }
            return Ok(Some(Link {
                joins: Some(path.join()),
                conditions: Conditions::Equals(vec![(column, value)]),
                target: path.target,
            }));
        }

        match rel.kind {
            RelationKind::BelongsTo => {
                let key = self.read(&rel.foreign_key);
                if key.is_null() {
                    return Ok(None);
                }
                let target = self.target_model(rel).await?;
                Ok(Some(Link {
                    conditions: Conditions::Equals(vec![(target.qualified_key(), key)]),
                    joins: None,
                    target,
                }))
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                if self.id().is_null() {
                    return Ok(None);
                }
                let target = self.target_model(rel).await?;
                let pairs = self
                    .owner_pairs(rel)
                    .into_iter()
                    .map(|(column, value)| (format!("{}.{}", target.table_name(), column), value))
                    .collect();
                Ok(Some(Link {
                    target,
                    joins: None,
                    conditions: Conditions::Equals(pairs),
                }))
            }
            RelationKind::HasAndBelongsToMany => {
                if self.id().is_null() {
                    return Ok(None);
                }
                let target = self.target_model(rel).await?;
                let jt = rel.join_table.as_deref().unwrap_or_default();
                let joins = format!(
                    "INNER JOIN {jt} ON {} = {jt}.{}",
                    target.qualified_key(),
                    rel.association_foreign_key.as_deref().unwrap_or_default()
                );
                Ok(Some(Link {
                    target,
                    joins: Some(joins),
                    conditions: Conditions::Equals(vec![(format!("{}.{}", jt, rel.foreign_key), self.id())]),
                }))
            }
        }
    }

    /// Relation defaults, caller options and the link predicate combined
    fn scoped_options(rel: &ResolvedRelation, link: &Link, options: FindOptions) -> FindOptions {
        let mut options = rel
            .options
            .clone()
            .merge(options)
            .and_conditions(link.conditions.clone());
        options.joins = match (link.joins.clone(), options.joins.take()) {
            (Some(link_joins), Some(extra)) => Some(format!("{} {}", link_joins, extra)),
            (link_joins, extra) => link_joins.or(extra),
        };
        options
    }

    /// Query an association. Singular relations always answer with one
    /// record; `finder_sql` replaces the generated query, `{id}` standing
    /// for the owner's key.
    pub async fn find_association(
        &self,
        name: &str,
        arg: impl Into<FindArg>,
        options: FindOptions,
    ) -> ModelResult<Found> {
        let rel = self.relation(name)?;
        let empty = || {
            if rel.is_collection() {
                Found::Many(Vec::new())
            } else {
                Found::One(None)
            }
        };

        if let Some(sql) = &rel.finder_sql {
            if self.id().is_null() {
                return Ok(empty());
            }
            let target = self.target_model(&rel).await?;
            let values = vec![self.id(); sql.matches("{id}").count()];
            let records = target.find_by_sql(&sql.replace("{id}", "?"), &values).await?;
            return Ok(if rel.is_collection() {
                Found::Many(records)
            } else {
                Found::One(records.into_iter().next())
            });
        }

        let Some(link) = self.link(&rel).await? else {
            return Ok(empty());
        };
        let options = Self::scoped_options(&rel, &link, options);
        let arg = if rel.is_collection() {
            arg.into()
        } else {
            FindArg::Mode(FindMode::First)
        };
        link.target.find_with(arg, options).await
    }

    pub async fn find_first_association(&self, name: &str, options: FindOptions) -> ModelResult<Option<Record>> {
        Ok(self.find_association(name, FindMode::First, options).await?.one())
    }

    pub async fn find_last_association(&self, name: &str, options: FindOptions) -> ModelResult<Option<Record>> {
        Ok(self.find_association(name, FindMode::Last, options).await?.one())
    }

    /// Load (once) and cache an association
    pub async fn load_association(&mut self, name: &str) -> ModelResult<&Loaded> {
        let rel = self.relation(name)?;
        if !self.associations.contains_key(&rel.name) {
            let loaded = match self.find_association(&rel.name, FindMode::All, FindOptions::default()).await? {
                Found::One(record) => Loaded::One(record.map(Box::new)),
                Found::Many(records) => Loaded::Many(records),
            };
            self.associations.insert(rel.name.clone(), AssociationState::loaded(loaded));
        }
        self.associations
            .get(&rel.name)
            .map(|state| &state.loaded)
            .ok_or_else(|| ModelError::undefined_relation(self.class_name(), name))
    }

    /// Cached association value, without loading
    pub fn association(&self, name: &str) -> Option<&Loaded> {
        let rel = self.model().meta().relation(name).ok()?;
        self.associations.get(&rel.name).map(|state| &state.loaded)
    }

    pub fn reset_association(&mut self, name: &str) -> ModelResult<()> {
        let rel = self.relation(name)?;
        self.associations.remove(&rel.name);
        Ok(())
    }

    async fn loaded_records(&mut self, name: &str) -> ModelResult<Vec<Record>> {
        Ok(self.load_association(name).await?.records().to_vec())
    }

    fn attach_child(&self, rel: &ResolvedRelation, child: &mut Record) -> ModelResult<()> {
        for (column, value) in self.owner_pairs(rel) {
            child.set(&column, value)?;
        }
        Ok(())
    }

    fn attach_parent(&mut self, rel: &ResolvedRelation, parent: Option<&Record>) -> ModelResult<()> {
        let key = parent.map(Record::id).unwrap_or(Value::Null);
        self.set(&rel.foreign_key, key)?;
        if let Some(column) = rel.type_column() {
            let class = parent
                .map(|p| Value::from(p.class_name()))
                .unwrap_or(Value::Null);
            self.set(&column, class)?;
        }
        Ok(())
    }

    async fn insert_join_row(&self, rel: &ResolvedRelation, target_id: Value) -> ModelResult<()> {
        let jt = rel.join_table.as_deref().unwrap_or_default();
        let statement = dml::insert(
            jt,
            &rel.foreign_key,
            &[
                (rel.foreign_key.clone(), self.id()),
                (rel.association_foreign_key.clone().unwrap_or_default(), target_id),
            ],
        );
        self.model().connection().run(&statement).await?;
        Ok(())
    }

    /// Join rows of this owner, or only those pointing at `target_ids`
    async fn delete_join_rows(&self, rel: &ResolvedRelation, target_ids: Option<&[Value]>) -> ModelResult<u64> {
        let jt = rel.join_table.as_deref().unwrap_or_default();
        let mut conditions = Conditions::equals(vec![(rel.foreign_key.clone(), self.id())]);
        if let Some(ids) = target_ids {
            let afk = rel.association_foreign_key.as_deref().unwrap_or_default();
            match builder::ids_condition(afk, ids) {
                Some((sql, values)) => conditions = conditions.and(Conditions::Fragment(sql, values)),
                None => return Ok(0),
            }
        }
        let statement = dml::delete(jt, Some(&conditions));
        Ok(self.model().connection().run(&statement).await?.affected())
    }

    /// Clear the owner columns on targets (all of them, or `target_ids`)
    async fn nullify_children(&self, rel: &ResolvedRelation, target_ids: Option<&[Value]>) -> ModelResult<u64> {
        let target = self.target_model(rel).await?;
        let pairs = self.owner_pairs(rel);
        let sets: Vec<(String, Value)> = pairs.iter().map(|(c, _)| (c.clone(), Value::Null)).collect();
        let mut conditions = Conditions::Equals(pairs);
        if let Some(ids) = target_ids {
            match builder::ids_condition(target.primary_key(), ids) {
                Some((sql, values)) => conditions = conditions.and(Conditions::Fragment(sql, values)),
                None => return Ok(0),
            }
        }
        let statement = dml::update(target.table_name(), &sets, Some(&conditions));
        Ok(target.connection().run(&statement).await?.affected())
    }

    fn ensure_direct(&self, rel: &ResolvedRelation, action: &str) -> ModelResult<()> {
        if rel.through.is_some() {
            return Err(ModelError::Relationship(format!(
                "Cannot {} through association {} of {}",
                action,
                rel.name,
                self.class_name()
            )));
        }
        Ok(())
    }

    /// New target built from `attrs` and attached in memory; it is saved
    /// with the owner
    pub async fn build_association<K, V>(&mut self, name: &str, attrs: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let rel = self.relation(name)?;
        if rel.kind == RelationKind::BelongsTo && rel.class_name.is_none() {
            return Err(ModelError::Relationship(format!(
                "Cannot build polymorphic {} of {} without a class",
                rel.name,
                self.class_name()
            )));
        }
        let target = self.target_model(&rel).await?;
        let mut record = target.new_record(attrs)?;
        if matches!(rel.kind, RelationKind::HasOne | RelationKind::HasMany) && rel.through.is_none() {
            self.attach_child(&rel, &mut record)?;
        }

        if rel.is_collection() {
            let mut records = if self.is_new_record() {
                self.association(&rel.name).map(|l| l.records().to_vec()).unwrap_or_default()
            } else {
                self.loaded_records(&rel.name).await?
            };
            records.push(record.clone());
            self.associations.insert(
                rel.name.clone(),
                AssociationState {
                    loaded: Loaded::Many(records),
                    pending: true,
                },
            );
        } else {
            self.associations.insert(
                rel.name.clone(),
                AssociationState {
                    loaded: Loaded::One(Some(Box::new(record.clone()))),
                    pending: true,
                },
            );
        }
        Ok(record)
    }

    /// Create a target and link it. Belongs-to sets the owner's foreign key
    /// in memory; has-* and join-table links are written at once when the
    /// owner is persisted.
    pub async fn create_association<K, V>(&mut self, name: &str, attrs: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let rel = self.relation(name)?;
        self.ensure_direct(&rel, "create")?;
        if self.is_new_record() && rel.kind != RelationKind::BelongsTo {
            return self.build_association(name, attrs).await;
        }
        match rel.kind {
            RelationKind::BelongsTo => {
                let mut target = self.build_association(name, attrs).await?;
                if target.save().await? {
                    self.attach_parent(&rel, Some(&target))?;
                    self.associations.insert(
                        rel.name.clone(),
                        AssociationState::loaded(Loaded::One(Some(Box::new(target.clone())))),
                    );
                }
                Ok(target)
            }
            RelationKind::HasOne => {
                let mut target = self.target_model(&rel).await?.new_record(attrs)?;
                self.attach_child(&rel, &mut target)?;
                if !target.validate().await? {
                    return Ok(target);
                }
                if self.replace_association(name, vec![target.clone()]).await? {
                    if let Some(saved) = self.association(name).and_then(Loaded::one) {
                        target = saved.clone();
                    }
                }
                Ok(target)
            }
            RelationKind::HasMany | RelationKind::HasAndBelongsToMany => {
                let mut target = self.target_model(&rel).await?.new_record(attrs)?;
                self.add_target(&rel, &mut target).await?;
                Ok(target)
            }
        }
    }

    /// Assignment. Singular relations take the first record (none clears);
    /// collections replace their whole content. False when a target fails
    /// validation; it is left out and its errors are copied onto the owner.
    pub async fn replace_association(&mut self, name: &str, records: Vec<Record>) -> ModelResult<bool> {
        let rel = self.relation(name)?;
        self.ensure_direct(&rel, "replace")?;

        if self.is_new_record() {
            let loaded = if rel.is_collection() {
                Loaded::Many(records)
            } else {
                Loaded::One(records.into_iter().next().map(Box::new))
            };
            if rel.kind == RelationKind::BelongsTo {
                let parent = loaded.one().cloned();
                if parent.as_ref().map(|p| !p.is_new_record()).unwrap_or(true) {
                    self.attach_parent(&rel, parent.as_ref())?;
                }
            }
            self.associations.insert(rel.name.clone(), AssociationState { loaded, pending: true });
            return Ok(true);
        }

        let mut ok = true;
        match rel.kind {
            RelationKind::BelongsTo => {
                let parent = records.into_iter().next();
                let pending = parent.as_ref().map(Record::is_new_record).unwrap_or(false);
                if !pending {
                    self.attach_parent(&rel, parent.as_ref())?;
                }
                self.associations.insert(
                    rel.name.clone(),
                    AssociationState {
                        loaded: Loaded::One(parent.map(Box::new)),
                        pending,
                    },
                );
            }
            RelationKind::HasOne => {
                let mut next = records.into_iter().next();
                let keep = next.as_ref().map(Record::id).filter(|id| !id.is_null());
                let current_id = self.load_association(name).await?.one().map(Record::id);
                if let Some(current_id) = current_id {
                    if keep.as_ref().map(|k| !k.loosely_equals(&current_id)).unwrap_or(true) {
                        self.nullify_children(&rel, Some(&[current_id])).await?;
                    }
                }
                if let Some(child) = next.as_mut() {
                    self.attach_child(&rel, child)?;
                    if !child.save().await? {
                        self.adopt_errors(&rel, child);
                        self.associations.remove(&rel.name);
                        return Ok(false);
                    }
                }
                self.associations.insert(
                    rel.name.clone(),
                    AssociationState::loaded(Loaded::One(next.map(Box::new))),
                );
            }
            RelationKind::HasMany => {
                let keep: HashSet<String> = records
                    .iter()
                    .map(Record::id)
                    .filter(|id| !id.is_null())
                    .map(|id| id.key())
                    .collect();
                let dropped: Vec<Value> = self
                    .loaded_records(name)
                    .await?
                    .iter()
                    .map(Record::id)
                    .filter(|id| !keep.contains(&id.key()))
                    .collect();
                if !dropped.is_empty() {
                    self.nullify_children(&rel, Some(&dropped)).await?;
                }
                let mut kept = Vec::with_capacity(records.len());
                for mut child in records {
                    self.attach_child(&rel, &mut child)?;
                    if child.save().await? {
                        kept.push(child);
                    } else {
                        self.adopt_errors(&rel, &child);
                        ok = false;
                    }
                }
                self.associations
                    .insert(rel.name.clone(), AssociationState::loaded(Loaded::Many(kept)));
            }
            RelationKind::HasAndBelongsToMany => {
                self.delete_join_rows(&rel, None).await?;
                let mut kept = Vec::with_capacity(records.len());
                for mut target in records {
                    if self.link_target(&rel, &mut target).await? {
                        kept.push(target);
                    } else {
                        self.adopt_errors(&rel, &target);
                        ok = false;
                    }
                }
                self.associations
                    .insert(rel.name.clone(), AssociationState::loaded(Loaded::Many(kept)));
            }
        }
        Ok(ok)
    }

    /// Append to a collection. On a persisted owner each target is saved
    /// and linked at once; a through relation gets a new through row.
    ///
    /// False when some target fails validation: that target is neither
    /// linked nor cached, and its errors are copied onto the owner under
    /// `<relation>.<field>`. The other targets are still added.
    pub async fn push_association(&mut self, name: &str, records: Vec<Record>) -> ModelResult<bool> {
        let rel = self.relation(name)?;
        if !rel.is_collection() {
            return Err(ModelError::Relationship(format!(
                "Cannot push onto singular {} of {}",
                rel.name,
                self.class_name()
            )));
        }
        if self.is_new_record() && rel.through.is_some() {
            return Err(ModelError::Relationship(format!(
                "Save {} before pushing onto through association {}",
                self.class_name(),
                rel.name
            )));
        }

        let mut ok = true;
        for mut target in records {
            ok &= self.add_target(&rel, &mut target).await?;
        }
        Ok(ok)
    }

    /// One `push`: add callbacks around linking `target`, then the cache.
    /// An unsaved owner only queues the target.
    async fn add_target(&mut self, rel: &ResolvedRelation, target: &mut Record) -> ModelResult<bool> {
        self.run_association_callbacks(CallbackKind::BeforeAdd, &rel.name, target)?;

        if self.is_new_record() {
            let state = self.associations.entry(rel.name.clone()).or_insert_with(|| AssociationState {
                loaded: Loaded::Many(Vec::new()),
                pending: true,
            });
            state.pending = true;
            if let Loaded::Many(current) = &mut state.loaded {
                current.push(target.clone());
            }
        } else {
            if !self.link_target(rel, target).await? {
                self.adopt_errors(rel, target);
                return Ok(false);
            }
            if let Some(state) = self.associations.get_mut(&rel.name) {
                if let Loaded::Many(current) = &mut state.loaded {
                    current.push(target.clone());
                }
            }
        }

        self.run_association_callbacks(CallbackKind::AfterAdd, &rel.name, target)?;
        Ok(true)
    }

    /// Save `target` if needed and link it to this persisted owner
    async fn link_target(&self, rel: &ResolvedRelation, target: &mut Record) -> ModelResult<bool> {
        if rel.through.is_some() {
            return self.push_through(rel, target).await;
        }
        if rel.kind == RelationKind::HasAndBelongsToMany {
            if target.is_new_record() && !target.save().await? {
                return Ok(false);
            }
            self.insert_join_row(rel, target.id()).await?;
            return Ok(true);
        }
        self.attach_child(rel, target)?;
        target.save().await
    }

    /// Link `target` by creating a row of the through model
    async fn push_through(&self, rel: &ResolvedRelation, target: &mut Record) -> ModelResult<bool> {
        let path = through_path(self.model(), rel).await?;
        if path.through.kind == RelationKind::BelongsTo || path.source.kind != RelationKind::BelongsTo {
            return Err(ModelError::Relationship(format!(
                "Cannot push onto through association {} of {}",
                rel.name,
                self.class_name()
            )));
        }
        if target.is_new_record() && !target.save().await? {
            return Ok(false);
        }
        let mut row = Record::new(path.through_model.clone());
        row.set(&path.through.foreign_key, self.id())?;
        row.set(&path.source.foreign_key, target.id())?;
        if !row.save().await? {
            *target.errors_mut() = row.errors().clone();
            return Ok(false);
        }
        Ok(true)
    }

    /// `<relation> is invalid` plus the target's own messages
    fn adopt_errors(&mut self, rel: &ResolvedRelation, target: &Record) {
        let copied: Vec<(String, String)> = target
            .errors()
            .iter()
            .flat_map(|(field, messages)| {
                messages
                    .iter()
                    .map(move |message| (format!("{}.{}", rel.name, field), message.clone()))
            })
            .collect();
        let errors = self.errors_mut();
        errors.add(rel.name.clone(), format!("{} is invalid", rel.name));
        for (field, message) in copied {
            errors.add(field, message);
        }
    }

    /// Empty a collection, applying the relation's dependent strategy
    pub async fn clear_association(&mut self, name: &str) -> ModelResult<()> {
        let rel = self.relation(name)?;
        self.ensure_direct(&rel, "clear")?;
        let targets = if self.is_new_record() {
            self.association(&rel.name).map(|l| l.records().to_vec()).unwrap_or_default()
        } else {
            self.loaded_records(&rel.name).await?
        };
        for target in &targets {
            self.run_association_callbacks(CallbackKind::BeforeRemove, &rel.name, target)?;
        }
        if !self.is_new_record() {
            self.apply_dependent(&rel).await?;
        }
        let empty = if rel.is_collection() {
            Loaded::Many(Vec::new())
        } else {
            Loaded::One(None)
        };
        self.associations.insert(rel.name.clone(), AssociationState::loaded(empty));
        for target in &targets {
            self.run_association_callbacks(CallbackKind::AfterRemove, &rel.name, target)?;
        }
        Ok(())
    }

    /// Unlink targets: has-* clears their foreign key, a join table loses
    /// the matching rows. Targets stay in their tables.
    pub async fn delete_association(&mut self, name: &str, records: &[Record]) -> ModelResult<u64> {
        let rel = self.relation(name)?;
        self.ensure_direct(&rel, "delete from")?;
        for target in records {
            self.run_association_callbacks(CallbackKind::BeforeRemove, &rel.name, target)?;
        }
        let ids = persisted_ids(records);
        let affected = match rel.kind {
            RelationKind::HasAndBelongsToMany => self.delete_join_rows(&rel, Some(&ids)).await?,
            RelationKind::HasOne | RelationKind::HasMany => self.nullify_children(&rel, Some(&ids)).await?,
            RelationKind::BelongsTo => {
                self.attach_parent(&rel, None)?;
                0
            }
        };
        self.forget(&rel.name, &ids);
        for target in records {
            self.run_association_callbacks(CallbackKind::AfterRemove, &rel.name, target)?;
        }
        Ok(affected)
    }

    /// Destroy has-* targets; for a join table only the links are removed
    pub async fn destroy_association(&mut self, name: &str, mut records: Vec<Record>) -> ModelResult<u64> {
        let rel = self.relation(name)?;
        self.ensure_direct(&rel, "destroy from")?;
        for target in &records {
            self.run_association_callbacks(CallbackKind::BeforeRemove, &rel.name, target)?;
        }
        let ids = persisted_ids(&records);
        let affected = match rel.kind {
            RelationKind::HasAndBelongsToMany => self.delete_join_rows(&rel, Some(&ids)).await?,
            _ => {
                let mut destroyed = 0;
                for record in records.iter_mut() {
                    if !record.is_new_record() && record.destroy().await? {
                        destroyed += 1;
                    }
                }
                destroyed
            }
        };
        self.forget(&rel.name, &ids);
        for target in &records {
            self.run_association_callbacks(CallbackKind::AfterRemove, &rel.name, target)?;
        }
        Ok(affected)
    }

    fn forget(&mut self, relation: &str, ids: &[Value]) {
        let gone: HashSet<String> = ids.iter().map(Value::key).collect();
        if let Some(state) = self.associations.get_mut(relation) {
            match &mut state.loaded {
                Loaded::Many(records) => records.retain(|r| !gone.contains(&r.id().key())),
                Loaded::One(record) => {
                    if record.as_ref().map(|r| gone.contains(&r.id().key())).unwrap_or(false) {
                        *record = None;
                    }
                }
            }
        }
    }

    pub async fn count_association(&self, name: &str, options: FindOptions) -> ModelResult<i64> {
        let rel = self.relation(name)?;
        let Some(link) = self.link(&rel).await? else {
            return Ok(0);
        };
        let options = Self::scoped_options(&rel, &link, options);
        link.target.count(options).await
    }

    pub async fn sum_association(&self, name: &str, column: &str, options: FindOptions) -> ModelResult<Value> {
        let rel = self.relation(name)?;
        let Some(link) = self.link(&rel).await? else {
            return Ok(Value::Null);
        };
        let options = Self::scoped_options(&rel, &link, options);
        let column = if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", link.target.table_name(), column)
        };
        link.target.sum(&column, options).await
    }

    /// Cached length when loaded, else a COUNT query
    pub async fn association_size(&self, name: &str) -> ModelResult<i64> {
        match self.association(name) {
            Some(loaded) => Ok(loaded.len() as i64),
            None => self.count_association(name, FindOptions::default()).await,
        }
    }

    /// Length after loading
    pub async fn association_length(&mut self, name: &str) -> ModelResult<i64> {
        Ok(self.load_association(name).await?.len() as i64)
    }

    pub async fn association_is_empty(&self, name: &str) -> ModelResult<bool> {
        Ok(self.association_size(name).await? == 0)
    }

    pub async fn association_ids(&mut self, name: &str) -> ModelResult<Vec<Value>> {
        Ok(self.load_association(name).await?.records().iter().map(Record::id).collect())
    }

    pub async fn set_association_ids(&mut self, name: &str, ids: Vec<Value>) -> ModelResult<bool> {
        let rel = self.relation(name)?;
        let target = self.target_model(&rel).await?;
        let records = target.find_many(ids, FindOptions::default()).await?;
        self.replace_association(name, records).await
    }

    /// Loaded targets with duplicates (same key) removed
    pub async fn uniq_association(&mut self, name: &str) -> ModelResult<Vec<Record>> {
        let mut seen = HashSet::new();
        Ok(self
            .loaded_records(name)
            .await?
            .into_iter()
            .filter(|record| seen.insert(record.id().key()))
            .collect())
    }

    /// The dependent strategy of one relation, for `destroy` and `clear`
    async fn apply_dependent(&mut self, rel: &ResolvedRelation) -> ModelResult<()> {
        if rel.through.is_some() {
            return Ok(());
        }
        match (rel.kind, rel.dependent) {
            (RelationKind::BelongsTo, Dependent::Nullify) => {}
            (RelationKind::BelongsTo, Dependent::Delete) => {
                let key = self.read(&rel.foreign_key);
                if !key.is_null() {
                    let target = self.target_model(rel).await?;
                    target.delete(vec![key]).await?;
                }
            }
            (RelationKind::BelongsTo, Dependent::Destroy)
            | (RelationKind::HasOne | RelationKind::HasMany, Dependent::Destroy) => {
                let targets = self
                    .find_association(&rel.name, FindMode::All, FindOptions::default())
                    .await?
                    .many();
                for mut target in targets {
                    target.destroy().await?;
                }
            }
            (RelationKind::HasOne | RelationKind::HasMany, Dependent::Nullify) => {
                self.nullify_children(rel, None).await?;
            }
            (RelationKind::HasOne | RelationKind::HasMany, Dependent::Delete) => {
                let target = self.target_model(rel).await?;
                let statement = dml::delete(target.table_name(), Some(&Conditions::Equals(self.owner_pairs(rel))));
                target.connection().run(&statement).await?;
            }
            (RelationKind::HasAndBelongsToMany, Dependent::Nullify) => {
                self.delete_join_rows(rel, None).await?;
            }
            (RelationKind::HasAndBelongsToMany, Dependent::Delete) => {
                let target = self.target_model(rel).await?;
                let sql = format!(
                    "DELETE FROM {} WHERE {} IN (SELECT {} FROM {} WHERE {} = ?)",
                    target.table_name(),
                    target.primary_key(),
                    rel.association_foreign_key.as_deref().unwrap_or_default(),
                    rel.join_table.as_deref().unwrap_or_default(),
                    rel.foreign_key
                );
                target.connection().query(&sql, &[self.id()]).await?;
                self.delete_join_rows(rel, None).await?;
            }
            (RelationKind::HasAndBelongsToMany, Dependent::Destroy) => {
                let targets = self
                    .find_association(&rel.name, FindMode::All, FindOptions::default())
                    .await?
                    .many();
                for mut target in targets {
                    target.destroy().await?;
                }
                self.delete_join_rows(rel, None).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn destroy_dependents(&mut self) -> ModelResult<()> {
        let relations: Vec<ResolvedRelation> = self.model().meta().relations().cloned().collect();
        for rel in relations {
            self.apply_dependent(&rel).await?;
        }
        self.associations.clear();
        Ok(())
    }

    fn take_pending(&mut self, parents: bool) -> Vec<(ResolvedRelation, AssociationState)> {
        let names: Vec<String> = self
            .associations
            .iter()
            .filter(|(_, state)| state.pending)
            .map(|(name, _)| name.clone())
            .collect();
        let mut taken = Vec::new();
        for name in names {
            let Ok(rel) = self.relation(&name) else {
                continue;
            };
            if (rel.kind == RelationKind::BelongsTo) != parents {
                continue;
            }
            if let Some(state) = self.associations.remove(&name) {
                taken.push((rel, state));
            }
        }
        taken
    }

    /// Save pending belongs-to targets and copy their keys onto the owner.
    /// False when a target fails validation.
    pub(crate) async fn save_pending_parents(&mut self) -> ModelResult<bool> {
        let mut ok = true;
        for (rel, mut state) in self.take_pending(true) {
            let mut saved = true;
            if let Loaded::One(Some(parent)) = &mut state.loaded {
                if parent.is_new_record() && !parent.save().await? {
                    self.errors_mut().add(rel.name.clone(), format!("{} is invalid", rel.name));
                    saved = false;
                } else {
                    self.attach_parent(&rel, Some(&**parent))?;
                }
            } else {
                self.attach_parent(&rel, None)?;
            }
            state.pending = !saved;
            ok &= saved;
            self.associations.insert(rel.name.clone(), state);
        }
        Ok(ok)
    }

    /// Save and link pending has-* targets. A new owner links everything it
    /// holds; a persisted one only the targets that were still unsaved.
    pub(crate) async fn save_pending_children(&mut self, owner_was_new: bool) -> ModelResult<bool> {
        let mut ok = true;
        for (rel, mut state) in self.take_pending(false) {
            let mut saved = true;
            for target in state.loaded.records_mut() {
                let fresh = target.is_new_record();
                if rel.kind == RelationKind::HasAndBelongsToMany {
                    if fresh && !target.save().await? {
                        saved = false;
                        continue;
                    }
                    if owner_was_new || fresh {
                        self.insert_join_row(&rel, target.id()).await?;
                    }
                } else if owner_was_new || fresh {
                    if rel.through.is_none() {
                        self.attach_child(&rel, target)?;
                    }
                    if !target.save().await? {
                        saved = false;
                    }
                }
            }
            ok &= saved;
            if !saved {
                self.errors_mut().add(rel.name.clone(), format!("{} is invalid", rel.name));
            }
            state.pending = false;
            self.associations.insert(rel.name.clone(), state);
        }
        Ok(ok)
    }

    /// Deep-copy policy for `duplicate`: has-one/has-many children are
    /// duplicated and pending, join-table targets are shared and pending,
    /// belongs-to targets are shared as they are. Through relations are
    /// not copied.
    pub(crate) fn duplicate_associations(&self) -> ModelResult<HashMap<String, AssociationState>> {
        let mut copied = HashMap::new();
        for (name, state) in &self.associations {
            let rel = self.relation(name)?;
            let copy = match rel.kind {
                _ if rel.through.is_some() => continue,
                RelationKind::BelongsTo => state.clone(),
                RelationKind::HasAndBelongsToMany => AssociationState {
                    loaded: state.loaded.clone(),
                    pending: true,
                },
                RelationKind::HasOne | RelationKind::HasMany => {
                    let children = state
                        .loaded
                        .records()
                        .iter()
                        .map(|child| child.duplicate(Vec::<(String, Value)>::new()))
                        .collect::<ModelResult<Vec<_>>>()?;
                    let loaded = match state.loaded {
                        Loaded::One(_) => Loaded::One(children.into_iter().next().map(Box::new)),
                        Loaded::Many(_) => Loaded::Many(children),
                    };
                    AssociationState { loaded, pending: true }
                }
            };
            copied.insert(name.clone(), copy);
        }
        Ok(copied)
    }

    /// Invoke a dispatched method by name: association operations on this
    /// record, column finders on its model
    pub async fn call(&mut self, name: &str, args: Vec<Arg>) -> ModelResult<Dispatched> {
        let operation = self.model().dispatch().get(name).cloned().ok_or_else(|| ModelError::UndefinedMethod {
            model: self.class_name().to_string(),
            name: name.to_string(),
        })?;
        let args = CallArgs::from(args);

        let (relation, op) = match operation {
            Operation::Finder { .. } => {
                let model = self.model().clone();
                return model.call(name, args.values, args.options).await;
            }
            Operation::Association { relation, op } => (relation, op),
        };
        tracing::debug!(model = %self.class_name(), method = %name, "Association call");

        let is_collection = self.relation(&relation)?.is_collection();
        Ok(match op {
            AssociationOp::Find => {
                let find_arg = args
                    .find
                    .or_else(|| args.values.into_iter().next().map(FindArg::from))
                    .unwrap_or(FindArg::Mode(FindMode::All));
                let found = self
                    .find_association(&relation, find_arg, args.options)
                    .await?;
                match found {
                    Found::One(record) if !is_collection => Dispatched::Record(record),
                    found => Dispatched::Records(found.many()),
                }
            }
            AssociationOp::FindFirst => Dispatched::Record(self.find_first_association(&relation, args.options).await?),
            AssociationOp::FindLast => Dispatched::Record(self.find_last_association(&relation, args.options).await?),
            AssociationOp::Reset => {
                self.reset_association(&relation)?;
                Dispatched::Done
            }
            AssociationOp::Build => Dispatched::Record(Some(self.build_association(&relation, args.attrs).await?)),
            AssociationOp::Create => Dispatched::Record(Some(self.create_association(&relation, args.attrs).await?)),
            AssociationOp::Replace => Dispatched::Value(Value::Bool(self.replace_association(&relation, args.records).await?)),
            AssociationOp::Push => Dispatched::Value(Value::Bool(self.push_association(&relation, args.records).await?)),
            AssociationOp::Clear => {
                self.clear_association(&relation).await?;
                Dispatched::Done
            }
            AssociationOp::Delete => {
                Dispatched::Value(Value::from(self.delete_association(&relation, &args.records).await? as i64))
            }
            AssociationOp::Destroy => {
                Dispatched::Value(Value::from(self.destroy_association(&relation, args.records).await? as i64))
            }
            AssociationOp::Count => Dispatched::Value(Value::Integer(self.count_association(&relation, args.options).await?)),
            AssociationOp::Sum => {
                let column = args.values.first().and_then(Value::to_text).ok_or_else(|| {
                    ModelError::Query(format!("{} expects a column argument", name))
                })?;
                Dispatched::Value(self.sum_association(&relation, &column, args.options).await?)
            }
            AssociationOp::Size => Dispatched::Value(Value::Integer(self.association_size(&relation).await?)),
            AssociationOp::Length => Dispatched::Value(Value::Integer(self.association_length(&relation).await?)),
            AssociationOp::IsEmpty => Dispatched::Value(Value::Bool(self.association_is_empty(&relation).await?)),
            AssociationOp::Ids => Dispatched::Values(self.association_ids(&relation).await?),
            AssociationOp::SetIds => Dispatched::Value(Value::Bool(self.set_association_ids(&relation, args.values).await?)),
            AssociationOp::Uniq => Dispatched::Records(self.uniq_association(&relation).await?),
        })
    }
}

fn persisted_ids(records: &[Record]) -> Vec<Value> {
    records
        .iter()
        .filter(|r| !r.is_new_record())
        .map(Record::id)
        .collect()
}

/// Dispatched arguments sorted by shape
#[derive(Default)]
struct CallArgs {
    values: Vec<Value>,
    records: Vec<Record>,
    attrs: Vec<(String, Value)>,
    options: FindOptions,
    find: Option<FindArg>,
}

impl From<Vec<Arg>> for CallArgs {
    fn from(args: Vec<Arg>) -> Self {
        let mut sorted = CallArgs::default();
        for arg in args {
            match arg {
                Arg::Value(value) => sorted.values.push(value),
                Arg::Record(record) => sorted.records.push(record),
                Arg::Records(records) => sorted.records.extend(records),
                Arg::Attrs(attrs) => sorted.attrs.extend(attrs),
                Arg::Options(options) => sorted.options = options,
                Arg::Find(find) => sorted.find = Some(find),
            }
        }
        sorted
    }
}

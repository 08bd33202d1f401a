//! Model-level reads: `find` in all its shapes, SQL escapes and the
//! dynamic finders published in the dispatch table

use std::collections::HashSet;

use crate::error::{ModelError, ModelResult};
use crate::loading;
use crate::query::{Conditions, FindArg, FindMode, FindOptions, QueryBuilder, QueryOptions};
use crate::value::Value;

use super::definition::{CallbackKind, ObservedEvent};
use super::dispatch::{FinderKind, Operation};
use super::{Dispatched, Found, Model, Record};

impl Model {
    /// Record by primary key, `NotFound` when absent
    pub async fn find(&self, id: impl Into<Value>) -> ModelResult<Record> {
        let id = id.into();
        self.find_with(FindArg::Id(id.clone()), FindOptions::default())
            .await?
            .one()
            .ok_or_else(|| ModelError::NotFound {
                model: self.class_name().to_string(),
                ids: id.to_string(),
            })
    }

    /// `find(first | last | all | id | ids, options)`.
    ///
    /// With `include`, rows of one root record must come back contiguous;
    /// give an `order` that keeps them together when joins could interleave.
    pub async fn find_with(&self, arg: impl Into<FindArg>, options: FindOptions) -> ModelResult<Found> {
        let arg = arg.into();
        let single = matches!(arg, FindArg::Id(_));
        let requested = match &arg {
            FindArg::Id(id) => vec![id.clone()],
            FindArg::Ids(ids) => ids.clone(),
            FindArg::Mode(_) => Vec::new(),
        };
        let mut query = QueryOptions::normalize(self.table_name(), options);

        match query.apply_arg(arg) {
            FindMode::First => {
                query.limit = Some(1);
                Ok(Found::One(self.select(query).await?.into_iter().next()))
            }
            FindMode::Last => {
                query.reverse_order(self.table_name(), self.primary_key());
                query.limit = Some(1);
                Ok(Found::One(self.select(query).await?.into_iter().next()))
            }
            FindMode::All => {
                let ids = if requested.is_empty() { query.ids.clone() } else { requested };
                let records = self.select(query).await?;
                if !ids.is_empty() {
                    let wanted: HashSet<String> = ids.iter().map(Value::key).collect();
                    if records.len() < wanted.len() {
                        return Err(ModelError::NotFound {
                            model: self.class_name().to_string(),
                            ids: ids.iter().map(Value::to_string).collect::<Vec<_>>().join(", "),
                        });
                    }
                }
                if single {
                    Ok(Found::One(records.into_iter().next()))
                } else {
                    Ok(Found::Many(records))
                }
            }
        }
    }

    pub async fn find_many<V: Into<Value>>(&self, ids: Vec<V>, options: FindOptions) -> ModelResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.find_with(FindArg::ids(ids), options).await?.many())
    }

    pub async fn first(&self, options: FindOptions) -> ModelResult<Option<Record>> {
        Ok(self.find_with(FindMode::First, options).await?.one())
    }

    pub async fn last(&self, options: FindOptions) -> ModelResult<Option<Record>> {
        Ok(self.find_with(FindMode::Last, options).await?.one())
    }

    pub async fn all(&self, options: FindOptions) -> ModelResult<Vec<Record>> {
        Ok(self.find_with(FindMode::All, options).await?.many())
    }

    /// First record whose columns equal `pairs`
    pub async fn find_by<K, V>(&self, pairs: Vec<(K, V)>, options: FindOptions) -> ModelResult<Option<Record>>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.first(options.and_conditions(self.equality(pairs))).await
    }

    pub async fn find_all_by<K, V>(&self, pairs: Vec<(K, V)>, options: FindOptions) -> ModelResult<Vec<Record>>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.all(options.and_conditions(self.equality(pairs))).await
    }

    pub async fn exists(&self, id: impl Into<Value>) -> ModelResult<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            self.table_name(),
            self.primary_key()
        );
        let count = self.connection().select_value(&sql, &[id.into()]).await?;
        Ok(count.as_i64().unwrap_or(0) > 0)
    }

    /// One record per row of an arbitrary SELECT
    pub async fn find_by_sql(&self, sql: &str, values: &[Value]) -> ModelResult<Vec<Record>> {
        self.before_find()?;
        let rows = self.connection().select(sql, values).await?;
        let records = rows
            .into_iter()
            .map(|row| Record::from_row(self.clone(), row, false))
            .collect();
        Self::after_find(records)
    }

    /// First column of the first row as an integer
    pub async fn count_by_sql(&self, sql: &str, values: &[Value]) -> ModelResult<i64> {
        Ok(self.connection().select_value(sql, values).await?.as_i64().unwrap_or(0))
    }

    /// Existing match, or a record created from `pairs`
    pub async fn find_or_create_by<K, V>(&self, pairs: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let pairs = owned(pairs);
        match self.find_by(pairs.clone(), FindOptions::default()).await? {
            Some(record) => Ok(record),
            None => self.create(pairs).await,
        }
    }

    /// Existing match, or an unsaved record built from `pairs`
    pub async fn find_or_initialize_by<K, V>(&self, pairs: Vec<(K, V)>) -> ModelResult<Record>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let pairs = owned(pairs);
        match self.find_by(pairs.clone(), FindOptions::default()).await? {
            Some(record) => Ok(record),
            None => self.new_record(pairs),
        }
    }

    /// Invoke a dynamic finder by name, e.g. `find_all_by_user_id_and_state`
    pub async fn call(&self, name: &str, args: Vec<Value>, options: FindOptions) -> ModelResult<Dispatched> {
        let (kind, fields) = match self.dispatch().get(name) {
            Some(Operation::Finder { kind, fields }) => (*kind, fields.clone()),
            _ => {
                return Err(ModelError::UndefinedMethod {
                    model: self.class_name().to_string(),
                    name: name.to_string(),
                })
            }
        };
        if args.len() != fields.len() {
            return Err(ModelError::Query(format!(
                "{} expects {} argument(s), got {}",
                name,
                fields.len(),
                args.len()
            )));
        }
        let pairs: Vec<(String, Value)> = fields.into_iter().zip(args).collect();

        tracing::debug!(model = %self.class_name(), method = %name, "Dynamic finder");
        Ok(match kind {
            FinderKind::FindBy => Dispatched::Record(self.find_by(pairs, options).await?),
            FinderKind::FindAllBy => Dispatched::Records(self.find_all_by(pairs, options).await?),
            FinderKind::CountBy => {
                let options = options.and_conditions(self.equality(pairs));
                Dispatched::Value(Value::Integer(self.count(options).await?))
            }
            FinderKind::FindOrCreateBy => Dispatched::Record(Some(self.find_or_create_by(pairs).await?)),
            FinderKind::FindOrInitializeBy => Dispatched::Record(Some(self.find_or_initialize_by(pairs).await?)),
        })
    }

    /// Run normalized options: the eager-load path when `include` is set,
    /// otherwise one record per row
    pub(crate) async fn select(&self, options: QueryOptions) -> ModelResult<Vec<Record>> {
        self.before_find()?;
        if options.has_include() {
            let records = loading::find_with_includes(self, options).await?;
            return Self::after_find(records);
        }
        let key = if options.joins.is_some() {
            self.qualified_key()
        } else {
            self.primary_key().to_string()
        };
        let statement = QueryBuilder::simple(&options)
            .where_options(&options)
            .where_ids(&key, &options.ids)
            .build(&options, self.connection().adapter());
        let rows = self.connection().run(&statement).await?.into_rows();
        let records = rows
            .into_iter()
            .map(|row| Record::from_row(self.clone(), row, options.readonly))
            .collect();
        Self::after_find(records)
    }

    fn before_find(&self) -> ModelResult<()> {
        for hook in &self.def().find_hooks {
            hook(self)?;
        }
        self.def().notify(ObservedEvent {
            kind: CallbackKind::BeforeFind,
            model: self.class_name(),
            relation: None,
            record: None,
        })
    }

    /// `after_find` callbacks and observers, once per record found
    fn after_find(mut records: Vec<Record>) -> ModelResult<Vec<Record>> {
        for record in &mut records {
            record.run_callbacks(CallbackKind::AfterFind)?;
        }
        Ok(records)
    }

    /// `table.field = ?` for each pair
    pub(crate) fn equality<K, V>(&self, pairs: Vec<(K, V)>) -> Conditions
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Conditions::Equals(
            pairs
                .into_iter()
                .map(|(field, value)| {
                    let field: String = field.into();
                    let field = if field.contains('.') {
                        field
                    } else {
                        format!("{}.{}", self.table_name(), field)
                    };
                    (field, value.into())
                })
                .collect(),
        )
    }
}

fn owned<K: Into<String>, V: Into<Value>>(pairs: Vec<(K, V)>) -> Vec<(String, Value)> {
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
